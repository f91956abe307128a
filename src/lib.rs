//! # Routeplane
//!
//! Routeplane is the RDS (Route Discovery Service) resource parser and
//! validator of an xDS-compliant gRPC client. It translates
//! `envoy.config.route.v3.RouteConfiguration` protobuf messages delivered by
//! a control plane into a normalized, immutable in-memory route table that
//! the client's request-routing layer executes against.
//!
//! ## Architecture
//!
//! ```text
//! ADS stream → resource dispatch → routeplane parser → route table
//!                                        ↓
//!                        filter / cluster-specifier registries
//! ```
//!
//! ## Core Components
//!
//! - **Resource driver**: [`xds::route::parse_resource`] validates a whole
//!   RouteConfiguration atomically; the first unrecoverable error rejects the
//!   update
//! - **Match and action parsers**: path/header/fraction matchers, cluster
//!   selection, hash policies, retry policies
//! - **Extension registries**: HTTP filters and cluster-specifier plugins
//!   resolved by type URL at parse time

pub mod config;
pub mod errors;
pub mod observability;
pub mod xds;

// Re-export commonly used types and traits
pub use config::FeatureFlags;
pub use errors::{Error, ResourceInvalid, Result, RouteplaneError};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
