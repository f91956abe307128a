//! HTTP filter registry and per-filter override resolution.
//!
//! RouteConfiguration resources attach filter configuration overrides at the
//! virtual-host, route, and weighted-cluster scopes through
//! `typed_per_filter_config` maps keyed by filter instance name. Each entry
//! carries a `google.protobuf.Any` that may be wrapped in an
//! `envoy.config.route.v3.FilterConfig` (for optionality) and/or a TypedStruct
//! envelope. This module resolves those entries against a registry of filter
//! providers keyed by type URL.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use envoy_types::pb::envoy::config::route::v3::FilterConfig as FilterConfigWrapper;
use envoy_types::pb::google::protobuf::Any;
use once_cell::sync::Lazy;
use prost::Message;
use serde_json::Value as JsonValue;

use crate::errors::ResourceInvalid;
use crate::xds::extension::{unwrap_extension, ExtensionPayload};
use crate::xds::filters::http::local_rate_limit::{LocalRateLimitOverride, LocalRateLimitProvider};
use crate::xds::filters::http::router::RouterProvider;

/// Wrapper message URL that carries the `is_optional` marker around a filter
/// override.
pub const FILTER_CONFIG_WRAPPER_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.route.v3.FilterConfig";

/// Parsed per-scope filter override.
///
/// Structured variants exist for the built-in providers; anything else a
/// provider produces travels as a `Typed` payload. Values round-trip
/// unmodified into the parsed route table.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterConfig {
    /// Terminal router filter; carries no tunables at override scope.
    Router,
    /// Local rate limit overrides.
    LocalRateLimit(LocalRateLimitOverride),
    /// Config from a provider without a structured representation here.
    Typed { type_url: String, config: JsonValue },
}

/// A registered HTTP filter implementation.
pub trait HttpFilterProvider: Send + Sync {
    /// Type URLs this provider claims.
    fn type_urls(&self) -> &'static [&'static str];

    /// Parse a per-scope override config into its canonical form.
    ///
    /// Errors are plain strings; the resolver frames them with the filter
    /// instance name before rejecting the resource.
    fn parse_override(&self, payload: &ExtensionPayload) -> Result<FilterConfig, String>;
}

/// Registry of HTTP filter providers keyed by type URL.
#[derive(Default)]
pub struct FilterRegistry {
    providers: HashMap<String, Arc<dyn HttpFilterProvider>>,
}

static GLOBAL_FILTER_REGISTRY: Lazy<FilterRegistry> =
    Lazy::new(FilterRegistry::with_builtin_providers);

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in providers.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RouterProvider));
        registry.register(Arc::new(LocalRateLimitProvider));
        registry
    }

    /// The process-wide registry consulted by default.
    pub fn global() -> &'static Self {
        &GLOBAL_FILTER_REGISTRY
    }

    /// Register a provider under every type URL it claims. Later
    /// registrations win on collision.
    pub fn register(&mut self, provider: Arc<dyn HttpFilterProvider>) {
        for url in provider.type_urls() {
            self.providers.insert((*url).to_string(), provider.clone());
        }
    }

    /// Look up the provider claiming `type_url`.
    pub fn lookup(&self, type_url: &str) -> Option<&dyn HttpFilterProvider> {
        self.providers.get(type_url).map(Arc::as_ref)
    }
}

/// Resolve a `typed_per_filter_config` map into parsed overrides.
///
/// Entries wrapped in `envoy.config.route.v3.FilterConfig` contribute their
/// `is_optional` marker: an optional entry whose final type URL has no
/// registered provider is dropped, while a required one rejects the resource.
pub fn parse_filter_overrides(
    registry: &FilterRegistry,
    typed_per_filter_config: &HashMap<String, Any>,
) -> Result<HashMap<String, FilterConfig>, ResourceInvalid> {
    let mut overrides = HashMap::with_capacity(typed_per_filter_config.len());

    for (name, any) in typed_per_filter_config {
        let mut is_optional = false;
        let mut raw = any.clone();

        if raw.type_url == FILTER_CONFIG_WRAPPER_TYPE_URL {
            let wrapper = FilterConfigWrapper::decode(raw.value.as_slice()).map_err(|e| {
                ResourceInvalid::new(format!(
                    "HttpFilter [{}] contains an invalid FilterConfig wrapper: {}",
                    name, e
                ))
            })?;
            is_optional = wrapper.is_optional;
            raw = wrapper.config.unwrap_or_default();
        }

        let extension =
            unwrap_extension(&raw).map_err(|e| e.in_context(format!("HttpFilter [{}]", name)))?;

        let provider = match registry.lookup(&extension.type_url) {
            Some(provider) => provider,
            None if is_optional => {
                tracing::debug!(
                    filter = %name,
                    type_url = %extension.type_url,
                    "skipping optional filter override with unsupported type"
                );
                continue;
            }
            None => {
                return Err(ResourceInvalid::new(format!(
                    "HttpFilter [{}]({}) is required but unsupported",
                    name, extension.type_url
                )))
            }
        };

        let config = provider.parse_override(&extension.payload).map_err(|e| {
            ResourceInvalid::new(format!("Invalid filter config for HttpFilter [{}]: {}", name, e))
        })?;
        overrides.insert(name.clone(), config);
    }

    Ok(overrides)
}
