//! Built-in HTTP filter providers.
//!
//! Each submodule implements [`HttpFilterProvider`](super::HttpFilterProvider)
//! for one Envoy filter family and registers its configuration structs here.

pub mod local_rate_limit;
pub mod router;
