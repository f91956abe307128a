//! Router HTTP filter provider.

use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use prost::Message;

use crate::xds::extension::ExtensionPayload;
use crate::xds::filters::{FilterConfig, HttpFilterProvider};

/// Envoy's canonical router filter type URL
pub const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

/// The terminal router filter. Its override config carries no tunables that
/// apply at route scope, so parsing only validates the payload shape.
pub struct RouterProvider;

impl HttpFilterProvider for RouterProvider {
    fn type_urls(&self) -> &'static [&'static str] {
        &[ROUTER_TYPE_URL]
    }

    fn parse_override(&self, payload: &ExtensionPayload) -> Result<FilterConfig, String> {
        match payload {
            ExtensionPayload::Proto(bytes) => {
                Router::decode(bytes.as_slice())
                    .map_err(|e| format!("Failed to decode router config: {}", e))?;
            }
            ExtensionPayload::Json(value) => {
                if !value.is_object() {
                    return Err("Router config must be a JSON object".to_string());
                }
            }
        }
        Ok(FilterConfig::Router)
    }
}
