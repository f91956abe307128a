//! Resource type URLs and `Any` unpacking.

use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

use crate::errors::ResourceInvalid;

/// v3 RouteConfiguration resource type URL. Earlier API versions are not
/// accepted.
pub const ROUTE_CONFIGURATION_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// Unpack an `Any`-carried RouteConfiguration.
pub(crate) fn route_configuration_from_any(
    resource: &Any,
) -> Result<RouteConfiguration, ResourceInvalid> {
    if resource.type_url != ROUTE_CONFIGURATION_TYPE_URL {
        return Err(ResourceInvalid::new(format!(
            "Unexpected resource type: {}",
            resource.type_url
        )));
    }
    RouteConfiguration::decode(resource.value.as_slice())
        .map_err(|e| ResourceInvalid::new(format!("Malformed RouteConfiguration: {}", e)))
}
