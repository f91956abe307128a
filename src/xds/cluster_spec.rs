//! Cluster-specifier plugin registry and resolution.
//!
//! A RouteConfiguration may declare named cluster-specifier plugins that
//! routes reference by name instead of a literal cluster. Each declaration is
//! an `envoy.config.core.v3.TypedExtensionConfig` whose payload resolves
//! through a registry keyed by type URL, mirroring the HTTP filter registry
//! but with its own optionality policy: an unsupported *optional* plugin
//! yields nothing (routes referencing it are skipped), while an unsupported
//! required plugin rejects the whole resource.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use envoy_types::pb::envoy::config::route::v3::ClusterSpecifierPlugin as ClusterSpecifierPluginProto;
use once_cell::sync::Lazy;
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::ResourceInvalid;
use crate::xds::extension::{parse_proto_duration, unwrap_extension, ExtensionPayload};

/// RouteLookup (RLS) cluster specifier type URL
pub const ROUTE_LOOKUP_TYPE_URL: &str =
    "type.googleapis.com/grpc.lookup.v1.RouteLookupClusterSpecifier";

/// Parsed cluster-specifier plugin configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginConfig {
    /// Route-lookup-service plugin.
    RouteLookup(RouteLookupConfig),
    /// Config from a provider without a structured representation here.
    Typed { type_url: String, config: JsonValue },
}

/// A plugin declaration resolved to its name plus parsed config.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedPluginConfig {
    pub name: String,
    pub config: PluginConfig,
}

/// A registered cluster-specifier plugin implementation.
pub trait ClusterSpecifierPluginProvider: Send + Sync {
    /// Type URLs this provider claims.
    fn type_urls(&self) -> &'static [&'static str];

    /// Parse a plugin config into its canonical form. Errors are plain
    /// strings and reject the resource verbatim.
    fn parse_plugin(&self, payload: &ExtensionPayload) -> Result<PluginConfig, String>;
}

/// Registry of cluster-specifier plugin providers keyed by type URL.
#[derive(Default)]
pub struct ClusterSpecifierPluginRegistry {
    providers: HashMap<String, Arc<dyn ClusterSpecifierPluginProvider>>,
}

static GLOBAL_PLUGIN_REGISTRY: Lazy<ClusterSpecifierPluginRegistry> =
    Lazy::new(ClusterSpecifierPluginRegistry::with_builtin_providers);

impl ClusterSpecifierPluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in providers.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RouteLookupProvider));
        registry
    }

    /// The process-wide registry consulted by default.
    pub fn global() -> &'static Self {
        &GLOBAL_PLUGIN_REGISTRY
    }

    /// Register a provider under every type URL it claims.
    pub fn register(&mut self, provider: Arc<dyn ClusterSpecifierPluginProvider>) {
        for url in provider.type_urls() {
            self.providers.insert((*url).to_string(), provider.clone());
        }
    }

    /// Look up the provider claiming `type_url`.
    pub fn lookup(&self, type_url: &str) -> Option<&dyn ClusterSpecifierPluginProvider> {
        self.providers.get(type_url).map(Arc::as_ref)
    }
}

/// Resolve one plugin declaration.
///
/// Returns `Ok(None)` when the plugin type is unsupported but the declaration
/// is marked optional; the caller records the name so routes referencing it
/// can be skipped instead of rejected.
pub fn parse_plugin(
    registry: &ClusterSpecifierPluginRegistry,
    plugin: &ClusterSpecifierPluginProto,
) -> Result<Option<PluginConfig>, ResourceInvalid> {
    let extension = plugin
        .extension
        .as_ref()
        .ok_or_else(|| ResourceInvalid::new("ClusterSpecifierPlugin is missing its extension"))?;
    let any = extension.typed_config.clone().unwrap_or_default();
    let unwrapped = unwrap_extension(&any)?;

    match registry.lookup(&unwrapped.type_url) {
        None if plugin.is_optional => Ok(None),
        None => Err(ResourceInvalid::new(format!(
            "Unsupported ClusterSpecifierPlugin type: {}",
            unwrapped.type_url
        ))),
        Some(provider) => {
            provider.parse_plugin(&unwrapped.payload).map(Some).map_err(ResourceInvalid::new)
        }
    }
}

/// Local bindings for the `grpc.lookup.v1` specifier messages. Decoding skips
/// the key-builder layout, which this layer carries opaquely and does not
/// interpret.
#[derive(Clone, PartialEq, ::prost::Message)]
struct RouteLookupClusterSpecifier {
    #[prost(message, optional, tag = "1")]
    route_lookup_config: Option<RouteLookupConfigProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct RouteLookupConfigProto {
    #[prost(string, tag = "3")]
    lookup_service: String,
    #[prost(message, optional, tag = "4")]
    lookup_service_timeout: Option<prost_types::Duration>,
    #[prost(message, optional, tag = "5")]
    max_age: Option<prost_types::Duration>,
    #[prost(message, optional, tag = "6")]
    stale_age: Option<prost_types::Duration>,
    #[prost(int64, tag = "7")]
    cache_size_bytes: i64,
    #[prost(string, repeated, tag = "8")]
    valid_targets: Vec<String>,
    #[prost(string, tag = "9")]
    default_target: String,
}

/// Parsed route-lookup-service plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLookupConfig {
    /// Target URI of the lookup service.
    pub lookup_service: String,
    pub lookup_service_timeout: Option<Duration>,
    pub max_age: Option<Duration>,
    pub stale_age: Option<Duration>,
    pub cache_size_bytes: i64,
    pub valid_targets: Vec<String>,
    pub default_target: Option<String>,
}

impl RouteLookupConfig {
    fn validate(self) -> Result<Self, String> {
        if self.lookup_service.is_empty() {
            return Err("RouteLookupConfig must have a valid lookup_service".to_string());
        }
        Ok(self)
    }

    fn from_proto(proto: &RouteLookupConfigProto) -> Result<Self, String> {
        Self {
            lookup_service: proto.lookup_service.clone(),
            lookup_service_timeout: proto.lookup_service_timeout.as_ref().map(std_duration),
            max_age: proto.max_age.as_ref().map(std_duration),
            stale_age: proto.stale_age.as_ref().map(std_duration),
            cache_size_bytes: proto.cache_size_bytes,
            valid_targets: proto.valid_targets.clone(),
            default_target: non_empty(&proto.default_target),
        }
        .validate()
    }

    fn from_json(value: &JsonValue) -> Result<Self, String> {
        let config = value
            .get("routeLookupConfig")
            .ok_or_else(|| "RouteLookupClusterSpecifier is missing routeLookupConfig".to_string())?;

        Self {
            lookup_service: config
                .get("lookupService")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string(),
            lookup_service_timeout: read_duration(config, "lookupServiceTimeout")?,
            max_age: read_duration(config, "maxAge")?,
            stale_age: read_duration(config, "staleAge")?,
            cache_size_bytes: read_i64(config, "cacheSizeBytes")?,
            valid_targets: config
                .get("validTargets")
                .and_then(JsonValue::as_array)
                .map(|targets| {
                    targets
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            default_target: config
                .get("defaultTarget")
                .and_then(JsonValue::as_str)
                .and_then(|target| non_empty(target)),
        }
        .validate()
    }
}

/// Provider for the RouteLookup (RLS) cluster specifier.
pub struct RouteLookupProvider;

impl ClusterSpecifierPluginProvider for RouteLookupProvider {
    fn type_urls(&self) -> &'static [&'static str] {
        &[ROUTE_LOOKUP_TYPE_URL]
    }

    fn parse_plugin(&self, payload: &ExtensionPayload) -> Result<PluginConfig, String> {
        let config = match payload {
            ExtensionPayload::Proto(bytes) => {
                let specifier = RouteLookupClusterSpecifier::decode(bytes.as_slice())
                    .map_err(|e| format!("Failed to decode RouteLookupClusterSpecifier: {}", e))?;
                let proto = specifier.route_lookup_config.ok_or_else(|| {
                    "RouteLookupClusterSpecifier is missing route_lookup_config".to_string()
                })?;
                RouteLookupConfig::from_proto(&proto)?
            }
            ExtensionPayload::Json(value) => RouteLookupConfig::from_json(value)?,
        };
        Ok(PluginConfig::RouteLookup(config))
    }
}

fn std_duration(duration: &prost_types::Duration) -> Duration {
    let nanos =
        (duration.seconds as i128 * 1_000_000_000 + duration.nanos as i128).max(0);
    Duration::from_nanos(nanos.min(u64::MAX as i128) as u64)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn read_duration(value: &JsonValue, key: &str) -> Result<Option<Duration>, String> {
    match value.get(key) {
        None => Ok(None),
        Some(field) => {
            let text = field
                .as_str()
                .ok_or_else(|| format!("RouteLookupConfig {} must be a duration string", key))?;
            parse_proto_duration(text).map(Some)
        }
    }
}

// Protobuf JSON renders int64 as a string; accept a bare number as well.
fn read_i64(value: &JsonValue, key: &str) -> Result<i64, String> {
    match value.get(key) {
        None => Ok(0),
        Some(field) => field
            .as_i64()
            .or_else(|| field.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| format!("RouteLookupConfig {} must be an integer", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::core::v3::TypedExtensionConfig;
    use envoy_types::pb::google::protobuf::Any;
    use serde_json::json;

    fn specifier_proto(lookup_service: &str) -> RouteLookupClusterSpecifier {
        RouteLookupClusterSpecifier {
            route_lookup_config: Some(RouteLookupConfigProto {
                lookup_service: lookup_service.to_string(),
                lookup_service_timeout: Some(prost_types::Duration { seconds: 2, nanos: 0 }),
                cache_size_bytes: 1024,
                default_target: "fallback".to_string(),
                ..Default::default()
            }),
        }
    }

    fn plugin_proto(name: &str, type_url: &str, value: Vec<u8>, is_optional: bool) -> ClusterSpecifierPluginProto {
        ClusterSpecifierPluginProto {
            extension: Some(TypedExtensionConfig {
                name: name.to_string(),
                typed_config: Some(Any { type_url: type_url.to_string(), value }),
            }),
            is_optional,
        }
    }

    #[test]
    fn parses_route_lookup_proto() {
        let bytes = specifier_proto("dns:///rls.example.com:443").encode_to_vec();
        let plugin = plugin_proto("rls", ROUTE_LOOKUP_TYPE_URL, bytes, false);

        let config = parse_plugin(ClusterSpecifierPluginRegistry::global(), &plugin)
            .expect("parse")
            .expect("resolved");
        match config {
            PluginConfig::RouteLookup(config) => {
                assert_eq!(config.lookup_service, "dns:///rls.example.com:443");
                assert_eq!(config.lookup_service_timeout, Some(Duration::from_secs(2)));
                assert_eq!(config.cache_size_bytes, 1024);
                assert_eq!(config.default_target.as_deref(), Some("fallback"));
            }
            other => panic!("unexpected plugin config: {:?}", other),
        }
    }

    #[test]
    fn parses_route_lookup_json() {
        let body = json!({
            "routeLookupConfig": {
                "lookupService": "dns:///rls.example.com:443",
                "lookupServiceTimeout": "0.1s",
                "cacheSizeBytes": "2048",
                "validTargets": ["a", "b"]
            }
        });

        let config = RouteLookupProvider
            .parse_plugin(&ExtensionPayload::Json(body))
            .expect("parse");
        match config {
            PluginConfig::RouteLookup(config) => {
                assert_eq!(config.lookup_service_timeout, Some(Duration::from_millis(100)));
                assert_eq!(config.cache_size_bytes, 2048);
                assert_eq!(config.valid_targets, vec!["a", "b"]);
                assert_eq!(config.default_target, None);
            }
            other => panic!("unexpected plugin config: {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_lookup_service() {
        let bytes = RouteLookupClusterSpecifier {
            route_lookup_config: Some(RouteLookupConfigProto::default()),
        }
        .encode_to_vec();
        let plugin = plugin_proto("rls", ROUTE_LOOKUP_TYPE_URL, bytes, false);

        let err = parse_plugin(ClusterSpecifierPluginRegistry::global(), &plugin)
            .expect_err("should fail");
        assert_eq!(err.message(), "RouteLookupConfig must have a valid lookup_service");
    }

    #[test]
    fn unsupported_required_plugin_rejects() {
        let plugin = plugin_proto("p", "type.googleapis.com/unknown.Plugin", Vec::new(), false);
        let err = parse_plugin(ClusterSpecifierPluginRegistry::global(), &plugin)
            .expect_err("should fail");
        assert_eq!(
            err.message(),
            "Unsupported ClusterSpecifierPlugin type: type.googleapis.com/unknown.Plugin"
        );
    }

    #[test]
    fn unsupported_optional_plugin_yields_nothing() {
        let plugin = plugin_proto("p", "type.googleapis.com/unknown.Plugin", Vec::new(), true);
        let resolved =
            parse_plugin(ClusterSpecifierPluginRegistry::global(), &plugin).expect("parse");
        assert!(resolved.is_none());
    }
}
