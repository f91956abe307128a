//! # Configuration Settings
//!
//! Process-wide feature flags consumed by the RDS parser. The flags are read
//! from the environment once by the embedding client and then plumbed through
//! every parse call as plain data, so tests can exercise both sides of each
//! flag without mutating the process environment.

/// Environment variable gating route-lookup (RLS) cluster-specifier plugins.
pub const RLS_LB_FLAG: &str = "GRPC_EXPERIMENTAL_XDS_RLS_LB";

/// Environment variable gating authority rewriting on trusted xDS servers.
pub const AUTHORITY_REWRITE_FLAG: &str = "GRPC_EXPERIMENTAL_XDS_AUTHORITY_REWRITE";

/// Experiment flags that alter how RouteConfiguration resources are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Whether `cluster_specifier_plugins` are honored. On by default.
    pub enable_route_lookup: bool,
    /// Whether `auto_host_rewrite` is honored for trusted servers. Off by default.
    pub enable_authority_rewrite: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { enable_route_lookup: true, enable_authority_rewrite: false }
    }
}

impl FeatureFlags {
    /// Read both flags from the environment, falling back to the defaults for
    /// unset or unrecognized values.
    pub fn from_env() -> Self {
        Self {
            enable_route_lookup: env_bool(RLS_LB_FLAG, true),
            enable_authority_rewrite: env_bool(AUTHORITY_REWRITE_FLAG, false),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
