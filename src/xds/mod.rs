//! Envoy xDS (eXtended Discovery Service) resource parsing.
//!
//! routeplane implements the client side of RDS (Route Discovery Service):
//! validating `RouteConfiguration` resources delivered over an ADS stream and
//! producing the immutable route table the request-routing layer executes
//! against. The transport, the resource-type dispatch harness, and the
//! LDS/CDS/EDS parsers live in the consuming client.

pub mod cluster_spec;
pub mod extension;
pub mod filters;
pub(crate) mod resources;
pub mod route;

use crate::config::FeatureFlags;
use crate::xds::cluster_spec::ClusterSpecifierPluginRegistry;
use crate::xds::filters::FilterRegistry;

pub use resources::ROUTE_CONFIGURATION_TYPE_URL;

/// Capabilities of the xDS server a resource update arrived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerInfo {
    trusted_xds_server: bool,
}

impl ServerInfo {
    pub fn new(trusted_xds_server: bool) -> Self {
        Self { trusted_xds_server }
    }

    /// Whether the control plane is trusted with privileged semantics such as
    /// authority rewriting.
    pub fn is_trusted_xds_server(&self) -> bool {
        self.trusted_xds_server
    }
}

/// Read-only inputs threaded through a single resource parse.
///
/// Registries default to the process-wide instances; tests inject their own
/// alongside explicit [`FeatureFlags`] so both sides of each experiment flag
/// can be exercised without touching the environment.
#[derive(Clone, Copy)]
pub struct ResourceContext<'a> {
    pub server_info: ServerInfo,
    pub filter_registry: &'a FilterRegistry,
    pub plugin_registry: &'a ClusterSpecifierPluginRegistry,
    pub flags: FeatureFlags,
}

impl ResourceContext<'static> {
    /// Context backed by the global registries.
    pub fn new(server_info: ServerInfo, flags: FeatureFlags) -> Self {
        Self {
            server_info,
            filter_registry: FilterRegistry::global(),
            plugin_registry: ClusterSpecifierPluginRegistry::global(),
            flags,
        }
    }
}
