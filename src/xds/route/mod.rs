//! RDS resource parsing.
//!
//! The entry points in this module turn an `envoy.config.route.v3.
//! RouteConfiguration` into a [`RouteConfigUpdate`]. Validation is atomic: the
//! first unrecoverable error rejects the whole resource, and a partial tree is
//! never returned. Routes this client cannot execute (query-parameter
//! matchers, `cluster_header` specifiers, optional-but-unsupported plugins)
//! are dropped individually without failing the update.

mod action;
mod matchers;
mod retry;
pub mod types;

use std::collections::{HashMap, HashSet};

use envoy_types::pb::envoy::config::route::v3::route::Action;
use envoy_types::pb::envoy::config::route::v3::{
    Route as RouteProto, RouteConfiguration, VirtualHost as VirtualHostProto,
};
use envoy_types::pb::google::protobuf::{Any, Duration as ProtoDuration};
use tracing::debug;

use crate::errors::ResourceInvalid;
use crate::xds::cluster_spec::{self, PluginConfig};
use crate::xds::filters::parse_filter_overrides;
use crate::xds::resources;
use crate::xds::ResourceContext;

pub use types::{
    ClusterSpecifier, ClusterWeight, FractionMatcher, HashPolicy, HeaderMatchKind, HeaderMatcher,
    PathMatcher, RetryPolicy, Route, RouteAction, RouteConfigUpdate, RouteMatch, VirtualHost,
};

/// Resource name under which the dispatch harness indexes this update.
pub fn extract_name(message: &RouteConfiguration) -> &str {
    &message.name
}

/// Parse an `Any`-packed RouteConfiguration resource.
///
/// Rejects the resource when the type URL is not the v3 RouteConfiguration
/// URL or the payload does not decode.
pub fn parse_resource(
    ctx: &ResourceContext<'_>,
    resource: &Any,
) -> Result<RouteConfigUpdate, ResourceInvalid> {
    let message = resources::route_configuration_from_any(resource)?;
    parse_route_configuration(ctx, &message)
}

/// Parse an unpacked RouteConfiguration.
pub fn parse_route_configuration(
    ctx: &ResourceContext<'_>,
    message: &RouteConfiguration,
) -> Result<RouteConfigUpdate, ResourceInvalid> {
    // Named plugins are declared up front and referenced from route actions,
    // so they are collected before any virtual host is visited. The whole
    // mechanism is gated on the route-lookup experiment.
    let (plugin_configs, optional_plugins) = if ctx.flags.enable_route_lookup {
        collect_cluster_specifier_plugins(ctx, message)?
    } else {
        (HashMap::new(), HashSet::new())
    };

    let mut virtual_hosts = Vec::with_capacity(message.virtual_hosts.len());
    for vhost in &message.virtual_hosts {
        let parsed = parse_virtual_host(ctx, vhost, &plugin_configs, &optional_plugins)
            .map_err(|e| {
                e.in_context(format!("Failed to parse virtual host [{}]", vhost.name))
            })?;
        virtual_hosts.push(parsed);
    }

    debug!(
        resource = %message.name,
        virtual_hosts = virtual_hosts.len(),
        "parsed RouteConfiguration"
    );

    Ok(RouteConfigUpdate { name: message.name.clone(), virtual_hosts })
}

/// Names declared as plugins that parsed cleanly but whose type is
/// unsupported and optional; routes referencing them are skipped.
type OptionalPluginSet = HashSet<String>;

fn collect_cluster_specifier_plugins(
    ctx: &ResourceContext<'_>,
    message: &RouteConfiguration,
) -> Result<(HashMap<String, PluginConfig>, OptionalPluginSet), ResourceInvalid> {
    let mut plugin_configs = HashMap::new();
    let mut optional_plugins = HashSet::new();

    for plugin in &message.cluster_specifier_plugins {
        let name = plugin.extension.as_ref().map(|e| e.name.clone()).unwrap_or_default();
        if plugin_configs.contains_key(&name) {
            return Err(ResourceInvalid::new(format!(
                "Multiple ClusterSpecifierPlugins with the same name: {}",
                name
            )));
        }
        match cluster_spec::parse_plugin(ctx.plugin_registry, plugin)
            .map_err(|e| e.in_context(format!("ClusterSpecifierPlugin [{}]", name)))?
        {
            Some(config) => {
                plugin_configs.insert(name, config);
            }
            None => {
                optional_plugins.insert(name);
            }
        }
    }

    Ok((plugin_configs, optional_plugins))
}

fn parse_virtual_host(
    ctx: &ResourceContext<'_>,
    proto: &VirtualHostProto,
    plugin_configs: &HashMap<String, PluginConfig>,
    optional_plugins: &OptionalPluginSet,
) -> Result<VirtualHost, ResourceInvalid> {
    let mut routes = Vec::with_capacity(proto.routes.len());
    for route in &proto.routes {
        match parse_route(ctx, route, plugin_configs, optional_plugins)? {
            Some(parsed) => routes.push(parsed),
            None => debug!(route = %route.name, "dropping unsupported route"),
        }
    }

    let filter_overrides =
        parse_filter_overrides(ctx.filter_registry, &proto.typed_per_filter_config)?;

    Ok(VirtualHost {
        name: proto.name.clone(),
        // Domains are carried as declared; the route-table consumer validates
        // them against the request authority.
        domains: proto.domains.clone(),
        routes,
        filter_overrides,
    })
}

fn parse_route(
    ctx: &ResourceContext<'_>,
    proto: &RouteProto,
    plugin_configs: &HashMap<String, PluginConfig>,
    optional_plugins: &OptionalPluginSet,
) -> Result<Option<Route>, ResourceInvalid> {
    let in_route = |e: ResourceInvalid| e.in_context(format!("Route [{}]", proto.name));

    let r#match = match matchers::parse_route_match(&proto.r#match.clone().unwrap_or_default())
        .map_err(in_route)?
    {
        Some(r#match) => r#match,
        None => return Ok(None),
    };

    let filter_overrides =
        parse_filter_overrides(ctx.filter_registry, &proto.typed_per_filter_config)
            .map_err(in_route)?;

    match &proto.action {
        Some(Action::Route(action)) => {
            match action::parse_route_action(ctx, action, plugin_configs, optional_plugins)
                .map_err(in_route)?
            {
                Some(action) => Ok(Some(Route::Forwarding { r#match, action, filter_overrides })),
                None => Ok(None),
            }
        }
        Some(Action::NonForwardingAction(_)) => {
            Ok(Some(Route::NonForwarding { r#match, filter_overrides }))
        }
        // Redirect, direct-response and filter actions have no gRPC
        // equivalent; schema drift lands here too.
        _ => Err(ResourceInvalid::new(format!(
            "Route [{}] has unknown action type",
            proto.name
        ))),
    }
}

/// Widen a protobuf duration to nanoseconds without overflow.
pub(crate) fn proto_duration_nanos(duration: &ProtoDuration) -> i128 {
    duration.seconds as i128 * 1_000_000_000 + duration.nanos as i128
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlags;
    use crate::xds::cluster_spec::ClusterSpecifierPluginRegistry;
    use crate::xds::filters::FilterRegistry;
    use crate::xds::ServerInfo;
    use envoy_types::pb::envoy::config::route::v3::route_match::PathSpecifier;
    use envoy_types::pb::envoy::config::route::v3::route_action::ClusterSpecifier as ClusterSpecifierProto;
    use envoy_types::pb::envoy::config::route::v3::{
        NonForwardingAction, RedirectAction, RouteAction as RouteActionProto, RouteMatch,
    };

    fn ctx() -> ResourceContext<'static> {
        ResourceContext {
            server_info: ServerInfo::new(false),
            filter_registry: FilterRegistry::global(),
            plugin_registry: ClusterSpecifierPluginRegistry::global(),
            flags: FeatureFlags::default(),
        }
    }

    fn prefix_match(prefix: &str) -> RouteMatch {
        RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix(prefix.to_string())),
            ..Default::default()
        }
    }

    fn forwarding_route(name: &str, cluster: &str) -> RouteProto {
        RouteProto {
            name: name.to_string(),
            r#match: Some(prefix_match("/")),
            action: Some(Action::Route(RouteActionProto {
                cluster_specifier: Some(ClusterSpecifierProto::Cluster(cluster.to_string())),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    #[test]
    fn extract_name_reads_the_resource_name() {
        let message = RouteConfiguration { name: "routes-1".into(), ..Default::default() };
        assert_eq!(extract_name(&message), "routes-1");
    }

    #[test]
    fn non_forwarding_route_is_kept_without_an_action() {
        let proto = RouteProto {
            name: "nf".into(),
            r#match: Some(prefix_match("/")),
            action: Some(Action::NonForwardingAction(NonForwardingAction::default())),
            ..Default::default()
        };
        let route = parse_route(&ctx(), &proto, &HashMap::new(), &HashSet::new())
            .expect("parse")
            .expect("route");
        assert!(matches!(route, Route::NonForwarding { .. }));
    }

    #[test]
    fn redirect_action_is_rejected() {
        let proto = RouteProto {
            name: "redir".into(),
            r#match: Some(prefix_match("/")),
            action: Some(Action::Redirect(RedirectAction::default())),
            ..Default::default()
        };
        let err = parse_route(&ctx(), &proto, &HashMap::new(), &HashSet::new())
            .expect_err("should fail");
        assert_eq!(err.message(), "Route [redir] has unknown action type");
    }

    #[test]
    fn missing_action_is_rejected() {
        let proto = RouteProto {
            name: "r".into(),
            r#match: Some(prefix_match("/")),
            ..Default::default()
        };
        let err = parse_route(&ctx(), &proto, &HashMap::new(), &HashSet::new())
            .expect_err("should fail");
        assert!(err.message().contains("unknown action type"));
    }

    #[test]
    fn missing_match_is_rejected_as_unknown_path_type() {
        let proto = RouteProto {
            name: "r".into(),
            action: Some(Action::Route(RouteActionProto::default())),
            ..Default::default()
        };
        let err = parse_route(&ctx(), &proto, &HashMap::new(), &HashSet::new())
            .expect_err("should fail");
        assert_eq!(err.message(), "Route [r]: Unknown path match type");
    }

    #[test]
    fn vhost_errors_name_the_vhost() {
        let message = RouteConfiguration {
            name: "rc".into(),
            virtual_hosts: vec![VirtualHostProto {
                name: "vh".into(),
                domains: vec!["*".into()],
                routes: vec![RouteProto {
                    name: "bad".into(),
                    r#match: Some(prefix_match("/")),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = parse_route_configuration(&ctx(), &message).expect_err("should fail");
        assert_eq!(
            err.message(),
            "Failed to parse virtual host [vh]: Route [bad] has unknown action type"
        );
    }

    #[test]
    fn skipped_routes_leave_siblings_intact() {
        let mut skipped = forwarding_route("skipped", "c");
        if let Some(m) = skipped.r#match.as_mut() {
            m.query_parameters = vec![Default::default()];
        }
        let message = RouteConfiguration {
            name: "rc".into(),
            virtual_hosts: vec![VirtualHostProto {
                name: "vh".into(),
                domains: vec!["*".into()],
                routes: vec![
                    forwarding_route("first", "a"),
                    skipped,
                    forwarding_route("last", "b"),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let update = parse_route_configuration(&ctx(), &message).expect("parse");
        assert_eq!(update.virtual_hosts[0].routes.len(), 2);
    }
}
