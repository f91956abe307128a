//! Route action parsing.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use envoy_types::pb::envoy::config::route::v3::route_action::hash_policy::PolicySpecifier;
use envoy_types::pb::envoy::config::route::v3::route_action::{
    ClusterSpecifier as ClusterSpecifierProto, HashPolicy as HashPolicyProto,
    HostRewriteSpecifier,
};
use envoy_types::pb::envoy::config::route::v3::weighted_cluster::ClusterWeight as ClusterWeightProto;
use envoy_types::pb::envoy::config::route::v3::{
    RouteAction as RouteActionProto, WeightedCluster,
};
use regex::Regex;
use tracing::debug;

use crate::errors::ResourceInvalid;
use crate::xds::cluster_spec::{NamedPluginConfig, PluginConfig};
use crate::xds::filters::parse_filter_overrides;
use crate::xds::route::retry::parse_retry_policy;
use crate::xds::route::types::{ClusterSpecifier, ClusterWeight, HashPolicy, RouteAction};
use crate::xds::route::proto_duration_nanos;
use crate::xds::ResourceContext;

/// Filter-state key that selects channel-id hashing.
const CHANNEL_ID_FILTER_STATE_KEY: &str = "io.grpc.channel_id";

/// Parse a forwarding route action.
///
/// Returns `Ok(None)` for well-formed actions this client cannot execute:
/// `cluster_header` specifiers, plugin references that resolved to an
/// optional-but-unsupported plugin, plugin references while route lookup is
/// disabled, and unset or unrecognized specifiers. The enclosing route is
/// dropped in all of these cases.
pub(crate) fn parse_route_action(
    ctx: &ResourceContext<'_>,
    proto: &RouteActionProto,
    plugin_configs: &HashMap<String, PluginConfig>,
    optional_plugins: &HashSet<String>,
) -> Result<Option<RouteAction>, ResourceInvalid> {
    let timeout = parse_timeout(proto);
    let retry_policy = proto.retry_policy.as_ref().map(parse_retry_policy).transpose()?;
    let hash_policies = parse_hash_policies(&proto.hash_policy)?;

    // Authority rewrite requires all three: the experiment flag, a trusted
    // control plane, and the proto opting in.
    let auto_host_rewrite = ctx.flags.enable_authority_rewrite
        && ctx.server_info.is_trusted_xds_server()
        && matches!(
            &proto.host_rewrite_specifier,
            Some(HostRewriteSpecifier::AutoHostRewrite(rewrite)) if rewrite.value
        );

    let specifier = match &proto.cluster_specifier {
        Some(ClusterSpecifierProto::Cluster(name)) => {
            ClusterSpecifier::Cluster { name: name.clone() }
        }
        Some(ClusterSpecifierProto::ClusterHeader(_)) => return Ok(None),
        Some(ClusterSpecifierProto::WeightedClusters(weighted)) => {
            parse_weighted_clusters(ctx, weighted)?
        }
        Some(ClusterSpecifierProto::ClusterSpecifierPlugin(name)) => {
            if !ctx.flags.enable_route_lookup {
                return Ok(None);
            }
            match plugin_configs.get(name) {
                Some(config) => ClusterSpecifier::ClusterSpecifierPlugin {
                    plugin: NamedPluginConfig { name: name.clone(), config: config.clone() },
                },
                None if optional_plugins.contains(name) => return Ok(None),
                None => {
                    return Err(ResourceInvalid::new(format!(
                        "ClusterSpecifierPlugin for [{}] not found",
                        name
                    )))
                }
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(RouteAction { specifier, hash_policies, timeout, retry_policy, auto_host_rewrite }))
}

/// Extract the effective stream timeout.
///
/// `grpc_timeout_header_max` wins over `max_stream_duration`; both live in
/// the action's `max_stream_duration` message. Negative durations saturate
/// to zero.
fn parse_timeout(proto: &RouteActionProto) -> Option<Duration> {
    let max_stream_duration = proto.max_stream_duration.as_ref()?;
    let duration = max_stream_duration
        .grpc_timeout_header_max
        .as_ref()
        .or(max_stream_duration.max_stream_duration.as_ref())?;
    let nanos = proto_duration_nanos(duration).max(0);
    Some(Duration::from_nanos(nanos.min(u64::MAX as i128) as u64))
}

fn parse_weighted_clusters(
    ctx: &ResourceContext<'_>,
    proto: &WeightedCluster,
) -> Result<ClusterSpecifier, ResourceInvalid> {
    if proto.clusters.is_empty() {
        return Err(ResourceInvalid::new("No cluster found in weighted cluster list"));
    }

    let mut weights = Vec::with_capacity(proto.clusters.len());
    let mut weight_sum: u64 = 0;
    for cluster in &proto.clusters {
        let weight = parse_cluster_weight(ctx, cluster)?;
        weight_sum += weight.weight;
        weights.push(weight);
    }

    if weight_sum == 0 {
        return Err(ResourceInvalid::new("Sum of cluster weights should be above 0"));
    }
    if weight_sum > u32::MAX as u64 {
        return Err(ResourceInvalid::new(format!(
            "Sum of cluster weights should be less than the maximum unsigned integer ({}), but was {}",
            u32::MAX,
            weight_sum
        )));
    }

    Ok(ClusterSpecifier::WeightedClusters { weights })
}

fn parse_cluster_weight(
    ctx: &ResourceContext<'_>,
    proto: &ClusterWeightProto,
) -> Result<ClusterWeight, ResourceInvalid> {
    let filter_overrides =
        parse_filter_overrides(ctx.filter_registry, &proto.typed_per_filter_config)
            .map_err(|e| e.in_context(format!("ClusterWeight [{}]", proto.name)))?;

    Ok(ClusterWeight {
        name: proto.name.clone(),
        weight: proto.weight.as_ref().map(|w| w.value).unwrap_or_default() as u64,
        filter_overrides,
    })
}

/// Parse hash policies in resource order.
///
/// Unsupported policy kinds, and filter-state policies with a key other than
/// the channel-id literal, are dropped without leaving a gap.
fn parse_hash_policies(protos: &[HashPolicyProto]) -> Result<Vec<HashPolicy>, ResourceInvalid> {
    let mut policies = Vec::new();
    for proto in protos {
        let terminal = proto.terminal;
        let policy = match &proto.policy_specifier {
            Some(PolicySpecifier::Header(header)) => {
                let mut regex = None;
                let mut substitution = None;
                if let Some(rewrite) = &header.regex_rewrite {
                    if let Some(pattern) = &rewrite.pattern {
                        regex = Some(Regex::new(&pattern.regex).map_err(|e| {
                            ResourceInvalid::new(format!(
                                "Malformed regex_rewrite pattern in hash policy: {}",
                                e
                            ))
                        })?);
                        substitution = Some(rewrite.substitution.clone());
                    }
                }
                Some(HashPolicy::Header {
                    terminal,
                    header_name: header.header_name.clone(),
                    regex,
                    substitution,
                })
            }
            Some(PolicySpecifier::FilterState(filter_state))
                if filter_state.key == CHANNEL_ID_FILTER_STATE_KEY =>
            {
                Some(HashPolicy::ChannelId { terminal })
            }
            other => {
                debug!(policy = ?other, "ignoring unsupported hash policy");
                None
            }
        };
        if let Some(policy) = policy {
            policies.push(policy);
        }
    }
    Ok(policies)
}
