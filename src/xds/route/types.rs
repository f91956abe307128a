//! Parsed route table values.
//!
//! The types in this module form the immutable tree handed to the
//! request-routing layer once a RouteConfiguration has been validated. They
//! own all of their data; nothing borrows from the source protobuf. Equality
//! is structural, with compiled regexes compared by pattern string.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use tonic::Code;

use crate::xds::cluster_spec::NamedPluginConfig;
use crate::xds::filters::FilterConfig;

/// Fully parsed RouteConfiguration resource.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfigUpdate {
    /// Resource name, as keyed by the discovery stream.
    pub name: String,
    /// Virtual hosts in resource order.
    pub virtual_hosts: Vec<VirtualHost>,
}

/// A group of routes selected by matching the request authority against a
/// set of domain patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualHost {
    pub name: String,
    /// Domain patterns, unvalidated; the route-table consumer validates them.
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
    pub filter_overrides: HashMap<String, FilterConfig>,
}

/// A single route. Matched requests are either forwarded per the action or
/// terminated locally without forwarding.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Forwarding {
        r#match: RouteMatch,
        action: RouteAction,
        filter_overrides: HashMap<String, FilterConfig>,
    },
    NonForwarding {
        r#match: RouteMatch,
        filter_overrides: HashMap<String, FilterConfig>,
    },
}

impl Route {
    /// The match component, common to both variants.
    pub fn route_match(&self) -> &RouteMatch {
        match self {
            Route::Forwarding { r#match, .. } | Route::NonForwarding { r#match, .. } => r#match,
        }
    }

    /// The per-route filter overrides, common to both variants.
    pub fn filter_overrides(&self) -> &HashMap<String, FilterConfig> {
        match self {
            Route::Forwarding { filter_overrides, .. }
            | Route::NonForwarding { filter_overrides, .. } => filter_overrides,
        }
    }
}

/// Everything a request must satisfy for the route to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub path: PathMatcher,
    pub headers: Vec<HeaderMatcher>,
    pub fraction: Option<FractionMatcher>,
}

/// Path matching rule.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Prefix { prefix: String, case_sensitive: bool },
    Exact { path: String, case_sensitive: bool },
    Regex(Regex),
}

impl PartialEq for PathMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                PathMatcher::Prefix { prefix: a, case_sensitive: ac },
                PathMatcher::Prefix { prefix: b, case_sensitive: bc },
            ) => a == b && ac == bc,
            (
                PathMatcher::Exact { path: a, case_sensitive: ac },
                PathMatcher::Exact { path: b, case_sensitive: bc },
            ) => a == b && ac == bc,
            (PathMatcher::Regex(a), PathMatcher::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Header matching rule.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMatcher {
    pub name: String,
    /// Invert the outcome of `kind`.
    pub invert: bool,
    pub kind: HeaderMatchKind,
}

/// The value predicate of a [`HeaderMatcher`].
#[derive(Debug, Clone)]
pub enum HeaderMatchKind {
    Exact { value: String, ignore_case: bool },
    Prefix { value: String, ignore_case: bool },
    Suffix { value: String, ignore_case: bool },
    Contains { value: String, ignore_case: bool },
    SafeRegex(Regex),
    /// Numeric value in `[start, end)`.
    Range { start: i64, end: i64 },
    /// Matches when header presence equals the flag.
    Present(bool),
}

impl PartialEq for HeaderMatchKind {
    fn eq(&self, other: &Self) -> bool {
        use HeaderMatchKind::*;
        match (self, other) {
            (
                Exact { value: a, ignore_case: ac },
                Exact { value: b, ignore_case: bc },
            ) => a == b && ac == bc,
            (
                Prefix { value: a, ignore_case: ac },
                Prefix { value: b, ignore_case: bc },
            ) => a == b && ac == bc,
            (
                Suffix { value: a, ignore_case: ac },
                Suffix { value: b, ignore_case: bc },
            ) => a == b && ac == bc,
            (
                Contains { value: a, ignore_case: ac },
                Contains { value: b, ignore_case: bc },
            ) => a == b && ac == bc,
            (SafeRegex(a), SafeRegex(b)) => a.as_str() == b.as_str(),
            (Range { start: a, end: ae }, Range { start: b, end: be }) => a == b && ae == be,
            (Present(a), Present(b)) => a == b,
            _ => false,
        }
    }
}

/// Percentage gate on a route match.
///
/// Invariant: `denominator` is exactly 100, 10_000, or 1_000_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FractionMatcher {
    pub numerator: u32,
    pub denominator: u32,
}

/// Forwarding behavior of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteAction {
    pub specifier: ClusterSpecifier,
    /// Session-affinity inputs, in resource order.
    pub hash_policies: Vec<HashPolicy>,
    pub timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
    /// Rewrite the request authority to the upstream host. Only ever true
    /// for trusted servers with the authority-rewrite experiment enabled.
    pub auto_host_rewrite: bool,
}

/// How the action picks the upstream cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterSpecifier {
    /// A single literal cluster.
    Cluster { name: String },
    /// Weighted split across several clusters.
    WeightedClusters { weights: Vec<ClusterWeight> },
    /// Deferred to a named cluster-specifier plugin.
    ClusterSpecifierPlugin { plugin: NamedPluginConfig },
}

/// One entry of a weighted-cluster split.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterWeight {
    pub name: String,
    /// Zero-extended from the proto's 32-bit weight so sums cannot overflow.
    pub weight: u64,
    pub filter_overrides: HashMap<String, FilterConfig>,
}

/// Input to consistent-hash load balancing.
#[derive(Debug, Clone)]
pub enum HashPolicy {
    Header {
        terminal: bool,
        header_name: String,
        regex: Option<Regex>,
        substitution: Option<String>,
    },
    ChannelId {
        terminal: bool,
    },
}

impl PartialEq for HashPolicy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                HashPolicy::Header { terminal: at, header_name: an, regex: ar, substitution: asub },
                HashPolicy::Header { terminal: bt, header_name: bn, regex: br, substitution: bsub },
            ) => {
                at == bt
                    && an == bn
                    && asub == bsub
                    && ar.as_ref().map(Regex::as_str) == br.as_ref().map(Regex::as_str)
            }
            (HashPolicy::ChannelId { terminal: a }, HashPolicy::ChannelId { terminal: b }) => {
                a == b
            }
            _ => false,
        }
    }
}

/// Per-route retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the original request; always at least 1.
    pub max_attempts: u32,
    /// Status codes that trigger a retry, in resource order.
    pub retryable_status_codes: Vec<Code>,
    pub initial_backoff: Duration,
    /// Never below `initial_backoff`.
    pub max_backoff: Duration,
}
