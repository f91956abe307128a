//! Match parsing: path specifiers, header matchers, and runtime fractions.

use envoy_types::pb::envoy::config::route::v3::header_matcher::HeaderMatchSpecifier;
use envoy_types::pb::envoy::config::route::v3::{
    HeaderMatcher as HeaderMatcherProto, RouteMatch as RouteMatchProto,
};
use envoy_types::pb::envoy::r#type::matcher::v3::string_matcher::MatchPattern;
use envoy_types::pb::envoy::r#type::matcher::v3::StringMatcher;
use envoy_types::pb::envoy::r#type::v3::{fractional_percent, FractionalPercent};
use regex::Regex;

use crate::errors::ResourceInvalid;
use crate::xds::route::types::{
    FractionMatcher, HeaderMatchKind, HeaderMatcher, PathMatcher, RouteMatch,
};

/// Parse a route match.
///
/// Returns `Ok(None)` when the match contains query-parameter matchers: gRPC
/// requests carry no query string, so such routes can never match and are
/// dropped rather than rejected.
pub(crate) fn parse_route_match(
    proto: &RouteMatchProto,
) -> Result<Option<RouteMatch>, ResourceInvalid> {
    if !proto.query_parameters.is_empty() {
        return Ok(None);
    }

    let path = parse_path_matcher(proto)?;

    let fraction = match &proto.runtime_fraction {
        Some(runtime_fraction) => {
            let default_value = runtime_fraction.default_value.clone().unwrap_or_default();
            Some(parse_fraction(&default_value)?)
        }
        None => None,
    };

    let mut headers = Vec::with_capacity(proto.headers.len());
    for header in &proto.headers {
        headers.push(parse_header_matcher(header).map_err(ResourceInvalid::new)?);
    }

    Ok(Some(RouteMatch { path, headers, fraction }))
}

fn parse_path_matcher(proto: &RouteMatchProto) -> Result<PathMatcher, ResourceInvalid> {
    use envoy_types::pb::envoy::config::route::v3::route_match::PathSpecifier;

    // Wrapper-typed and absent both mean "case sensitive".
    let case_sensitive = proto.case_sensitive.as_ref().map(|b| b.value).unwrap_or(true);

    match &proto.path_specifier {
        Some(PathSpecifier::Prefix(prefix)) => {
            Ok(PathMatcher::Prefix { prefix: prefix.clone(), case_sensitive })
        }
        Some(PathSpecifier::Path(path)) => {
            Ok(PathMatcher::Exact { path: path.clone(), case_sensitive })
        }
        Some(PathSpecifier::SafeRegex(matcher)) => {
            let regex = Regex::new(&matcher.regex).map_err(|e| {
                ResourceInvalid::new(format!("Malformed safe regex pattern: {}", e))
            })?;
            Ok(PathMatcher::Regex(regex))
        }
        _ => Err(ResourceInvalid::new("Unknown path match type")),
    }
}

/// Parse a fractional percent into a [`FractionMatcher`].
///
/// Only the three denominators the proto enum names are accepted; anything
/// else rejects the resource.
pub(crate) fn parse_fraction(proto: &FractionalPercent) -> Result<FractionMatcher, ResourceInvalid> {
    let denominator = match fractional_percent::DenominatorType::try_from(proto.denominator) {
        Ok(fractional_percent::DenominatorType::Hundred) => 100,
        Ok(fractional_percent::DenominatorType::TenThousand) => 10_000,
        Ok(fractional_percent::DenominatorType::Million) => 1_000_000,
        Err(_) => {
            return Err(ResourceInvalid::new(format!(
                "Unsupported fractional percent denominator: {}",
                proto.denominator
            )))
        }
    };
    Ok(FractionMatcher { numerator: proto.numerator, denominator })
}

/// Build a header matcher from its proto form.
///
/// Handles both the deprecated inline specifiers and the `string_match`
/// form. Failures are plain strings, surfaced verbatim by the match parser.
#[allow(deprecated)]
pub(crate) fn parse_header_matcher(proto: &HeaderMatcherProto) -> Result<HeaderMatcher, String> {
    let kind = match &proto.header_match_specifier {
        Some(HeaderMatchSpecifier::ExactMatch(value)) => {
            HeaderMatchKind::Exact { value: value.clone(), ignore_case: false }
        }
        Some(HeaderMatchSpecifier::PrefixMatch(value)) => {
            HeaderMatchKind::Prefix { value: value.clone(), ignore_case: false }
        }
        Some(HeaderMatchSpecifier::SuffixMatch(value)) => {
            HeaderMatchKind::Suffix { value: value.clone(), ignore_case: false }
        }
        Some(HeaderMatchSpecifier::ContainsMatch(value)) => {
            HeaderMatchKind::Contains { value: value.clone(), ignore_case: false }
        }
        Some(HeaderMatchSpecifier::SafeRegexMatch(matcher)) => {
            HeaderMatchKind::SafeRegex(compile_header_regex(&proto.name, &matcher.regex)?)
        }
        Some(HeaderMatchSpecifier::RangeMatch(range)) => {
            HeaderMatchKind::Range { start: range.start, end: range.end }
        }
        Some(HeaderMatchSpecifier::PresentMatch(present)) => HeaderMatchKind::Present(*present),
        Some(HeaderMatchSpecifier::StringMatch(matcher)) => {
            parse_string_match(&proto.name, matcher)?
        }
        None => return Err(format!("Header matcher [{}] has unknown match type", proto.name)),
    };

    Ok(HeaderMatcher { name: proto.name.clone(), invert: proto.invert_match, kind })
}

fn parse_string_match(name: &str, matcher: &StringMatcher) -> Result<HeaderMatchKind, String> {
    let ignore_case = matcher.ignore_case;
    match &matcher.match_pattern {
        Some(MatchPattern::Exact(value)) => {
            Ok(HeaderMatchKind::Exact { value: value.clone(), ignore_case })
        }
        Some(MatchPattern::Prefix(value)) => {
            Ok(HeaderMatchKind::Prefix { value: value.clone(), ignore_case })
        }
        Some(MatchPattern::Suffix(value)) => {
            Ok(HeaderMatchKind::Suffix { value: value.clone(), ignore_case })
        }
        Some(MatchPattern::Contains(value)) => {
            Ok(HeaderMatchKind::Contains { value: value.clone(), ignore_case })
        }
        Some(MatchPattern::SafeRegex(regex)) => {
            Ok(HeaderMatchKind::SafeRegex(compile_header_regex(name, &regex.regex)?))
        }
        _ => Err(format!("Header matcher [{}] has unknown string match type", name)),
    }
}

fn compile_header_regex(name: &str, pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern)
        .map_err(|e| format!("Malformed safe regex pattern in header matcher [{}]: {}", name, e))
}
