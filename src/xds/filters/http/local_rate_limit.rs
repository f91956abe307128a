//! Local Rate Limit HTTP filter provider.
//!
//! The per-route override for `envoy.filters.http.local_ratelimit` is the
//! filter config message itself; the override replaces the listener-level
//! token bucket for requests hitting the scope it is attached to.

use envoy_types::pb::envoy::extensions::filters::http::local_ratelimit::v3::LocalRateLimit;
use envoy_types::pb::envoy::r#type::v3::TokenBucket;
use envoy_types::pb::google::protobuf::Duration as ProtoDuration;
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::xds::extension::{parse_proto_duration, ExtensionPayload};
use crate::xds::filters::{FilterConfig, HttpFilterProvider};

/// Local rate limit filter type URL
pub const LOCAL_RATE_LIMIT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.local_ratelimit.v3.LocalRateLimit";

/// Lightweight representation of Envoy's TokenBucket message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum tokens available in the bucket
    pub max_tokens: u32,
    /// Tokens to add during each refill. Defaults to `max_tokens` if omitted.
    #[serde(default)]
    pub tokens_per_fill: Option<u32>,
    /// Fill interval in milliseconds
    pub fill_interval_ms: u64,
}

impl TokenBucketConfig {
    fn from_proto(proto: &TokenBucket) -> Result<Self, String> {
        let fill_interval = proto
            .fill_interval
            .as_ref()
            .ok_or_else(|| "LocalRateLimit token bucket requires fill_interval".to_string())?;

        Ok(Self {
            max_tokens: proto.max_tokens,
            tokens_per_fill: proto.tokens_per_fill.as_ref().map(|value| value.value),
            fill_interval_ms: duration_to_millis(fill_interval)?,
        })
    }

    fn from_json(value: &JsonValue) -> Result<Self, String> {
        let interval = value
            .get("fillInterval")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| "LocalRateLimit token bucket requires fillInterval".to_string())?;
        let fill_interval_ms = parse_proto_duration(interval)?.as_millis() as u64;
        if fill_interval_ms == 0 {
            return Err("LocalRateLimit token bucket fillInterval must be greater than 0".into());
        }

        Ok(Self {
            max_tokens: read_u32(value, "maxTokens")?.unwrap_or_default(),
            tokens_per_fill: read_u32(value, "tokensPerFill")?,
            fill_interval_ms,
        })
    }
}

/// Parsed per-scope local rate limit override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRateLimitOverride {
    /// Prefix for statistics emitted by the filter
    pub stat_prefix: String,
    /// Token bucket applied to the enclosing scope
    #[serde(default)]
    pub token_bucket: Option<TokenBucketConfig>,
    /// Optional HTTP status returned when the request is rate limited
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl LocalRateLimitOverride {
    fn validate(self) -> Result<Self, String> {
        if self.stat_prefix.is_empty() {
            return Err("LocalRateLimit requires a stat_prefix".to_string());
        }
        if let Some(bucket) = &self.token_bucket {
            if bucket.fill_interval_ms == 0 {
                return Err(
                    "LocalRateLimit token bucket fill_interval must be greater than 0".into()
                );
            }
        }
        Ok(self)
    }

    fn from_proto(proto: &LocalRateLimit) -> Result<Self, String> {
        Self {
            stat_prefix: proto.stat_prefix.clone(),
            token_bucket: proto.token_bucket.as_ref().map(TokenBucketConfig::from_proto).transpose()?,
            status_code: proto.status.as_ref().map(|status| status.code as u16),
        }
        .validate()
    }

    fn from_json(value: &JsonValue) -> Result<Self, String> {
        let stat_prefix = value
            .get("statPrefix")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let token_bucket =
            value.get("tokenBucket").map(TokenBucketConfig::from_json).transpose()?;
        let status_code = value
            .get("status")
            .and_then(|status| status.get("code"))
            .and_then(JsonValue::as_u64)
            .map(|code| code as u16);

        Self { stat_prefix, token_bucket, status_code }.validate()
    }
}

/// Provider for `envoy.filters.http.local_ratelimit` overrides.
pub struct LocalRateLimitProvider;

impl HttpFilterProvider for LocalRateLimitProvider {
    fn type_urls(&self) -> &'static [&'static str] {
        &[LOCAL_RATE_LIMIT_TYPE_URL]
    }

    fn parse_override(&self, payload: &ExtensionPayload) -> Result<FilterConfig, String> {
        let config = match payload {
            ExtensionPayload::Proto(bytes) => {
                let proto = LocalRateLimit::decode(bytes.as_slice())
                    .map_err(|e| format!("Failed to decode local rate limit config: {}", e))?;
                LocalRateLimitOverride::from_proto(&proto)?
            }
            ExtensionPayload::Json(value) => LocalRateLimitOverride::from_json(value)?,
        };
        Ok(FilterConfig::LocalRateLimit(config))
    }
}

fn duration_to_millis(duration: &ProtoDuration) -> Result<u64, String> {
    if duration.seconds < 0 || duration.nanos < 0 {
        return Err("LocalRateLimit fill_interval must be non-negative".to_string());
    }
    let millis = duration.seconds as u64 * 1_000 + duration.nanos as u64 / 1_000_000;
    if millis == 0 {
        return Err("LocalRateLimit token bucket fill_interval must be greater than 0".into());
    }
    Ok(millis)
}

fn read_u32(value: &JsonValue, key: &str) -> Result<Option<u32>, String> {
    match value.get(key) {
        None => Ok(None),
        Some(field) => field
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| format!("LocalRateLimit {} must be an unsigned integer", key)),
    }
}
