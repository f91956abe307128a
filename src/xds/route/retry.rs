//! Retry policy parsing.

use std::time::Duration;

use envoy_types::pb::envoy::config::route::v3::RetryPolicy as RetryPolicyProto;
use tonic::Code;
use tracing::debug;

use crate::errors::ResourceInvalid;
use crate::xds::route::proto_duration_nanos;
use crate::xds::route::types::RetryPolicy;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(25);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(250);
const MIN_BACKOFF_NANOS: i128 = 1_000_000;

/// Parse a per-route retry policy.
///
/// `max_attempts` counts the original request, so an absent `num_retries`
/// yields 2 (one retry). Backoff intervals below one millisecond are raised
/// to one millisecond, but the `max_interval` >= `base_interval` check runs
/// against the declared values, before any raising.
pub(crate) fn parse_retry_policy(proto: &RetryPolicyProto) -> Result<RetryPolicy, ResourceInvalid> {
    let max_attempts = proto.num_retries.as_ref().map(|n| n.value).unwrap_or(1) + 1;

    let (initial_backoff, max_backoff) = match &proto.retry_back_off {
        None => (DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF),
        Some(backoff) => {
            let base = backoff.base_interval.as_ref().ok_or_else(|| {
                ResourceInvalid::new("No base_interval specified in retry_backoff")
            })?;
            let mut base_nanos = proto_duration_nanos(base);
            if base_nanos <= 0 {
                return Err(ResourceInvalid::new(
                    "base_interval in retry_backoff must be positive",
                ));
            }

            let mut max_nanos = match &backoff.max_interval {
                Some(max) => proto_duration_nanos(max),
                None => base_nanos * 10,
            };
            if max_nanos < base_nanos {
                return Err(ResourceInvalid::new(
                    "max_interval in retry_backoff cannot be less than base_interval",
                ));
            }

            base_nanos = base_nanos.max(MIN_BACKOFF_NANOS);
            max_nanos = max_nanos.max(MIN_BACKOFF_NANOS);
            (
                Duration::from_nanos(base_nanos as u64),
                Duration::from_nanos(max_nanos as u64),
            )
        }
    };

    Ok(RetryPolicy {
        max_attempts,
        retryable_status_codes: parse_retry_on(&proto.retry_on),
        initial_backoff,
        max_backoff,
    })
}

/// Map a `retry_on` list onto gRPC status codes.
///
/// Tokens are comma-separated condition names in the Envoy convention
/// (lower-case, dash-separated). Anything that does not name a supported
/// status code is ignored; the codes a retrying client may act on are
/// CANCELLED, DEADLINE_EXCEEDED, INTERNAL, RESOURCE_EXHAUSTED and UNAVAILABLE.
fn parse_retry_on(retry_on: &str) -> Vec<Code> {
    let mut codes = Vec::new();
    for token in retry_on.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let canonical = token.to_ascii_uppercase().replace('-', "_");
        match supported_status_code(&canonical) {
            Some(code) => codes.push(code),
            None => debug!(token = %token, "ignoring unsupported retry_on condition"),
        }
    }
    codes
}

fn supported_status_code(name: &str) -> Option<Code> {
    match name {
        "CANCELLED" => Some(Code::Cancelled),
        "DEADLINE_EXCEEDED" => Some(Code::DeadlineExceeded),
        "INTERNAL" => Some(Code::Internal),
        "RESOURCE_EXHAUSTED" => Some(Code::ResourceExhausted),
        "UNAVAILABLE" => Some(Code::Unavailable),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::retry_policy::RetryBackOff;
    use envoy_types::pb::google::protobuf::{Duration as ProtoDuration, UInt32Value};

    fn backoff(base_nanos: Option<i64>, max_nanos: Option<i64>) -> RetryBackOff {
        RetryBackOff {
            base_interval: base_nanos.map(|n| ProtoDuration {
                seconds: n / 1_000_000_000,
                nanos: (n % 1_000_000_000) as i32,
            }),
            max_interval: max_nanos.map(|n| ProtoDuration {
                seconds: n / 1_000_000_000,
                nanos: (n % 1_000_000_000) as i32,
            }),
        }
    }

    #[test]
    fn defaults_when_everything_is_absent() {
        let policy = parse_retry_policy(&RetryPolicyProto::default()).expect("parse");
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_backoff, Duration::from_millis(25));
        assert_eq!(policy.max_backoff, Duration::from_millis(250));
        assert!(policy.retryable_status_codes.is_empty());
    }

    #[test]
    fn num_retries_plus_one() {
        let proto = RetryPolicyProto {
            num_retries: Some(UInt32Value { value: 3 }),
            ..Default::default()
        };
        assert_eq!(parse_retry_policy(&proto).expect("parse").max_attempts, 4);
    }

    #[test]
    fn retry_on_filters_and_preserves_order() {
        let proto = RetryPolicyProto {
            retry_on: "cancelled, deadline-exceeded, foo, 5xx, internal".into(),
            ..Default::default()
        };
        let policy = parse_retry_policy(&proto).expect("parse");
        assert_eq!(
            policy.retryable_status_codes,
            vec![Code::Cancelled, Code::DeadlineExceeded, Code::Internal]
        );
    }

    #[test]
    fn retry_on_keeps_duplicates() {
        let proto = RetryPolicyProto {
            retry_on: "unavailable,unavailable".into(),
            ..Default::default()
        };
        let policy = parse_retry_policy(&proto).expect("parse");
        assert_eq!(policy.retryable_status_codes, vec![Code::Unavailable, Code::Unavailable]);
    }

    #[test]
    fn empty_retry_on_is_permitted() {
        let proto = RetryPolicyProto { retry_on: " , ,".into(), ..Default::default() };
        assert!(parse_retry_policy(&proto).expect("parse").retryable_status_codes.is_empty());
    }

    #[test]
    fn missing_base_interval_errors() {
        let proto = RetryPolicyProto {
            retry_back_off: Some(backoff(None, None)),
            ..Default::default()
        };
        let err = parse_retry_policy(&proto).expect_err("should fail");
        assert_eq!(err.message(), "No base_interval specified in retry_backoff");
    }

    #[test]
    fn zero_base_interval_errors() {
        let proto = RetryPolicyProto {
            retry_back_off: Some(backoff(Some(0), None)),
            ..Default::default()
        };
        let err = parse_retry_policy(&proto).expect_err("should fail");
        assert_eq!(err.message(), "base_interval in retry_backoff must be positive");
    }

    #[test]
    fn sub_millisecond_base_is_raised_but_compared_unraised() {
        // base = 500us clamps to 1ms in the output...
        let proto = RetryPolicyProto {
            retry_back_off: Some(backoff(Some(500_000), Some(2_000_000))),
            ..Default::default()
        };
        let policy = parse_retry_policy(&proto).expect("parse");
        assert_eq!(policy.initial_backoff, Duration::from_millis(1));
        assert_eq!(policy.max_backoff, Duration::from_millis(2));

        // ...but a max of 400us still fails against the declared 500us base.
        let proto = RetryPolicyProto {
            retry_back_off: Some(backoff(Some(500_000), Some(400_000))),
            ..Default::default()
        };
        let err = parse_retry_policy(&proto).expect_err("should fail");
        assert_eq!(
            err.message(),
            "max_interval in retry_backoff cannot be less than base_interval"
        );
    }

    #[test]
    fn absent_max_is_ten_times_the_declared_base() {
        let proto = RetryPolicyProto {
            retry_back_off: Some(backoff(Some(500_000), None)),
            ..Default::default()
        };
        let policy = parse_retry_policy(&proto).expect("parse");
        assert_eq!(policy.initial_backoff, Duration::from_millis(1));
        assert_eq!(policy.max_backoff, Duration::from_millis(5));
    }

    #[test]
    fn sub_millisecond_max_is_raised() {
        let proto = RetryPolicyProto {
            retry_back_off: Some(backoff(Some(600_000), Some(800_000))),
            ..Default::default()
        };
        let policy = parse_retry_policy(&proto).expect("parse");
        assert_eq!(policy.initial_backoff, Duration::from_millis(1));
        assert_eq!(policy.max_backoff, Duration::from_millis(1));
    }
}
