//! Retry policy (spec.md §4.7, §7, §8 property 7) and `Retry-After`
//! parsing (spec.md §6.2, §8 property 8).
//!
//! Only connection-level/stream-refused transport errors are eligible;
//! this is deliberately not a general application-retry mechanism (spec.md
//! §1 Non-goals).

use chrono::DateTime;

use crate::error::{ClientError, Http2StreamErrorCode};

/// Decides whether a failed send is eligible for an internal retry.
///
/// A trait (rather than a single hard-coded function) so `fcm()`'s
/// layering of a 502/503-aware policy on top of the default one (spec.md
/// §6.3's FCM backoff bullet) is expressible without special-casing FCM
/// inside [`crate::client::HttpClient`] — see [`FcmServerErrorPolicy`].
pub trait HttpRetryPolicy: Send + Sync + std::fmt::Debug {
    /// `true` if `error` is eligible for a retry on a fresh attempt.
    fn can_retry_request_after(&self, error: &ClientError) -> bool;

    /// How long to wait before retrying a response that completed with a
    /// server-error status, or `None` if this status/policy combination
    /// isn't retryable. A successful write-and-read that merely came back
    /// with a 5xx status is not a [`ClientError`], so this is a separate
    /// hook from [`HttpRetryPolicy::can_retry_request_after`] rather than a
    /// variant of it. The default policy never retries on status alone
    /// (spec.md §4.7 only retries transport-level failures); [`FcmServerErrorPolicy`]
    /// overrides this for 502/503 (spec.md §6.3).
    fn retry_delay_for_response(
        &self,
        _status: http::StatusCode,
        _retry_after_millis: Option<u64>,
        _attempt: u32,
    ) -> Option<std::time::Duration> {
        None
    }
}

/// The retry policy spec.md §4.7 specifies: eligible iff the error is one
/// of `ChannelInactive`, `ChannelStreamQuota`, `ChannelWriteFailed`, or an
/// HTTP/2 stream error with code `REFUSED_STREAM`. Cancellation is never
/// retried regardless of policy (spec.md §5, enforced by
/// [`crate::client::HttpClient::send`] before consulting any policy).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHttpRetryPolicy;

impl HttpRetryPolicy for DefaultHttpRetryPolicy {
    fn can_retry_request_after(&self, error: &ClientError) -> bool {
        matches!(
            error,
            ClientError::ChannelInactive
                | ClientError::ChannelStreamQuota
                | ClientError::ChannelWriteFailed(_)
                | ClientError::Http2StreamError(Http2StreamErrorCode::RefusedStream)
        )
    }
}

/// Layers FCM's 502/503 retry-with-backoff (spec.md §6.3) on top of
/// [`DefaultHttpRetryPolicy`]. `can_retry_request_after` only covers
/// transport-level `ClientError`s, which never carry a status code; the
/// 502/503 case is a successful write-and-read that merely came back with a
/// server-error status, so it is handled by this policy's
/// [`HttpRetryPolicy::retry_delay_for_response`] override instead, which
/// [`crate::client::HttpClient::send`] consults against the response
/// directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct FcmServerErrorPolicy {
    inner: DefaultHttpRetryPolicy,
}

impl HttpRetryPolicy for FcmServerErrorPolicy {
    fn can_retry_request_after(&self, error: &ClientError) -> bool {
        self.inner.can_retry_request_after(error)
    }

    fn retry_delay_for_response(
        &self,
        status: http::StatusCode,
        retry_after_millis: Option<u64>,
        attempt: u32,
    ) -> Option<std::time::Duration> {
        self.retry_delay_for_status(status, retry_after_millis, attempt)
    }
}

impl FcmServerErrorPolicy {
    /// FCM's backoff schedule for a 502/503 response (spec.md §6.3): 502
    /// defaults to 30s if no `Retry-After`; 503 honors `Retry-After` if
    /// present, exponential backoff starting at 1s and doubling otherwise.
    pub fn retry_delay_for_status(
        &self,
        status: http::StatusCode,
        retry_after_millis: Option<u64>,
        attempt: u32,
    ) -> Option<std::time::Duration> {
        match status.as_u16() {
            502 => Some(std::time::Duration::from_millis(
                retry_after_millis.unwrap_or(30_000),
            )),
            503 => Some(std::time::Duration::from_millis(retry_after_millis.unwrap_or_else(|| {
                1000u64.saturating_mul(1u64 << attempt.min(16))
            }))),
            _ => None,
        }
    }
}

/// Parses a `Retry-After` header value as either integer seconds or an
/// RFC 1123 date, returning milliseconds-until (clamped to zero). Returns
/// `None` on anything else (spec.md §6.2, tested property 8).
pub fn parse_retry_after_millis(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    let parsed = DateTime::parse_from_rfc2822(trimmed).ok()?;
    let now = chrono::Utc::now();
    let delta_millis = parsed.with_timezone(&chrono::Utc).signed_duration_since(now).num_milliseconds();
    Some(delta_millis.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;

    #[test]
    fn default_policy_retries_exactly_the_specified_errors() {
        let policy = DefaultHttpRetryPolicy;
        assert!(policy.can_retry_request_after(&ClientError::ChannelInactive));
        assert!(policy.can_retry_request_after(&ClientError::ChannelStreamQuota));
        assert!(policy.can_retry_request_after(&ClientError::ChannelWriteFailed("x".into())));
        assert!(policy.can_retry_request_after(&ClientError::Http2StreamError(
            Http2StreamErrorCode::RefusedStream
        )));

        assert!(!policy.can_retry_request_after(&ClientError::Http2StreamError(
            Http2StreamErrorCode::Http11Required
        )));
        assert!(!policy.can_retry_request_after(&ClientError::Io("boom".into())));
        assert!(!policy.can_retry_request_after(&ClientError::Cancelled));
    }

    #[test]
    fn connection_error_conversion_preserves_retry_eligibility() {
        let policy = DefaultHttpRetryPolicy;
        let client_err: ClientError = ConnectionError::Inactive.into();
        assert!(policy.can_retry_request_after(&client_err));
    }

    #[test]
    fn retry_after_parses_integer_seconds() {
        assert_eq!(parse_retry_after_millis("30"), Some(30_000));
    }

    #[test]
    fn retry_after_parses_rfc1123_date_in_the_past_as_zero() {
        assert_eq!(
            parse_retry_after_millis("Tue, 3 Jun 2008 11:05:30 GMT"),
            Some(0)
        );
    }

    #[test]
    fn retry_after_rejects_malformed_values() {
        assert_eq!(parse_retry_after_millis("not-a-date"), None);
        assert_eq!(parse_retry_after_millis(""), None);
    }

    #[test]
    fn fcm_policy_defaults_502_to_30s_without_retry_after() {
        let policy = FcmServerErrorPolicy::default();
        let delay = policy
            .retry_delay_for_status(http::StatusCode::BAD_GATEWAY, None, 0)
            .unwrap();
        assert_eq!(delay, std::time::Duration::from_secs(30));
    }

    #[test]
    fn fcm_policy_honors_retry_after_for_503() {
        let policy = FcmServerErrorPolicy::default();
        let delay = policy
            .retry_delay_for_status(http::StatusCode::SERVICE_UNAVAILABLE, Some(5000), 0)
            .unwrap();
        assert_eq!(delay, std::time::Duration::from_secs(5));
    }

    #[test]
    fn fcm_policy_doubles_503_backoff_without_retry_after() {
        let policy = FcmServerErrorPolicy::default();
        let d0 = policy
            .retry_delay_for_status(http::StatusCode::SERVICE_UNAVAILABLE, None, 0)
            .unwrap();
        let d1 = policy
            .retry_delay_for_status(http::StatusCode::SERVICE_UNAVAILABLE, None, 1)
            .unwrap();
        assert_eq!(d0, std::time::Duration::from_secs(1));
        assert_eq!(d1, std::time::Duration::from_secs(2));
    }
}
