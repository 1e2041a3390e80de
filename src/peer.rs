//! Pre-populated [`HttpClientProperties`] + watermark overrides for the two
//! peers this crate targets (spec.md §6.3).
//!
//! These are convenience constructors, not parsed configuration — every
//! value here is a constant named in spec.md §6.3, wired up the way the
//! teacher's transport adapters expose a fixed set of named presets (e.g.
//! `HttpTransportConfig::new()` defaults) rather than a generic
//! config-file loader.

use std::sync::Arc;
use std::time::Duration;

use crate::config::HttpClientProperties;
use crate::poolable::Watermark;
use crate::retry::{DefaultHttpRetryPolicy, FcmServerErrorPolicy, HttpRetryPolicy};

/// A peer's host, port, tuned [`HttpClientProperties`], watermark override
/// and retry policy, ready to hand to [`crate::client::HttpClient`].
#[derive(Clone)]
pub struct PeerProfile {
    pub host: String,
    pub port: u16,
    pub properties: HttpClientProperties,
    /// Overrides the watermark this crate would otherwise derive from the
    /// peer's advertised `MAX_CONCURRENT_STREAMS` (spec.md §6.3's "suggested
    /// concurrent-stream watermarks").
    pub watermark_override: Option<Watermark>,
    pub retry_policy: Arc<dyn HttpRetryPolicy>,
}

impl std::fmt::Debug for PeerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("watermark_override", &self.watermark_override)
            .finish()
    }
}

impl PeerProfile {
    /// `api.push.apple.com:443`, no ALPN, connections never age out, and a
    /// generous 500/1200 watermark pair to match APNs' production capacity
    /// (spec.md §6.3).
    pub fn apns_production() -> Self {
        Self {
            host: "api.push.apple.com".to_string(),
            port: 443,
            properties: HttpClientProperties::new()
                .with_alpn(false)
                .with_maximum_connection_age(None)
                .with_default_max_concurrent_streams(1000),
            watermark_override: Some(Watermark { low: 500, high: 1200 }),
            retry_policy: Arc::new(DefaultHttpRetryPolicy),
        }
    }

    /// `api.sandbox.push.apple.com:443`, connections recycled every 10
    /// minutes (spec.md §6.3); the spec's "use single-thread event loop"
    /// note is satisfied by this crate's tokio-task-per-channel model
    /// regardless of profile, so there is nothing further to configure here.
    pub fn apns_development() -> Self {
        Self {
            host: "api.sandbox.push.apple.com".to_string(),
            port: 443,
            properties: HttpClientProperties::new()
                .with_alpn(false)
                .with_maximum_connection_age(Some(Duration::from_secs(10 * 60)))
                .with_default_max_concurrent_streams(1000),
            watermark_override: None,
            retry_policy: Arc::new(DefaultHttpRetryPolicy),
        }
    }

    /// `fcm.googleapis.com:443`, ALPN required, connections recycled every
    /// 59 minutes, health-monitoring pings disabled (FCM itself rate-limits
    /// unsolicited pings and will GOAWAY a connection that sends too many —
    /// spec.md §9's open question), and [`FcmServerErrorPolicy`] layered in
    /// for 502/503 backoff.
    pub fn fcm() -> Self {
        Self {
            host: "fcm.googleapis.com".to_string(),
            port: 443,
            properties: HttpClientProperties::new()
                .with_alpn(true)
                .with_maximum_connection_age(Some(Duration::from_secs(59 * 60)))
                .with_default_max_concurrent_streams(100)
                .with_monitor_connection_health(false),
            watermark_override: Some(Watermark { low: 30, high: 150 }),
            retry_policy: Arc::new(FcmServerErrorPolicy::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apns_production_never_ages_out_and_skips_alpn() {
        let profile = PeerProfile::apns_production();
        assert_eq!(profile.host, "api.push.apple.com");
        assert!(!profile.properties.wants_alpn());
        assert_eq!(profile.properties.maximum_connection_age(), None);
    }

    #[test]
    fn apns_development_ages_out_after_ten_minutes() {
        let profile = PeerProfile::apns_development();
        assert_eq!(
            profile.properties.maximum_connection_age(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn fcm_requires_alpn_and_disables_health_monitoring() {
        let profile = PeerProfile::fcm();
        assert!(profile.properties.wants_alpn());
        assert!(!profile.properties.monitor_connection_health());
        assert_eq!(profile.watermark_override, Some(Watermark { low: 30, high: 150 }));
    }
}
