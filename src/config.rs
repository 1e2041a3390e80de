//! Immutable configuration structs: [`PoolConfig`] (spec.md §3 "Pool
//! configuration") and [`HttpClientProperties`] (spec.md §3 "HTTP client
//! properties").
//!
//! Builder-pattern, teacher-style: `XConfig::new()` plus chained `with_*`
//! setters returning `Self` (see `correlation::manager::CorrelationConfig`
//! and `transport::adapters::http::connection_manager::HealthCheckConfig`,
//! both plain `Default`-derived structs with field-by-field construction;
//! this crate adds the chained-setter layer on top since its configs carry
//! more fields and stricter invariants worth validating at construction).

use std::net::SocketAddr;
use std::time::Duration;

/// How often the reaper or summary task runs, or "disabled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Every(Duration),
    Disabled,
}

impl Interval {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Interval::Every(d) => Some(*d),
            Interval::Disabled => None,
        }
    }
}

/// Immutable pool tuning, per spec.md §3 "Pool configuration".
#[derive(Debug, Clone)]
pub struct PoolConfig {
    acquisition_attempts_threshold: u32,
    maximum_pending_acquisitions: usize,
    maximum_size: usize,
    minimum_size: usize,
    reaper_delay: Interval,
    summary_interval: Interval,
    name: String,
}

impl PoolConfig {
    /// `maximum_size` must be positive and `minimum_size` must not exceed
    /// it; both are asserted at construction rather than returning a
    /// `Result`, since these are caller-controlled literals, not values
    /// derived from untrusted input (spec.md §3's invariant is a
    /// programmer contract, not a runtime one).
    pub fn new(name: impl Into<String>, minimum_size: usize, maximum_size: usize) -> Self {
        assert!(maximum_size > 0, "maximum_size must be positive");
        assert!(
            minimum_size <= maximum_size,
            "minimum_size ({minimum_size}) must not exceed maximum_size ({maximum_size})"
        );
        Self {
            acquisition_attempts_threshold: 4,
            maximum_pending_acquisitions: 1000,
            maximum_size,
            minimum_size,
            reaper_delay: Interval::Every(Duration::from_secs(60)),
            summary_interval: Interval::Disabled,
            name: name.into(),
        }
    }

    pub fn with_acquisition_attempts_threshold(mut self, n: u32) -> Self {
        assert!(n >= 1, "acquisition_attempts_threshold must be at least 1");
        self.acquisition_attempts_threshold = n;
        self
    }

    pub fn with_maximum_pending_acquisitions(mut self, n: usize) -> Self {
        assert!(n >= 1, "maximum_pending_acquisitions must be at least 1");
        self.maximum_pending_acquisitions = n;
        self
    }

    pub fn with_reaper_delay(mut self, interval: Interval) -> Self {
        self.reaper_delay = interval;
        self
    }

    pub fn with_summary_interval(mut self, interval: Interval) -> Self {
        self.summary_interval = interval;
        self
    }

    pub fn acquisition_attempts_threshold(&self) -> u32 {
        self.acquisition_attempts_threshold
    }

    pub fn maximum_pending_acquisitions(&self) -> usize {
        self.maximum_pending_acquisitions
    }

    pub fn maximum_size(&self) -> usize {
        self.maximum_size
    }

    pub fn minimum_size(&self) -> usize {
        self.minimum_size
    }

    pub fn reaper_delay(&self) -> Interval {
        self.reaper_delay
    }

    pub fn summary_interval(&self) -> Interval {
        self.summary_interval
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Immutable HTTP client properties, per spec.md §3 "HTTP client
/// properties".
#[derive(Debug, Clone)]
pub struct HttpClientProperties {
    connect_timeout: Duration,
    connection_acquisition_timeout: Duration,
    maximum_connection_age: Option<Duration>,
    maximum_connect_retries: u32,
    default_max_concurrent_streams: u32,
    idle_interval: Duration,
    maximum_request_retries: Option<u32>,
    tcp_user_timeout: Duration,
    connection_retry_fuzz_interval: Duration,
    min_retry_delay: Duration,
    max_retry_delay: Duration,
    proxy_address: Option<SocketAddr>,
    wants_alpn: bool,
    monitor_connection_health: bool,
    response_timeout: Duration,
}

impl Default for HttpClientProperties {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            connection_acquisition_timeout: Duration::from_secs(5),
            maximum_connection_age: None,
            maximum_connect_retries: 4,
            default_max_concurrent_streams: 100,
            idle_interval: Duration::from_secs(60),
            maximum_request_retries: None,
            tcp_user_timeout: Duration::from_secs(10),
            connection_retry_fuzz_interval: Duration::from_millis(500),
            min_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(10),
            proxy_address: None,
            wants_alpn: false,
            monitor_connection_health: true,
            response_timeout: crate::connection::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl HttpClientProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn with_connection_acquisition_timeout(mut self, d: Duration) -> Self {
        self.connection_acquisition_timeout = d;
        self
    }

    pub fn with_maximum_connection_age(mut self, d: Option<Duration>) -> Self {
        self.maximum_connection_age = d;
        self
    }

    pub fn with_maximum_connect_retries(mut self, n: u32) -> Self {
        self.maximum_connect_retries = n;
        self
    }

    pub fn with_default_max_concurrent_streams(mut self, n: u32) -> Self {
        assert!(n >= 1, "default_max_concurrent_streams must be at least 1");
        self.default_max_concurrent_streams = n;
        self
    }

    pub fn with_idle_interval(mut self, d: Duration) -> Self {
        self.idle_interval = d;
        self
    }

    /// Overrides the `3 * maximum_connections` default (spec.md §4.7).
    pub fn with_maximum_request_retries(mut self, n: u32) -> Self {
        self.maximum_request_retries = Some(n);
        self
    }

    pub fn with_tcp_user_timeout(mut self, d: Duration) -> Self {
        self.tcp_user_timeout = d;
        self
    }

    pub fn with_connection_retry_fuzz_interval(mut self, d: Duration) -> Self {
        self.connection_retry_fuzz_interval = d;
        self
    }

    pub fn with_retry_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        assert!(min <= max, "min_retry_delay must not exceed max_retry_delay");
        self.min_retry_delay = min;
        self.max_retry_delay = max;
        self
    }

    pub fn with_proxy_address(mut self, addr: Option<SocketAddr>) -> Self {
        self.proxy_address = addr;
        self
    }

    pub fn with_alpn(mut self, wants_alpn: bool) -> Self {
        self.wants_alpn = wants_alpn;
        self
    }

    pub fn with_monitor_connection_health(mut self, enabled: bool) -> Self {
        self.monitor_connection_health = enabled;
        self
    }

    pub fn with_response_timeout(mut self, d: Duration) -> Self {
        self.response_timeout = d;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn connection_acquisition_timeout(&self) -> Duration {
        self.connection_acquisition_timeout
    }

    pub fn maximum_connection_age(&self) -> Option<Duration> {
        self.maximum_connection_age
    }

    pub fn maximum_connect_retries(&self) -> u32 {
        self.maximum_connect_retries
    }

    pub fn default_max_concurrent_streams(&self) -> u32 {
        self.default_max_concurrent_streams
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Resolves the default (`3 * maximum_connections`, spec.md §4.7)
    /// unless overridden.
    pub fn maximum_request_retries(&self, maximum_connections: usize) -> u32 {
        self.maximum_request_retries
            .unwrap_or((3 * maximum_connections) as u32)
    }

    pub fn tcp_user_timeout(&self) -> Duration {
        self.tcp_user_timeout
    }

    pub fn connection_retry_fuzz_interval(&self) -> Duration {
        self.connection_retry_fuzz_interval
    }

    pub fn min_retry_delay(&self) -> Duration {
        self.min_retry_delay
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    pub fn proxy_address(&self) -> Option<SocketAddr> {
        self.proxy_address
    }

    pub fn wants_alpn(&self) -> bool {
        self.wants_alpn
    }

    pub fn monitor_connection_health(&self) -> bool {
        self.monitor_connection_health
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }
}
