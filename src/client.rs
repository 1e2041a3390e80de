//! `HttpClient`: the glue spec.md §4.7 describes — acquire a permit, write
//! the request on the chosen channel, await the response, retry transient
//! transport errors up to a configured budget, release the permit on every
//! exit.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use h2::RecvStream;
use tracing::warn;

use crate::config::{HttpClientProperties, PoolConfig};
use crate::connection::{Channel, ConnectionConfig};
use crate::error::{ClientError, ConnectError};
use crate::factory::{ChannelFactory, ChannelFactoryConfig};
use crate::message::{HttpRequest, HttpResponse, StatusClass};
use crate::peer::PeerProfile;
use crate::pool::{Factory, Pool};
use crate::poolable::PoolableChannel;
use crate::retry::HttpRetryPolicy;

/// Health status returned by [`HttpClient::health`] (spec.md §4.7 "Health
/// component").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Up,
    Down { reason: String },
}

/// Pooled HTTP/2 client for one peer (spec.md §4.7).
pub struct HttpClient {
    pool: Pool<PoolableChannel>,
    properties: HttpClientProperties,
    pool_config: PoolConfig,
    retry_policy: Arc<dyn HttpRetryPolicy>,
}

impl HttpClient {
    /// Builds a client dialing `host:port` directly, with `properties` and
    /// `pool_config` controlling dial/acquisition behavior and
    /// [`crate::retry::DefaultHttpRetryPolicy`] as the retry policy.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        properties: HttpClientProperties,
        pool_config: PoolConfig,
    ) -> Result<Self, ConnectError> {
        Self::with_retry_policy(
            host,
            port,
            properties,
            pool_config,
            Arc::new(crate::retry::DefaultHttpRetryPolicy),
        )
    }

    /// As [`HttpClient::new`], but with an explicit retry policy — used by
    /// [`HttpClient::for_peer`] to install [`crate::retry::FcmServerErrorPolicy`]
    /// for FCM.
    pub fn with_retry_policy(
        host: impl Into<String>,
        port: u16,
        properties: HttpClientProperties,
        pool_config: PoolConfig,
        retry_policy: Arc<dyn HttpRetryPolicy>,
    ) -> Result<Self, ConnectError> {
        Self::with_retry_policy_and_watermark(host, port, properties, pool_config, retry_policy, None)
    }

    /// As [`HttpClient::with_retry_policy`], but also overrides the watermark
    /// this crate would otherwise derive from the peer's advertised
    /// `MAX_CONCURRENT_STREAMS` (spec.md §6.3's "suggested concurrent-stream
    /// watermarks") — used by [`HttpClient::for_peer`] to carry
    /// [`PeerProfile::watermark_override`] through to every channel the
    /// factory admits.
    pub fn with_retry_policy_and_watermark(
        host: impl Into<String>,
        port: u16,
        properties: HttpClientProperties,
        pool_config: PoolConfig,
        retry_policy: Arc<dyn HttpRetryPolicy>,
        watermark_override: Option<crate::poolable::Watermark>,
    ) -> Result<Self, ConnectError> {
        let host = host.into();
        let factory_config = ChannelFactoryConfig {
            host: host.clone(),
            port,
            wants_alpn: properties.wants_alpn(),
            proxy_address: properties.proxy_address(),
            connect_timeout: properties.connect_timeout(),
            maximum_connect_retries: properties.maximum_connect_retries(),
            connection_retry_fuzz_interval: properties.connection_retry_fuzz_interval(),
            min_retry_delay: properties.min_retry_delay(),
            max_retry_delay: properties.max_retry_delay(),
            tcp_user_timeout: properties.tcp_user_timeout(),
            connection: ConnectionConfig {
                max_concurrent_streams: properties.default_max_concurrent_streams(),
                initial_window_size: None,
                initial_connection_window_size: None,
                monitor_connection_health: properties.monitor_connection_health(),
                idle_interval: properties.idle_interval(),
                ping_timeout: crate::connection::DEFAULT_PING_TIMEOUT,
                max_connection_age: properties.maximum_connection_age(),
            },
            default_max_concurrent_streams: properties.default_max_concurrent_streams(),
            watermark_override,
        };
        let factory: Arc<dyn Factory<PoolableChannel>> = Arc::new(ChannelFactory::new(factory_config)?);
        let pool = Pool::new(pool_config.clone(), factory);
        Ok(Self {
            pool,
            properties,
            pool_config,
            retry_policy,
        })
    }

    /// Builds a client from a named peer preset (spec.md §6.3 /
    /// SPEC_FULL.md §6.6), sizing the pool with `minimum_size`/`maximum_size`.
    pub fn for_peer(profile: PeerProfile, minimum_size: usize, maximum_size: usize) -> Result<Self, ConnectError> {
        let pool_config = PoolConfig::new(profile.host.clone(), minimum_size, maximum_size);
        Self::with_retry_policy_and_watermark(
            profile.host,
            profile.port,
            profile.properties,
            pool_config,
            profile.retry_policy,
            profile.watermark_override,
        )
    }

    /// Pre-fills the pool to `minimum_size` (spec.md §4.7 "prepare()").
    pub async fn prepare(&self) -> Result<usize, ClientError> {
        self.pool.prepare().await.map_err(Into::into)
    }

    /// Acquires a permit, writes `request` on the chosen channel, and awaits
    /// the response — retrying transport-level transient errors, and (per
    /// the installed [`HttpRetryPolicy`]) server-error status responses
    /// such as FCM's 502/503, up to `maximum_request_retries =
    /// 3 * maximum_connections` by default (spec.md §4.7 "Retry policy",
    /// §6.3 FCM backoff).
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let max_retries = self
            .properties
            .maximum_request_retries(self.pool_config.maximum_size());
        let acquisition_timeout = self.properties.connection_acquisition_timeout();
        let response_timeout = self.properties.response_timeout();

        let mut attempt = 0u32;
        loop {
            let outcome = self
                .pool
                .with_permit(acquisition_timeout, |mut channel| {
                    let request = request.clone();
                    async move { Self::write_and_read(&mut channel, &request, response_timeout).await }
                })
                .await
                .map_err(ClientError::from)?;

            match outcome {
                Ok(response) => {
                    let delay = self.retry_policy.retry_delay_for_response(
                        response.status(),
                        response.retry_after_millis(),
                        attempt,
                    );
                    match delay {
                        Some(delay) if attempt < max_retries => {
                            warn!(attempt, status = %response.status(), delay_ms = delay.as_millis() as u64, "retrying request after server-error status");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        _ => return Ok(response),
                    }
                }
                Err(err) => {
                    if attempt >= max_retries || !self.retry_policy.can_retry_request_after(&err) {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "retrying request after transport error");
                    attempt += 1;
                }
            }
        }
    }

    async fn write_and_read(
        channel: &mut Channel,
        request: &HttpRequest,
        response_timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        let body = if request.body().is_empty() { None } else { Some(request.body().clone()) };
        let (response, body_stream) = channel
            .send(request.to_http(), body, response_timeout)
            .await
            .map_err(ClientError::from)?;

        let status = response.status();
        let wants_body = request.wants_response_body() || StatusClass::of(status) != StatusClass::Success;
        let body = if wants_body {
            Some(Self::read_body(body_stream, response_timeout).await?)
        } else {
            None
        };
        Ok(HttpResponse::new(status, response.headers().clone(), body))
    }

    async fn read_body(mut stream: RecvStream, timeout: Duration) -> Result<Bytes, ClientError> {
        let mut buf = BytesMut::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let next = tokio::time::timeout(remaining, stream.data())
                .await
                .map_err(|_| ClientError::SocketTimeout)?;
            match next {
                Some(Ok(chunk)) => {
                    let _ = stream.flow_control().release_capacity(chunk.len());
                    buf.put(chunk);
                }
                Some(Err(e)) => return Err(ClientError::from_h2_stream_error(&e)),
                None => break,
            }
        }
        Ok(buf.freeze())
    }

    /// `test_acquisition`-based health check (spec.md §4.7 "Health
    /// component"): DOWN if the pool is closed, empty, or saturated within
    /// `timeout`, UP otherwise.
    pub async fn health(&self, timeout: Duration) -> Health {
        match self.pool.test_acquisition(timeout).await {
            Ok(_) => Health::Up,
            Err(e) => Health::Down { reason: e.to_string() },
        }
    }

    /// Number of live pooled channels (spec.md §4.7 "Metrics component").
    pub fn connection_count(&self) -> usize {
        self.pool.live_count()
    }

    /// Closes the pool; idempotent (spec.md §4.7 "close()").
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `Factory<PoolableChannel>::make` returns a boxed future; re-exported here
/// only so downstream crates implementing a custom factory (e.g. for tests)
/// can name the same alias this crate uses internally.
pub type ChannelMakeFuture = BoxFuture<'static, Result<PoolableChannel, ConnectError>>;
