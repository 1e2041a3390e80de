//! A single HTTP/2 channel: the `h2` handshake, the background task that
//! drives its I/O and liveness, and the handle ([`Channel`]) the pool and
//! client hand requests to.
//!
//! The wire protocol itself (framing, HPACK, flow control, stream-id
//! assignment) is entirely `h2`'s job; what this module adds on top is the
//! policy spec.md §4.5 describes: liveness pings on an idle channel, a
//! maximum connection age after which new streams are refused but in-flight
//! ones are allowed to finish, and a sticky record of the last
//! connection-level error so callers racing a dying channel see why it
//! died rather than a generic closed error.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use h2::client::SendRequest;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{ConnectError, ConnectionError};

/// How often the idle watcher checks for inactivity (spec.md §4.5 "Idle /
/// liveness pings"'s `idle_connection_interval`).
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(60);
/// How long an outstanding liveness ping may go unacknowledged before the
/// channel is declared dead (spec.md §4.5 `PING_TIMEOUT_SECONDS`, 1s default).
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(1);
/// Default per-stream response timeout (spec.md §4.5).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(11);
/// Bounds of the jittered close delay used when an idle channel has health
/// monitoring disabled (spec.md §4.5, §8 property 9).
const IDLE_CLOSE_JITTER: std::ops::RangeInclusive<u64> = 1000..=5000;
/// Fraction of `maximum_connection_age` below which the jittered max-age
/// close will never fire (spec.md §4.5 "Max-age handler", §8 property 10).
const MAX_AGE_JITTER_FLOOR: f64 = 0.9;

/// Tuning knobs for [`Channel::handshake`] and the background driver it
/// spawns.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Client-advertised `MAX_CONCURRENT_STREAMS`; also used as the
    /// watermark-derivation floor when the peer never advertises its own.
    pub max_concurrent_streams: u32,
    /// Initial stream-level flow control window.
    pub initial_window_size: Option<u32>,
    /// Initial connection-level flow control window.
    pub initial_connection_window_size: Option<u32>,
    /// `true` to send a liveness `PING` when the channel has been idle for
    /// `idle_interval` and close it if the ping goes unacknowledged; FCM
    /// profiles disable this (see peer presets) since FCM itself rate-limits
    /// unsolicited pings and will `GOAWAY` a connection that sends too many
    /// (spec.md §9's open question).
    pub monitor_connection_health: bool,
    /// How long the channel may go without an outbound request before it is
    /// considered idle (spec.md §4.5 `idle_connection_interval`).
    pub idle_interval: Duration,
    pub ping_timeout: Duration,
    /// Once a channel exceeds this age, [`Channel::is_closing`] starts
    /// returning `true` so the pool stops scheduling new streams onto it.
    /// `None` means channels never age out.
    pub max_connection_age: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            initial_window_size: None,
            initial_connection_window_size: None,
            monitor_connection_health: true,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            max_connection_age: None,
        }
    }
}

struct SharedState {
    active: AtomicBool,
    closing: AtomicBool,
    peer_max_concurrent_streams: AtomicU32,
    last_error: Mutex<Option<String>>,
    last_activity: Mutex<Instant>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            peer_max_concurrent_streams: AtomicU32::new(0),
            last_error: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        }
    }
}

impl SharedState {
    fn record_fatal(&self, message: String) {
        self.active.store(false, Ordering::SeqCst);
        self.closing.store(true, Ordering::SeqCst);
        let mut guard = self.last_error.lock().expect("connection state mutex poisoned");
        if guard.is_none() {
            *guard = Some(message);
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("connection state mutex poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().expect("connection state mutex poisoned").elapsed()
    }
}

/// A handle to one pooled HTTP/2 connection.
///
/// Cloning a `Channel` clones the underlying `h2::client::SendRequest`
/// (itself a cheap, internally-reference-counted handle) and the `Arc`s
/// tracking shared state; all clones observe the same liveness and error
/// state.
#[derive(Clone)]
pub struct Channel {
    send_request: SendRequest<Bytes>,
    state: Arc<SharedState>,
    created_at: Instant,
    channel_id: Uuid,
    cancel: CancellationToken,
}

impl Channel {
    /// Performs the HTTP/2 client preface and `SETTINGS` exchange over
    /// `io`, round-trips a `PING` to confirm the peer's own `SETTINGS` has
    /// been received and applied, then spawns the background task that
    /// drives the connection's I/O and liveness for as long as the returned
    /// [`Channel`] (or any clone of it) is in use.
    ///
    /// This does not return until that confirmation round-trip completes,
    /// since only then is the peer's advertised `MAX_CONCURRENT_STREAMS`
    /// known — reporting the channel ready any earlier risks stashing
    /// `h2`'s pre-`SETTINGS` default instead (spec.md §4.4).
    pub async fn handshake<IO>(io: IO, config: ConnectionConfig) -> Result<Self, ConnectError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = h2::client::Builder::new();
        builder.max_concurrent_streams(config.max_concurrent_streams);
        if let Some(window) = config.initial_window_size {
            builder.initial_window_size(window);
        }
        if let Some(window) = config.initial_connection_window_size {
            builder.initial_connection_window_size(window);
        }

        let (mut send_request, connection) = builder
            .handshake::<IO, Bytes>(io)
            .await
            .map_err(ConnectError::Handshake)?;

        let state = Arc::new(SharedState::default());
        state.active.store(true, Ordering::SeqCst);

        // The handshake future resolves once our own preface/SETTINGS has
        // been sent, not once the peer's SETTINGS has been received and
        // applied — reading `max_concurrent_send_streams()` here would
        // frequently observe `h2`'s pre-SETTINGS default rather than the
        // peer's advertised value. Round-trip a PING, driving the
        // connection while it is outstanding, so the peer's SETTINGS frame
        // (sent ahead of the PING ack on the same ordered stream) has been
        // processed before the value is stashed (spec.md §4.4).
        let mut connection = Box::pin(connection);
        match send_request.ping_pong() {
            Ok(mut ping_pong) => {
                let ack = ping_pong.ping(h2::Ping::opaque());
                tokio::pin!(ack);
                loop {
                    tokio::select! {
                        biased;
                        result = &mut ack => {
                            result.map_err(ConnectError::Handshake)?;
                            break;
                        }
                        result = &mut connection => {
                            return match result {
                                Ok(()) => Err(ConnectError::Transport(std::io::Error::new(
                                    std::io::ErrorKind::ConnectionAborted,
                                    "connection closed before peer settings were confirmed",
                                ))),
                                Err(e) => Err(ConnectError::Handshake(e)),
                            };
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not open a ping channel to confirm peer settings, using pre-settings default");
            }
        }
        if let Some(peer_max) = connection.max_concurrent_send_streams().try_into().ok() {
            state.peer_max_concurrent_streams.store(peer_max, Ordering::SeqCst);
        }

        let cancel = CancellationToken::new();
        let channel_id = Uuid::new_v4();
        let channel = Channel {
            send_request,
            state: state.clone(),
            created_at: Instant::now(),
            channel_id,
            cancel: cancel.clone(),
        };

        tokio::spawn(drive(connection, state.clone(), config.clone(), channel_id, cancel.clone()));
        tokio::spawn(idle_watch(channel.send_request.clone(), state, config, channel_id, cancel));

        Ok(channel)
    }

    /// A per-channel identifier, attached to every log line this channel's
    /// background tasks emit, so a reader can follow one connection's
    /// lifetime across interleaved log output from many pooled channels
    /// (teacher's `ConnectionId = Uuid` convention, see
    /// `transport::adapters::http::connection_manager`).
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// `true` once the handshake has completed and the connection has not
    /// (yet) observed a fatal error.
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    /// `true` once the channel should stop being offered new streams: a
    /// `GOAWAY` was received, a liveness ping timed out, the driving task
    /// ended, or the channel exceeded its configured maximum age.
    pub fn is_closing(&self) -> bool {
        self.state.closing.load(Ordering::SeqCst)
    }

    /// The peer's most recently advertised `MAX_CONCURRENT_STREAMS`, or
    /// `None` if the peer never sent one (in which case the caller's
    /// configured default applies — see [`crate::poolable::Watermark`]).
    pub fn peer_max_concurrent_streams(&self) -> Option<u32> {
        match self.state.peer_max_concurrent_streams.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    /// When the handshake completed.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The most recently recorded fatal connection-level error, if any.
    pub fn last_connection_error(&self) -> Option<String> {
        self.state.last_error.lock().expect("connection state mutex poisoned").clone()
    }

    /// Sends `request` (with no body, or a single pre-buffered body chunk)
    /// and awaits the response headers, bounded by `timeout`.
    ///
    /// Returns the response headers and the body stream; assembling a
    /// buffered [`crate::message::HttpResponse`] from that stream is the
    /// caller's job (see [`crate::client::HttpClient::send`]), since
    /// whether and how much of the body to buffer is a client-level policy,
    /// not a connection-level one.
    pub async fn send(
        &mut self,
        request: http::Request<()>,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<(http::Response<()>, h2::RecvStream), ConnectionError> {
        if !self.is_active() || self.is_closing() {
            return Err(ConnectionError::Inactive);
        }
        self.state.touch();

        let end_of_stream = body.is_none();
        let (response_future, mut send_stream) = self
            .send_request
            .send_request(request, end_of_stream)
            .map_err(|e| ConnectionError::WriteFailed(e.to_string()))?;

        if let Some(chunk) = body {
            send_stream
                .send_data(chunk, true)
                .map_err(|e| ConnectionError::WriteFailed(e.to_string()))?;
        }

        match tokio::time::timeout(timeout, response_future).await {
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                Ok((http::Response::from_parts(parts, ()), body))
            }
            Ok(Err(e)) => {
                if e.reason().is_some() {
                    Err(ConnectionError::Http2(e))
                } else {
                    Err(ConnectionError::StreamClosedBeforeReply)
                }
            }
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Requests a graceful shutdown: cancels this channel's background
    /// tasks, which causes the driver to ask `h2` to send `GOAWAY` and the
    /// idle watcher to stop, after which [`Channel::is_closing`] returns
    /// `true` while any already-open streams are allowed to finish.
    ///
    /// Called both by callers that want to retire a channel explicitly and
    /// by [`crate::factory::ChannelFactory::recycle`] when the pool's reaper
    /// prunes this channel back out — without cancelling here, a reaped
    /// channel's driver task would simply run forever, leaking the
    /// underlying socket.
    pub fn begin_graceful_shutdown(&self) {
        self.state.closing.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

async fn drive<IO>(
    mut connection: std::pin::Pin<Box<h2::client::Connection<IO, Bytes>>>,
    state: Arc<SharedState>,
    config: ConnectionConfig,
    channel_id: Uuid,
    cancel: CancellationToken,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let max_age_sleep = match config.max_connection_age {
        // spec.md §4.5 "Max-age handler": close after a randomized duration
        // in [0.9*age, 1.0*age], not a fixed deadline, so that a pool full
        // of same-age channels does not retire them all in the same instant.
        Some(age) => {
            let floor_millis = (age.as_millis() as f64 * MAX_AGE_JITTER_FLOOR) as u64;
            let ceil_millis = age.as_millis() as u64;
            let jittered = if ceil_millis > floor_millis {
                rand::thread_rng().gen_range(floor_millis..=ceil_millis)
            } else {
                ceil_millis
            };
            Box::pin(tokio::time::sleep(Duration::from_millis(jittered)))
                as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        }
        None => Box::pin(futures::future::pending()),
    };
    tokio::pin!(max_age_sleep);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                connection.as_mut().graceful_shutdown();
                state.closing.store(true, Ordering::SeqCst);
            }
            result = &mut connection => {
                match result {
                    Ok(()) => {
                        debug!(%channel_id, "http/2 connection closed cleanly");
                        state.record_fatal("connection closed".to_string());
                    }
                    Err(e) => {
                        warn!(%channel_id, error = %e, "http/2 connection ended with an error");
                        state.record_fatal(e.to_string());
                    }
                }
                return;
            }
            _ = &mut max_age_sleep => {
                trace!(%channel_id, "channel reached its configured maximum age, no longer accepting new streams");
                state.closing.store(true, Ordering::SeqCst);
                // keep driving the connection so in-flight streams can finish
                max_age_sleep.set(Box::pin(futures::future::pending()));
            }
        }
    }
}

/// Watches for inactivity and applies spec.md §4.5's "Idle / liveness pings"
/// policy once the channel has gone `idle_interval` without an outbound
/// write: either a monitored liveness ping (closing the channel if it times
/// out) or, with monitoring disabled, a jittered close in `[1s, 5s]`
/// (spec.md §8 property 9).
async fn idle_watch(
    mut send_request: SendRequest<Bytes>,
    state: Arc<SharedState>,
    config: ConnectionConfig,
    channel_id: Uuid,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.idle_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if state.closing.load(Ordering::SeqCst) {
                    return;
                }
                if state.idle_for() < config.idle_interval {
                    continue;
                }
                if config.monitor_connection_health {
                    let Ok(mut ping_pong) = send_request.ping_pong() else {
                        return;
                    };
                    let ping = h2::Ping::opaque();
                    match tokio::time::timeout(config.ping_timeout, ping_pong.ping(ping)).await {
                        Ok(Ok(())) => {
                            trace!(%channel_id, "liveness ping acknowledged");
                            state.touch();
                        }
                        Ok(Err(e)) => {
                            warn!(%channel_id, error = %e, "liveness ping failed");
                            state.record_fatal(format!("ping failed: {e}"));
                            return;
                        }
                        Err(_) => {
                            warn!(%channel_id, "liveness ping timed out");
                            state.record_fatal("ping timed out".to_string());
                            return;
                        }
                    }
                } else {
                    debug!(%channel_id, "channel idle with health monitoring disabled, scheduling jittered close");
                    state.closing.store(true, Ordering::SeqCst);
                    let delay_millis = rand::thread_rng().gen_range(IDLE_CLOSE_JITTER);
                    tokio::time::sleep(Duration::from_millis(delay_millis)).await;
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}
