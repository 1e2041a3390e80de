//! Crate-wide error taxonomy.
//!
//! This module defines the single error type ([`ClientError`]) surfaced
//! across [`crate::client::HttpClient`]'s public API, plus the
//! module-scoped internal error types it is assembled from. Internal errors
//! convert into `ClientError` either losslessly (`#[from]`) or through an
//! explicit mapping function when the conversion needs to inspect the
//! source error first (see [`ClientError::from_h2_stream_error`]).

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of [`crate::client::HttpClient::send`] and
/// related public operations.
///
/// Variants follow the propagation policy in the design notes: connection-
/// and stream-level transport errors are retried internally up to the
/// configured retry budget before they ever reach a caller as `ClientError`;
/// everything else (timeouts, closure, cancellation, protocol violations
/// that escape retry) is surfaced directly.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The pool or [`crate::client::HttpClient`] has been closed.
    ///
    /// Never retried. Any `send` racing a `close()` call will observe this.
    #[error("client is closed")]
    ClientClosed,

    /// A permit could not be acquired within the configured
    /// `connection_acquisition_timeout`.
    #[error("timed out acquiring a connection after {0:?}")]
    AcquisitionTimeout(Duration),

    /// The pending-acquisition queue was full and this caller was the
    /// oldest waiter, so it was sacrificed to admit a newer one.
    #[error("pending acquisition limit reached")]
    PendingAcquisitionLimit,

    /// The channel was not active (already closing or closed) when a write
    /// was attempted.
    #[error("channel is inactive")]
    ChannelInactive,

    /// The channel has exhausted its local stream-id space and must be
    /// retired.
    #[error("channel stream id space exhausted")]
    ChannelStreamQuota,

    /// The HEADERS/DATA write for a request failed.
    #[error("write to channel failed: {0}")]
    ChannelWriteFailed(String),

    /// A per-stream response timeout elapsed, or a liveness ping was not
    /// acknowledged in time.
    #[error("socket timeout waiting for response")]
    SocketTimeout,

    /// The stream was closed (locally or by the peer) before a response
    /// was assembled, with no more specific cause recorded.
    #[error("stream closed before reply")]
    StreamClosedBeforeReply,

    /// An HTTP/2 stream-level error reported by the peer or the local `h2`
    /// stack.
    #[error("http/2 stream error: {0:?}")]
    Http2StreamError(Http2StreamErrorCode),

    /// The request was cancelled by the caller. Never retried.
    #[error("request cancelled")]
    Cancelled,

    /// Anything else: protocol-level errors that escaped the retry budget,
    /// or I/O failures establishing the underlying transport.
    #[error("I/O error: {0}")]
    Io(String),
}

/// HTTP/2 stream error codes the retry policy needs to distinguish.
///
/// Only the codes this crate's policy cares about are named explicitly;
/// anything else collapses to `Other`. See RFC 7540 §7 for the full
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Http2StreamErrorCode {
    /// The peer refused to process the stream before any processing
    /// occurred (RFC 7540 §8.1.4) — always safe to retry.
    RefusedStream,
    /// The peer requires HTTP/1.1 instead of HTTP/2 for this request.
    Http11Required,
    /// Any other stream error code.
    Other(u32),
}

impl ClientError {
    /// Maps a raw [`h2::Error`] observed at stream granularity into a
    /// [`ClientError`], inspecting its reset code so the retry policy can
    /// make a decision. This cannot be a blanket `#[from] h2::Error`
    /// because `h2::Error` does not distinguish connection-fatal errors
    /// from a single stream's `RST_STREAM` reason, and the two need
    /// different `ClientError` variants.
    pub fn from_h2_stream_error(err: &h2::Error) -> Self {
        if let Some(reason) = err.reason() {
            let code = match reason {
                h2::Reason::REFUSED_STREAM => Http2StreamErrorCode::RefusedStream,
                h2::Reason::HTTP_1_1_REQUIRED => Http2StreamErrorCode::Http11Required,
                other => Http2StreamErrorCode::Other(other.into()),
            };
            ClientError::Http2StreamError(code)
        } else {
            ClientError::Io(err.to_string())
        }
    }
}

impl From<PoolError> for ClientError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Closed => ClientError::ClientClosed,
            PoolError::Timeout(d) => ClientError::AcquisitionTimeout(d),
            PoolError::PendingAcquisitionLimit => ClientError::PendingAcquisitionLimit,
            PoolError::Cancelled => ClientError::Cancelled,
        }
    }
}

impl From<ConnectionError> for ClientError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Inactive => ClientError::ChannelInactive,
            ConnectionError::StreamQuota => ClientError::ChannelStreamQuota,
            ConnectionError::WriteFailed(msg) => ClientError::ChannelWriteFailed(msg),
            ConnectionError::Timeout => ClientError::SocketTimeout,
            ConnectionError::StreamClosedBeforeReply => ClientError::StreamClosedBeforeReply,
            ConnectionError::Http2(ref e) => ClientError::from_h2_stream_error(e),
            ConnectionError::Cancelled => ClientError::Cancelled,
        }
    }
}

/// Internal pool error type, scoped to [`crate::pool`].
///
/// Mirrors the teacher's convention of giving each subsystem its own
/// `thiserror` enum (`TransportError`, `CorrelationError`) rather than a
/// single crate-wide error from the start; [`PoolError`] is converted into
/// [`ClientError`] at the `HttpClient` boundary.
#[derive(Debug, Error, Clone)]
pub enum PoolError {
    /// The pool's work tree has been cancelled (`close()` was called).
    #[error("pool closed")]
    Closed,
    /// No permit became available before the given timeout elapsed.
    #[error("acquisition timed out after {0:?}")]
    Timeout(Duration),
    /// The pending-acquisition queue was saturated.
    #[error("pending acquisition limit reached")]
    PendingAcquisitionLimit,
    /// The caller's own task was cancelled while waiting.
    #[error("acquisition cancelled")]
    Cancelled,
}

/// Internal per-channel connection error type, scoped to
/// [`crate::connection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The channel was not active when a write was attempted.
    #[error("channel inactive")]
    Inactive,
    /// Local stream-id space exhausted.
    #[error("stream id space exhausted")]
    StreamQuota,
    /// The HEADERS/DATA write promise failed.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// Per-stream response timeout or ping timeout fired.
    #[error("timeout")]
    Timeout,
    /// Stream closed (locally or by peer) with no more specific cause.
    #[error("stream closed before reply")]
    StreamClosedBeforeReply,
    /// Raw `h2` stream-level error.
    #[error("http/2 error: {0}")]
    Http2(#[from] h2::Error),
    /// Cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

/// Internal channel-factory error type, scoped to [`crate::factory`].
#[derive(Debug, Error)]
pub enum ConnectError {
    /// TCP connect failed or timed out.
    #[error("connect failed: {0}")]
    Transport(#[source] std::io::Error),
    /// TLS handshake failed.
    #[error("tls handshake failed: {0}")]
    Tls(String),
    /// The HTTP/2 preface/SETTINGS handshake failed.
    #[error("http/2 handshake failed: {0}")]
    Handshake(#[from] h2::Error),
    /// DNS resolution failed for the target or proxy address.
    #[error("dns resolution failed: {0}")]
    Resolve(String),
    /// Retries exhausted without a successful connection.
    #[error("exhausted {attempts} connect attempts, last error: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Display of the final attempt's error.
        last: String,
    },
}

impl ConnectError {
    /// spec.md §4.4 "Retry decision": connect-refused, a generic transport
    /// timeout, and a channel that went inactive immediately after connect
    /// are transient and worth retrying; TLS, DNS, and HTTP/2 handshake
    /// failures are not (retrying an untrusted cert or a bad DNS answer
    /// wastes the whole retry budget on an error that will never clear).
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectError::Transport(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            ConnectError::Tls(_) | ConnectError::Resolve(_) | ConnectError::Handshake(_) => false,
            ConnectError::RetriesExhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_error_maps_to_client_error() {
        let err: ClientError = PoolError::Timeout(Duration::from_millis(500)).into();
        assert!(matches!(err, ClientError::AcquisitionTimeout(_)));

        let err: ClientError = PoolError::PendingAcquisitionLimit.into();
        assert!(matches!(err, ClientError::PendingAcquisitionLimit));

        let err: ClientError = PoolError::Closed.into();
        assert!(matches!(err, ClientError::ClientClosed));
    }

    #[test]
    fn connection_error_maps_to_client_error() {
        let err: ClientError = ConnectionError::Inactive.into();
        assert!(matches!(err, ClientError::ChannelInactive));

        let err: ClientError = ConnectionError::StreamQuota.into();
        assert!(matches!(err, ClientError::ChannelStreamQuota));
    }

    /// spec.md §4.4 "Retry decision": connect-refused and generic transport
    /// timeouts are retryable; TLS/DNS/handshake failures are not.
    #[test]
    fn connect_error_retryability_follows_spec_categories() {
        let refused = ConnectError::Transport(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(refused.is_retryable());

        let timed_out = ConnectError::Transport(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert!(timed_out.is_retryable());

        let tls = ConnectError::Tls("bad cert".to_string());
        assert!(!tls.is_retryable());

        let resolve = ConnectError::Resolve("no addresses".to_string());
        assert!(!resolve.is_retryable());
    }
}
