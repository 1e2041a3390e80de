//! `pushkit`: a pooled HTTP/2 transport for push-notification delivery
//! (APNs, FCM).
//!
//! The crate owns connection pooling, dialing/retry, and per-stream
//! request/response plumbing on top of the [`h2`] wire protocol; it does
//! not know about APNs or FCM payload formats — callers build an
//! [`message::HttpRequest`] and get back an [`message::HttpResponse`].
//!
//! Start with [`peer::PeerProfile`] for the two supported peers, or
//! [`client::HttpClient::new`] to dial an arbitrary host. [`client::HttpClient::send`]
//! is the one call most callers need.
//!
//! ```no_run
//! use pushkit::{client::HttpClient, message::HttpRequest, peer::PeerProfile};
//! use http::Method;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::for_peer(PeerProfile::fcm(), 1, 4)?;
//! client.prepare().await?;
//!
//! let request = HttpRequest::new(Method::POST, "/v1/projects/my-app/messages:send")
//!     .with_authority("fcm.googleapis.com")
//!     .with_body(r#"{"message":{"token":"..."}}"#.as_bytes().to_vec());
//! let response = client.send(request).await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod message;
pub mod peer;
pub mod pool;
pub mod poolable;
pub mod retry;
pub mod worker;

pub use client::HttpClient;
pub use error::ClientError;
pub use message::{HttpRequest, HttpResponse};
pub use peer::PeerProfile;
