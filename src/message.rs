//! Value types carried across the pool/connection boundary: the request a
//! caller wants sent and the response the caller ultimately sees. The
//! outcome itself is delivered through `h2`'s own `ResponseFuture` rather
//! than a hand-rolled continuation (spec.md §3).

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

/// An HTTP/2 request: pseudo-headers, ordinary headers, and an opaque body.
///
/// `:scheme` is always `https` (spec.md §6.1) so it is not a field here;
/// `:authority` is required by FCM and tolerated-absent by APNs (spec.md
/// §6.1), so it is optional and the caller decides whether to supply it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    authority: Option<String>,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    wants_response_body: bool,
}

impl HttpRequest {
    /// Starts building a request for `method path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            authority: None,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            wants_response_body: false,
        }
    }

    /// Sets the `:authority` pseudo-header. Required for FCM; omitting it
    /// against FCM yields a 400 and immediate stream close (spec.md §6.1).
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Appends one header name/value pair.
    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Convenience form for an integer-valued header.
    pub fn with_header_i64(self, name: http::HeaderName, value: i64) -> Self {
        self.with_header(name, http::HeaderValue::from(value))
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks that the caller wants the response body buffered even for a
    /// 200 status (spec.md §4.8: body present iff `wants_response_body` or
    /// status != 200).
    pub fn wanting_response_body(mut self) -> Self {
        self.wants_response_body = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn wants_response_body(&self) -> bool {
        self.wants_response_body
    }

    /// Builds the `http::Request<()>` this crate hands to
    /// [`crate::connection::Channel::send`]; the body travels alongside,
    /// not inside, since `h2` writes DATA frames separately from HEADERS.
    ///
    /// `h2` requires `:scheme` and, outside `CONNECT`, `:authority` to be
    /// present on the `http::Uri` itself (not merely as a `Host` header) —
    /// so when an authority was supplied this builds an absolute
    /// `https://authority/path` URI; FCM always supplies one (spec.md §6.1),
    /// APNs may omit it, in which case only `:path` is sent and `h2` derives
    /// `:scheme` from the connection.
    pub fn to_http(&self) -> http::Request<()> {
        let uri = match &self.authority {
            Some(authority) => format!("https://{authority}{}", self.path),
            None => self.path.clone(),
        };
        let mut builder = http::Request::builder().method(self.method.clone()).uri(uri);
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value.clone());
        }
        builder.body(()).expect("request parts were validated by HttpRequest's builder methods")
    }
}

/// An HTTP/2 response: status, case-insensitive headers, and an optional
/// body.
///
/// The body is present iff the request wanted it or the status was not
/// `200 OK` (spec.md §4.8). Owning the assembled bytes directly (rather
/// than a streaming handle) is a deliberate simplification: this crate
/// always buffers the whole response before resuming the caller (spec.md
/// §4.5 "Reading a response"), so there is no partial-read state to manage
/// beyond the inbound `h2::RecvStream` this type is built from. "Scoped
/// resource, close releases the buffer" (spec.md §3) is realized as `Drop`:
/// dropping an `HttpResponse` drops its `Bytes`, which is instant.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Takes ownership of the body, leaving `None` behind.
    pub fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }

    /// Case-insensitive header lookup returning every value for `name`
    /// (spec.md §6.2).
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// `retry-after`, recognized as integer seconds or an RFC 1123 date,
    /// converted to milliseconds-until (clamped to zero). `None` if the
    /// header is absent or malformed (spec.md §6.2, tested property 8).
    pub fn retry_after_millis(&self) -> Option<u64> {
        let raw = self.headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
        crate::retry::parse_retry_after_millis(raw)
    }
}

/// Case-insensitive response headers as the wire-level error taxonomy
/// (spec.md §6.5) classifies them: parsed JSON for 4xx bodies, opaque text
/// for 5xx.
#[derive(Debug, Clone, Default)]
pub struct ParsedErrorBody {
    pub json: Option<serde_json::Value>,
    pub text: Option<String>,
}

/// Classifies a status code per spec.md §6.5's wire-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }
}

/// Parses a 4xx body as JSON, a 5xx body as opaque text, per spec.md §6.5.
pub fn parse_error_body(status: StatusCode, body: &[u8]) -> ParsedErrorBody {
    match StatusClass::of(status) {
        StatusClass::ClientError => ParsedErrorBody {
            json: serde_json::from_slice(body).ok(),
            text: None,
        },
        StatusClass::ServerError => ParsedErrorBody {
            json: None,
            text: Some(String::from_utf8_lossy(body).into_owned()),
        },
        _ => ParsedErrorBody::default(),
    }
}

/// Headers as a case-insensitive name -> value-sequence map, used where a
/// plain `HeaderMap` is overkill (e.g. constructing test fixtures).
pub type HeaderBag = HashMap<String, Vec<String>>;
