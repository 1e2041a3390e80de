//! Retry-policy properties against the loopback fake HTTP/2 server: spec.md
//! §8 property 7 (only eligible errors/statuses are retried, others surface
//! immediately) and property 8 (`Retry-After` is honored when present).

mod support;

use std::sync::Arc;

use http::{Method, StatusCode};
use pushkit::config::{HttpClientProperties, PoolConfig};
use pushkit::retry::{DefaultHttpRetryPolicy, FcmServerErrorPolicy};
use pushkit::HttpClient;
use support::FakeServer;

fn fcm_client_for(server: &FakeServer, properties: HttpClientProperties) -> HttpClient {
    HttpClient::with_retry_policy(
        server.host(),
        server.port(),
        properties,
        PoolConfig::new("retry-fcm", 0, 1),
        Arc::new(FcmServerErrorPolicy::default()),
    )
    .expect("loopback client construction never fails")
}

fn default_client_for(server: &FakeServer, properties: HttpClientProperties) -> HttpClient {
    HttpClient::with_retry_policy(
        server.host(),
        server.port(),
        properties,
        PoolConfig::new("retry-default", 0, 1),
        Arc::new(DefaultHttpRetryPolicy),
    )
    .expect("loopback client construction never fails")
}

#[tokio::test]
async fn fcm_policy_retries_a_flaky_503_until_it_recovers() {
    // First two requests to /flaky answer 503 with Retry-After: 0; the
    // third answers 200. A zero-second Retry-After keeps this test fast
    // while still exercising the honored-header path (property 8).
    let server = FakeServer::start_with_flaky_failures(2).await;
    let client = fcm_client_for(&server, HttpClientProperties::new());

    let response = client
        .send(pushkit::message::HttpRequest::new(Method::GET, "/flaky"))
        .await
        .expect("retries exhaust the flakiness before giving up");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.flaky_failures_remaining(), 0);
}

#[tokio::test]
async fn fcm_policy_gives_up_once_the_retry_budget_is_exhausted() {
    // Always-failing /flaky, with a tiny retry budget — the client should
    // eventually surface the 503 rather than retry forever.
    let server = FakeServer::start_with_flaky_failures(u32::MAX).await;
    let properties = HttpClientProperties::new().with_maximum_request_retries(2);
    let client = fcm_client_for(&server, properties);

    let response = client
        .send(pushkit::message::HttpRequest::new(Method::GET, "/flaky"))
        .await
        .expect("a 503 is a successful write-and-read, not a ClientError");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn default_policy_does_not_retry_server_error_statuses() {
    // Without FcmServerErrorPolicy layered in, a 503 is returned as-is on
    // the first attempt — the default policy only retries transport-level
    // failures (spec.md §4.7), never a status code.
    let server = FakeServer::start_with_flaky_failures(u32::MAX).await;
    let client = default_client_for(&server, HttpClientProperties::new());

    let response = client
        .send(pushkit::message::HttpRequest::new(Method::GET, "/flaky"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.flaky_failures_remaining(), u32::MAX - 1);
}
