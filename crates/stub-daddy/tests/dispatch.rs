//! End-to-end tests for the data plane: matching, counting, exhaustion,
//! generators, sequences, delays, and concurrency.

use reqwest::Client;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stub_daddy::api::{DefaultValidator, PayloadValidator};
use stub_daddy::config::MatchingConfig;
use stub_daddy::dispatch::{DispatchContext, DispatchServer};
use stub_daddy::engine::StubEngine;

const PREFIX: &str = "/api/mock";

async fn start_server() -> SocketAddr {
    let engine = Arc::new(StubEngine::new(&MatchingConfig::default()));
    let validator: Arc<dyn PayloadValidator> = Arc::new(DefaultValidator);
    let ctx = Arc::new(DispatchContext {
        engine,
        validator,
        management_prefix: PREFIX.to_string(),
    });
    let server = DispatchServer::bind("127.0.0.1:0".parse().unwrap(), ctx)
        .await
        .expect("failed to bind test server");
    let addr = server.local_addr().expect("missing local addr");
    tokio::spawn(server.run());
    addr
}

async fn register(client: &Client, addr: SocketAddr, payload: Value) -> u64 {
    let response = client
        .post(format!("http://{addr}{PREFIX}"))
        .json(&payload)
        .send()
        .await
        .expect("register request failed");
    assert_eq!(response.status(), 201, "unexpected register status");
    let body: Value = response.json().await.expect("register response not JSON");
    body["id"].as_u64().expect("missing id")
}

async fn describe(client: &Client, addr: SocketAddr, id: u64) -> Value {
    client
        .get(format!("http://{addr}{PREFIX}/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Scenario: a one-shot literal stub answers once, then the same request
/// gets the unmatched diagnostic and the counters show exactly one call.
#[tokio::test]
async fn one_shot_literal_stub_exhausts() {
    let addr = start_server().await;
    let client = Client::new();

    let id = register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/widgets",
            "response": { "literal": { "status": 200, "body": { "count": 0 } } },
            "timesAllowed": 1
        }),
    )
    .await;

    let first = client
        .get(format!("http://{addr}/widgets"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(
        first
            .headers()
            .get("x-stub-daddy-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default(),
        id.to_string()
    );
    let body: Value = first.json().await.unwrap();
    assert_eq!(body, json!({ "count": 0 }));

    let second = client
        .get(format!("http://{addr}/widgets"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 404);
    let diagnostic: Value = second.json().await.unwrap();
    assert_eq!(diagnostic["errors"][0]["code"], "unmatched_request");
    assert_eq!(diagnostic["method"], "GET");
    assert_eq!(diagnostic["path"], "/widgets");

    let state = describe(&client, addr, id).await;
    assert_eq!(state["state"]["callCount"], 1);
    assert_eq!(state["state"]["exhausted"], true);
}

/// Scenario: an unlimited generator stub with body criteria echoes the
/// per-stub sequence index across calls.
#[tokio::test]
async fn generator_stub_echoes_sequence_index() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "POST",
            "path": "/widgets",
            "matchCriteria": { "body": { "name": "foo" } },
            "response": { "generator": {
                "script": "#{ status: 200, body: #{ id: state.sequenceIndex } }"
            } },
            "timesAllowed": "unlimited"
        }),
    )
    .await;

    for expected in 0..3 {
        let response = client
            .post(format!("http://{addr}/widgets"))
            .json(&json!({ "name": "foo", "extra": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "id": expected }));
    }

    // A body that misses the criteria is unmatched.
    let miss = client
        .post(format!("http://{addr}/widgets"))
        .json(&json!({ "name": "bar" }))
        .send()
        .await
        .unwrap();
    assert_eq!(miss.status(), 404);
}

/// Scenario: among two stubs on the same method and path, the one whose
/// criteria constrain more of the request wins.
#[tokio::test]
async fn more_specific_stub_wins() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/x",
            "response": { "literal": { "body": "loose" } }
        }),
    )
    .await;
    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/x",
            "matchCriteria": { "query": { "v": "2" } },
            "response": { "literal": { "body": "specific" } }
        }),
    )
    .await;

    let specific = client
        .get(format!("http://{addr}/x?v=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(specific.text().await.unwrap(), "specific");

    let loose = client
        .get(format!("http://{addr}/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(loose.text().await.unwrap(), "loose");

    let loose = client
        .get(format!("http://{addr}/x?v=3"))
        .send()
        .await
        .unwrap();
    assert_eq!(loose.text().await.unwrap(), "loose");
}

#[tokio::test]
async fn most_recent_stub_wins_equal_specificity() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/x",
            "response": { "literal": { "body": "older" } }
        }),
    )
    .await;
    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/x",
            "response": { "literal": { "body": "newer" } }
        }),
    )
    .await;

    let response = client
        .get(format!("http://{addr}/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "newer");
}

#[tokio::test]
async fn sequence_response_cycles_with_wraparound() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/flaky",
            "response": { "sequence": [
                { "status": 200, "body": "up" },
                { "status": 503, "body": "down" }
            ] }
        }),
    )
    .await;

    let mut seen = Vec::new();
    for _ in 0..5 {
        let response = client
            .get(format!("http://{addr}/flaky"))
            .send()
            .await
            .unwrap();
        seen.push(response.status().as_u16());
    }
    assert_eq!(seen, vec![200, 503, 200, 503, 200]);
}

#[tokio::test]
async fn generator_failure_is_internal_error_and_still_counts() {
    let addr = start_server().await;
    let client = Client::new();

    // Compiles fine, fails at runtime on a missing field.
    let id = register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/boom",
            "response": { "generator": { "script": "request.no_such.field" } }
        }),
    )
    .await;

    let response = client
        .get(format!("http://{addr}/boom"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "generator_error");

    // The call was made: state advanced despite the failed script.
    let state = describe(&client, addr, id).await;
    assert_eq!(state["state"]["callCount"], 1);
}

#[tokio::test]
async fn delayed_stub_does_not_block_other_requests() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/slow",
            "response": { "literal": { "body": "slow" } },
            "delay": 500
        }),
    )
    .await;
    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/fast",
            "response": { "literal": { "body": "fast" } }
        }),
    )
    .await;

    let slow_client = client.clone();
    let slow = tokio::spawn(async move {
        slow_client
            .get(format!("http://{addr}/slow"))
            .send()
            .await
            .unwrap()
    });

    // Give the slow request a head start so it is in its delay.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let fast = client
        .get(format!("http://{addr}/fast"))
        .send()
        .await
        .unwrap();
    let fast_elapsed = started.elapsed();
    assert_eq!(fast.text().await.unwrap(), "fast");
    assert!(
        fast_elapsed < Duration::from_millis(400),
        "fast request was stalled behind a delayed stub: {fast_elapsed:?}"
    );

    let slow = slow.await.unwrap();
    assert_eq!(slow.text().await.unwrap(), "slow");
}

/// N concurrent requests against a stub with `timesAllowed = N` must yield
/// exactly N matches; the surplus gets the unmatched diagnostic.
#[tokio::test]
async fn concurrent_requests_consume_finite_stub_exactly() {
    let addr = start_server().await;
    let client = Client::new();

    const ALLOWED: usize = 20;
    const ATTEMPTS: usize = 30;

    let id = register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/limited",
            "response": { "literal": { "body": "ok" } },
            "timesAllowed": ALLOWED
        }),
    )
    .await;

    let mut handles = Vec::new();
    for _ in 0..ATTEMPTS {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .get(format!("http://{addr}/limited"))
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        }));
    }

    let mut matched = 0;
    let mut unmatched = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            200 => matched += 1,
            404 => unmatched += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(matched, ALLOWED);
    assert_eq!(unmatched, ATTEMPTS - ALLOWED);

    let state = describe(&client, addr, id).await;
    assert_eq!(state["state"]["callCount"], ALLOWED);
    assert_eq!(state["state"]["remaining"], 0);
    assert_eq!(state["state"]["exhausted"], true);
}

#[tokio::test]
async fn unmatched_request_diagnostic_echoes_method_and_path() {
    let addr = start_server().await;
    let client = Client::new();

    let response = client
        .delete(format!("http://{addr}/nothing/here"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["method"], "DELETE");
    assert_eq!(body["path"], "/nothing/here");
}

#[tokio::test]
async fn path_matching_is_exact_by_default() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "GET",
            "path": "/widgets",
            "response": { "literal": {} }
        }),
    )
    .await;

    assert_eq!(
        client
            .get(format!("http://{addr}/widgets"))
            .send()
            .await
            .unwrap()
            .status(),
        200
    );
    assert_eq!(
        client
            .get(format!("http://{addr}/widgets/1"))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );
}

#[tokio::test]
async fn method_must_match() {
    let addr = start_server().await;
    let client = Client::new();

    register(
        &client,
        addr,
        json!({
            "method": "POST",
            "path": "/widgets",
            "response": { "literal": { "status": 201 } }
        }),
    )
    .await;

    assert_eq!(
        client
            .post(format!("http://{addr}/widgets"))
            .send()
            .await
            .unwrap()
            .status(),
        201
    );
    assert_eq!(
        client
            .get(format!("http://{addr}/widgets"))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );
}
