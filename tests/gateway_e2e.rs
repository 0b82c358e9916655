//! End-to-end relay tests over real HTTP.
//!
//! Each test binds the gateway to an ephemeral loopback port, drives it with
//! `RelayClient`, and shuts it down when the guard drops.

use agent_relay::client::RelayClient;
use agent_relay::config::GatewayConfig;
use agent_relay::gateway;
use agent_relay::relay::{Broker, BrokerOptions, NewMessage};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct RunningRelay {
    client: RelayClient,
    broker: Broker,
    _shutdown: oneshot::Sender<()>,
}

async fn start_relay(options: BrokerOptions) -> RunningRelay {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = Broker::with_options(options);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server_broker = broker.clone();
    tokio::spawn(async move {
        gateway::serve_on(
            listener,
            server_broker,
            &GatewayConfig::default(),
            async move {
                let _ = shutdown_rx.await;
            },
        )
        .await
        .unwrap();
    });

    RunningRelay {
        client: RelayClient::new(format!("http://{addr}")),
        broker,
        _shutdown: shutdown_tx,
    }
}

async fn default_relay() -> RunningRelay {
    start_relay(BrokerOptions::default()).await
}

fn tags(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

async fn wait_for_request(client: &RelayClient, tag: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let reply = client.check(&tags(&[tag]), &[]).await.unwrap();
        if let Some(first) = reply.body["messages"].as_array().and_then(|m| m.first()) {
            return first.clone();
        }
        assert!(Instant::now() < deadline, "request never became visible");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn coordinator_status_message_is_received_once() {
    let relay = default_relay().await;
    let sent = relay
        .client
        .send(&NewMessage::new("coordinator", "hi").with_tags(["status"]))
        .await
        .unwrap();
    assert_eq!(sent.status, 200);
    assert_eq!(sent.body["ok"], true);

    let first = relay
        .client
        .receive("developer", &tags(&["status"]), &[], true)
        .await
        .unwrap();
    assert_eq!(first.body["message"]["id"], sent.body["id"]);
    assert_eq!(first.body["message"]["consumed"], true);

    let second = relay
        .client
        .receive("developer", &tags(&["status"]), &[], true)
        .await
        .unwrap();
    assert_eq!(second.status, 200);
    assert!(second.body["message"].is_null());
}

#[tokio::test]
async fn developer_designer_rendezvous() {
    let relay = default_relay().await;

    let waiter = {
        let client = relay.client.clone();
        tokio::spawn(async move {
            client
                .send_and_wait(
                    &NewMessage::new("developer", "Need a layout for settings page")
                        .with_content(json!({"page": "settings"}))
                        .with_tags(["design-request"]),
                )
                .await
                .unwrap()
        })
    };

    let request = wait_for_request(&relay.client, "design-request").await;
    assert_eq!(request["awaiting_response"], true);
    assert_eq!(request["agent_id"], "developer");
    let request_id = request["id"].as_str().unwrap().to_string();

    let answer = relay
        .client
        .respond(&request_id, "designer", json!({"layout": "two-column"}))
        .await
        .unwrap();
    assert_eq!(answer.status, 200);

    let resolved = waiter.await.unwrap();
    assert_eq!(resolved.status, 200);
    assert_eq!(resolved.body["ok"], true);
    assert_eq!(resolved.body["id"], request_id.as_str());
    assert_eq!(resolved.body["response"]["layout"], "two-column");

    let duplicate = relay
        .client
        .respond(&request_id, "designer", json!("again"))
        .await
        .unwrap();
    assert_eq!(duplicate.status, 404);

    let status = relay.client.status().await.unwrap();
    assert_eq!(status.body["messages"]["total"], 2);
    assert_eq!(status.body["pending_requests"], 0);
}

#[tokio::test]
async fn unanswered_request_returns_408_then_respond_is_404() {
    let relay = start_relay(BrokerOptions {
        response_timeout: Duration::from_millis(200),
        max_messages: 0,
    })
    .await;

    let started = Instant::now();
    let reply = relay
        .client
        .send_and_wait(&NewMessage::new("developer", "hello?"))
        .await
        .unwrap();
    assert_eq!(reply.status, 408);
    assert!(started.elapsed() >= Duration::from_millis(200));
    let id = reply.body["id"].as_str().unwrap().to_string();

    let late = relay
        .client
        .respond(&id, "designer", json!("sorry"))
        .await
        .unwrap();
    assert_eq!(late.status, 404);
    assert_eq!(relay.broker.status().messages.total, 1);
}

#[tokio::test]
async fn fifo_within_filter_across_http() {
    let relay = default_relay().await;
    let m1 = relay
        .client
        .send(&NewMessage::new("a", "first").with_tags(["a"]))
        .await
        .unwrap();
    relay
        .client
        .send(&NewMessage::new("a", "noise").with_tags(["b"]))
        .await
        .unwrap();
    let m2 = relay
        .client
        .send(&NewMessage::new("a", "second").with_tags(["a"]))
        .await
        .unwrap();

    let r1 = relay.client.receive("x", &tags(&["a"]), &[], true).await.unwrap();
    let r2 = relay.client.receive("x", &tags(&["a"]), &[], true).await.unwrap();
    assert_eq!(r1.body["message"]["id"], m1.body["id"]);
    assert_eq!(r2.body["message"]["id"], m2.body["id"]);
}

#[tokio::test]
async fn tag_filters_are_or_matched() {
    let relay = default_relay().await;
    relay
        .client
        .send(&NewMessage::new("a", "xy").with_tags(["x", "y"]))
        .await
        .unwrap();

    let by_y = relay.client.check(&tags(&["y"]), &[]).await.unwrap();
    assert_eq!(by_y.body["messages"].as_array().unwrap().len(), 1);

    let by_z = relay.client.check(&tags(&["z"]), &[]).await.unwrap();
    assert!(by_z.body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn other_endpoints_respond_while_a_request_is_pending() {
    let relay = default_relay().await;
    let waiter = {
        let client = relay.client.clone();
        tokio::spawn(async move {
            client
                .send_and_wait(&NewMessage::new("developer", "slow").with_tags(["slow"]))
                .await
                .unwrap()
        })
    };
    let request = wait_for_request(&relay.client, "slow").await;

    let started = Instant::now();
    for i in 0..10 {
        let reply = relay
            .client
            .send(&NewMessage::new("chatter", format!("note {i}")))
            .await
            .unwrap();
        assert_eq!(reply.status, 200);
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    relay
        .client
        .respond(request["id"].as_str().unwrap(), "designer", json!(null))
        .await
        .unwrap();
    assert_eq!(waiter.await.unwrap().status, 200);
}

#[tokio::test]
async fn unknown_route_and_bad_body() {
    let relay = default_relay().await;
    let http = reqwest::Client::new();

    let missing = http
        .get(format!("{}/does-not-exist", relay.client.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let bad = http
        .post(format!("{}/send", relay.client.base_url()))
        .header("content-type", "application/json")
        .body("{\"agent_id\":")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status().as_u16(), 400);
    assert_eq!(relay.broker.status().messages.total, 0);
}
