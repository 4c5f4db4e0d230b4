// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests: a real bridge on a random port, agents driven over
//! WebSocket with `tokio-tungstenite`, callers over HTTP with `reqwest`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use rendezvous::config::BridgeConfig;
use rendezvous::connection::FETCH_DIRECTIVE;
use rendezvous::reaper::spawn_reaper;
use rendezvous::state::BridgeState;
use rendezvous::transport::build_router;

type Agent = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cache_ttl_ms: 5000,
        query_timeout_ms: 2000,
        reap_interval_ms: 60000,
        idle_timeout_ms: 120000,
        cache_retention_ms: 0,
        log_format: "text".into(),
        log_level: "info".into(),
    }
}

/// Spawn a bridge on a random port. The reaper is not started.
async fn spawn_bridge(config: BridgeConfig) -> anyhow::Result<(SocketAddr, Arc<BridgeState>)> {
    let state = Arc::new(BridgeState::new(config, CancellationToken::new()));
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, state))
}

async fn wait_until<F, Fut>(what: &str, mut cond: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !cond().await {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

async fn wait_registered(state: &Arc<BridgeState>, id: &str) -> anyhow::Result<()> {
    wait_until("registration", || {
        let state = Arc::clone(state);
        let id = id.to_owned();
        async move { state.registry.get(&id).await.is_some() }
    })
    .await
}

async fn wait_unregistered(state: &Arc<BridgeState>, id: &str) -> anyhow::Result<()> {
    wait_until("deregistration", || {
        let state = Arc::clone(state);
        let id = id.to_owned();
        async move { state.registry.get(&id).await.is_none() }
    })
    .await
}

async fn connect_agent(addr: SocketAddr, id: &str) -> anyhow::Result<Agent> {
    let url = format!("ws://{addr}/connect?client_id={id}");
    let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
    Ok(stream)
}

/// Next text frame from the bridge, skipping control frames.
async fn next_text(agent: &mut Agent) -> anyhow::Result<String> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, agent.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("agent stream ended"))??;
        match msg {
            Message::Text(text) => return Ok(text.as_str().to_owned()),
            Message::Close(_) => anyhow::bail!("connection closed by bridge"),
            _ => continue,
        }
    }
}

/// Assert the bridge sends nothing to the agent for a short while.
async fn assert_silent(agent: &mut Agent) {
    let res = tokio::time::timeout(Duration::from_millis(150), agent.next()).await;
    assert!(res.is_err(), "unexpected frame: {res:?}");
}

async fn query(addr: SocketAddr, id: &str) -> anyhow::Result<(u16, String)> {
    let resp = reqwest::get(format!("http://{addr}/query/{id}")).await?;
    let status = resp.status().as_u16();
    Ok((status, resp.text().await?))
}

// -- Scenario: register ---------------------------------------------------------

#[tokio::test]
async fn register_then_connect_with_returned_url() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{addr}/register"))
        .json(&serde_json::json!({ "client_id": "agent1" }))
        .send()
        .await?
        .json()
        .await?;
    let url = body["connection_url"].as_str().unwrap_or_default().to_owned();
    assert_eq!(url, format!("ws://{addr}/connect?client_id=agent1"));

    let (_agent, _) = tokio_tungstenite::connect_async(&url).await?;
    wait_registered(&state, "agent1").await?;
    assert_eq!(state.registry.len().await, 1);
    Ok(())
}

// -- Scenario: push then cached query -------------------------------------------

#[tokio::test]
async fn pushed_payload_is_served_without_directive() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    agent.send(Message::text("42".to_owned())).await?;
    wait_until("push cached", || {
        let state = Arc::clone(&state);
        async move { state.cache.get("agent1").await.is_some() }
    })
    .await?;

    let (status, body) = query(addr, "agent1").await?;
    assert_eq!(status, 200);
    assert_eq!(body, "42");
    assert_silent(&mut agent).await;
    Ok(())
}

// -- Scenario: ghost ------------------------------------------------------------

#[tokio::test]
async fn query_for_never_connected_id_is_404() -> anyhow::Result<()> {
    let (addr, _state) = spawn_bridge(test_config()).await?;
    let (status, _) = query(addr, "ghost").await?;
    assert_eq!(status, 404);
    Ok(())
}

// -- Scenario: live fetch -------------------------------------------------------

#[tokio::test]
async fn stale_cache_round_trips_one_directive() -> anyhow::Result<()> {
    let config = BridgeConfig { cache_ttl_ms: 50, ..test_config() };
    let (addr, state) = spawn_bridge(config).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    agent.send(Message::text("old".to_owned())).await?;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let caller = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    agent.send(Message::text("7".to_owned())).await?;

    let (status, body) = caller.await??;
    assert_eq!(status, 200);
    assert_eq!(body, "7");
    assert_silent(&mut agent).await;

    let (cached, _) = state.cache.get("agent1").await.unwrap_or_default();
    assert_eq!(cached.as_ref(), b"7");
    Ok(())
}

#[tokio::test]
async fn pushes_keep_flowing_after_a_round_trip() -> anyhow::Result<()> {
    let config = BridgeConfig { cache_ttl_ms: 1, ..test_config() };
    let (addr, state) = spawn_bridge(config).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let caller = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    agent.send(Message::text("reply".to_owned())).await?;
    assert_eq!(caller.await??.1, "reply");

    agent.send(Message::text("pushed".to_owned())).await?;
    wait_until("push cached", || {
        let state = Arc::clone(&state);
        async move {
            state.cache.get("agent1").await.map(|(p, _)| p.as_ref() == b"pushed").unwrap_or(false)
        }
    })
    .await
}

// -- Single slot ----------------------------------------------------------------

#[tokio::test]
async fn concurrent_query_for_same_id_is_busy() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let first = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);

    let (status, body) = query(addr, "agent1").await?;
    assert_eq!(status, 409, "body: {body}");

    agent.send(Message::text("one".to_owned())).await?;
    let (status, body) = first.await??;
    assert_eq!(status, 200);
    assert_eq!(body, "one");
    Ok(())
}

#[tokio::test]
async fn late_reply_is_not_delivered_to_next_query() -> anyhow::Result<()> {
    let config = BridgeConfig { cache_ttl_ms: 1, query_timeout_ms: 200, ..test_config() };
    let (addr, state) = spawn_bridge(config).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let first = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    let (status, _) = first.await??;
    assert_eq!(status, 504);

    // Reply to the abandoned directive arrives after the caller gave up.
    agent.send(Message::text("late".to_owned())).await?;
    wait_until("late reply cached", || {
        let state = Arc::clone(&state);
        async move { state.cache.get("agent1").await.is_some() }
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    agent.send(Message::text("fresh".to_owned())).await?;
    let (status, body) = second.await??;
    assert_eq!(status, 200);
    assert_eq!(body, "fresh");
    Ok(())
}

#[tokio::test]
async fn late_reply_after_next_directive_is_not_delivered() -> anyhow::Result<()> {
    let config = BridgeConfig { cache_ttl_ms: 1, query_timeout_ms: 200, ..test_config() };
    let (addr, state) = spawn_bridge(config).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let first = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    let (status, _) = first.await??;
    assert_eq!(status, 504);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The next query goes out before the agent answers the first directive.
    let second = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    agent.send(Message::text("late-for-first".to_owned())).await?;
    agent.send(Message::text("for-second".to_owned())).await?;

    let (status, body) = second.await??;
    assert_eq!(status, 200);
    assert_eq!(body, "for-second");
    Ok(())
}

#[tokio::test]
async fn short_caller_timeout_does_not_leave_client_busy() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let resp = reqwest::get(format!("http://{addr}/query/agent1?timeout_ms=100")).await?;
    assert_eq!(resp.status().as_u16(), 504);
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    agent.send(Message::text("late".to_owned())).await?;
    agent.send(Message::text("fresh".to_owned())).await?;

    let (status, body) = second.await??;
    assert_eq!(status, 200);
    assert_eq!(body, "fresh");
    Ok(())
}

#[tokio::test]
async fn caller_timeout_parameter_is_honoured() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;
    let _agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let started = std::time::Instant::now();
    let resp = reqwest::get(format!("http://{addr}/query/agent1?timeout_ms=100")).await?;
    assert_eq!(resp.status().as_u16(), 504);
    assert!(started.elapsed() < Duration::from_millis(1500));
    Ok(())
}

// -- Disconnects ----------------------------------------------------------------

#[tokio::test]
async fn agent_close_removes_registry_entry() -> anyhow::Result<()> {
    let config = BridgeConfig { cache_ttl_ms: 1, ..test_config() };
    let (addr, state) = spawn_bridge(config).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    agent.send(Message::text("bye".to_owned())).await?;
    agent.close(None).await?;
    wait_unregistered(&state, "agent1").await?;

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (status, _) = query(addr, "agent1").await?;
    assert_eq!(status, 404);
    Ok(())
}

#[tokio::test]
async fn agent_dropping_mid_fetch_is_transport_error() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;
    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;

    let caller = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut agent).await?, FETCH_DIRECTIVE);
    drop(agent);

    let (status, body) = caller.await??;
    assert_eq!(status, 500, "body: {body}");
    assert!(body.contains("TRANSPORT_ERROR"));
    Ok(())
}

#[tokio::test]
async fn reconnect_replaces_and_closes_previous_connection() -> anyhow::Result<()> {
    let (addr, state) = spawn_bridge(test_config()).await?;
    let mut first = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;
    let first_conn = state.registry.get("agent1").await.map(|h| h.conn_id);

    let mut second = connect_agent(addr, "agent1").await?;
    wait_until("replacement", || {
        let state = Arc::clone(&state);
        async move { state.registry.get("agent1").await.map(|h| h.conn_id) != first_conn }
    })
    .await?;

    // The old connection is closed by the bridge.
    assert!(next_text(&mut first).await.is_err());

    // Its teardown must not remove the new entry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.registry.len().await, 1);

    let caller = tokio::spawn(query(addr, "agent1"));
    assert_eq!(next_text(&mut second).await?, FETCH_DIRECTIVE);
    second.send(Message::text("second".to_owned())).await?;
    assert_eq!(caller.await??.1, "second");
    Ok(())
}

// -- Scenario: idle eviction ----------------------------------------------------

#[tokio::test]
async fn idle_agent_is_reaped_then_404() -> anyhow::Result<()> {
    let config = BridgeConfig {
        cache_ttl_ms: 1,
        reap_interval_ms: 50,
        idle_timeout_ms: 100,
        ..test_config()
    };
    let (addr, state) = spawn_bridge(config).await?;
    let reaper = spawn_reaper(Arc::clone(&state));

    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;
    wait_unregistered(&state, "agent1").await?;

    assert!(next_text(&mut agent).await.is_err());
    let (status, _) = query(addr, "agent1").await?;
    assert_eq!(status, 404);

    state.shutdown.cancel();
    reaper.await?;
    Ok(())
}

#[tokio::test]
async fn active_agent_survives_reaper() -> anyhow::Result<()> {
    let config = BridgeConfig { reap_interval_ms: 50, idle_timeout_ms: 300, ..test_config() };
    let (addr, state) = spawn_bridge(config).await?;
    let reaper = spawn_reaper(Arc::clone(&state));

    let mut agent = connect_agent(addr, "agent1").await?;
    wait_registered(&state, "agent1").await?;
    for i in 0..8 {
        agent.send(Message::text(format!("tick {i}"))).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(state.registry.get("agent1").await.is_some());

    state.shutdown.cancel();
    reaper.await?;
    Ok(())
}
