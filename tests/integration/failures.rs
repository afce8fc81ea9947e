use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Refusals & Failures
// ══════════════════════════════════════════════════════════════════════════════

/// No announcements heard yet: 503 and nothing in the ledger.
#[tokio::test]
async fn empty_registry_is_service_unavailable() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let front = &cluster.nodes[front];

    let resp = client().get(front.url("/v1/anything")).send().await?;
    assert_eq!(resp.status(), 503);

    let stats: serde_json::Value = client().get(front.url("/v1/stats")).send().await?.json().await?;
    assert_eq!(stats, serde_json::json!({}));
    assert_eq!(front.sessions.active(), 0);
    Ok(())
}

/// The only peer drops off the overlay after announcing: 502, one error.
#[tokio::test]
async fn offline_peer_is_bad_gateway() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let port = spawn_upstream("w1").await?;
    let w1 = cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    cluster.net.set_online(&cluster.nodes[w1].id, false);
    let front = &cluster.nodes[front];
    let resp = client().get(front.url("/v1/ping")).send().await?;
    assert_eq!(resp.status(), 502);

    let stats = front.stats.get("llm").unwrap();
    assert_eq!(stats.requests, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.bandwidth, 0);

    // Back online, the same endpoint serves again.
    cluster.net.set_online(&cluster.nodes[w1].id, true);
    let resp = client().get(front.url("/v1/ping")).send().await?;
    assert_eq!(resp.status(), 200);
    assert_eq!(front.stats.get("llm").unwrap().requests, 1);
    Ok(())
}

/// The peer is reachable but its workload is not: the remote drops the
/// stream and the caller sees 502.
#[tokio::test]
async fn dead_workload_is_bad_gateway() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let port = closed_port().await?;
    cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    let front = &cluster.nodes[front];
    let resp = client().post(front.url("/v1/api/chat")).body("{}").send().await?;
    assert_eq!(resp.status(), 502);
    assert_eq!(front.stats.get("llm").unwrap().errors, 1);
    assert_eq!(front.sessions.active(), 0);
    Ok(())
}

/// Banning the caller's address refuses its requests before any routing.
#[tokio::test]
async fn banned_client_is_forbidden() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let port = spawn_upstream("w1").await?;
    cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    let front = &cluster.nodes[front];
    let ban: serde_json::Value = client()
        .post(front.url("/v1/ban"))
        .json(&serde_json::json!({ "addr": "127.0.0.1:5555" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(ban["addr"], "127.0.0.1");
    assert_eq!(ban["newly_banned"], true);

    let resp = client().get(front.url("/v1/ping")).send().await?;
    assert_eq!(resp.status(), 403);
    assert!(front.stats.snapshot().is_empty());
    assert_eq!(front.sessions.active(), 0);

    // The capitalised field name is accepted too, and a repeat ban is a no-op.
    let again: serde_json::Value = client()
        .post(front.url("/v1/ban"))
        .json(&serde_json::json!({ "Addr": "127.0.0.1" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(again["newly_banned"], false);

    let bans: serde_json::Value = client().get(front.url("/v1/bans")).send().await?.json().await?;
    assert_eq!(bans["bans"], serde_json::json!(["127.0.0.1"]));
    Ok(())
}

/// An empty address is rejected rather than banning nothing.
#[tokio::test]
async fn empty_ban_is_rejected() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let front = &cluster.nodes[front];

    let resp = client()
        .post(front.url("/v1/ban"))
        .json(&serde_json::json!({ "addr": "  " }))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);
    let bans: serde_json::Value = client().get(front.url("/v1/bans")).send().await?.json().await?;
    assert_eq!(bans["bans"], serde_json::json!([]));
    Ok(())
}
