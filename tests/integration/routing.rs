use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Routing
// ══════════════════════════════════════════════════════════════════════════════

/// A request sent to a node with no local services reaches the one peer
/// hosting the service, and the front node accounts for it.
#[tokio::test]
async fn request_reaches_remote_service() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let port = spawn_upstream("w1").await?;
    cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    let front = &cluster.nodes[front];
    let resp = client()
        .post(front.url("/v1/api/generate?stream=false"))
        .body("hello")
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let body = resp.text().await?;
    assert_eq!(body, "w1 POST /api/generate?stream=false 5");

    let stats: serde_json::Value = client().get(front.url("/v1/stats")).send().await?.json().await?;
    assert_eq!(stats["llm"]["requests"], 1);
    assert_eq!(stats["llm"]["errors"], 0);
    assert_eq!(stats["llm"]["bandwidth"], body.len() as u64);
    assert!(stats["llm"]["lastUpdate"].is_string());

    // The workload node only served; it routed nothing itself.
    assert!(cluster.nodes[1].stats.snapshot().is_empty());
    Ok(())
}

/// A HEAD answer crosses the overlay with the workload's length intact and
/// no body.
#[tokio::test]
async fn head_request_keeps_content_length() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let port = spawn_upstream("w1").await?;
    cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    let front = &cluster.nodes[front];
    let resp = client().head(front.url("/v1/ping")).send().await?;
    assert_eq!(resp.status(), 200);
    // The body a GET would have carried: "w1 HEAD /ping 0".
    assert_eq!(resp.headers()["content-length"], "15");
    assert!(resp.bytes().await?.is_empty());
    assert_eq!(front.stats.get("llm").unwrap().requests, 1);
    Ok(())
}

/// With one peer busy, every request goes to the idle one.
#[tokio::test]
async fn least_loaded_peer_is_chosen() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let p1 = spawn_upstream("w1").await?;
    let p2 = spawn_upstream("w2").await?;
    let w1 = cluster.add_node(vec![service("llm", p1)]).await?;
    cluster.add_node(vec![service("llm", p2)]).await?;
    cluster.announce_all().await?;

    let busy = cluster.nodes[w1].id;
    let _tickets: Vec<_> = (0..3).map(|_| cluster.nodes[w1].serving.enter()).collect();
    cluster.nodes[w1].announcer.publish().await?;

    let front = &cluster.nodes[front];
    wait_for(5, || {
        front
            .registry
            .snapshot()
            .iter()
            .any(|e| e.peer_id == busy && e.load == 3)
    })
    .await?;

    for _ in 0..4 {
        let body = client()
            .get(front.url("/v1/health"))
            .send()
            .await?
            .text()
            .await?;
        assert!(body.starts_with("w2 "), "routed to busy peer: {body}");
    }
    assert_eq!(front.stats.get("llm").unwrap().requests, 4);
    Ok(())
}

/// The service header pins selection to one service even when another
/// service has a less loaded endpoint.
#[tokio::test]
async fn service_header_selects_service() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let p1 = spawn_upstream("llm-node").await?;
    let p2 = spawn_upstream("db-node").await?;
    cluster.add_node(vec![service("llm", p1)]).await?;
    let db = cluster.add_node(vec![service("db", p2)]).await?;
    cluster.announce_all().await?;

    let _ticket = cluster.nodes[db].serving.enter();
    cluster.nodes[db].announcer.publish().await?;
    let db_id = cluster.nodes[db].id;
    let front = &cluster.nodes[front];
    wait_for(5, || {
        front
            .registry
            .snapshot()
            .iter()
            .any(|e| e.peer_id == db_id && e.load == 1)
    })
    .await?;

    let body = client()
        .get(front.url("/v1/query"))
        .send()
        .await?
        .text()
        .await?;
    assert!(body.starts_with("llm-node "), "{body}");

    let body = client()
        .get(front.url("/v1/query"))
        .header("x-undock-service", "db")
        .send()
        .await?
        .text()
        .await?;
    assert!(body.starts_with("db-node "), "{body}");

    let stats = front.stats.snapshot();
    assert_eq!(stats["llm"].requests, 1);
    assert_eq!(stats["db"].requests, 1);
    Ok(())
}

/// Sessions exist only while a request is in flight.
#[tokio::test]
async fn sessions_are_released_after_routing() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    let port = spawn_upstream("w1").await?;
    cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    let front = &cluster.nodes[front];
    let mut pending = Vec::new();
    for _ in 0..8 {
        pending.push(tokio::spawn(client().get(front.url("/v1/ping")).send()));
    }
    for p in pending {
        assert_eq!(p.await??.status(), 200);
    }

    assert_eq!(front.sessions.active(), 0);
    let sessions: serde_json::Value = client()
        .get(front.url("/v1/sessions"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(sessions["sessions"].as_array().unwrap().len(), 0);
    assert_eq!(front.stats.get("llm").unwrap().requests, 8);
    Ok(())
}
