use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  API Views
// ══════════════════════════════════════════════════════════════════════════════

async fn get(node: &Node, path: &str) -> Result<serde_json::Value> {
    Ok(client().get(node.url(path)).send().await?.error_for_status()?.json().await?)
}

#[tokio::test]
async fn status_reports_node_view() -> Result<()> {
    let mut cluster = Cluster::new();
    let port = spawn_upstream("w1").await?;
    let front = cluster.add_node(vec![]).await?;
    let w1 = cluster.add_node(vec![service("llm", port)]).await?;
    cluster.announce_all().await?;

    let status = get(&cluster.nodes[front], "/v1/status").await?;
    assert_eq!(status["id"], cluster.nodes[front].id.to_string());
    assert_eq!(status["services"], serde_json::json!([]));
    assert_eq!(status["peers_known"], 1);
    assert_eq!(status["endpoints"], 1);
    assert_eq!(status["active_sessions"], 0);
    assert_eq!(status["banned"], 0);

    let status = get(&cluster.nodes[w1], "/v1/status").await?;
    assert_eq!(status["services"][0]["id"], "llm");
    assert_eq!(status["services"][0]["port"], port);
    // The front node hosts nothing, so the workload node has nowhere to route.
    assert_eq!(status["peers_known"], 1);
    assert_eq!(status["endpoints"], 0);
    Ok(())
}

#[tokio::test]
async fn peers_and_endpoints_views() -> Result<()> {
    let mut cluster = Cluster::new();
    let p1 = spawn_upstream("w1").await?;
    let front = cluster.add_node(vec![]).await?;
    let w1 = cluster.add_node(vec![service("llm", p1), service("embed", p1)]).await?;
    cluster.announce_all().await?;

    let w1_id = cluster.nodes[w1].id.to_string();
    let front = &cluster.nodes[front];

    let endpoints = get(front, "/v1/endpoints").await?;
    let endpoints = endpoints["endpoints"].as_array().unwrap().clone();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["serviceID"], "llm");
    assert_eq!(endpoints[1]["serviceID"], "embed");
    for e in &endpoints {
        assert_eq!(e["peerID"], w1_id.as_str());
        assert_eq!(e["load"], 0);
    }

    let peers = get(front, "/v1/peers").await?;
    let peers = peers["peers"].as_array().unwrap().clone();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["id"], w1_id.as_str());
    assert_eq!(peers[0]["services"].as_array().unwrap().len(), 2);
    assert!(peers[0]["lastSeen"].is_string());
    Ok(())
}

/// A node that joins late becomes routable as soon as it is told to announce.
#[tokio::test]
async fn announce_on_demand() -> Result<()> {
    let mut cluster = Cluster::new();
    let front = cluster.add_node(vec![]).await?;
    cluster.announce_all().await?;
    assert!(cluster.nodes[front].registry.is_empty());

    let port = spawn_upstream("late").await?;
    let late = cluster.add_node(vec![service("llm", port)]).await?;
    let resp: serde_json::Value = client()
        .post(cluster.nodes[late].url("/v1/announce"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(resp["services"], 1);

    let front = &cluster.nodes[front];
    wait_for(5, || front.registry.len() == 1).await?;
    let body = client().get(front.url("/v1/hello")).send().await?.text().await?;
    assert_eq!(body, "late GET /hello 0");
    Ok(())
}
