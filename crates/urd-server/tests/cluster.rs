//! End-to-end tests against real replicas on loopback TCP.
//!
//! Each test spawns its own cluster on ephemeral ports, drives it over HTTP
//! like any client would, and polls for the eventually consistent effects of
//! the background fan-out loops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};

use urd_cluster::{BroadcastConfig, Broadcaster};
use urd_server::{serve, AppState};
use urd_store::{find_shard, init_shards, Replica};
use urd_types::KvResponseBody;

const POLL_DEADLINE: Duration = Duration::from_secs(3);
const POLL_STEP: Duration = Duration::from_millis(50);

struct TestCluster {
    addrs: Vec<String>,
    client: reqwest::Client,
}

impl TestCluster {
    /// Spawn `n` replicas sharing one view, all with the same shard count.
    async fn spawn(n: usize, shard_count: usize) -> Result<Self> {
        Self::spawn_mixed(&vec![shard_count; n]).await
    }

    /// Spawn one replica per entry in `shard_counts`; a 0 entry is a node
    /// that joins later via `/shard/add-member`.
    async fn spawn_mixed(shard_counts: &[usize]) -> Result<Self> {
        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for _ in shard_counts {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            addrs.push(listener.local_addr()?.to_string());
            listeners.push(listener);
        }

        for (i, listener) in listeners.into_iter().enumerate() {
            let replica =
                Arc::new(Replica::new(addrs[i].clone(), addrs.clone(), shard_counts[i])?);
            let cluster = Arc::new(Broadcaster::new(
                replica.clone(),
                BroadcastConfig {
                    retry_interval: Duration::from_millis(50),
                    ..BroadcastConfig::default()
                },
            ));
            let state = AppState { replica, cluster };
            tokio::spawn(async move { serve(state, listener).await.unwrap() });
        }

        Ok(TestCluster { addrs, client: reqwest::Client::new() })
    }

    fn url(&self, node: usize, path: &str) -> String {
        format!("http://{}{path}", self.addrs[node])
    }

    async fn put_key(&self, node: usize, key: &str, body: Value) -> Result<reqwest::Response> {
        Ok(self.client.put(self.url(node, &format!("/kvs/{key}"))).json(&body).send().await?)
    }

    async fn get_key(&self, node: usize, key: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(self.url(node, &format!("/kvs/{key}")))
            .json(&json!({}))
            .send()
            .await?)
    }

    /// Poll a GET until it answers with `status`, failing at the deadline.
    async fn await_key_status(&self, node: usize, key: &str, status: u16) -> Result<Value> {
        let deadline = Instant::now() + POLL_DEADLINE;
        loop {
            let res = self.get_key(node, key).await?;
            if res.status().as_u16() == status {
                return Ok(res.json().await.unwrap_or(Value::Null));
            }
            anyhow::ensure!(
                Instant::now() < deadline,
                "node {node} never answered {status} for key {key} (last: {})",
                res.status()
            );
            tokio::time::sleep(POLL_STEP).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Replication and causality
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_replicates_within_the_shard() -> Result<()> {
    let c = TestCluster::spawn(3, 1).await?;

    let res = c.put_key(0, "ride", json!({"value": 1})).await?;
    assert_eq!(res.status().as_u16(), 201);
    let body: KvResponseBody = res.json().await?;
    assert_eq!(body.result, "created");
    assert_eq!(body.shard_id.as_deref(), Some("s0"));
    assert_eq!(body.causal_metadata.entry("127.0.0.1"), 1);

    for node in 1..3 {
        let found = c.await_key_status(node, "ride", 200).await?;
        assert_eq!(found["value"], json!(1));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsatisfied_dependencies_answer_503() -> Result<()> {
    let c = TestCluster::spawn(3, 1).await?;

    // A reader claiming writes nobody has seen is turned away.
    let metadata = json!({"Clocks": {"9.9.9.9": 5}, "Self": "9.9.9.9"});
    let res = c
        .client
        .get(c.url(2, "/kvs/ride"))
        .json(&json!({"causal-metadata": metadata}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 503);

    // A real dependency chain resolves once replication lands.
    let res = c.put_key(0, "ride", json!({"value": 1})).await?;
    let write: KvResponseBody = res.json().await?;

    let deadline = Instant::now() + POLL_DEADLINE;
    loop {
        let res = c
            .client
            .get(c.url(2, "/kvs/ride"))
            .json(&json!({"causal-metadata": write.causal_metadata}))
            .send()
            .await?;
        match res.status().as_u16() {
            200 => {
                let body: Value = res.json().await?;
                assert_eq!(body["value"], json!(1));
                break;
            }
            503 => {
                anyhow::ensure!(Instant::now() < deadline, "dependency never satisfied");
                tokio::time::sleep(POLL_STEP).await;
            }
            other => anyhow::bail!("unexpected status {other}"),
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_fans_out_to_the_shard() -> Result<()> {
    let c = TestCluster::spawn(3, 1).await?;

    let res = c.put_key(0, "ride", json!({"value": 1})).await?;
    let write: KvResponseBody = res.json().await?;
    c.await_key_status(1, "ride", 200).await?;

    let res = c
        .client
        .delete(c.url(0, "/kvs/ride"))
        .json(&json!({"causal-metadata": write.causal_metadata}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 200);
    let body: KvResponseBody = res.json().await?;
    assert_eq!(body.result, "deleted");

    c.await_key_status(1, "ride", 404).await?;
    c.await_key_status(2, "ride", 404).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_validation_boundaries() -> Result<()> {
    let c = TestCluster::spawn(2, 1).await?;

    let at_limit = "a".repeat(50);
    let res = c.put_key(0, &at_limit, json!({"value": 1})).await?;
    assert_eq!(res.status().as_u16(), 201);

    let over_limit = "a".repeat(51);
    let res = c.put_key(0, &over_limit, json!({"value": 1})).await?;
    assert_eq!(res.status().as_u16(), 400);

    let res = c.put_key(0, "novalue", json!({})).await?;
    assert_eq!(res.status().as_u16(), 400);

    // When both complaints apply, the key length wins.
    let res = c.put_key(0, &over_limit, json!({})).await?;
    assert_eq!(res.status().as_u16(), 400);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], json!("Key is too long"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cm_endpoint_gates_like_a_write() -> Result<()> {
    let c = TestCluster::spawn(2, 1).await?;

    let res = c
        .client
        .put(c.url(0, "/cm"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 400, "only a malformed body is rejected");

    // An empty clocks map is vacuously ready and sails through the gate.
    let res = c.client.put(c.url(0, "/cm")).json(&json!({})).send().await?;
    assert_eq!(res.status().as_u16(), 200);

    let future = json!({"causal-metadata": {"Clocks": {"9.9.9.9": 5}, "Self": "9.9.9.9"}});
    let res = c.client.put(c.url(0, "/cm")).json(&future).send().await?;
    assert_eq!(res.status().as_u16(), 503);

    let next = json!({"causal-metadata": {"Clocks": {"9.9.9.9": 0}, "Self": "9.9.9.9"}});
    let res = c.client.put(c.url(0, "/cm")).json(&next).send().await?;
    assert_eq!(res.status().as_u16(), 200);
    Ok(())
}

// ---------------------------------------------------------------------------
// View registry
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn view_delete_propagates_and_self_delete_is_refused() -> Result<()> {
    let c = TestCluster::spawn(3, 1).await?;

    let res: Value = c.client.get(c.url(0, "/view")).send().await?.json().await?;
    assert_eq!(res["view"].as_array().unwrap().len(), 3);

    let res = c
        .client
        .delete(c.url(0, "/view"))
        .json(&json!({"socket-address": c.addrs[0]}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 400, "a node never deletes itself");

    let res = c
        .client
        .delete(c.url(0, "/view"))
        .json(&json!({"socket-address": c.addrs[1]}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 200);

    // The delete reaches the remaining peer through the broadcast flag.
    let deadline = Instant::now() + POLL_DEADLINE;
    loop {
        let view: Value = c.client.get(c.url(2, "/view")).send().await?.json().await?;
        let listed = view["view"].as_array().unwrap().iter().any(|a| a == &json!(c.addrs[1]));
        if !listed {
            break;
        }
        anyhow::ensure!(Instant::now() < deadline, "view delete never propagated");
        tokio::time::sleep(POLL_STEP).await;
    }

    let res = c
        .client
        .delete(c.url(0, "/view"))
        .json(&json!({"socket-address": c.addrs[1]}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 404, "already removed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn foreign_keys_are_forwarded_to_their_shard() -> Result<()> {
    let c = TestCluster::spawn(4, 2).await?;
    let table = init_shards(2, &c.addrs)?;

    // Pick a key owned by s1 and write it through a node in s0.
    let key = (0..)
        .map(|i| format!("key{i}"))
        .find(|k| find_shard(k, &table).unwrap() == "s1")
        .unwrap();

    let res = c.put_key(0, &key, json!({"value": 7})).await?;
    assert_eq!(res.status().as_u16(), 201);
    let body: KvResponseBody = res.json().await?;
    assert_eq!(body.shard_id.as_deref(), Some("s1"), "the owner's shard id comes back");

    // Readable through every node, forwarded or not.
    for node in 0..4 {
        let found = c.await_key_status(node, &key, 200).await?;
        assert_eq!(found["value"], json!(7));
        assert_eq!(found["shard-id"], json!("s1"));
    }

    // The key landed only on s1's members.
    let count: Value =
        c.client.get(c.url(0, "/shard/key-count/s1")).send().await?.json().await?;
    assert_eq!(count["shard-key-count"], json!(1));
    let count: Value =
        c.client.get(c.url(0, "/shard/key-count/s0")).send().await?.json().await?;
    assert_eq!(count["shard-key-count"], json!(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shard_introspection_endpoints() -> Result<()> {
    let c = TestCluster::spawn(4, 2).await?;

    let ids: Value = c.client.get(c.url(0, "/shard/ids")).send().await?.json().await?;
    assert_eq!(ids["shard-ids"], json!(["s0", "s1"]));

    let own: Value =
        c.client.get(c.url(0, "/shard/node-shard-id")).send().await?.json().await?;
    assert_eq!(own["node-shard-id"], json!("s0"));
    let own: Value =
        c.client.get(c.url(3, "/shard/node-shard-id")).send().await?.json().await?;
    assert_eq!(own["node-shard-id"], json!("s1"));

    let members: Value =
        c.client.get(c.url(0, "/shard/members/s1")).send().await?.json().await?;
    assert_eq!(members["shard-members"], json!([c.addrs[2], c.addrs[3]]));

    let res = c.client.get(c.url(0, "/shard/members/s9")).send().await?;
    assert_eq!(res.status().as_u16(), 404);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reshard_redistributes_every_key() -> Result<()> {
    let c = TestCluster::spawn(4, 1).await?;

    // Seed a handful of keys, chaining the causal metadata like one client.
    let mut metadata = Value::Null;
    for i in 0..6 {
        let mut body = json!({"value": i});
        if !metadata.is_null() {
            body["causal-metadata"] = metadata.clone();
        }
        let res = c.put_key(0, &format!("key{i}"), body).await?;
        assert_eq!(res.status().as_u16(), 201);
        let write: KvResponseBody = res.json().await?;
        metadata = serde_json::to_value(&write.causal_metadata)?;
    }

    let res = c
        .client
        .put(c.url(0, "/shard/reshard"))
        .json(&json!({"shard-count": 2}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 200);
    let body: Value = res.json().await?;
    assert_eq!(body["result"], json!("resharded"));

    // Every node eventually runs the new two-shard layout.
    let deadline = Instant::now() + POLL_DEADLINE;
    for node in 0..4 {
        loop {
            let ids: Value =
                c.client.get(c.url(node, "/shard/ids")).send().await?.json().await?;
            if ids["shard-ids"] == json!(["s0", "s1"]) {
                break;
            }
            anyhow::ensure!(Instant::now() < deadline, "node {node} never resharded");
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    // No key was lost: the partitions add up and every key still resolves.
    let s0: Value =
        c.client.get(c.url(0, "/shard/key-count/s0")).send().await?.json().await?;
    let s1: Value =
        c.client.get(c.url(0, "/shard/key-count/s1")).send().await?.json().await?;
    assert_eq!(
        s0["shard-key-count"].as_u64().unwrap() + s1["shard-key-count"].as_u64().unwrap(),
        6
    );

    for i in 0..6 {
        let found = c.await_key_status(0, &format!("key{i}"), 200).await?;
        assert_eq!(found["value"], json!(i));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn undersized_reshard_is_rejected() -> Result<()> {
    let c = TestCluster::spawn(4, 1).await?;

    let res = c
        .client
        .put(c.url(0, "/shard/reshard"))
        .json(&json!({"shard-count": 3}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 400, "3 shards over 4 nodes drops below 2 replicas");

    let res = c
        .client
        .put(c.url(0, "/shard/reshard"))
        .json(&json!({"shard-count": 0}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 400);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_joiner_syncs_shard_state() -> Result<()> {
    // Nodes 0 and 1 start sharded; node 2 starts with no shard assignment.
    let c = TestCluster::spawn_mixed(&[1, 1, 0]).await?;

    let res = c.put_key(0, "ride", json!({"value": 1})).await?;
    assert_eq!(res.status().as_u16(), 201);

    let res = c.client.get(c.url(2, "/shard/node-shard-id")).send().await?;
    assert_eq!(res.status().as_u16(), 404, "not a member yet");

    let res = c
        .client
        .put(c.url(2, "/shard/add-member/s0"))
        .json(&json!({"socket-address": c.addrs[2]}))
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 200);

    let own: Value =
        c.client.get(c.url(2, "/shard/node-shard-id")).send().await?.json().await?;
    assert_eq!(own["node-shard-id"], json!("s0"));

    let found = c.await_key_status(2, "ride", 200).await?;
    assert_eq!(found["value"], json!(1));
    Ok(())
}
