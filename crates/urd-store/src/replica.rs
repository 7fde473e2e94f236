use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use urd_types::{
    Address, DataTransfer, ReshardUpdate, ShardName, UrdError, VectorClock, MAX_KEY_LEN,
};

use crate::route::init_shards;

// ---------------------------------------------------------------------------
// Receipts handed back by the admission path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Replaced,
    Deleted,
}

/// Fan-out work owed after a locally admitted, non-broadcast write.
///
/// `clock` is the client clock as it stood *before* accept — peers admit the
/// replicated write against the same dependencies the originator did.
#[derive(Debug, Clone)]
pub struct ReplicationPlan {
    pub clock: VectorClock,
    /// Same-shard peers that must receive the full payload.
    pub shard_peers: Vec<Address>,
    /// Everyone outside the shard; they receive the clock only.
    pub foreign_peers: Vec<Address>,
}

#[derive(Debug)]
pub struct WriteReceipt {
    pub outcome: WriteOutcome,
    /// Post-accept client clock, returned to the caller.
    pub metadata: VectorClock,
    pub shard_id: Option<ShardName>,
    /// `None` when the request was itself a broadcast fan-in.
    pub replication: Option<ReplicationPlan>,
}

#[derive(Debug)]
pub struct ReadReceipt {
    pub value: Value,
    pub metadata: VectorClock,
    pub shard_id: Option<ShardName>,
}

/// Result of a view add or delete: whether anything changed, and which peers
/// the change must be fanned out to (the affected address excluded).
#[derive(Debug)]
pub struct ViewChange {
    pub changed: bool,
    pub fanout: Vec<Address>,
}

/// Result of appending a node to a shard.
#[derive(Debug)]
pub struct AddMember {
    pub fanout: Vec<Address>,
}

/// Where `/shard/key-count/:id` is answered from.
#[derive(Debug, PartialEq, Eq)]
pub enum KeyCount {
    Local(usize),
    /// Proxy the question to this member of the owning shard.
    Remote(Address),
}

// ---------------------------------------------------------------------------
// Replica
// ---------------------------------------------------------------------------

struct ReplicaInner {
    kv: HashMap<String, Value>,
    vc: VectorClock,
    view: Vec<Address>,
    shards: BTreeMap<ShardName, Vec<Address>>,
    shard_id: ShardName,
    shard_count: usize,
}

impl ReplicaInner {
    fn seed_view(&mut self, addr: &str) {
        if self.view.is_empty() {
            self.view.push(addr.to_string());
        }
    }

    fn other_views(&self, addr: &str) -> Vec<Address> {
        self.view.iter().filter(|a| a.as_str() != addr).cloned().collect()
    }

    fn shard_id_opt(&self) -> Option<ShardName> {
        if self.shard_id.is_empty() {
            None
        } else {
            Some(self.shard_id.clone())
        }
    }

    fn replication_plan(&self, addr: &str, clock: VectorClock) -> ReplicationPlan {
        match self.shards.get(&self.shard_id) {
            Some(members) if !self.shard_id.is_empty() => ReplicationPlan {
                clock,
                shard_peers: members.iter().filter(|a| a.as_str() != addr).cloned().collect(),
                foreign_peers: self
                    .view
                    .iter()
                    .filter(|a| !members.contains(a))
                    .cloned()
                    .collect(),
            },
            // Unsharded replica: the whole view is one replication group.
            _ => ReplicationPlan {
                clock,
                shard_peers: self.other_views(addr),
                foreign_peers: Vec::new(),
            },
        }
    }
}

/// One node's entire mutable state, serialized behind a single lock.
///
/// The readiness check and the accept that follows it always run under one
/// guard, so no foreign accept can interleave. Reads take the shared side:
/// [`VectorClock::accept_read`] never mutates the replica clock.
pub struct Replica {
    addr: Address,
    inner: RwLock<ReplicaInner>,
}

impl Replica {
    /// Build a replica from startup configuration. With a non-zero
    /// `shard_count` the initial view is partitioned immediately and this
    /// node's shard is the slab containing its own address.
    pub fn new(addr: Address, view: Vec<Address>, shard_count: usize) -> Result<Self, UrdError> {
        let shards = init_shards(shard_count, &view)?;
        let shard_id = shards
            .iter()
            .find(|(_, members)| members.contains(&addr))
            .map(|(id, _)| id.clone())
            .unwrap_or_default();

        Ok(Replica {
            inner: RwLock::new(ReplicaInner {
                kv: HashMap::new(),
                vc: VectorClock::new(addr.clone()),
                view,
                shards,
                shard_id,
                shard_count,
            }),
            addr,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    // -----------------------------------------------------------------------
    // Gated data operations
    // -----------------------------------------------------------------------

    pub async fn put(
        &self,
        key: &str,
        value: Value,
        mut client: VectorClock,
        is_broadcast: bool,
    ) -> Result<WriteReceipt, UrdError> {
        if key.len() > MAX_KEY_LEN {
            return Err(UrdError::KeyTooLong);
        }

        let mut st = self.inner.write().await;
        if !st.vc.is_ready_for(&client, false) {
            return Err(UrdError::CausalWait);
        }

        let replication =
            (!is_broadcast).then(|| st.replication_plan(&self.addr, client.clone()));

        st.vc.accept_write(&mut client);

        let outcome = match st.kv.insert(key.to_string(), value) {
            None => WriteOutcome::Created,
            Some(_) => WriteOutcome::Replaced,
        };
        info!(key, ?outcome, "write admitted");

        Ok(WriteReceipt { outcome, metadata: client, shard_id: st.shard_id_opt(), replication })
    }

    pub async fn get(&self, key: &str, mut client: VectorClock) -> Result<ReadReceipt, UrdError> {
        if key.len() > MAX_KEY_LEN {
            return Err(UrdError::KeyTooLong);
        }

        let st = self.inner.read().await;
        if !st.vc.is_ready_for(&client, true) {
            return Err(UrdError::CausalWait);
        }

        // A miss is answered without accepting: the failed read never enters
        // causal history.
        let value = st.kv.get(key).cloned().ok_or(UrdError::KeyNotFound)?;
        st.vc.accept_read(&mut client);

        Ok(ReadReceipt { value, metadata: client, shard_id: st.shard_id_opt() })
    }

    pub async fn delete(
        &self,
        key: &str,
        mut client: VectorClock,
        is_broadcast: bool,
    ) -> Result<WriteReceipt, UrdError> {
        if key.len() > MAX_KEY_LEN {
            return Err(UrdError::KeyTooLong);
        }

        let mut st = self.inner.write().await;
        if !st.vc.is_ready_for(&client, false) {
            return Err(UrdError::CausalWait);
        }
        if !st.kv.contains_key(key) {
            return Err(UrdError::KeyNotFound);
        }

        let replication =
            (!is_broadcast).then(|| st.replication_plan(&self.addr, client.clone()));

        st.vc.accept_write(&mut client);

        st.kv.remove(key);
        info!(key, "delete admitted");

        Ok(WriteReceipt {
            outcome: WriteOutcome::Deleted,
            metadata: client,
            shard_id: st.shard_id_opt(),
            replication,
        })
    }

    /// `PUT /cm`: admit a foreign shard's write into the clock without any
    /// data. Gated exactly like a write.
    pub async fn apply_clock(&self, mut client: VectorClock) -> Result<VectorClock, UrdError> {
        let mut st = self.inner.write().await;
        if !st.vc.is_ready_for(&client, false) {
            return Err(UrdError::CausalWait);
        }
        st.vc.accept_write(&mut client);
        Ok(client)
    }

    // -----------------------------------------------------------------------
    // View registry
    // -----------------------------------------------------------------------

    /// Current view, seeded with this node's own address when empty.
    pub async fn view(&self) -> Vec<Address> {
        let mut st = self.inner.write().await;
        st.seed_view(&self.addr);
        st.view.clone()
    }

    pub async fn other_views(&self) -> Vec<Address> {
        self.inner.read().await.other_views(&self.addr)
    }

    pub async fn add_view(&self, addr: &str) -> ViewChange {
        let mut st = self.inner.write().await;
        st.seed_view(&self.addr);

        if st.view.iter().any(|a| a == addr) {
            return ViewChange { changed: false, fanout: Vec::new() };
        }

        st.view.push(addr.to_string());
        info!(peer = addr, "view member added");
        let fanout = st
            .other_views(&self.addr)
            .into_iter()
            .filter(|a| a != addr)
            .collect();
        ViewChange { changed: true, fanout }
    }

    pub async fn remove_view(&self, addr: &str) -> Result<ViewChange, UrdError> {
        if addr == self.addr {
            return Err(UrdError::SelfDelete);
        }

        let mut st = self.inner.write().await;
        st.seed_view(&self.addr);

        let before = st.view.len();
        st.view.retain(|a| a != addr);
        if st.view.len() == before {
            return Ok(ViewChange { changed: false, fanout: Vec::new() });
        }

        warn!(peer = addr, "view member removed");
        let fanout = st.other_views(&self.addr);
        Ok(ViewChange { changed: true, fanout })
    }

    // -----------------------------------------------------------------------
    // Shard table
    // -----------------------------------------------------------------------

    pub async fn shard_ids(&self) -> Vec<ShardName> {
        self.inner.read().await.shards.keys().cloned().collect()
    }

    pub async fn node_shard_id(&self) -> Option<ShardName> {
        self.inner.read().await.shard_id_opt()
    }

    pub async fn shard_members(&self, id: &str) -> Option<Vec<Address>> {
        self.inner.read().await.shards.get(id).cloned()
    }

    pub async fn key_count(&self, id: &str) -> Result<KeyCount, UrdError> {
        let st = self.inner.read().await;
        if id == st.shard_id && !st.shard_id.is_empty() {
            return Ok(KeyCount::Local(st.kv.len()));
        }
        let members = st.shards.get(id).ok_or(UrdError::ShardNotFound)?;
        let first = members.first().ok_or(UrdError::ShardNotFound)?;
        Ok(KeyCount::Remote(first.clone()))
    }

    /// Whether an add-member for `addr` must first pull state from the shard:
    /// only when this node is adding itself and has no shard yet.
    pub async fn needs_join_sync(&self, addr: &str) -> bool {
        let st = self.inner.read().await;
        addr == self.addr && st.shard_id.is_empty()
    }

    pub async fn add_shard_member(&self, id: &str, addr: &str) -> Result<AddMember, UrdError> {
        let mut st = self.inner.write().await;

        let view_exists = st.view.iter().any(|a| a == addr);
        let shard_exists = st.shards.contains_key(id);
        match (view_exists, shard_exists) {
            (false, false) => return Err(UrdError::ViewAndShardNotFound),
            (false, true) => return Err(UrdError::ViewNotFound),
            (true, false) => return Err(UrdError::ShardNotFound),
            (true, true) => {}
        }

        let members = st.shards.get_mut(id).expect("shard existence checked above");
        if !members.iter().any(|a| a == addr) {
            members.push(addr.to_string());
            info!(shard = id, peer = addr, "shard member added");
        }

        Ok(AddMember { fanout: st.other_views(&self.addr) })
    }

    // -----------------------------------------------------------------------
    // State transfer
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self) -> DataTransfer {
        let st = self.inner.read().await;
        DataTransfer { kv: st.kv.clone(), vc: st.vc.clone() }
    }

    /// Adopt a peer's state during join-sync. The clock now speaks for this
    /// node, so its identity is re-stamped.
    pub async fn install_data(&self, data: DataTransfer) {
        let mut st = self.inner.write().await;
        st.kv = data.kv;
        st.vc = data.vc;
        st.vc.self_addr = self.addr.clone();
        info!(keys = st.kv.len(), "peer state installed");
    }

    /// Adopt the shard layout discovered during join-sync.
    pub async fn install_shard_layout(
        &self,
        shards: BTreeMap<ShardName, Vec<Address>>,
        shard_id: &str,
    ) {
        let mut st = self.inner.write().await;
        st.shard_count = shards.len();
        st.shards = shards;
        st.shard_id = shard_id.to_string();
    }

    /// Wholesale replacement pushed by the reshard coordinator. Writes
    /// admitted since the coordinator aggregated are silently superseded.
    pub async fn install_reshard(&self, update: ReshardUpdate) {
        let mut st = self.inner.write().await;
        if !st.kv.is_empty() {
            warn!(
                previous_keys = st.kv.len(),
                incoming_keys = update.kv.len(),
                "reshard update replaces live key space"
            );
        }
        st.kv = update.kv;
        st.shard_id = update.node_shard_id;
        st.shard_count = update.shard_count;
        st.shards = update.shards;
    }

    pub async fn shard_table(&self) -> (BTreeMap<ShardName, Vec<Address>>, ShardName) {
        let st = self.inner.read().await;
        (st.shards.clone(), st.shard_id.clone())
    }

    pub async fn reshard_inputs(
        &self,
    ) -> (Vec<Address>, BTreeMap<ShardName, Vec<Address>>, usize) {
        let st = self.inner.read().await;
        (st.view.clone(), st.shards.clone(), st.shard_count)
    }
}
