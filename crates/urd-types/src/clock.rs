use std::collections::BTreeMap;

use crate::Address;

/// Result of comparing two vector clocks.
///
/// Equal clocks compare `Concurrent`: neither strictly dominates the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Greater,
    Lesser,
    Concurrent,
}

/// A vector clock: one counter per known writer, keyed by address.
///
/// `self_addr` names whom this clock speaks for — the replica itself for the
/// server-side clock, or the client's home for causal metadata carried in a
/// request. Absent entries count as 0.
///
/// Wire shape matches the cluster protocol: `{"Clocks": {..}, "Self": ".."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VectorClock {
    #[serde(rename = "Clocks", default)]
    pub clocks: BTreeMap<Address, u64>,
    #[serde(rename = "Self", default)]
    pub self_addr: Address,
}

impl VectorClock {
    pub fn new(self_addr: impl Into<Address>) -> Self {
        VectorClock { clocks: BTreeMap::new(), self_addr: self_addr.into() }
    }

    /// Fresh clock for a client that carried no metadata: it claims to have
    /// seen nothing, not even its own writes.
    pub fn for_client(client_ip: &str) -> Self {
        let mut clock = VectorClock::new(client_ip);
        clock.clocks.insert(client_ip.to_string(), 0);
        clock
    }

    /// Counter for `addr`, 0 when absent.
    pub fn entry(&self, addr: &str) -> u64 {
        self.clocks.get(addr).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Whether this replica has satisfied every causal dependency the client
    /// clock declares.
    ///
    /// Reads only require the replica to have seen at least as many writes
    /// from the client's home as the client claims. Writes require exact
    /// agreement on the client's own counter (the write being admitted must
    /// be the client's next — nothing skipped, nothing duplicated) and full
    /// coverage of every third-party entry, which must be *present* here,
    /// not merely defaulted to 0.
    pub fn is_ready_for(&self, client: &VectorClock, is_read: bool) -> bool {
        if is_read {
            return self.entry(&client.self_addr) >= client.entry(&client.self_addr);
        }

        for (addr, &client_entry) in &client.clocks {
            if *addr == client.self_addr {
                if self.entry(addr) != client_entry {
                    return false;
                }
                continue;
            }
            match self.clocks.get(addr) {
                Some(&own) if own >= client_entry => {}
                _ => return false,
            }
        }
        true
    }

    /// Stamp an admitted write into both clocks: bump the writer's counter on
    /// each side, then hand the client everything this replica knows (server
    /// values win on overlap).
    pub fn accept_write(&mut self, client: &mut VectorClock) {
        let writer = client.self_addr.clone();
        *self.clocks.entry(writer.clone()).or_insert(0) += 1;
        *client.clocks.entry(writer).or_insert(0) += 1;
        for (addr, &count) in &self.clocks {
            client.clocks.insert(addr.clone(), count);
        }
    }

    /// Stamp an admitted read: the client inherits this replica's entries
    /// (server values win on overlap); the replica's clock is untouched.
    pub fn accept_read(&self, client: &mut VectorClock) {
        for (addr, &count) in &self.clocks {
            client.clocks.insert(addr.clone(), count);
        }
    }

    /// Dominance comparison over the union of both key sets, absent = 0.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut ge_all = true;
        let mut le_all = true;

        for addr in self.clocks.keys().chain(other.clocks.keys()) {
            let a = self.entry(addr);
            let b = other.entry(addr);
            if a < b {
                ge_all = false;
            }
            if a > b {
                le_all = false;
            }
        }

        match (ge_all, le_all) {
            (true, true) => ClockOrdering::Concurrent,
            (true, false) => ClockOrdering::Greater,
            (false, true) => ClockOrdering::Lesser,
            (false, false) => ClockOrdering::Concurrent,
        }
    }
}

/// Clock to admit an incoming request under: carried metadata when the
/// request has any, otherwise a fresh clock speaking for the client's IP.
pub fn derive_client_clock(carried: VectorClock, client_ip: &str) -> VectorClock {
    if carried.is_empty() {
        VectorClock::for_client(client_ip)
    } else {
        carried
    }
}
