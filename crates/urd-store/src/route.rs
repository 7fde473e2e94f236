use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use urd_types::{Address, ShardName, UrdError};

/// Shard owning `key`: the last SHA-1 byte of the key, modulo the shard
/// count, indexed into the lexically sorted shard names. Deterministic in
/// `key` and the name set alone — membership changes within a shard never
/// move keys; only resharding does.
pub fn find_shard<'a>(
    key: &str,
    shards: &'a BTreeMap<ShardName, Vec<Address>>,
) -> Option<&'a ShardName> {
    if shards.is_empty() {
        return None;
    }
    let digest = Sha1::digest(key.as_bytes());
    let slot = digest[19] as usize % shards.len();
    shards.keys().nth(slot)
}

/// Partition `view` into `count` shards of `⌊|view|/count⌋` nodes each,
/// remainder appended to the last shard. Every shard must end up with at
/// least two replicas.
pub fn init_shards(
    count: usize,
    view: &[Address],
) -> Result<BTreeMap<ShardName, Vec<Address>>, UrdError> {
    let mut shards = BTreeMap::new();
    if count == 0 {
        return Ok(shards);
    }

    let size = view.len() / count;
    if size < 2 {
        return Err(UrdError::FaultTolerance { count, nodes: view.len() });
    }

    for id in 0..count {
        let start = id * size;
        let end = if id == count - 1 { view.len() } else { start + size };
        shards.insert(format!("s{id}"), view[start..end].to_vec());
    }

    Ok(shards)
}
