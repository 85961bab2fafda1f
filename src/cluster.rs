//! Cluster-locality seam consumed by the command gateway.
//!
//! In cluster mode every key hashes to one of [`SLOT_COUNT`] slots and each
//! slot is served by exactly one node. Before dispatching a script-issued
//! command, the gateway asks the resolver whether all of the command's keys
//! are served locally; scripts are never redirected, so a non-local key is a
//! hard error. The slot-to-node topology itself lives outside this crate.

use bytes::Bytes;

use crate::client::Client;
use crate::command::CommandSpec;

/// Number of hash slots a cluster keyspace is divided into.
pub const SLOT_COUNT: u16 = 16384;

/// Computes the hash slot of a key.
///
/// If the key contains a non-empty `{tag}` section, only the tag is hashed,
/// so related keys can be forced onto the same slot.
pub fn key_hash_slot(key: &[u8]) -> u16 {
    let hashed = match hash_tag(key) {
        Some(tag) => tag,
        None => key,
    };
    (crc32fast::hash(hashed) % SLOT_COUNT as u32) as u16
}

fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let close = key[open + 1..].iter().position(|&b| b == b'}')?;
    if close == 0 {
        return None; // "{}" hashes the whole key
    }
    Some(&key[open + 1..open + 1 + close])
}

/// Why a command cannot run on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRedirect {
    /// The cluster is down and the command is a write while reads are still
    /// being served.
    DownReadOnly,
    /// The cluster is down.
    Down,
    /// At least one key hashes to a slot served by another node.
    NonLocal,
}

/// Outcome of a locality query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterLocate {
    /// Every key of the command is served by this node.
    Mine,
    /// The command would have to be redirected.
    Redirect(ClusterRedirect),
}

/// Resolves whether a command's keys are all served by this node.
pub trait ClusterResolver {
    /// Locates the command. The client carries the `READONLY`/`ASKING`
    /// flags the gateway copied from the caller.
    fn locate(&self, client: &Client, cmd: &CommandSpec, argv: &[Bytes]) -> ClusterLocate;
}

/// Resolver over a static set of owned slots.
#[derive(Debug)]
pub struct HashSlotResolver {
    owned: Vec<bool>,
    healthy: bool,
    reads_when_down: bool,
}

impl HashSlotResolver {
    /// Creates a resolver that owns every slot.
    pub fn all_slots() -> Self {
        Self { owned: vec![true; SLOT_COUNT as usize], healthy: true, reads_when_down: false }
    }

    /// Creates a resolver that owns only the given slots.
    pub fn with_slots(slots: impl IntoIterator<Item = u16>) -> Self {
        let mut owned = vec![false; SLOT_COUNT as usize];
        for slot in slots {
            owned[slot as usize % SLOT_COUNT as usize] = true;
        }
        Self { owned, healthy: true, reads_when_down: false }
    }

    /// Marks the cluster state as down or healthy.
    pub fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }

    /// Keeps serving reads while the cluster is down.
    pub fn set_reads_when_down(&mut self, value: bool) {
        self.reads_when_down = value;
    }
}

impl ClusterResolver for HashSlotResolver {
    fn locate(&self, _client: &Client, cmd: &CommandSpec, argv: &[Bytes]) -> ClusterLocate {
        if !self.healthy {
            if self.reads_when_down && cmd.write {
                return ClusterLocate::Redirect(ClusterRedirect::DownReadOnly);
            }
            return ClusterLocate::Redirect(ClusterRedirect::Down);
        }
        for key in cmd.keys(argv) {
            if !self.owned[key_hash_slot(key) as usize] {
                return ClusterLocate::Redirect(ClusterRedirect::NonLocal);
            }
        }
        ClusterLocate::Mine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tag_groups_keys() {
        assert_eq!(key_hash_slot(b"{user:1}:name"), key_hash_slot(b"{user:1}:age"));
        assert_eq!(key_hash_slot(b"plain"), key_hash_slot(b"plain"));
    }

    #[test]
    fn test_empty_hash_tag_hashes_whole_key() {
        // "{}" must not collapse every such key onto one slot.
        assert_eq!(key_hash_slot(b"{}ab"), key_hash_slot(b"{}ab"));
        assert_ne!(key_hash_slot(b"{}ab"), key_hash_slot(b"{}cd"));
    }

    #[test]
    fn test_all_slots_is_always_local() {
        let resolver = HashSlotResolver::all_slots();
        let client = Client::new(1);
        let cmd = crate::command::lookup(b"SET").unwrap();
        let argv = vec![
            Bytes::from_static(b"SET"),
            Bytes::from_static(b"any-key"),
            Bytes::from_static(b"v"),
        ];
        assert_eq!(resolver.locate(&client, cmd, &argv), ClusterLocate::Mine);
    }

    #[test]
    fn test_foreign_slot_is_non_local() {
        let slot = key_hash_slot(b"mine");
        let resolver = HashSlotResolver::with_slots([slot]);
        let client = Client::new(1);
        let cmd = crate::command::lookup(b"GET").unwrap();

        let local = vec![Bytes::from_static(b"GET"), Bytes::from_static(b"mine")];
        assert_eq!(resolver.locate(&client, cmd, &local), ClusterLocate::Mine);

        let foreign_key = (0u32..)
            .map(|i| format!("probe{}", i))
            .find(|k| key_hash_slot(k.as_bytes()) != slot)
            .unwrap();
        let foreign = vec![Bytes::from_static(b"GET"), Bytes::from(foreign_key)];
        assert_eq!(
            resolver.locate(&client, cmd, &foreign),
            ClusterLocate::Redirect(ClusterRedirect::NonLocal)
        );
    }

    #[test]
    fn test_down_state_redirects() {
        let mut resolver = HashSlotResolver::all_slots();
        resolver.set_healthy(false);
        let client = Client::new(1);

        let get = crate::command::lookup(b"GET").unwrap();
        let argv = vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")];
        assert_eq!(
            resolver.locate(&client, get, &argv),
            ClusterLocate::Redirect(ClusterRedirect::Down)
        );

        resolver.set_reads_when_down(true);
        let set = crate::command::lookup(b"SET").unwrap();
        let argv =
            vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")];
        assert_eq!(
            resolver.locate(&client, set, &argv),
            ClusterLocate::Redirect(ClusterRedirect::DownReadOnly)
        );
    }
}
