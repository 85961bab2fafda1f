//! Command propagation to the append-only log and the replicas.
//!
//! The server replicates script effects per command: every successful write
//! dispatched through the gateway is appended here, and the script core
//! wraps the sequence in MULTI/EXEC markers so downstream consumers apply
//! it as one transaction. Transport is out of scope; the two streams are
//! in-memory buffers the replication and persistence layers drain, and the
//! append-only stream can additionally be rendered into checksummed records
//! (see [`record`]).

pub mod record;

pub use record::Record;

use bytes::Bytes;

/// Destinations a command's effects are propagated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationTargets {
    /// Append the command to the append-only log stream.
    pub aof: bool,
    /// Forward the command to the replica stream.
    pub replicas: bool,
}

impl PropagationTargets {
    /// Both destinations enabled.
    pub const ALL: PropagationTargets = PropagationTargets { aof: true, replicas: true };
    /// Both destinations disabled.
    pub const NONE: PropagationTargets = PropagationTargets { aof: false, replicas: false };

    /// Returns true if at least one destination is enabled.
    pub fn any(&self) -> bool {
        self.aof || self.replicas
    }
}

impl Default for PropagationTargets {
    fn default() -> Self {
        PropagationTargets::ALL
    }
}

/// One propagated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    /// Database the command applies to.
    pub db: usize,
    /// Full argument vector, command name first.
    pub argv: Vec<Bytes>,
}

impl PropEntry {
    /// Uppercase command name of the entry.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.argv[0]).to_ascii_uppercase()
    }
}

/// The two outgoing propagation streams.
#[derive(Debug, Default)]
pub struct PropagationLog {
    aof: Vec<PropEntry>,
    replicas: Vec<PropEntry>,
}

impl PropagationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command to the selected streams.
    pub fn propagate(&mut self, db: usize, argv: Vec<Bytes>, targets: PropagationTargets) {
        let entry = PropEntry { db, argv };
        if targets.aof {
            self.aof.push(entry.clone());
        }
        if targets.replicas {
            self.replicas.push(entry);
        }
    }

    /// Emits the begin-transaction marker to both streams.
    pub fn begin_transaction(&mut self, db: usize) {
        self.propagate(db, vec![Bytes::from_static(b"MULTI")], PropagationTargets::ALL);
    }

    /// Emits the commit-transaction marker to both streams.
    pub fn commit_transaction(&mut self, db: usize) {
        self.propagate(db, vec![Bytes::from_static(b"EXEC")], PropagationTargets::ALL);
    }

    /// Entries queued for the append-only log.
    pub fn aof_entries(&self) -> &[PropEntry] {
        &self.aof
    }

    /// Entries queued for the replicas.
    pub fn replica_entries(&self) -> &[PropEntry] {
        &self.replicas
    }

    /// Renders the append-only stream into its on-disk record encoding.
    pub fn encode_aof(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for entry in &self.aof {
            buf.extend_from_slice(&Record::from_entry(entry).encode());
        }
        buf
    }

    /// Drops all buffered entries.
    pub fn clear(&mut self) {
        self.aof.clear();
        self.replicas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_targets_select_streams() {
        let mut log = PropagationLog::new();
        log.propagate(0, argv(&["SET", "a", "1"]), PropagationTargets::ALL);
        log.propagate(0, argv(&["SET", "b", "2"]), PropagationTargets { aof: true, replicas: false });
        log.propagate(0, argv(&["SET", "c", "3"]), PropagationTargets { aof: false, replicas: true });
        log.propagate(0, argv(&["SET", "d", "4"]), PropagationTargets::NONE);

        let aof: Vec<String> = log.aof_entries().iter().map(|e| String::from_utf8_lossy(&e.argv[1]).into_owned()).collect();
        let repl: Vec<String> = log.replica_entries().iter().map(|e| String::from_utf8_lossy(&e.argv[1]).into_owned()).collect();
        assert_eq!(aof, vec!["a", "b"]);
        assert_eq!(repl, vec!["a", "c"]);
    }

    #[test]
    fn test_transaction_markers_hit_both_streams() {
        let mut log = PropagationLog::new();
        log.begin_transaction(3);
        log.propagate(3, argv(&["SET", "k", "v"]), PropagationTargets::ALL);
        log.commit_transaction(3);

        for stream in [log.aof_entries(), log.replica_entries()] {
            let names: Vec<String> = stream.iter().map(|e| e.name()).collect();
            assert_eq!(names, vec!["MULTI", "SET", "EXEC"]);
            assert!(stream.iter().all(|e| e.db == 3));
        }
    }

    #[test]
    fn test_none_targets_propagate_nothing() {
        let mut log = PropagationLog::new();
        log.propagate(0, argv(&["DEL", "k"]), PropagationTargets::NONE);
        assert!(log.aof_entries().is_empty());
        assert!(log.replica_entries().is_empty());
    }
}
