//! Command table and dispatcher.
//!
//! Every command the server understands has a static [`CommandSpec`] entry:
//! name, arity contract, flag set, key range, and handler. The script
//! gateway resolves specs through [`lookup`] and executes them through
//! [`dispatch`], which also feeds command statistics, the slowlog, and the
//! propagation streams.
//!
//! Arity is encoded the conventional way: a positive value means "exactly
//! this many arguments" (including the command name), a negative value means
//! "at least the absolute value".

mod handlers;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use bytes::Bytes;

use crate::client::Client;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::propagate::PropagationTargets;
use crate::server::ServerState;

/// A reply value produced by a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A one-line status string, e.g. `OK`.
    Status(String),
    /// An error string delivered in-band.
    Error(String),
    /// A signed integer.
    Integer(i64),
    /// A binary-safe string.
    Bulk(Bytes),
    /// The null reply.
    Nil,
    /// An array of replies.
    Array(Vec<Reply>),
}

impl Reply {
    /// The `OK` status reply.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }
}

/// Execution environment handed to a command handler.
pub struct ExecCtx<'a> {
    /// The database selected by the executing client.
    pub db: &'a Database,
    /// Number of configured databases (bounds `SELECT`).
    pub db_count: usize,
}

pub(crate) type CommandHandler = fn(&ExecCtx<'_>, &[Bytes], &mut Client) -> Result<Reply>;

/// Static description of one command.
pub struct CommandSpec {
    /// Uppercase command name.
    pub name: &'static str,
    /// Arity contract: positive exact, negative minimum.
    pub arity: i32,
    /// The command may modify the keyspace.
    pub write: bool,
    /// The command may grow memory usage and is refused under OOM pressure.
    pub deny_oom: bool,
    /// The command must not be called from scripts.
    pub no_script: bool,
    /// Index of the first key argument (0 when the command takes no keys).
    pub first_key: usize,
    /// Index of the last key argument; negative counts from the end.
    pub last_key: i32,
    /// Step between key arguments.
    pub key_step: usize,
    pub(crate) handler: CommandHandler,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("write", &self.write)
            .finish()
    }
}

impl CommandSpec {
    /// Returns true if `argc` satisfies the arity contract.
    pub fn arity_matches(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        }
    }

    /// Extracts the key arguments of a concrete invocation.
    pub fn keys<'a>(&self, argv: &'a [Bytes]) -> Vec<&'a [u8]> {
        if self.first_key == 0 || argv.is_empty() {
            return Vec::new();
        }
        let last = if self.last_key < 0 {
            let from_end = argv.len() as i64 + self.last_key as i64;
            if from_end < 0 {
                return Vec::new();
            }
            from_end as usize
        } else {
            self.last_key as usize
        };
        let mut keys = Vec::new();
        let mut i = self.first_key;
        while i <= last && i < argv.len() {
            keys.push(argv[i].as_ref());
            i += self.key_step.max(1);
        }
        keys
    }
}

/// Resolves a command name (case-insensitive) to its table entry.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let name = std::str::from_utf8(name).ok()?;
    handlers::COMMANDS.iter().find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Per-dispatch behavior switches.
///
/// Statistics and slowlog accounting are always on for script-issued
/// commands; the propagation pair is derived from the script's replication
/// policy.
#[derive(Debug, Clone, Copy)]
pub struct CallFlags {
    /// Record the call in the per-command statistics.
    pub stats: bool,
    /// Record the call in the slowlog when it is slow enough.
    pub slowlog: bool,
    /// Propagate a successful write to the append-only log.
    pub propagate_aof: bool,
    /// Propagate a successful write to the replicas.
    pub propagate_replicas: bool,
}

impl Default for CallFlags {
    fn default() -> Self {
        Self { stats: true, slowlog: true, propagate_aof: true, propagate_replicas: true }
    }
}

/// Executes the client's current command.
///
/// The command must already be resolved onto `client.cmd` and the arguments
/// installed in `client.argv`. On success the write is propagated to the
/// destinations enabled in `flags`, unless the client's
/// propagation-suppressed flag is set; that flag is consumed either way.
pub fn dispatch(
    server: &mut ServerState,
    client: &Rc<RefCell<Client>>,
    flags: CallFlags,
) -> Result<Reply> {
    let (argv, spec, db_index) = {
        let c = client.borrow();
        let spec = c.cmd.ok_or_else(|| Error::internal("dispatch without a resolved command"))?;
        (c.argv.clone(), spec, c.db)
    };

    let started = Instant::now();
    let result = {
        let ctx = ExecCtx { db: server.db(db_index), db_count: server.db_count() };
        let mut c = client.borrow_mut();
        (spec.handler)(&ctx, &argv, &mut c)
    };
    let elapsed_us = started.elapsed().as_micros() as u64;

    if flags.stats {
        server.record_command_call(spec.name, elapsed_us);
    }
    if flags.slowlog && elapsed_us >= server.config.slowlog_slower_than_us {
        server.record_slowlog(spec.name, elapsed_us);
    }

    let suppressed = {
        let mut c = client.borrow_mut();
        let suppressed = c.flags.prevent_propagation;
        c.flags.prevent_propagation = false;
        suppressed
    };

    let reply = result?;

    if spec.write {
        server.note_dirty();
        let targets =
            PropagationTargets { aof: flags.propagate_aof, replicas: flags.propagate_replicas };
        if !suppressed && targets.any() {
            server.propagation_mut().propagate(db_index, argv, targets);
        }
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(lookup(b"get").is_some());
        assert!(lookup(b"GET").is_some());
        assert!(lookup(b"GeT").is_some());
        assert!(lookup(b"NOSUCHCMD").is_none());
        assert!(lookup(b"\xffnotutf8").is_none());
    }

    #[test]
    fn test_arity_contract() {
        let get = lookup(b"GET").unwrap();
        assert_eq!(get.arity, 2);
        assert!(get.arity_matches(2));
        assert!(!get.arity_matches(1));
        assert!(!get.arity_matches(3));

        let del = lookup(b"DEL").unwrap();
        assert!(del.arity < 0);
        assert!(del.arity_matches(2));
        assert!(del.arity_matches(5));
        assert!(!del.arity_matches(1));
    }

    #[test]
    fn test_key_extraction() {
        let set = lookup(b"SET").unwrap();
        let argv =
            vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")];
        assert_eq!(set.keys(&argv), vec![b"k".as_ref()]);

        let del = lookup(b"DEL").unwrap();
        let argv = vec![
            Bytes::from_static(b"DEL"),
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ];
        assert_eq!(del.keys(&argv), vec![b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);

        let ping = lookup(b"PING").unwrap();
        let argv = vec![Bytes::from_static(b"PING")];
        assert!(ping.keys(&argv).is_empty());
    }

    #[test]
    fn test_command_flags() {
        assert!(lookup(b"SET").unwrap().write);
        assert!(lookup(b"SET").unwrap().deny_oom);
        assert!(!lookup(b"GET").unwrap().write);
        assert!(lookup(b"DEL").unwrap().write);
        assert!(!lookup(b"DEL").unwrap().deny_oom);
        assert!(lookup(b"EXEC").unwrap().no_script);
        assert!(lookup(b"WATCH").unwrap().no_script);
    }
}
