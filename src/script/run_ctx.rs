//! Per-invocation script run context.
//!
//! A `ScriptRunCtx` bundles everything one in-flight script needs: the
//! pseudo-client its commands dispatch through, a strong reference to the
//! caller, timing captured at prepare, and the independent flag bits that
//! drive kill eligibility and replication bracketing. At most one run
//! context exists at a time; it lives in the server's singleton slot
//! between `prepare_for_run` and `reset_run`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::propagate::PropagationTargets;

/// How the running script was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// Ad-hoc script sent inline by the client.
    Eval,
    /// Pre-registered named function.
    Function,
}

/// State of one script invocation.
#[derive(Debug)]
pub struct ScriptRunCtx {
    pseudo: Rc<RefCell<Client>>,
    caller: Rc<RefCell<Client>>,
    funcname: String,
    start: Instant,
    snapshot_ms: u64,
    mode: ScriptMode,
    read_only: bool,
    /// At least one write command was dispatched. Gates kill eligibility
    /// and bracket emission; never cleared during the run.
    pub(crate) write_dirty: bool,
    /// The begin-transaction marker has been propagated; `reset_run` must
    /// propagate the matching commit marker.
    pub(crate) multi_emitted: bool,
    /// The script crossed its time limit and runs in reentrant mode.
    pub(crate) timed_out: bool,
    /// An administrator requested termination; observed at the next
    /// interrupt tick.
    pub(crate) killed: bool,
    pub(crate) repl: PropagationTargets,
}

impl ScriptRunCtx {
    pub(crate) fn new(
        pseudo: Rc<RefCell<Client>>,
        caller: Rc<RefCell<Client>>,
        funcname: impl Into<String>,
        mode: ScriptMode,
        read_only: bool,
    ) -> Self {
        let snapshot_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            pseudo,
            caller,
            funcname: funcname.into(),
            start: Instant::now(),
            snapshot_ms,
            mode,
            read_only,
            write_dirty: false,
            multi_emitted: false,
            timed_out: false,
            killed: false,
            repl: PropagationTargets::ALL,
        }
    }

    /// The pseudo-client script commands dispatch through.
    pub fn pseudo_client(&self) -> &Rc<RefCell<Client>> {
        &self.pseudo
    }

    /// The external client that invoked the script.
    pub fn caller(&self) -> &Rc<RefCell<Client>> {
        &self.caller
    }

    /// Label of the running script, for logging.
    pub fn function_name(&self) -> &str {
        &self.funcname
    }

    /// How the script was supplied.
    pub fn mode(&self) -> ScriptMode {
        self.mode
    }

    /// Returns true for ad-hoc eval scripts.
    pub fn is_eval(&self) -> bool {
        self.mode == ScriptMode::Eval
    }

    /// Returns true if the script declared itself read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Wall-clock time captured at prepare, in milliseconds since the
    /// epoch. Repeated reads during one invocation observe the same value.
    pub fn snapshot_time_ms(&self) -> u64 {
        self.snapshot_ms
    }

    /// Milliseconds elapsed since prepare, on the monotonic clock.
    pub fn run_duration_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Whether the script has dispatched a write command.
    pub fn is_write_dirty(&self) -> bool {
        self.write_dirty
    }

    /// Whether the begin-transaction marker has been propagated.
    pub fn is_multi_emitted(&self) -> bool {
        self.multi_emitted
    }

    /// Whether the script crossed its time limit.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether an administrative kill is pending.
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Destinations script writes are propagated to.
    pub fn replication(&self) -> PropagationTargets {
        self.repl
    }

    /// Selects the destinations script writes are propagated to.
    pub fn set_replication(&mut self, targets: PropagationTargets) {
        self.repl = targets;
    }

    /// Sets the protocol version of the pseudo-client. Only versions 2
    /// and 3 exist.
    pub fn set_protocol_version(&self, version: u8) -> Result<()> {
        if version != 2 && version != 3 {
            return Err(Error::invalid_argument("RESP version must be 2 or 3"));
        }
        self.pseudo.borrow_mut().resp = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScriptRunCtx {
        let pseudo = Rc::new(RefCell::new(Client::new(100)));
        let caller = Rc::new(RefCell::new(Client::new(1)));
        ScriptRunCtx::new(pseudo, caller, "f_abc123", ScriptMode::Eval, false)
    }

    #[test]
    fn test_new_context_defaults() {
        let ctx = ctx();
        assert!(ctx.is_eval());
        assert!(!ctx.is_read_only());
        assert!(!ctx.is_write_dirty());
        assert!(!ctx.is_multi_emitted());
        assert!(!ctx.is_timed_out());
        assert!(!ctx.is_killed());
        assert_eq!(ctx.replication(), PropagationTargets::ALL);
        assert_eq!(ctx.function_name(), "f_abc123");
    }

    #[test]
    fn test_set_protocol_version() {
        let ctx = ctx();
        assert!(ctx.set_protocol_version(3).is_ok());
        assert_eq!(ctx.pseudo_client().borrow().resp, 3);
        assert!(ctx.set_protocol_version(2).is_ok());
        assert!(ctx.set_protocol_version(1).is_err());
        assert!(ctx.set_protocol_version(4).is_err());
        assert_eq!(ctx.pseudo_client().borrow().resp, 2);
    }

    #[test]
    fn test_set_replication() {
        let mut ctx = ctx();
        ctx.set_replication(PropagationTargets { aof: true, replicas: false });
        assert!(ctx.replication().aof);
        assert!(!ctx.replication().replicas);
        ctx.set_replication(PropagationTargets::NONE);
        assert!(!ctx.replication().any());
    }

    #[test]
    fn test_snapshot_time_is_stable() {
        let ctx = ctx();
        let first = ctx.snapshot_time_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(ctx.snapshot_time_ms(), first);
    }
}
