//! Script lifecycle: prepare, reset, and the singleton predicates.
//!
//! The server holds at most one run context at a time. `prepare_for_run`
//! installs it, `reset_run` tears it down; everything in between reaches
//! the context only through these module operations. Making the singleton
//! explicit is what lets administrative commands, which arrive on a
//! different client, locate and signal the script.

use std::cell::RefCell;
use std::rc::Rc;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::propagate::PropagationTargets;
use crate::script::run_ctx::{ScriptMode, ScriptRunCtx};
use crate::script::supervisor;
use crate::server::ServerState;

/// Prepares a run context for execution and installs it as the singleton.
///
/// The pseudo-client inherits the caller's selected database and
/// transaction flag, and is reset to the default protocol version; the
/// OOM latch is refreshed from current memory pressure. Fails if a script
/// is already running; one script at a time is a contract, and the
/// engine must not retry.
pub fn prepare_for_run(
    server: &mut ServerState,
    pseudo: Rc<RefCell<Client>>,
    caller: Rc<RefCell<Client>>,
    funcname: &str,
    mode: ScriptMode,
    read_only: bool,
) -> Result<()> {
    if server.script.is_some() {
        return Err(Error::invalid_state("a script is already running"));
    }
    if Rc::ptr_eq(&pseudo, &caller) {
        return Err(Error::invalid_argument("pseudo-client and caller must be distinct"));
    }

    {
        let mut p = pseudo.borrow_mut();
        let c = caller.borrow();
        p.db = c.db;
        p.resp = 2; // default protocol; the script may change it
        p.flags.multi = c.flags.multi;
    }

    server.in_script = true;
    server.script_caller = Some(caller.clone());
    server.update_script_oom();
    server.script = Some(ScriptRunCtx::new(pseudo, caller, funcname, mode, read_only));
    Ok(())
}

/// Tears the current run context down after execution.
///
/// Runs to completion regardless of how the script exited: leaves
/// timed-out mode if needed, suppresses the dispatcher's automatic
/// propagation of the caller's current command, and closes the
/// replication bracket if one was opened. Calling it with no script
/// running is a no-op.
pub fn reset_run(server: &mut ServerState) {
    let Some(mut ctx) = server.script.take() else {
        return;
    };

    ctx.pseudo_client().borrow_mut().flags.multi = false;

    server.in_script = false;
    server.script_caller = None;

    if ctx.timed_out {
        supervisor::exit_timedout_mode(server, &mut ctx);
    }

    // The script-invoking command itself must not re-propagate; the
    // bracket (or the individual commands) is the propagation.
    ctx.caller().borrow_mut().flags.prevent_propagation = true;
    if ctx.multi_emitted {
        let db = ctx.caller().borrow().db;
        server.propagation.commit_transaction(db);
    }
}

/// Returns true while a run context is installed.
pub fn is_running(server: &ServerState) -> bool {
    server.script.is_some()
}

/// Returns true while the running script is in timed-out mode.
pub fn is_timed_out(server: &ServerState) -> bool {
    server.script.as_ref().map_or(false, ScriptRunCtx::is_timed_out)
}

/// Whether the running script is an ad-hoc eval script. `None` when no
/// script is running.
pub fn is_eval(server: &ServerState) -> Option<bool> {
    server.script.as_ref().map(ScriptRunCtx::is_eval)
}

/// Label of the running script. `None` when no script is running.
pub fn current_function_name(server: &ServerState) -> Option<&str> {
    server.script.as_ref().map(ScriptRunCtx::function_name)
}

/// Wall-clock time captured when the running script was prepared.
pub fn snapshot_time_ms(server: &ServerState) -> Option<u64> {
    server.script.as_ref().map(ScriptRunCtx::snapshot_time_ms)
}

/// Milliseconds the running script has been executing.
pub fn run_duration_ms(server: &ServerState) -> Option<u64> {
    server.script.as_ref().map(ScriptRunCtx::run_duration_ms)
}

/// The pseudo-client of the running script.
pub fn pseudo_client(server: &ServerState) -> Option<Rc<RefCell<Client>>> {
    server.script.as_ref().map(|ctx| ctx.pseudo_client().clone())
}

/// The caller of the running script.
pub fn caller(server: &ServerState) -> Option<Rc<RefCell<Client>>> {
    server.script.as_ref().map(|ctx| ctx.caller().clone())
}

/// Sets the protocol version of the running script's pseudo-client.
pub fn set_protocol_version(server: &ServerState, version: u8) -> Result<()> {
    server
        .script
        .as_ref()
        .ok_or_else(|| Error::invalid_state("no script is running"))?
        .set_protocol_version(version)
}

/// Selects the destinations the running script's writes propagate to.
pub fn set_replication(server: &mut ServerState, targets: PropagationTargets) -> Result<()> {
    server
        .script
        .as_mut()
        .ok_or_else(|| Error::invalid_state("no script is running"))?
        .set_replication(targets);
    Ok(())
}
