//! Timeout supervision and administrative kill.
//!
//! The engine ticks [`interrupt`] at a bounded cadence from inside script
//! execution. Before the time limit the tick is nearly free. Once the
//! limit is crossed the script switches into timed-out mode: it keeps
//! running, but every tick drains a bounded burst of pending events so
//! unrelated clients are serviced and an administrative kill can arrive.
//! Cancellation is strictly cooperative: a kill only takes effect at the
//! next tick, never mid-dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use crate::client::Client;
use crate::command::Reply;
use crate::error::{Error, Result};
use crate::script::run_ctx::ScriptRunCtx;
use crate::server::ServerState;

/// What the engine should do after an interrupt tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Keep executing the script.
    Continue,
    /// Unwind the script: an administrative kill was observed.
    Kill,
}

/// Interrupt tick, called periodically from within script execution.
///
/// Returns [`ScriptStep::Kill`] once an administrative kill has been
/// observed; the engine is responsible for unwinding and then calling
/// `reset_run`.
pub fn interrupt(server: &mut ServerState) -> ScriptStep {
    let (timed_out, elapsed, is_eval) = match server.script.as_ref() {
        Some(ctx) => (ctx.is_timed_out(), ctx.run_duration_ms(), ctx.is_eval()),
        None => return ScriptStep::Continue,
    };

    if timed_out {
        server.pump_events_while_blocked();
        return killed_step(server);
    }

    if elapsed < server.config.script_time_limit_ms {
        return ScriptStep::Continue;
    }

    log::warn!(
        "Slow script detected: still in execution after {} milliseconds. \
         You can try killing the script using the {} command.",
        elapsed,
        if is_eval { "SCRIPT KILL" } else { "FUNCTION KILL" }
    );

    enter_timedout_mode(server);
    server.pump_events_while_blocked();
    killed_step(server)
}

fn killed_step(server: &ServerState) -> ScriptStep {
    match server.script.as_ref() {
        Some(ctx) if ctx.is_killed() => ScriptStep::Kill,
        _ => ScriptStep::Continue,
    }
}

/// Switches the running script into timed-out mode.
///
/// The caller is protected for the rest of the run: reentering the event
/// loop means its connection may close, and the gateway still needs its
/// database id and user identity to finish.
fn enter_timedout_mode(server: &mut ServerState) {
    let caller = match server.script.as_mut() {
        Some(ctx) => {
            debug_assert!(!ctx.is_timed_out());
            ctx.timed_out = true;
            ctx.caller().clone()
        }
        None => return,
    };
    server.blocking_started();
    server.protect_client(&caller);
}

/// Leaves timed-out mode; invoked from `reset_run` when the flag is set.
///
/// If this server is a replica with a connected master link, the master
/// client is re-queued so replication processing resumes.
pub(crate) fn exit_timedout_mode(server: &mut ServerState, ctx: &mut ScriptRunCtx) {
    debug_assert!(ctx.is_timed_out());
    ctx.timed_out = false;
    server.blocking_ended();
    if server.is_replica() {
        if let Some(master) = server.master_client() {
            server.queue_client_for_reprocessing(&master);
        }
    }
    let caller = ctx.caller().clone();
    server.unprotect_client(&caller);
}

/// Administrative kill of the running script.
///
/// The outcome is also queued as a reply on `admin`. Refused when no
/// script is running, when the script was sent by the upstream master,
/// when it already wrote to the dataset, or when the kill command does
/// not match the kind of script that is running. Otherwise the kill flag
/// is set and observed at the next interrupt tick.
pub fn kill(server: &mut ServerState, admin: &Rc<RefCell<Client>>, is_eval: bool) -> Result<()> {
    let result = kill_current(server, is_eval);
    match &result {
        Ok(()) => admin.borrow_mut().push_reply(Reply::ok()),
        Err(err) => admin.borrow_mut().push_reply(Reply::Error(err.to_string())),
    }
    result
}

fn kill_current(server: &mut ServerState, is_eval: bool) -> Result<()> {
    let ctx = server.script.as_mut().ok_or(Error::NoScriptRunning)?;
    if ctx.caller().borrow().flags.master {
        return Err(Error::UnkillableMasterScript);
    }
    if ctx.is_write_dirty() {
        return Err(Error::UnkillableDirtyScript);
    }
    match (is_eval, ctx.is_eval()) {
        (true, false) => return Err(Error::KillWrongType { running_eval: false }),
        (false, true) => return Err(Error::KillWrongType { running_eval: true }),
        _ => {}
    }
    ctx.killed = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::script::lifecycle::{self, prepare_for_run, reset_run};
    use crate::script::run_ctx::ScriptMode;

    fn setup(opts: Options) -> (ServerState, Rc<RefCell<Client>>, Rc<RefCell<Client>>) {
        let mut server = ServerState::new(opts).unwrap();
        let caller = server.new_client();
        let pseudo = server.new_script_client();
        (server, pseudo, caller)
    }

    fn prepare(
        server: &mut ServerState,
        pseudo: &Rc<RefCell<Client>>,
        caller: &Rc<RefCell<Client>>,
        mode: ScriptMode,
    ) {
        prepare_for_run(server, pseudo.clone(), caller.clone(), "f_test", mode, false).unwrap();
    }

    #[test]
    fn test_interrupt_below_limit_continues() {
        let (mut server, pseudo, caller) = setup(Options::default());
        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);
        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
        assert!(!lifecycle::is_timed_out(&server));
    }

    #[test]
    fn test_interrupt_without_script_continues() {
        let (mut server, _pseudo, _caller) = setup(Options::default());
        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
    }

    #[test]
    fn test_crossing_limit_enters_timedout_mode() {
        let opts = Options::default().script_time_limit_ms(0);
        let (mut server, pseudo, caller) = setup(opts);
        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);

        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
        assert!(lifecycle::is_timed_out(&server));
        assert_eq!(server.blocked_ops(), 1);
        assert!(caller.borrow().flags.protected);

        // Later ticks stay in timed-out mode without re-entering it.
        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
        assert_eq!(server.blocked_ops(), 1);

        reset_run(&mut server);
        assert!(!lifecycle::is_timed_out(&server));
        assert_eq!(server.blocked_ops(), 0);
        assert!(!caller.borrow().flags.protected);
    }

    #[test]
    fn test_kill_observed_at_next_tick() {
        let opts = Options::default().script_time_limit_ms(0);
        let (mut server, pseudo, caller) = setup(opts);
        let admin = server.new_client();
        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);

        // The admin's kill arrives as a pending event, observed by the pump.
        let admin_for_event = admin.clone();
        server.enqueue_event(move |srv| {
            let _ = kill(srv, &admin_for_event, true);
        });

        assert_eq!(interrupt(&mut server), ScriptStep::Kill);
        assert_eq!(admin.borrow().replies, vec![Reply::ok()]);

        reset_run(&mut server);
        assert!(!lifecycle::is_running(&server));
    }

    #[test]
    fn test_kill_with_no_script() {
        let (mut server, _pseudo, _caller) = setup(Options::default());
        let admin = server.new_client();
        let err = kill(&mut server, &admin, true).unwrap_err();
        assert!(matches!(err, Error::NoScriptRunning));
        assert!(matches!(&admin.borrow().replies[0], Reply::Error(msg) if msg.starts_with("NOTBUSY")));
    }

    #[test]
    fn test_kill_master_script_refused() {
        let (mut server, pseudo, caller) = setup(Options::default());
        caller.borrow_mut().flags.master = true;
        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);

        let admin = server.new_client();
        let err = kill(&mut server, &admin, true).unwrap_err();
        assert!(matches!(err, Error::UnkillableMasterScript));
        assert!(server.script.as_ref().map_or(false, |ctx| !ctx.is_killed()));
    }

    #[test]
    fn test_kill_write_dirty_refused() {
        let (mut server, pseudo, caller) = setup(Options::default());
        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);
        server.script.as_mut().unwrap().write_dirty = true;

        let admin = server.new_client();
        let err = kill(&mut server, &admin, true).unwrap_err();
        assert!(matches!(err, Error::UnkillableDirtyScript));

        // The kill was refused, so subsequent ticks keep the script alive.
        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
    }

    #[test]
    fn test_cross_mode_kill_refused() {
        let (mut server, pseudo, caller) = setup(Options::default());
        prepare(&mut server, &pseudo, &caller, ScriptMode::Function);

        let admin = server.new_client();
        let err = kill(&mut server, &admin, true).unwrap_err();
        assert!(matches!(err, Error::KillWrongType { running_eval: false }));
        reset_run(&mut server);

        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);
        let err = kill(&mut server, &admin, false).unwrap_err();
        assert!(matches!(err, Error::KillWrongType { running_eval: true }));
    }

    #[test]
    fn test_matching_kill_accepted_for_function() {
        let (mut server, pseudo, caller) = setup(Options::default());
        prepare(&mut server, &pseudo, &caller, ScriptMode::Function);

        let admin = server.new_client();
        kill(&mut server, &admin, false).unwrap();
        assert!(server.script.as_ref().unwrap().is_killed());
    }

    #[test]
    fn test_replica_requeues_master_on_timedout_exit() {
        let opts = Options::default().script_time_limit_ms(0);
        let (mut server, pseudo, caller) = setup(opts);
        let master = server.new_client();
        server.set_replica_of(Some("203.0.113.10"));
        server.set_master_client(&master);

        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);
        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
        assert!(lifecycle::is_timed_out(&server));

        reset_run(&mut server);
        assert_eq!(server.reprocess_queue().len(), 1);
        assert!(Rc::ptr_eq(&server.reprocess_queue()[0], &master));
    }

    #[test]
    fn test_disconnect_during_timedout_mode_defers_close() {
        let opts = Options::default().script_time_limit_ms(0);
        let (mut server, pseudo, caller) = setup(opts);
        prepare(&mut server, &pseudo, &caller, ScriptMode::Eval);

        assert_eq!(interrupt(&mut server), ScriptStep::Continue);
        assert!(caller.borrow().flags.protected);

        // The peer goes away while the script still runs.
        server.disconnect_client(&caller);
        assert_eq!(server.client_count(), 1);

        // The gateway can still read the caller's state through the run ctx.
        assert_eq!(lifecycle::caller(&server).unwrap().borrow().db, 0);

        reset_run(&mut server);
        assert_eq!(server.client_count(), 0);
    }
}
