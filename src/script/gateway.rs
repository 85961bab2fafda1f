//! The command gateway: entry point for script-issued commands.
//!
//! [`call`] applies a strict validator pipeline before dispatching; any
//! failure short-circuits with an error and no dispatch. The stages, in
//! order: argument binding, command-filter hooks, lookup, arity,
//! no-script flag, authorization, write-allowed, out-of-memory, write
//! bookkeeping, cluster locality, replication bracket, dispatch, and the
//! no-blocking post-assertion.
//!
//! Errors are local to the script: they are returned to the engine, which
//! decides whether to re-raise or recover. No gateway error tears down
//! the run.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::acl::{AclAuditEntry, AclCheck, AclLogContext};
use crate::client::Client;
use crate::cluster::{ClusterLocate, ClusterRedirect};
use crate::command::{self, CallFlags, CommandSpec, Reply};
use crate::error::{Error, Result};
use crate::server::{DiskError, ServerState};

/// Calls a command on behalf of the running script.
///
/// `argv` is the full argument vector, command name first. On success the
/// command has been dispatched with propagation flags derived from the
/// script's replication policy; on error nothing was dispatched (except
/// that the write-dirty bit may already be set when a write command fails
/// the cluster-locality check).
pub fn call(server: &mut ServerState, argv: Vec<Bytes>) -> Result<Reply> {
    let (pseudo, caller) = match server.script.as_ref() {
        Some(ctx) => (ctx.pseudo_client().clone(), ctx.caller().clone()),
        None => return Err(Error::invalid_state("no script is running")),
    };

    // Bind the arguments; the command runs under the caller's identity.
    {
        let mut p = pseudo.borrow_mut();
        p.argv = argv;
        p.user = caller.borrow().user.clone();
    }

    // Filter hooks may rewrite the argument vector.
    server.apply_command_filters(&pseudo);

    let spec = {
        let p = pseudo.borrow();
        lookup_and_verify_arity(&p.argv)?
    };
    pseudo.borrow_mut().cmd = Some(spec);

    if spec.no_script && !server.config.script_disable_deny_script {
        return Err(Error::CommandNotAllowedFromScript);
    }

    verify_acl(server, &pseudo, spec)?;
    verify_write_command_allow(server, &caller, spec)?;
    verify_oom(server, &caller, spec)?;

    if spec.write {
        // The dataset is about to change; from here on the script must be
        // allowed to complete.
        if let Some(ctx) = server.script.as_mut() {
            ctx.write_dirty = true;
        }
    }

    verify_cluster_state(server, &pseudo, &caller, spec)?;

    emit_multi_if_needed(server, &pseudo, &caller);

    let repl = server.script.as_ref().map(|ctx| ctx.replication()).unwrap_or_default();
    let flags = CallFlags {
        stats: true,
        slowlog: true,
        propagate_aof: repl.aof,
        propagate_replicas: repl.replicas,
    };
    let reply = command::dispatch(server, &pseudo, flags)?;

    // Scripts do not support blocking waits.
    let blocked = {
        let mut p = pseudo.borrow_mut();
        let blocked = p.flags.blocked;
        p.flags.blocked = false;
        blocked
    };
    if blocked {
        return Err(Error::internal("command attempted to block inside a script"));
    }

    Ok(reply)
}

fn lookup_and_verify_arity(argv: &[Bytes]) -> Result<&'static CommandSpec> {
    let name = argv.first().ok_or(Error::UnknownCommand)?;
    let spec = command::lookup(name).ok_or(Error::UnknownCommand)?;
    if !spec.arity_matches(argv.len()) {
        return Err(Error::WrongArity);
    }
    Ok(spec)
}

fn verify_acl(
    server: &mut ServerState,
    pseudo: &Rc<RefCell<Client>>,
    spec: &'static CommandSpec,
) -> Result<()> {
    let verdict = {
        let p = pseudo.borrow();
        server.acl.check_all_permissions(&p, spec, &p.argv)
    };
    if let AclCheck::Denied { kind, position } = verdict {
        let (username, object) = {
            let p = pseudo.borrow();
            let object = position
                .and_then(|i| p.argv.get(i))
                .map(|arg| String::from_utf8_lossy(arg).into_owned());
            (p.user.clone(), object)
        };
        server.push_acl_audit(AclAuditEntry {
            username,
            kind,
            context: AclLogContext::Script,
            object,
        });
        return Err(Error::PermissionDenied(kind));
    }
    Ok(())
}

fn verify_write_command_allow(
    server: &ServerState,
    caller: &Rc<RefCell<Client>>,
    spec: &CommandSpec,
) -> Result<()> {
    if !spec.write {
        return Ok(());
    }

    if server.script.as_ref().map_or(false, |ctx| ctx.is_read_only()) {
        return Err(Error::ReadOnlyScript);
    }

    {
        let c = caller.borrow();
        if server.is_replica()
            && server.config.replica_read_only
            && !c.is_aof_loader()
            && !c.flags.master
        {
            return Err(Error::ReplicaReadOnly);
        }
    }

    match &server.disk_error {
        DiskError::None => Ok(()),
        DiskError::SnapshotFailed => Err(Error::SnapshotWriteError),
        DiskError::AppendLogFailed(cause) => Err(Error::AppendLogWriteError(cause.clone())),
    }
}

fn verify_oom(
    server: &ServerState,
    caller: &Rc<RefCell<Client>>,
    spec: &CommandSpec,
) -> Result<()> {
    // Memory-enlarging commands are refused only before the first write:
    // once the script has side effects it must be allowed to complete.
    let write_dirty = server.script.as_ref().map_or(false, |ctx| ctx.is_write_dirty());
    if server.config.maxmemory > 0
        && !caller.borrow().is_aof_loader()
        && !server.is_replica()
        && !write_dirty
        && server.script_oom()
        && spec.deny_oom
    {
        return Err(Error::OutOfMemory);
    }
    Ok(())
}

fn verify_cluster_state(
    server: &ServerState,
    pseudo: &Rc<RefCell<Client>>,
    caller: &Rc<RefCell<Client>>,
    spec: &'static CommandSpec,
) -> Result<()> {
    let Some(resolver) = server.cluster.as_ref() else {
        return Ok(());
    };
    {
        let c = caller.borrow();
        if c.is_aof_loader() || c.flags.master {
            return Ok(());
        }
    }

    // The resolver sees the caller's redirection-relevant flags.
    {
        let mut p = pseudo.borrow_mut();
        let c = caller.borrow();
        p.flags.readonly = c.flags.readonly;
        p.flags.asking = c.flags.asking;
    }

    let p = pseudo.borrow();
    match resolver.locate(&p, spec, &p.argv) {
        ClusterLocate::Mine => Ok(()),
        ClusterLocate::Redirect(ClusterRedirect::DownReadOnly) => Err(Error::ClusterWriteDown),
        ClusterLocate::Redirect(ClusterRedirect::Down) => Err(Error::ClusterDown),
        ClusterLocate::Redirect(ClusterRedirect::NonLocal) => Err(Error::ClusterNonLocalKey),
    }
}

/// Opens the replication bracket the first time a write is about to be
/// dispatched.
///
/// With per-command replication the script's effects must still appear
/// atomic to the append-only log and the replicas, so the first bracketed
/// write is preceded by a begin-transaction marker; `reset_run` emits the
/// matching commit. Nothing is emitted when the caller is already inside
/// a user transaction (the outer MULTI/EXEC brackets it) or when both
/// propagation destinations are disabled.
fn emit_multi_if_needed(
    server: &mut ServerState,
    pseudo: &Rc<RefCell<Client>>,
    caller: &Rc<RefCell<Client>>,
) {
    let should = match server.script.as_ref() {
        Some(ctx) => {
            !ctx.is_multi_emitted()
                && !caller.borrow().flags.multi
                && ctx.is_write_dirty()
                && ctx.replication().any()
        }
        None => false,
    };
    if !should {
        return;
    }

    let db = caller.borrow().db;
    server.propagation_mut().begin_transaction(db);
    if let Some(ctx) = server.script.as_mut() {
        ctx.multi_emitted = true;
    }
    // Nested dispatch must not re-open the bracket.
    pseudo.borrow_mut().flags.multi = true;
}
