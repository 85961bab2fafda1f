//! Lua engine host.
//!
//! `LuaEngine` drives the script core the way the server's eval command
//! does: it prepares a run context, interprets the script body in a fresh
//! sandboxed Lua VM, routes every `server.call` through the command
//! gateway, ticks the timeout supervisor from an instruction-count hook,
//! and resets the context however the script terminated.
//!
//! # Script API
//!
//! Scripts see the globals `KEYS` and `ARGV` plus a `server` table:
//!
//! - `server.call(...)`: dispatch a command; errors are raised
//! - `server.pcall(...)`: like `call`, but errors come back as `{err=...}`
//! - `server.status_reply(s)` / `server.error_reply(s)`: reply helpers
//! - `server.setresp(2|3)`: protocol version of the pseudo-client
//! - `server.set_repl(mask)`: replication destinations, using the
//!   `REPL_ALL`, `REPL_AOF`, `REPL_REPLICA`, `REPL_NONE` constants

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use bytes::Bytes;
use mlua::{HookTriggers, Lua};

use crate::client::Client;
use crate::command::Reply;
use crate::error::{Error, Result};
use crate::propagate::PropagationTargets;
use crate::script::gateway;
use crate::script::lifecycle;
use crate::script::run_ctx::ScriptMode;
use crate::script::supervisor::{self, ScriptStep};
use crate::server::ServerState;

/// How many Lua instructions run between interrupt ticks.
const INTERRUPT_INSTRUCTION_CADENCE: u32 = 1000;

/// Lua host for ad-hoc scripts.
///
/// # Example
///
/// ```rust,no_run
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use emberkv::script::LuaEngine;
/// use emberkv::{Options, ServerState};
///
/// # fn main() -> Result<(), emberkv::Error> {
/// let server = Rc::new(RefCell::new(ServerState::new(Options::default())?));
/// let caller = server.borrow_mut().new_client();
/// let engine = LuaEngine::new(Rc::clone(&server));
///
/// engine.eval(&caller, r#"server.call("SET", KEYS[1], ARGV[1])"#, &["k"], &["v"])?;
/// # Ok(())
/// # }
/// ```
pub struct LuaEngine {
    server: Rc<RefCell<ServerState>>,
    pseudo: Rc<RefCell<Client>>,
}

impl LuaEngine {
    /// Creates an engine bound to a server. The engine owns a reusable
    /// pseudo-client through which all script commands dispatch.
    pub fn new(server: Rc<RefCell<ServerState>>) -> Self {
        let pseudo = server.borrow_mut().new_script_client();
        Self { server, pseudo }
    }

    /// Evaluates a script body with the given keys and arguments.
    ///
    /// Returns the script's final value converted to a [`Reply`], or an
    /// error if the script failed, was killed, or issued a refused
    /// command it did not catch with `pcall`.
    pub fn eval(
        &self,
        caller: &Rc<RefCell<Client>>,
        body: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<Reply> {
        self.run(caller, body, keys, args, false)
    }

    /// Evaluates a script that declares itself read-only: any write
    /// command it issues is refused.
    pub fn eval_ro(
        &self,
        caller: &Rc<RefCell<Client>>,
        body: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<Reply> {
        self.run(caller, body, keys, args, true)
    }

    fn run(
        &self,
        caller: &Rc<RefCell<Client>>,
        body: &str,
        keys: &[&str],
        args: &[&str],
        read_only: bool,
    ) -> Result<Reply> {
        let funcname = format!("f_{:08x}", crc32fast::hash(body.as_bytes()));
        let started = Instant::now();

        {
            let mut server = self.server.borrow_mut();
            lifecycle::prepare_for_run(
                &mut server,
                self.pseudo.clone(),
                caller.clone(),
                &funcname,
                ScriptMode::Eval,
                read_only,
            )?;
        }

        let lua = Lua::new();
        let result = self.exec_chunk(&lua, body, keys, args, &funcname);

        let killed = {
            let mut server = self.server.borrow_mut();
            let killed = server.script.as_ref().map_or(false, |ctx| ctx.is_killed());
            lifecycle::reset_run(&mut server);
            killed
        };

        match result {
            Ok(reply) => {
                log::info!("Lua script {} completed in {:?}", funcname, started.elapsed());
                Ok(reply)
            }
            Err(err) => {
                if killed {
                    Err(Error::ScriptKilled)
                } else {
                    log::warn!("Lua script {} failed: {}", funcname, err);
                    Err(Error::ScriptFailed(err.to_string()))
                }
            }
        }
    }

    fn exec_chunk(
        &self,
        lua: &Lua,
        body: &str,
        keys: &[&str],
        args: &[&str],
        funcname: &str,
    ) -> mlua::Result<Reply> {
        let globals = lua.globals();

        let keys_table = lua.create_table()?;
        for (i, key) in keys.iter().enumerate() {
            keys_table.set(i + 1, *key)?;
        }
        globals.set("KEYS", keys_table)?;

        let args_table = lua.create_table()?;
        for (i, arg) in args.iter().enumerate() {
            args_table.set(i + 1, *arg)?;
        }
        globals.set("ARGV", args_table)?;

        globals.set("server", self.create_api_table(lua)?)?;

        let server = Rc::clone(&self.server);
        lua.set_hook(
            HookTriggers {
                every_nth_instruction: Some(INTERRUPT_INSTRUCTION_CADENCE),
                ..Default::default()
            },
            move |_lua, _debug| match supervisor::interrupt(&mut server.borrow_mut()) {
                ScriptStep::Continue => Ok(()),
                ScriptStep::Kill => {
                    Err(mlua::Error::RuntimeError(Error::ScriptKilled.to_string()))
                }
            },
        );

        let value = lua.load(body).set_name(funcname).eval::<mlua::Value<'_>>()?;
        lua_value_to_reply(&value)
    }

    fn create_api_table<'lua>(&self, lua: &'lua Lua) -> mlua::Result<mlua::Table<'lua>> {
        let table = lua.create_table()?;

        let server = Rc::clone(&self.server);
        let call_fn = lua.create_function(move |lua, lua_args: mlua::MultiValue<'_>| {
            let argv = lua_args_to_argv(lua_args)?;
            match gateway::call(&mut server.borrow_mut(), argv) {
                Ok(reply) => reply_to_lua(lua, &reply),
                Err(err) => Err(mlua::Error::RuntimeError(err.to_string())),
            }
        })?;
        table.set("call", call_fn)?;

        let server = Rc::clone(&self.server);
        let pcall_fn = lua.create_function(move |lua, lua_args: mlua::MultiValue<'_>| {
            let argv = match lua_args_to_argv(lua_args) {
                Ok(argv) => argv,
                Err(err) => return error_table(lua, &err.to_string()),
            };
            match gateway::call(&mut server.borrow_mut(), argv) {
                Ok(Reply::Error(err)) => error_table(lua, &err),
                Ok(reply) => reply_to_lua(lua, &reply),
                Err(err) => error_table(lua, &err.to_string()),
            }
        })?;
        table.set("pcall", pcall_fn)?;

        let status_fn = lua.create_function(|lua, msg: mlua::String<'_>| {
            let t = lua.create_table()?;
            t.set("ok", msg)?;
            Ok(t)
        })?;
        table.set("status_reply", status_fn)?;

        let error_fn = lua.create_function(|lua, msg: mlua::String<'_>| {
            let t = lua.create_table()?;
            t.set("err", msg)?;
            Ok(t)
        })?;
        table.set("error_reply", error_fn)?;

        let server = Rc::clone(&self.server);
        let setresp_fn = lua.create_function(move |_, version: i64| {
            if version != 2 && version != 3 {
                return Err(mlua::Error::RuntimeError("RESP version must be 2 or 3.".to_string()));
            }
            lifecycle::set_protocol_version(&server.borrow(), version as u8)
                .map_err(|err| mlua::Error::RuntimeError(err.to_string()))
        })?;
        table.set("setresp", setresp_fn)?;

        let server = Rc::clone(&self.server);
        let set_repl_fn = lua.create_function(move |_, mask: i64| {
            if !(0..=3).contains(&mask) {
                return Err(mlua::Error::RuntimeError(
                    "Invalid replication flags. Use REPL_AOF, REPL_REPLICA, REPL_ALL or REPL_NONE."
                        .to_string(),
                ));
            }
            let targets =
                PropagationTargets { aof: mask & 1 != 0, replicas: mask & 2 != 0 };
            lifecycle::set_replication(&mut server.borrow_mut(), targets)
                .map_err(|err| mlua::Error::RuntimeError(err.to_string()))
        })?;
        table.set("set_repl", set_repl_fn)?;

        table.set("REPL_NONE", 0)?;
        table.set("REPL_AOF", 1)?;
        table.set("REPL_REPLICA", 2)?;
        table.set("REPL_SLAVE", 2)?;
        table.set("REPL_ALL", 3)?;

        Ok(table)
    }
}

fn error_table<'lua>(lua: &'lua Lua, msg: &str) -> mlua::Result<mlua::Value<'lua>> {
    let t = lua.create_table()?;
    t.set("err", msg)?;
    Ok(mlua::Value::Table(t))
}

fn lua_args_to_argv(args: mlua::MultiValue<'_>) -> mlua::Result<Vec<Bytes>> {
    let mut argv = Vec::new();
    for value in args {
        match value {
            mlua::Value::String(s) => argv.push(Bytes::copy_from_slice(s.as_bytes())),
            mlua::Value::Integer(i) => argv.push(Bytes::from(i.to_string())),
            mlua::Value::Number(n) => {
                if n.fract() == 0.0 {
                    argv.push(Bytes::from((n as i64).to_string()));
                } else {
                    argv.push(Bytes::from(n.to_string()));
                }
            }
            _ => {
                return Err(mlua::Error::RuntimeError(
                    "Lua server.call() arguments must be strings or numbers".to_string(),
                ))
            }
        }
    }
    if argv.is_empty() {
        return Err(mlua::Error::RuntimeError(
            "Please specify at least one argument for this call".to_string(),
        ));
    }
    Ok(argv)
}

fn reply_to_lua<'lua>(lua: &'lua Lua, reply: &Reply) -> mlua::Result<mlua::Value<'lua>> {
    match reply {
        Reply::Status(status) => {
            let t = lua.create_table()?;
            t.set("ok", status.as_str())?;
            Ok(mlua::Value::Table(t))
        }
        Reply::Error(err) => Err(mlua::Error::RuntimeError(err.clone())),
        Reply::Integer(i) => Ok(mlua::Value::Integer(*i)),
        Reply::Bulk(data) => Ok(mlua::Value::String(lua.create_string(data)?)),
        Reply::Nil => Ok(mlua::Value::Boolean(false)),
        Reply::Array(items) => {
            let t = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                t.set(i + 1, reply_to_lua(lua, item)?)?;
            }
            Ok(mlua::Value::Table(t))
        }
    }
}

fn lua_value_to_reply(value: &mlua::Value<'_>) -> mlua::Result<Reply> {
    Ok(match value {
        mlua::Value::Nil => Reply::Nil,
        mlua::Value::Boolean(true) => Reply::Integer(1),
        mlua::Value::Boolean(false) => Reply::Nil,
        mlua::Value::Integer(i) => Reply::Integer(*i),
        mlua::Value::Number(n) => Reply::Integer(*n as i64),
        mlua::Value::String(s) => Reply::Bulk(Bytes::copy_from_slice(s.as_bytes())),
        mlua::Value::Table(t) => {
            if let Some(ok) = t.get::<_, Option<mlua::String<'_>>>("ok")? {
                Reply::Status(ok.to_str()?.to_string())
            } else if let Some(err) = t.get::<_, Option<mlua::String<'_>>>("err")? {
                Reply::Error(err.to_str()?.to_string())
            } else {
                let mut items = Vec::new();
                for i in 1..=t.raw_len() {
                    let item: mlua::Value<'_> = t.get(i)?;
                    if matches!(item, mlua::Value::Nil) {
                        break;
                    }
                    items.push(lua_value_to_reply(&item)?);
                }
                Reply::Array(items)
            }
        }
        _ => Reply::Nil,
    })
}
