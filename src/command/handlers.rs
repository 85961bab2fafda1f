//! Built-in command implementations and the static command table.

use bytes::Bytes;

use super::{CommandSpec, ExecCtx, Reply};
use crate::client::Client;
use crate::error::{Error, Result};

pub(crate) static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "PING",
        arity: -1,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 0,
        last_key: 0,
        key_step: 0,
        handler: cmd_ping,
    },
    CommandSpec {
        name: "ECHO",
        arity: 2,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 0,
        last_key: 0,
        key_step: 0,
        handler: cmd_echo,
    },
    CommandSpec {
        name: "SELECT",
        arity: 2,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 0,
        last_key: 0,
        key_step: 0,
        handler: cmd_select,
    },
    CommandSpec {
        name: "GET",
        arity: 2,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 1,
        last_key: 1,
        key_step: 1,
        handler: cmd_get,
    },
    CommandSpec {
        name: "SET",
        arity: 3,
        write: true,
        deny_oom: true,
        no_script: false,
        first_key: 1,
        last_key: 1,
        key_step: 1,
        handler: cmd_set,
    },
    CommandSpec {
        name: "DEL",
        arity: -2,
        write: true,
        deny_oom: false,
        no_script: false,
        first_key: 1,
        last_key: -1,
        key_step: 1,
        handler: cmd_del,
    },
    CommandSpec {
        name: "EXISTS",
        arity: -2,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 1,
        last_key: -1,
        key_step: 1,
        handler: cmd_exists,
    },
    CommandSpec {
        name: "INCR",
        arity: 2,
        write: true,
        deny_oom: true,
        no_script: false,
        first_key: 1,
        last_key: 1,
        key_step: 1,
        handler: cmd_incr,
    },
    CommandSpec {
        name: "INCRBY",
        arity: 3,
        write: true,
        deny_oom: true,
        no_script: false,
        first_key: 1,
        last_key: 1,
        key_step: 1,
        handler: cmd_incrby,
    },
    CommandSpec {
        name: "APPEND",
        arity: 3,
        write: true,
        deny_oom: true,
        no_script: false,
        first_key: 1,
        last_key: 1,
        key_step: 1,
        handler: cmd_append,
    },
    CommandSpec {
        name: "STRLEN",
        arity: 2,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 1,
        last_key: 1,
        key_step: 1,
        handler: cmd_strlen,
    },
    CommandSpec {
        name: "DBSIZE",
        arity: 1,
        write: false,
        deny_oom: false,
        no_script: false,
        first_key: 0,
        last_key: 0,
        key_step: 0,
        handler: cmd_dbsize,
    },
    CommandSpec {
        name: "FLUSHDB",
        arity: 1,
        write: true,
        deny_oom: false,
        no_script: false,
        first_key: 0,
        last_key: 0,
        key_step: 0,
        handler: cmd_flushdb,
    },
    CommandSpec {
        name: "EXEC",
        arity: 1,
        write: false,
        deny_oom: false,
        no_script: true,
        first_key: 0,
        last_key: 0,
        key_step: 0,
        handler: cmd_exec,
    },
    CommandSpec {
        name: "WATCH",
        arity: -2,
        write: false,
        deny_oom: false,
        no_script: true,
        first_key: 1,
        last_key: -1,
        key_step: 1,
        handler: cmd_watch,
    },
];

fn cmd_ping(_ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    match argv.len() {
        1 => Ok(Reply::Status("PONG".to_string())),
        2 => Ok(Reply::Bulk(argv[1].clone())),
        _ => Err(Error::invalid_argument("wrong number of arguments for 'ping' command")),
    }
}

fn cmd_echo(_ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    Ok(Reply::Bulk(argv[1].clone()))
}

fn cmd_select(ctx: &ExecCtx<'_>, argv: &[Bytes], c: &mut Client) -> Result<Reply> {
    let index = parse_int(&argv[1])?;
    if index < 0 {
        return Err(Error::invalid_argument("DB index is out of range"));
    }
    c.select(index as usize, ctx.db_count)?;
    Ok(Reply::ok())
}

fn cmd_get(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    match ctx.db.get(&argv[1]) {
        Some(value) => Ok(Reply::Bulk(value)),
        None => Ok(Reply::Nil),
    }
}

fn cmd_set(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    ctx.db.set(&argv[1], argv[2].clone());
    Ok(Reply::ok())
}

fn cmd_del(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    let removed = argv[1..].iter().filter(|key| ctx.db.remove(key)).count();
    Ok(Reply::Integer(removed as i64))
}

fn cmd_exists(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    let found = argv[1..].iter().filter(|key| ctx.db.contains(key)).count();
    Ok(Reply::Integer(found as i64))
}

fn cmd_incr(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    incr_by(ctx, &argv[1], 1)
}

fn cmd_incrby(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    let delta = parse_int(&argv[2])?;
    incr_by(ctx, &argv[1], delta)
}

fn incr_by(ctx: &ExecCtx<'_>, key: &Bytes, delta: i64) -> Result<Reply> {
    let current = match ctx.db.get(key) {
        Some(value) => parse_int(&value)?,
        None => 0,
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| Error::invalid_argument("increment or decrement would overflow"))?;
    ctx.db.set(key, Bytes::from(next.to_string()));
    Ok(Reply::Integer(next))
}

fn cmd_append(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    let mut value = match ctx.db.get(&argv[1]) {
        Some(existing) => existing.to_vec(),
        None => Vec::new(),
    };
    value.extend_from_slice(&argv[2]);
    let len = value.len();
    ctx.db.set(&argv[1], Bytes::from(value));
    Ok(Reply::Integer(len as i64))
}

fn cmd_strlen(ctx: &ExecCtx<'_>, argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    let len = ctx.db.get(&argv[1]).map_or(0, |value| value.len());
    Ok(Reply::Integer(len as i64))
}

fn cmd_dbsize(ctx: &ExecCtx<'_>, _argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    Ok(Reply::Integer(ctx.db.len() as i64))
}

fn cmd_flushdb(ctx: &ExecCtx<'_>, _argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    ctx.db.clear();
    Ok(Reply::ok())
}

fn cmd_exec(_ctx: &ExecCtx<'_>, _argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    Err(Error::invalid_state("EXEC without MULTI"))
}

fn cmd_watch(_ctx: &ExecCtx<'_>, _argv: &[Bytes], _c: &mut Client) -> Result<Reply> {
    Ok(Reply::ok())
}

fn parse_int(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::invalid_argument("value is not an integer or out of range"))
}
