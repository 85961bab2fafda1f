//! # EmberKv - An In-Memory Key/Value Server Core with Embedded Scripting
//!
//! EmberKv is the single-threaded core of an in-memory key/value server,
//! built around its **script execution core**: the machinery that lets
//! user-submitted Lua scripts issue server commands as a first-class
//! citizen: atomic with respect to replication, safe under memory limits,
//! interruptible without corrupting the event loop, and correct across
//! master/replica role transitions.
//!
//! ## Architecture
//!
//! The crate consists of several key components:
//!
//! - **Script core** ([`script`]): run context, lifecycle singleton,
//!   timeout supervisor, command gateway, replication bracket, Lua host
//! - **Server state** ([`server`]): keyspace, roles, latches, client
//!   registry, pending-event queue
//! - **Command table** ([`command`]): per-command arity, flags, keys,
//!   handlers, and the dispatcher
//! - **Propagation** ([`propagate`]): append-only-log and replica streams
//!   with checksummed record framing
//! - **Seams** ([`acl`], [`cluster`]): authorization and cluster-locality
//!   contracts consumed by the gateway
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use emberkv::script::LuaEngine;
//! use emberkv::{Options, ServerState};
//!
//! # fn main() -> Result<(), emberkv::Error> {
//! let server = Rc::new(RefCell::new(ServerState::new(Options::default())?));
//! let caller = server.borrow_mut().new_client();
//!
//! let engine = LuaEngine::new(Rc::clone(&server));
//! engine.eval(
//!     &caller,
//!     r#"
//!         local hits = server.call("INCR", KEYS[1])
//!         if hits == 1 then
//!             server.call("SET", KEYS[2], ARGV[1])
//!         end
//!         return hits
//!     "#,
//!     &["counter", "first-seen"],
//!     &["now"],
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading model
//!
//! The whole core runs on the event-loop thread. `ServerState` is not
//! `Send`; scripts hold the thread between interrupt ticks, and the only
//! suspension points are the bounded event pumps inside those ticks.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod acl;
pub mod client;
pub mod cluster;
pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod propagate;
pub mod script;
pub mod server;

pub use client::Client;
pub use command::Reply;
pub use config::Options;
pub use db::Database;
pub use error::{Error, Result};
pub use server::ServerState;
