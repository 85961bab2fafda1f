//! Script execution core.
//!
//! This module mediates between a scripting engine and the command
//! dispatcher. It sets up the pseudo-client through which a script issues
//! commands, enforces every safety check an external client would face
//! (authorization, cluster locality, out-of-memory refusal, read-only
//! replica rules, read-only script contracts), wraps script-generated
//! writes in MULTI/EXEC markers so downstream consumers apply them as one
//! transaction, detects runaway scripts, and supports cooperative
//! cancellation.
//!
//! # Architecture
//!
//! - **[`run_ctx`]**: per-invocation state bundle (flags, timers,
//!   pseudo-client, caller)
//! - **[`lifecycle`]**: prepare / reset and the process-wide singleton slot
//! - **[`supervisor`]**: elapsed-time checking, timed-out mode, the
//!   cooperative event pump, and administrative kill
//! - **[`gateway`]**: the `call` entry point with its validator pipeline
//!   and the replication bracket
//! - **[`engine`]**: the Lua host driving the core
//!
//! # Control flow
//!
//! The engine prepares a run context, interprets the script (each
//! script-issued command goes through [`gateway::call`], and the engine
//! ticks [`supervisor::interrupt`] at a bounded cadence), then resets the
//! context however the script terminated. Between prepare and reset the
//! run context is the process-wide singleton: administrative commands
//! arriving on other clients locate the script through it.
//!
//! # Example
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
//! let reply = engine.eval(
//!     &caller,
//!     r#"
//!         server.call("SET", KEYS[1], ARGV[1])
//!         return server.call("GET", KEYS[1])
//!     "#,
//!     &["greeting"],
//!     &["hello"],
//! )?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod gateway;
pub mod lifecycle;
pub mod run_ctx;
pub mod supervisor;

pub use engine::LuaEngine;
pub use run_ctx::{ScriptMode, ScriptRunCtx};
pub use supervisor::ScriptStep;
