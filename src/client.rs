//! Client model shared by external connections and internal pseudo-clients.
//!
//! A `Client` is the unit the command dispatcher operates on: it carries the
//! argument vector, the selected database, the protocol version, the
//! authenticated user, and a set of independent flag bits. Scripts execute
//! through a *pseudo-client*: a synthetic client with no network peer that
//! stands in for result plumbing and per-command state.
//!
//! Clients are reference-counted (`Rc<RefCell<Client>>`): the run context of
//! a script holds a strong reference to its caller, so the caller object
//! outlives its connection even if the peer disconnects mid-script.

use bytes::Bytes;

use crate::command::{CommandSpec, Reply};
use crate::error::{Error, Result};

/// Reserved client id of the append-only-log loader.
///
/// Commands replayed from the append-only log enter the dispatcher through a
/// synthetic client with this id; several gateway validators exempt it.
pub const AOF_LOADER_CLIENT_ID: u64 = u64::MAX;

/// Independent per-client flag bits.
#[derive(Debug, Clone, Default)]
pub struct ClientFlags {
    /// This client is the link to this server's upstream master.
    pub master: bool,
    /// The client is inside a user-initiated MULTI transaction.
    pub multi: bool,
    /// Cluster read-only mode requested by the client (`READONLY`).
    pub readonly: bool,
    /// One-shot cluster redirection override (`ASKING`).
    pub asking: bool,
    /// The client is blocked waiting on a key. Commands dispatched from
    /// scripts must never leave this set.
    pub blocked: bool,
    /// The client object must not be freed even if its connection closes.
    pub protected: bool,
    /// The connection closed while the client was protected; the object is
    /// released when protection is lifted.
    pub close_deferred: bool,
    /// Suppress automatic propagation of this client's current command.
    pub prevent_propagation: bool,
}

/// A client of the server: an external connection, the upstream master link,
/// the append-only-log loader, or a script pseudo-client.
#[derive(Debug)]
pub struct Client {
    /// Unique client id.
    pub id: u64,
    /// Index of the selected database.
    pub db: usize,
    /// Protocol version the client speaks (2 or 3).
    pub resp: u8,
    /// Name of the authenticated user.
    pub user: String,
    /// Argument vector of the current command (`argv[0]` is the name).
    pub argv: Vec<Bytes>,
    /// Command table entry resolved for the current command.
    pub cmd: Option<&'static CommandSpec>,
    /// Flag bits.
    pub flags: ClientFlags,
    /// Replies queued for delivery to the peer.
    pub replies: Vec<Reply>,
}

impl Client {
    /// Creates a new client with the given id.
    ///
    /// The client starts on database 0, speaking protocol version 2, as the
    /// default user, with all flags clear.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            db: 0,
            resp: 2,
            user: "default".to_string(),
            argv: Vec::new(),
            cmd: None,
            flags: ClientFlags::default(),
            replies: Vec::new(),
        }
    }

    /// Returns true if this client is the append-only-log loader.
    pub fn is_aof_loader(&self) -> bool {
        self.id == AOF_LOADER_CLIENT_ID
    }

    /// Selects a database, validating the index against the configured count.
    pub fn select(&mut self, db: usize, db_count: usize) -> Result<()> {
        if db >= db_count {
            return Err(Error::invalid_argument("DB index is out of range"));
        }
        self.db = db;
        Ok(())
    }

    /// Queues a reply for delivery to the peer.
    pub fn push_reply(&mut self, reply: Reply) {
        self.replies.push(reply);
    }
}
