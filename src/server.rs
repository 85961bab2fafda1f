//! Process-wide server state.
//!
//! `ServerState` owns everything the scripting core and the command
//! dispatcher touch: the keyspace, the propagation streams, the
//! authorization and cluster seams, the client registry, replication role,
//! the pending-event queue, and the script singleton slot. The whole
//! structure belongs to the event-loop thread; it is deliberately not
//! `Send`, and no locking protects its state.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::Bytes;

use crate::acl::{AclAuditEntry, AclEngine, AllowAll};
use crate::client::Client;
use crate::cluster::{ClusterResolver, HashSlotResolver};
use crate::config::Options;
use crate::db::Database;
use crate::error::Result;
use crate::propagate::PropagationLog;
use crate::script::ScriptRunCtx;

/// A queued unit of event-loop work, processed by the bounded pump while a
/// timed-out script runs.
pub type PendingEvent = Box<dyn FnOnce(&mut ServerState)>;

/// Why writes are currently refused by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiskError {
    /// Writes are allowed.
    #[default]
    None,
    /// The last background snapshot failed.
    SnapshotFailed,
    /// The append-only file cannot be written; carries the OS error text.
    AppendLogFailed(String),
}

/// Per-command call statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandStats {
    /// Number of calls.
    pub calls: u64,
    /// Total execution time in microseconds.
    pub usec: u64,
}

/// One slowlog entry.
#[derive(Debug, Clone)]
pub struct SlowlogEntry {
    /// Command name.
    pub command: &'static str,
    /// Execution time in microseconds.
    pub duration_us: u64,
}

/// The single-threaded server core.
pub struct ServerState {
    /// Server configuration.
    pub config: Options,
    dbs: Vec<Database>,
    pub(crate) propagation: PropagationLog,
    pub(crate) script: Option<ScriptRunCtx>,
    pub(crate) in_script: bool,
    pub(crate) script_caller: Option<Rc<RefCell<Client>>>,
    pub(crate) script_oom: bool,
    pub(crate) acl: Box<dyn AclEngine>,
    acl_audit: Vec<AclAuditEntry>,
    pub(crate) cluster: Option<Box<dyn ClusterResolver>>,
    command_filters: Vec<Box<dyn Fn(&mut Vec<Bytes>)>>,
    command_stats: HashMap<&'static str, CommandStats>,
    slowlog: Vec<SlowlogEntry>,
    dirty: u64,
    pending_events: VecDeque<PendingEvent>,
    clients: Vec<Rc<RefCell<Client>>>,
    pending_reprocess: Vec<Rc<RefCell<Client>>>,
    master_host: Option<String>,
    master_client: Option<Rc<RefCell<Client>>>,
    blocked_ops: u32,
    pub(crate) disk_error: DiskError,
    next_client_id: u64,
}

impl ServerState {
    /// Creates a server with the given options.
    ///
    /// When cluster mode is enabled, a resolver owning every slot is
    /// installed; replace it with [`ServerState::set_cluster_resolver`] to
    /// model a sharded topology.
    pub fn new(config: Options) -> Result<Self> {
        config.validate()?;
        let dbs = (0..config.databases).map(|_| Database::new()).collect();
        let cluster: Option<Box<dyn ClusterResolver>> = if config.cluster_enabled {
            Some(Box::new(HashSlotResolver::all_slots()))
        } else {
            None
        };
        Ok(Self {
            config,
            dbs,
            propagation: PropagationLog::new(),
            script: None,
            in_script: false,
            script_caller: None,
            script_oom: false,
            acl: Box::new(AllowAll),
            acl_audit: Vec::new(),
            cluster,
            command_filters: Vec::new(),
            command_stats: HashMap::new(),
            slowlog: Vec::new(),
            dirty: 0,
            pending_events: VecDeque::new(),
            clients: Vec::new(),
            pending_reprocess: Vec::new(),
            master_host: None,
            master_client: None,
            blocked_ops: 0,
            disk_error: DiskError::None,
            next_client_id: 1,
        })
    }

    // ---- keyspace ----

    /// Returns the database at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; clients can only select validated
    /// indexes.
    pub fn db(&self, index: usize) -> &Database {
        &self.dbs[index]
    }

    /// Number of configured databases.
    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    /// Approximate memory used by all databases, in bytes.
    pub fn used_memory(&self) -> u64 {
        self.dbs.iter().map(Database::mem_used).sum()
    }

    /// Number of keyspace changes since startup.
    pub fn dirty(&self) -> u64 {
        self.dirty
    }

    pub(crate) fn note_dirty(&mut self) {
        self.dirty += 1;
    }

    // ---- script support state ----

    /// Returns true while a script is executing. Consumed by subsystems
    /// that behave differently inside scripts (e.g. random-command
    /// replication, debug hooks).
    pub fn in_script(&self) -> bool {
        self.in_script
    }

    /// The external client that invoked the running script, if any.
    pub fn script_caller(&self) -> Option<Rc<RefCell<Client>>> {
        self.script_caller.clone()
    }

    /// Whether memory pressure was latched when the current script started.
    pub fn script_oom(&self) -> bool {
        self.script_oom
    }

    pub(crate) fn update_script_oom(&mut self) {
        self.script_oom = self.config.maxmemory > 0 && self.used_memory() > self.config.maxmemory;
    }

    // ---- propagation ----

    /// Read access to the propagation streams.
    pub fn propagation(&self) -> &PropagationLog {
        &self.propagation
    }

    pub(crate) fn propagation_mut(&mut self) -> &mut PropagationLog {
        &mut self.propagation
    }

    // ---- pluggable seams ----

    /// Replaces the authorization engine.
    pub fn set_acl_engine(&mut self, engine: impl AclEngine + 'static) {
        self.acl = Box::new(engine);
    }

    /// Replaces the cluster resolver and enables cluster checks.
    pub fn set_cluster_resolver(&mut self, resolver: impl ClusterResolver + 'static) {
        self.cluster = Some(Box::new(resolver));
    }

    /// Registers a hook that may rewrite the argument vector of every
    /// script-issued command before lookup.
    pub fn register_command_filter(&mut self, filter: impl Fn(&mut Vec<Bytes>) + 'static) {
        self.command_filters.push(Box::new(filter));
    }

    pub(crate) fn apply_command_filters(&self, client: &Rc<RefCell<Client>>) {
        for filter in &self.command_filters {
            filter(&mut client.borrow_mut().argv);
        }
    }

    pub(crate) fn push_acl_audit(&mut self, entry: AclAuditEntry) {
        self.acl_audit.push(entry);
    }

    /// Entries recorded by failed authorization checks.
    pub fn acl_audit(&self) -> &[AclAuditEntry] {
        &self.acl_audit
    }

    // ---- statistics ----

    pub(crate) fn record_command_call(&mut self, name: &'static str, duration_us: u64) {
        let stats = self.command_stats.entry(name).or_default();
        stats.calls += 1;
        stats.usec += duration_us;
    }

    /// Call statistics for one command, if it was ever dispatched.
    pub fn command_stats(&self, name: &str) -> Option<CommandStats> {
        self.command_stats.get(name).copied()
    }

    pub(crate) fn record_slowlog(&mut self, command: &'static str, duration_us: u64) {
        self.slowlog.push(SlowlogEntry { command, duration_us });
    }

    /// Slow command log.
    pub fn slowlog(&self) -> &[SlowlogEntry] {
        &self.slowlog
    }

    // ---- clients ----

    /// Registers a new external client connection.
    pub fn new_client(&mut self) -> Rc<RefCell<Client>> {
        let client = Rc::new(RefCell::new(Client::new(self.next_client_id)));
        self.next_client_id += 1;
        self.clients.push(client.clone());
        client
    }

    /// Creates a pseudo-client that is not part of the connection registry.
    pub fn new_script_client(&mut self) -> Rc<RefCell<Client>> {
        let client = Rc::new(RefCell::new(Client::new(self.next_client_id)));
        self.next_client_id += 1;
        client
    }

    /// Number of registered client connections.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Pins a client's lifetime: it will survive a disconnect until
    /// [`ServerState::unprotect_client`] is called.
    pub fn protect_client(&self, client: &Rc<RefCell<Client>>) {
        client.borrow_mut().flags.protected = true;
    }

    /// Lifts lifetime protection; completes a disconnect that was deferred
    /// while the client was protected.
    pub fn unprotect_client(&mut self, client: &Rc<RefCell<Client>>) {
        let deferred = {
            let mut c = client.borrow_mut();
            c.flags.protected = false;
            c.flags.close_deferred
        };
        if deferred {
            self.clients.retain(|other| !Rc::ptr_eq(other, client));
        }
    }

    /// Handles the peer closing its connection. Protected clients stay
    /// registered until unprotected.
    pub fn disconnect_client(&mut self, client: &Rc<RefCell<Client>>) {
        if client.borrow().flags.protected {
            client.borrow_mut().flags.close_deferred = true;
            return;
        }
        self.clients.retain(|other| !Rc::ptr_eq(other, client));
    }

    // ---- replication role ----

    /// Makes this server a replica of `host`, or promotes it back to
    /// primary when `host` is `None`.
    pub fn set_replica_of(&mut self, host: Option<&str>) {
        self.master_host = host.map(str::to_string);
        if self.master_host.is_none() {
            self.master_client = None;
        }
    }

    /// Returns true if this server replicates from an upstream master.
    pub fn is_replica(&self) -> bool {
        self.master_host.is_some()
    }

    /// Installs the client object representing the upstream master link.
    pub fn set_master_client(&mut self, client: &Rc<RefCell<Client>>) {
        client.borrow_mut().flags.master = true;
        self.master_client = Some(client.clone());
    }

    /// The upstream master link, when connected.
    pub fn master_client(&self) -> Option<Rc<RefCell<Client>>> {
        self.master_client.clone()
    }

    /// Queues a client to have its pending input re-examined by the event
    /// loop.
    pub fn queue_client_for_reprocessing(&mut self, client: &Rc<RefCell<Client>>) {
        self.pending_reprocess.push(client.clone());
    }

    /// Clients queued for input reprocessing.
    pub fn reprocess_queue(&self) -> &[Rc<RefCell<Client>>] {
        &self.pending_reprocess
    }

    // ---- blocking-operation bookkeeping ----

    /// Notes that a long-running operation began; suppresses watchdogs that
    /// would otherwise fire on a stalled event loop.
    pub fn blocking_started(&mut self) {
        self.blocked_ops += 1;
    }

    /// Notes that a long-running operation ended.
    pub fn blocking_ended(&mut self) {
        debug_assert!(self.blocked_ops > 0);
        self.blocked_ops = self.blocked_ops.saturating_sub(1);
    }

    /// Number of long-running operations in flight.
    pub fn blocked_ops(&self) -> u32 {
        self.blocked_ops
    }

    // ---- persistence watchdog ----

    /// Sets the persistence-layer write-block state.
    pub fn set_disk_error(&mut self, error: DiskError) {
        self.disk_error = error;
    }

    /// Current persistence-layer write-block state.
    pub fn disk_error(&self) -> &DiskError {
        &self.disk_error
    }

    // ---- event queue ----

    /// Queues work for the next event pump. This is how administrative
    /// commands (such as a script kill) reach the server while a timed-out
    /// script occupies the thread.
    pub fn enqueue_event(&mut self, event: impl FnOnce(&mut ServerState) + 'static) {
        self.pending_events.push_back(Box::new(event));
    }

    /// Number of events waiting to be pumped.
    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    /// Drains a bounded burst of pending events without blocking.
    ///
    /// Called from the timeout supervisor so unrelated clients do not
    /// starve while a script holds the thread.
    pub fn pump_events_while_blocked(&mut self) {
        for _ in 0..self.config.event_pump_burst {
            match self.pending_events.pop_front() {
                Some(event) => event(self),
                None => break,
            }
        }
    }
}
