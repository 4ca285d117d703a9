use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::arena::Arena;
use crate::connection::Connection;
use crate::constants::MAX_TURNS;
use crate::cursor::Cursor;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::event::{Event, EventHandlers, EventTarget};
use crate::index::Index;
use crate::meta::{EnvStat, StoreStat};
use crate::object_store::ObjectStore;
use crate::queue::ConnectionQueues;
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::transaction::Transaction;
use crate::types::{
    ConnectionId, CursorId, DatabaseId, Durability, IndexHandle, ObjectStoreHandle, RequestId, StorageKey,
    TransactionId, TransactionState,
};
use crate::value::HostValue;

/// Deep copy applied to values before they are stored
pub type CloneHook<V> = Box<dyn FnMut(&mut Environment<V>, &V) -> Result<V>>;

/// Process-level owner of every database, connection, transaction and request.
///
/// All engine state lives here and is addressed through generational handles.
/// Nothing runs on its own: deferred work is driven by [`Environment::run_until_idle`].
pub struct Environment<V> {
    /// Databases
    pub(crate) databases: Arena<DatabaseId, Database<V>>,
    /// Databases by storage partition and name
    pub(crate) registry: HashMap<(StorageKey, String), DatabaseId>,
    /// Connections
    pub(crate) connections: Arena<ConnectionId, Connection>,
    /// Transactions
    pub(crate) transactions: Arena<TransactionId, Transaction<V>>,
    /// Requests
    pub(crate) requests: Arena<RequestId, Request<V>>,
    /// Cursors
    pub(crate) cursors: Arena<CursorId, Cursor<V>>,
    /// Connection queues
    pub(crate) queues: ConnectionQueues,
    /// Task queue and suspended algorithms
    pub(crate) scheduler: Scheduler<V>,
    /// Event handlers
    pub(crate) handlers: EventHandlers<V>,
    /// Dispatched events, when recording
    pub(crate) event_log: Vec<Event>,
    pub(crate) record_events: bool,
    /// Storage deep copy; `None` uses `HostValue::clone_for_storage`
    clone_hook: Option<CloneHook<V>>,
    /// Run loop budget per `run_until_idle`
    pub(crate) max_turns: usize,
    /// Durability given to transactions that do not ask for one
    pub(crate) default_durability: Durability,
}

impl<V: HostValue> Environment<V> {
    /// Create an empty environment
    pub fn new() -> Self {
        Environment {
            databases: Arena::new(),
            registry: HashMap::new(),
            connections: Arena::new(),
            transactions: Arena::new(),
            requests: Arena::new(),
            cursors: Arena::new(),
            queues: ConnectionQueues::default(),
            scheduler: Scheduler::new(),
            handlers: EventHandlers::new(),
            event_log: Vec::new(),
            record_events: false,
            clone_hook: None,
            max_turns: *MAX_TURNS,
            default_durability: Durability::default(),
        }
    }

    /// Set the number of steps one `run_until_idle` may take
    pub fn set_max_turns(&mut self, turns: usize) {
        self.max_turns = turns.max(1);
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn set_default_durability(&mut self, durability: Durability) {
        self.default_durability = durability;
    }

    pub fn default_durability(&self) -> Durability {
        self.default_durability
    }

    /// Keep a log of dispatched events, read back with `take_events`
    pub fn set_record_events(&mut self, record: bool) {
        self.record_events = record;
        if !record {
            self.event_log.clear();
        }
    }

    /// Replace the deep copy taken of every stored value. The hook runs while the
    /// owning transaction is inactive.
    pub fn set_clone_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Environment<V>, &V) -> Result<V> + 'static,
    {
        self.clone_hook = Some(Box::new(hook));
    }

    pub fn clear_clone_hook(&mut self) {
        self.clone_hook = None;
    }

    pub fn request(&self, id: RequestId) -> Option<&Request<V>> {
        self.requests.get(id)
    }

    /// Free a delivered open or delete request and its handlers. Requests made
    /// inside a transaction are freed with `release_transaction`.
    pub fn release_request(&mut self, id: RequestId) -> Result<()> {
        let request = self
            .requests
            .get(id)
            .ok_or(Error::InvalidState("request no longer exists"))?;
        if request.source().is_some() {
            return Err(Error::InvalidState("request belongs to a transaction"));
        }
        if !request.is_done() || request.transaction().is_some() {
            return Err(Error::InvalidState("request has not been delivered"));
        }
        self.requests.remove(id);
        self.handlers.remove_target(EventTarget::Request(id));
        Ok(())
    }

    /// Live entity counts
    pub fn stat(&self) -> EnvStat {
        EnvStat {
            databases: self.databases.len(),
            connections: self.connections.len(),
            transactions: self.transactions.len(),
            requests: self.requests.len(),
            cursors: self.cursors.len(),
            handlers: self.handlers.len(),
        }
    }

    pub fn transaction_info(&self, id: TransactionId) -> Option<&Transaction<V>> {
        self.transactions.get(id)
    }

    pub fn connection_info(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn cursor(&self, id: CursorId) -> Option<&Cursor<V>> {
        self.cursors.get(id)
    }

    /// Database a connection is attached to, while it exists
    pub fn database(&self, connection: ConnectionId) -> Option<&Database<V>> {
        self.database_of(connection).ok()
    }

    pub(crate) fn connection(&self, id: ConnectionId) -> Result<&Connection> {
        self.connections
            .get(id)
            .ok_or(Error::InvalidState("connection no longer exists"))
    }

    pub(crate) fn database_of(&self, connection: ConnectionId) -> Result<&Database<V>> {
        let database = self.connection(connection)?.database;
        self.databases
            .get(database)
            .ok_or(Error::InvalidState("database has been deleted"))
    }

    pub(crate) fn database_id_of_txn(&self, txn: TransactionId) -> Result<DatabaseId> {
        let connection = self.txn(txn)?.connection;
        Ok(self.connection(connection)?.database)
    }

    /// Store behind a handle. Fails if the store was deleted.
    pub(crate) fn resolve_store(&self, handle: ObjectStoreHandle) -> Result<&ObjectStore<V>> {
        let database = self.database_id_of_txn(handle.transaction)?;
        self.databases
            .get(database)
            .and_then(|db| db.store_by_serial(handle.serial))
            .ok_or(Error::InvalidState("object store has been deleted"))
    }

    /// Store behind a handle, for writing. Snapshots it into the transaction's
    /// journal on the first write.
    pub(crate) fn resolve_store_mut(&mut self, handle: ObjectStoreHandle) -> Result<&mut ObjectStore<V>> {
        let database = self.database_id_of_txn(handle.transaction)?;
        let txn = self
            .transactions
            .get_mut(handle.transaction)
            .ok_or(Error::InvalidState("transaction no longer exists"))?;
        let store = self
            .databases
            .get_mut(database)
            .and_then(|db| db.store_by_serial_mut(handle.serial))
            .ok_or(Error::InvalidState("object store has been deleted"))?;
        txn.journal.record(store);
        Ok(store)
    }

    pub(crate) fn resolve_index(&self, handle: &IndexHandle) -> Result<(&ObjectStore<V>, &Index)> {
        let store = self.resolve_store(handle.store)?;
        let index = store
            .index(&handle.name)
            .ok_or(Error::InvalidState("index has been deleted"))?;
        Ok((store, index))
    }

    /// Copy a value for storage with the transaction marked inactive
    pub(crate) fn clone_for_storage(&mut self, txn: TransactionId, value: &V) -> Result<V> {
        self.txn_mut(txn)?.set_state(TransactionState::Inactive);

        let cloned = match self.clone_hook.take() {
            Some(mut hook) => {
                let cloned = hook(self, value);
                if self.clone_hook.is_none() {
                    self.clone_hook = Some(hook);
                }
                cloned
            }
            None => value.clone_for_storage(),
        };

        if let Some(transaction) = self.transactions.get_mut(txn) {
            if transaction.state == TransactionState::Inactive {
                transaction.set_state(TransactionState::Active);
            }
        }
        cloned.map_err(|_| Error::DataClone("value could not be cloned"))
    }

    /// Summary of a store's contents
    pub fn store_stat(&self, store: ObjectStoreHandle) -> Result<StoreStat> {
        let store = self.resolve_store(store)?;
        Ok(StoreStat {
            entries: store.len(),
            indexes: store.index_names().len(),
            next_generated_key: store.key_generator().map(|g| g.current_number()),
        })
    }

    /// Force-close every connection, run outstanding work, and drop all state
    pub fn shutdown(&mut self) -> Result<()> {
        let open: Vec<ConnectionId> = self.connections.iter().map(|(id, _)| id).collect();
        for connection in open {
            self.close_a_database_connection(connection, true);
        }
        self.run_until_idle()?;
        debug!("shutdown: dropping {} databases", self.databases.len());

        self.scheduler = Scheduler::new();
        self.cursors.clear();
        self.requests.clear();
        self.transactions.clear();
        self.connections.clear();
        self.databases.clear();
        self.registry.clear();
        self.queues.clear();
        Ok(())
    }
}

impl<V: HostValue> Default for Environment<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: HostValue> fmt::Debug for Environment<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("databases", &self.databases.len())
            .field("connections", &self.connections.len())
            .field("transactions", &self.transactions.len())
            .field("requests", &self.requests.len())
            .field("suspended", &self.scheduler.waiter_count())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}
