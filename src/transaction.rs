use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::constants::RequestFlags;
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventTarget};
use crate::meta::sorted_name_list;
use crate::object_store::ObjectStore;
use crate::types::{
    ConnectionId, CursorId, Durability, ObjectStoreHandle, RequestId, TransactionId, TransactionMode, TransactionState,
};
use crate::value::HostValue;

/// State needed to revert a transaction's changes on abort
#[derive(Debug)]
pub(crate) enum Journal<V> {
    /// Read-only transactions change nothing
    Empty,
    /// Copies of each store taken before its first write, by serial
    Stores(BTreeMap<u64, ObjectStore<V>>),
    /// Whole store set and version as of the start of an upgrade
    Upgrade {
        version: u64,
        stores: BTreeMap<String, ObjectStore<V>>,
    },
}

impl<V: HostValue> Journal<V> {
    /// Remember `store` as it is now, unless already remembered
    pub(crate) fn record(&mut self, store: &ObjectStore<V>) {
        if let Journal::Stores(stores) = self {
            stores
                .entry(store.serial())
                .or_insert_with(|| store.clone());
        }
    }

    /// Put the database back as it was. Key generators keep their current numbers.
    pub(crate) fn restore(self, db: &mut Database<V>) {
        match self {
            Journal::Empty => {}
            Journal::Stores(stores) => {
                for (serial, mut snapshot) in stores {
                    if let Some(current) = db.store_by_serial_mut(serial) {
                        snapshot.set_key_generator(current.key_generator().cloned());
                        *current = snapshot;
                    }
                }
            }
            Journal::Upgrade { version, mut stores } => {
                for snapshot in stores.values_mut() {
                    if let Some(current) = db.store_by_serial(snapshot.serial()) {
                        snapshot.set_key_generator(current.key_generator().cloned());
                    }
                }
                db.stores = stores;
                db.version = version;
            }
        }
    }
}

/// Scoped unit of work over a database's object stores
#[derive(Debug)]
pub struct Transaction<V> {
    /// Connection the transaction was created on
    pub(crate) connection: ConnectionId,
    pub(crate) mode: TransactionMode,
    pub(crate) durability: Durability,
    pub(crate) state: TransactionState,
    /// Store names the transaction may touch; upgrades may touch every store
    pub(crate) scope: BTreeSet<String>,
    /// Requests in submission order
    pub(crate) requests: Vec<RequestId>,
    pub(crate) error: Option<Error>,
    pub(crate) aborted: bool,
    /// Open request that started an upgrade
    pub(crate) open_request: Option<RequestId>,
    pub(crate) journal: Journal<V>,
    /// "complete" or "abort" has been dispatched and the cursors dropped
    pub(crate) retired: bool,
}

impl<V: HostValue> Transaction<V> {
    pub(crate) fn new(
        connection: ConnectionId,
        mode: TransactionMode,
        durability: Durability,
        scope: BTreeSet<String>,
    ) -> Self {
        let journal = match mode {
            TransactionMode::ReadOnly => Journal::Empty,
            TransactionMode::ReadWrite | TransactionMode::VersionChange => Journal::Stores(BTreeMap::new()),
        };
        Transaction {
            connection,
            mode,
            durability,
            state: TransactionState::Active,
            scope,
            requests: Vec::new(),
            error: None,
            aborted: false,
            open_request: None,
            journal,
            retired: false,
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn is_upgrade(&self) -> bool {
        self.mode == TransactionMode::VersionChange
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == TransactionMode::ReadOnly
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn is_finished(&self) -> bool {
        self.state == TransactionState::Finished
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// Move to `state`. Nothing leaves `Finished`.
    pub(crate) fn set_state(&mut self, state: TransactionState) {
        if self.state != TransactionState::Finished {
            self.state = state;
        }
    }

    pub(crate) fn in_scope(&self, name: &str) -> bool {
        self.is_upgrade() || self.scope.contains(name)
    }
}

impl<V: HostValue> Environment<V> {
    pub fn transaction_state(&self, txn: TransactionId) -> Option<TransactionState> {
        self.transactions.get(txn).map(Transaction::state)
    }

    pub(crate) fn txn(&self, id: TransactionId) -> Result<&Transaction<V>> {
        self.transactions
            .get(id)
            .ok_or(Error::InvalidState("transaction no longer exists"))
    }

    pub(crate) fn txn_mut(&mut self, id: TransactionId) -> Result<&mut Transaction<V>> {
        self.transactions
            .get_mut(id)
            .ok_or(Error::InvalidState("transaction no longer exists"))
    }

    /// Handle to a store in the transaction's scope
    pub fn object_store(&self, txn: TransactionId, name: &str) -> Result<ObjectStoreHandle> {
        let transaction = self.txn(txn)?;
        if transaction.is_finished() {
            return Err(Error::InvalidState("transaction has finished"));
        }
        if !transaction.in_scope(name) {
            return Err(Error::NotFound("object store is not in the transaction's scope"));
        }
        let db = self.database_of(transaction.connection)?;
        let store = db
            .store(name)
            .ok_or(Error::NotFound("object store is not in the transaction's scope"))?;
        Ok(ObjectStoreHandle {
            transaction: txn,
            serial: store.serial(),
        })
    }

    /// Names of the stores in the transaction's scope
    pub fn transaction_object_store_names(&self, txn: TransactionId) -> Result<Vec<String>> {
        let transaction = self.txn(txn)?;
        if transaction.is_upgrade() {
            return Ok(self.database_of(transaction.connection)?.object_store_names());
        }
        Ok(sorted_name_list(transaction.scope.iter().cloned()))
    }

    /// Commit once every pending request has completed
    pub fn commit(&mut self, txn: TransactionId) -> Result<()> {
        match self.txn(txn)?.state {
            TransactionState::Active | TransactionState::Inactive => {}
            TransactionState::Committing | TransactionState::Finished => {
                return Err(Error::InvalidState("transaction is already committing or finished"))
            }
        }
        self.commit_transaction(txn);
        Ok(())
    }

    /// Abort, reverting every change the transaction made
    pub fn abort(&mut self, txn: TransactionId) -> Result<()> {
        match self.txn(txn)?.state {
            TransactionState::Active | TransactionState::Inactive => {}
            TransactionState::Committing | TransactionState::Finished => {
                return Err(Error::InvalidState("transaction is already committing or finished"))
            }
        }
        self.abort_transaction(txn, None);
        Ok(())
    }

    pub(crate) fn all_requests_done(&self, txn: &Transaction<V>) -> bool {
        txn.requests
            .iter()
            .all(|id| self.requests.get(*id).map_or(true, |request| request.is_done()))
    }

    /// First error delivered to one of the transaction's requests
    fn failed_request_error(&self, txn: &Transaction<V>) -> Option<Error> {
        txn.requests
            .iter()
            .filter_map(|id| self.requests.get(*id))
            .find_map(|request| request.error().cloned())
    }

    /// Commit an inactive transaction whose work is all delivered
    pub(crate) fn maybe_autocommit(&mut self, id: TransactionId) {
        let Some(txn) = self.transactions.get(id) else {
            return;
        };
        // An upgrade has not started until "upgradeneeded" fired
        if txn.is_upgrade() && txn.open_request.is_none() {
            return;
        }
        let state = txn.state;
        let done = self.all_requests_done(txn);
        match state {
            TransactionState::Inactive if done => self.commit_transaction(id),
            TransactionState::Committing => self.finish_commit(id),
            _ => {}
        }
    }

    pub(crate) fn commit_transaction(&mut self, id: TransactionId) {
        if let Some(txn) = self.transactions.get_mut(id) {
            txn.set_state(TransactionState::Committing);
        }
        self.finish_commit(id);
    }

    /// Finish a committing transaction once its requests are done
    fn finish_commit(&mut self, id: TransactionId) {
        let Some(txn) = self.transactions.get(id) else {
            return;
        };
        if txn.state != TransactionState::Committing || !self.all_requests_done(txn) {
            return;
        }
        if let Some(error) = self.failed_request_error(txn) {
            debug!("transaction {:?}: a request failed, aborting instead of committing", id);
            self.abort_transaction(id, Some(error));
            return;
        }

        let Some(txn) = self.transactions.get_mut(id) else {
            return;
        };
        txn.set_state(TransactionState::Finished);
        txn.journal = Journal::Empty;
        debug!("transaction {:?} committed", id);

        self.queue_task(move |env| {
            env.clear_upgrade_slot(id);
            env.dispatch(Event::new(EventKind::Complete, EventTarget::Transaction(id)));
            let open_request = env.transactions.get(id).and_then(|txn| txn.open_request);
            if let Some(request) = open_request.and_then(|r| env.requests.get_mut(r)) {
                request.transaction = None;
            }
            env.retire_transaction(id);
        });
    }

    /// Abort a transaction that has not finished
    pub(crate) fn abort_transaction(&mut self, id: TransactionId, error: Option<Error>) {
        let Some(txn) = self.transactions.get_mut(id) else {
            return;
        };
        if txn.is_finished() {
            return;
        }
        debug!("transaction {:?} aborted: {:?}", id, error);

        txn.aborted = true;
        txn.set_state(TransactionState::Finished);
        if error.is_some() {
            txn.error = error.clone();
        }
        let journal = std::mem::replace(&mut txn.journal, Journal::Empty);
        let connection = txn.connection;
        let pending: Vec<RequestId> = txn.requests.clone();

        if let Some(database) = self.connections.get(connection).map(|c| c.database) {
            if let Some(db) = self.databases.get_mut(database) {
                journal.restore(db);
                let version = db.version;
                if let Some(conn) = self.connections.get_mut(connection) {
                    conn.version = version;
                }
            }
        }

        for request_id in pending {
            let Some(request) = self.requests.get_mut(request_id) else {
                continue;
            };
            if request.is_done() {
                continue;
            }
            request.flags.insert(RequestFlags::PROCESSED);
            self.queue_task(move |env| {
                let Some(request) = env.requests.get_mut(request_id) else {
                    return;
                };
                if request.is_done() {
                    return;
                }
                let error = Error::Abort("transaction was aborted");
                request.complete(Err(error.clone()));
                env.dispatch(
                    Event::new(EventKind::Error, EventTarget::Request(request_id)).with_error(Some(error)),
                );
            });
        }

        self.queue_task(move |env| {
            env.clear_upgrade_slot(id);
            let error = env.transactions.get(id).and_then(|txn| txn.error.clone());
            env.dispatch(Event::new(EventKind::Abort, EventTarget::Transaction(id)).with_error(error));

            let open_request = env.transactions.get_mut(id).and_then(|txn| txn.open_request.take());
            // The open request stays processed; its error is delivered by the open algorithm
            if let Some(request) = open_request.and_then(|r| env.requests.get_mut(r)) {
                request.result = None;
                request.transaction = None;
                request.flags.remove(RequestFlags::DONE);
            }
            env.retire_transaction(id);
        });
    }

    /// Destroy the cursors of a finished transaction and forget it on its connection
    fn retire_transaction(&mut self, id: TransactionId) {
        let cursors: Vec<CursorId> = self
            .cursors
            .iter()
            .filter(|(_, cursor)| cursor.transaction() == id)
            .map(|(cursor, _)| cursor)
            .collect();
        for cursor in &cursors {
            self.cursors.remove(*cursor);
        }
        let Some(txn) = self.transactions.get_mut(id) else {
            return;
        };
        txn.retired = true;
        let connection = txn.connection;
        if let Some(conn) = self.connections.get_mut(connection) {
            conn.transactions.retain(|t| *t != id);
        }
        debug!("transaction {:?} retired, {} cursors dropped", id, cursors.len());
    }

    /// Free a finished transaction together with its requests and their handlers.
    ///
    /// Results stay readable until this is called; afterwards every handle to the
    /// transaction and its requests stops resolving.
    pub fn release_transaction(&mut self, txn: TransactionId) -> Result<()> {
        let transaction = self.txn(txn)?;
        if !transaction.retired {
            return Err(Error::InvalidState("transaction has not finished"));
        }
        let requests = transaction.requests.clone();
        for request in requests {
            self.requests.remove(request);
            self.handlers.remove_target(EventTarget::Request(request));
        }
        self.handlers.remove_target(EventTarget::Transaction(txn));
        self.transactions.remove(txn);
        Ok(())
    }

    fn clear_upgrade_slot(&mut self, id: TransactionId) {
        let Some(txn) = self.transactions.get(id) else {
            return;
        };
        if !txn.is_upgrade() {
            return;
        }
        let database = self.connections.get(txn.connection).map(|c| c.database);
        if let Some(db) = database.and_then(|d| self.databases.get_mut(d)) {
            if db.upgrade_transaction == Some(id) {
                db.upgrade_transaction = None;
            }
        }
    }

    /// Drop a request whose transaction finished before it could run
    pub(crate) fn discard_request(&mut self, request: RequestId) {
        warn!("request {:?} dropped: its transaction has finished", request);
        if let Some(request) = self.requests.get_mut(request) {
            request.flags.insert(RequestFlags::PROCESSED);
        }
    }
}
