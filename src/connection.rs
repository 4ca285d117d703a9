//! Connections and the open / upgrade / delete protocol.
//!
//! Each algorithm runs as a chain of continuations: it waits on the connection
//! queue, notifies other connections with "versionchange", reports "blocked" if any
//! stay open, waits for them to close, and then upgrades or deletes.

use std::collections::BTreeSet;

use log::debug;

use crate::constants::{IndexFlags, RequestFlags, DEFAULT_OPEN_VERSION};
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventTarget};
use crate::key_path::KeyPath;
use crate::meta::DatabaseInfo;
use crate::request::{Request, RequestResult};
use crate::transaction::{Journal, Transaction};
use crate::types::{
    ConnectionId, ConnectionState, DatabaseId, Durability, IndexHandle, ObjectStoreHandle, RequestId, StorageKey,
    TransactionId, TransactionMode, TransactionState,
};
use crate::value::HostValue;

/// A caller's handle on a database
#[derive(Debug, Clone)]
pub struct Connection {
    pub(crate) database: DatabaseId,
    pub(crate) storage_key: StorageKey,
    pub(crate) name: String,
    /// Version the connection sees
    pub(crate) version: u64,
    pub(crate) state: ConnectionState,
    /// Transactions created on this connection
    pub(crate) transactions: Vec<TransactionId>,
}

impl Connection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close_pending(&self) -> bool {
        self.state != ConnectionState::Open
    }
}

/// What a suspended open or delete is working towards
#[derive(Debug, Clone, Copy)]
enum Target {
    Upgrade { connection: ConnectionId, version: u64 },
    Delete,
}

impl<V: HostValue> Environment<V> {
    /// Request a connection to `name`, upgrading it to `version` if that is newer.
    ///
    /// The returned request succeeds with the connection, or fails with
    /// `VersionError` or `AbortError`. "upgradeneeded" fires at it first when an
    /// upgrade runs, and "blocked" if other connections stay open.
    pub fn open(&mut self, storage_key: impl Into<StorageKey>, name: &str, version: Option<u64>) -> Result<RequestId> {
        if version == Some(0) {
            return Err(Error::InvalidAccess("version must be at least 1"));
        }
        let storage_key = storage_key.into();
        let request = self.requests.insert(Request::new(None, None));
        debug!("open {}/{} at {:?} queued as {:?}", storage_key, name, version, request);

        self.enqueue_connection_request(&storage_key, name, request);
        let name = name.to_owned();
        self.spin_until(
            "open: wait for connection queue",
            queue_ready(storage_key.clone(), name.clone(), request),
            move |env| env.open_a_database_connection(storage_key, name, version, request),
        );
        Ok(request)
    }

    /// Request deletion of `name`. Succeeds with the version the database had, or 0.
    pub fn delete_database(&mut self, storage_key: impl Into<StorageKey>, name: &str) -> Result<RequestId> {
        let storage_key = storage_key.into();
        let request = self.requests.insert(Request::new(None, None));
        debug!("delete {}/{} queued as {:?}", storage_key, name, request);

        self.enqueue_connection_request(&storage_key, name, request);
        let name = name.to_owned();
        self.spin_until(
            "delete: wait for connection queue",
            queue_ready(storage_key.clone(), name.clone(), request),
            move |env| env.delete_a_database(storage_key, name, request),
        );
        Ok(request)
    }

    /// Names and versions of the databases in a storage partition
    pub fn databases(&self, storage_key: impl Into<StorageKey>) -> Vec<DatabaseInfo> {
        let storage_key = storage_key.into();
        let mut infos: Vec<DatabaseInfo> = self
            .registry
            .iter()
            .filter(|((key, _), _)| *key == storage_key)
            .filter_map(|(_, id)| self.databases.get(*id))
            .map(|db| DatabaseInfo {
                name: db.name.clone(),
                version: db.version,
            })
            .collect();
        infos.sort_by(|a, b| a.name.encode_utf16().cmp(b.name.encode_utf16()));
        infos
    }

    fn enqueue_connection_request(&mut self, storage_key: &StorageKey, name: &str, request: RequestId) {
        let requests = &self.requests;
        self.queues
            .for_key_and_name(storage_key, name)
            .append(request, |id| requests.get(id).map_or(true, |r| r.is_processed()));
    }

    fn open_a_database_connection(&mut self, storage_key: StorageKey, name: String, version: Option<u64>, request: RequestId) {
        let existing = self.registry.get(&(storage_key.clone(), name.clone())).copied();
        // A database that never finished its first upgrade is still at version 0
        let version = version
            .or_else(|| {
                existing
                    .and_then(|id| self.databases.get(id))
                    .map(|db| db.version)
                    .filter(|version| *version > 0)
            })
            .unwrap_or(DEFAULT_OPEN_VERSION);
        let (database, created) = match existing {
            Some(id) => (id, false),
            None => {
                let id = self.databases.insert(Database::new(storage_key.clone(), name.clone()));
                self.registry.insert((storage_key.clone(), name.clone()), id);
                debug!("created database {}/{}", storage_key, name);
                (id, true)
            }
        };

        let Some(db) = self.databases.get(database) else {
            return self.finish_connection_request(request, Err(Error::Operation("database could not be created")));
        };
        let current = db.version;
        if current > version {
            return self.finish_connection_request(request, Err(Error::Version("requested version is lower than the current one")));
        }

        let connection = self.connections.insert(Connection {
            database,
            storage_key,
            name,
            version: current,
            state: ConnectionState::Open,
            transactions: Vec::new(),
        });
        let others: Vec<ConnectionId> = match self.databases.get_mut(database) {
            Some(db) => {
                let others = db.connections.clone();
                db.connections.push(connection);
                others
            }
            None => Vec::new(),
        };

        if current == version {
            return self.finish_connection_request(request, Ok(RequestResult::Connection(connection)));
        }

        debug!("open {:?}: upgrade {} -> {}", request, current, version);
        self.notify_version_change(
            database,
            others,
            request,
            Some(version),
            Target::Upgrade { connection, version },
            created,
        );
    }

    fn delete_a_database(&mut self, storage_key: StorageKey, name: String, request: RequestId) {
        let Some(database) = self.registry.get(&(storage_key, name)).copied() else {
            return self.finish_connection_request(request, Ok(RequestResult::Version(0)));
        };
        let others = self
            .databases
            .get(database)
            .map(|db| db.connections.clone())
            .unwrap_or_default();
        self.notify_version_change(database, others, request, None, Target::Delete, false);
    }

    /// Fire "versionchange" at every other open connection, then wait for all of them
    /// to close, firing "blocked" at the request if any are still open
    fn notify_version_change(
        &mut self,
        database: DatabaseId,
        others: Vec<ConnectionId>,
        request: RequestId,
        new_version: Option<u64>,
        target: Target,
        created: bool,
    ) {
        let old_version = self.databases.get(database).map_or(0, |db| db.version);

        for connection in others.iter().copied() {
            let open = self.connections.get(connection).map_or(false, |c| !c.close_pending());
            if !open {
                continue;
            }
            self.queue_task(move |env| {
                let open = env.connections.get(connection).map_or(false, |c| !c.close_pending());
                if open {
                    env.dispatch(Event::version_change(
                        EventKind::VersionChange,
                        EventTarget::Connection(connection),
                        old_version,
                        new_version,
                    ));
                }
            });
        }

        // Queued behind every notification, so it runs once they are all delivered
        self.queue_task(move |env| {
            let blocked = others.iter().any(|c| !env.connection_closed(*c));
            if blocked {
                debug!("request {:?} blocked by open connections", request);
                env.queue_task(move |env| {
                    env.dispatch(Event::version_change(
                        EventKind::Blocked,
                        EventTarget::Request(request),
                        old_version,
                        new_version,
                    ));
                });
            }

            let waiting = others.clone();
            env.spin_until(
                "wait for other connections to close",
                move |env| waiting.iter().all(|c| env.connection_closed(*c)),
                move |env| match target {
                    Target::Upgrade { connection, version } => {
                        env.run_upgrade(database, connection, version, request, created)
                    }
                    Target::Delete => env.remove_database(database, request),
                },
            );
        });
    }

    fn connection_closed(&self, connection: ConnectionId) -> bool {
        self.connections
            .get(connection)
            .map_or(true, |c| c.state == ConnectionState::Closed)
    }

    /// Start an upgrade transaction and fire "upgradeneeded" from a task
    fn run_upgrade(&mut self, database: DatabaseId, connection: ConnectionId, version: u64, request: RequestId, created: bool) {
        if self.connection_closed(connection) {
            return self.finish_upgrade(database, connection, None, request, created);
        }
        let Some(db) = self.databases.get_mut(database) else {
            return self.finish_connection_request(request, Err(Error::Abort("database was deleted")));
        };

        let old_version = db.version;
        let scope: BTreeSet<String> = db.stores.keys().cloned().collect();
        let mut transaction = Transaction::new(connection, TransactionMode::VersionChange, Durability::Default, scope);
        transaction.state = TransactionState::Inactive;
        transaction.journal = Journal::Upgrade {
            version: old_version,
            stores: db.stores.clone(),
        };
        let txn = self.transactions.insert(transaction);

        db.upgrade_transaction = Some(txn);
        db.version = version;
        if let Some(conn) = self.connections.get_mut(connection) {
            conn.version = version;
            conn.transactions.push(txn);
        }
        if let Some(req) = self.requests.get_mut(request) {
            req.flags.insert(RequestFlags::PROCESSED);
        }
        debug!("upgrade transaction {:?} started: {} -> {}", txn, old_version, version);

        self.queue_task(move |env| {
            if let Some(req) = env.requests.get_mut(request) {
                req.result = Some(RequestResult::Connection(connection));
                req.transaction = Some(txn);
                req.flags.insert(RequestFlags::DONE);
            }
            let Some(transaction) = env.transactions.get_mut(txn) else {
                return;
            };
            transaction.open_request = Some(request);
            transaction.set_state(TransactionState::Active);

            env.dispatch(Event::version_change(
                EventKind::UpgradeNeeded,
                EventTarget::Request(request),
                old_version,
                Some(version),
            ));

            if let Some(transaction) = env.transactions.get_mut(txn) {
                if transaction.state == TransactionState::Active {
                    transaction.set_state(TransactionState::Inactive);
                }
            }
            env.maybe_autocommit(txn);
        });

        self.spin_until(
            "open: wait for upgrade transaction",
            move |env| env.transactions.get(txn).map_or(true, |t| t.is_finished()),
            move |env| env.finish_upgrade(database, connection, Some(txn), request, created),
        );
    }

    fn finish_upgrade(
        &mut self,
        database: DatabaseId,
        connection: ConnectionId,
        txn: Option<TransactionId>,
        request: RequestId,
        created: bool,
    ) {
        let aborted = txn
            .and_then(|id| self.transactions.get(id))
            .map_or(false, |t| t.was_aborted());

        // A connection closed from "upgradeneeded" is still waiting on its transactions
        let closing = self.connections.get(connection).map_or(true, Connection::close_pending);
        if closing {
            if created && aborted {
                self.drop_database(database);
            }
            return self.finish_connection_request(request, Err(Error::Abort("connection was closed during the upgrade")));
        }
        if aborted {
            self.close_a_database_connection(connection, false);
            if created {
                self.drop_database(database);
            }
            return self.finish_connection_request(request, Err(Error::Abort("upgrade transaction was aborted")));
        }
        self.finish_connection_request(request, Ok(RequestResult::Connection(connection)));
    }

    fn remove_database(&mut self, database: DatabaseId, request: RequestId) {
        let version = self.databases.get(database).map_or(0, |db| db.version);
        self.drop_database(database);
        debug!("deleted database {:?} at version {}", database, version);
        self.finish_connection_request(request, Ok(RequestResult::Version(version)));
    }

    fn drop_database(&mut self, database: DatabaseId) {
        if let Some(db) = self.databases.remove(database) {
            self.registry.remove(&(db.storage_key, db.name));
        }
    }

    /// Mark an open/delete request processed and deliver its outcome from a task
    fn finish_connection_request(&mut self, request: RequestId, outcome: Result<RequestResult<V>>) {
        if let Some(req) = self.requests.get_mut(request) {
            req.flags.insert(RequestFlags::PROCESSED);
        }
        self.queue_task(move |env| {
            let Some(req) = env.requests.get_mut(request) else {
                return;
            };
            let event = match &outcome {
                Ok(RequestResult::Version(version)) => {
                    Event::version_change(EventKind::Success, EventTarget::Request(request), *version, None)
                }
                Ok(_) => Event::new(EventKind::Success, EventTarget::Request(request)),
                Err(error) => Event::new(EventKind::Error, EventTarget::Request(request)).with_error(Some(error.clone())),
            };
            req.transaction = None;
            req.complete(outcome);
            env.dispatch(event);
        });
    }

    /// Close a connection once its transactions finish
    pub fn close(&mut self, connection: ConnectionId) -> Result<()> {
        self.connection(connection)?;
        self.close_a_database_connection(connection, false);
        Ok(())
    }

    /// Close a connection right away, aborting its transactions, and fire "close"
    pub fn force_close(&mut self, connection: ConnectionId) -> Result<()> {
        self.connection(connection)?;
        self.close_a_database_connection(connection, true);
        Ok(())
    }

    pub(crate) fn close_a_database_connection(&mut self, connection: ConnectionId, forced: bool) {
        let Some(conn) = self.connections.get_mut(connection) else {
            return;
        };
        if conn.state == ConnectionState::Closed {
            return;
        }
        conn.state = ConnectionState::ClosePending;
        let transactions = conn.transactions.clone();
        debug!("closing connection {:?} (forced: {})", connection, forced);

        if forced {
            for txn in transactions.iter().copied() {
                self.abort_transaction(txn, Some(Error::Abort("connection was closed")));
            }
        }

        let finished = move |env: &Environment<V>| {
            transactions
                .iter()
                .all(|t| env.transactions.get(*t).map_or(true, |t| t.is_finished()))
        };
        if finished(self) {
            self.mark_closed(connection, forced);
        } else {
            self.spin_until(
                "close: wait for transactions",
                finished,
                move |env| env.mark_closed(connection, forced),
            );
        }
    }

    fn mark_closed(&mut self, connection: ConnectionId, forced: bool) {
        let Some(conn) = self.connections.get_mut(connection) else {
            return;
        };
        conn.state = ConnectionState::Closed;
        let database = conn.database;
        if let Some(db) = self.databases.get_mut(database) {
            db.connections.retain(|c| *c != connection);
        }
        debug!("connection {:?} closed", connection);

        if forced {
            self.dispatch(Event::new(EventKind::Close, EventTarget::Connection(connection)));
        }
    }

    /// Sorted names of the connection's database's object stores
    pub fn object_store_names(&self, connection: ConnectionId) -> Result<Vec<String>> {
        Ok(self.database_of(connection)?.object_store_names())
    }

    /// Upgrade transaction of the connection's database, if it belongs to `connection`
    fn upgrade_transaction_for(&self, connection: ConnectionId) -> Result<TransactionId> {
        let db = self.database_of(connection)?;
        db.upgrade_transaction
            .filter(|txn| self.transactions.get(*txn).map_or(false, |t| t.connection == connection))
            .ok_or(Error::InvalidState("not inside an upgrade transaction"))
    }

    /// Create an object store. Only allowed while the upgrade transaction is active.
    pub fn create_object_store(
        &mut self,
        connection: ConnectionId,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Result<ObjectStoreHandle> {
        let txn = self.upgrade_transaction_for(connection)?;
        if !self.txn(txn)?.is_active() {
            return Err(Error::TransactionInactive);
        }
        if let Some(path) = &key_path {
            if !path.is_valid() {
                return Err(Error::Syntax("invalid key path"));
            }
        }
        if self.database_of(connection)?.store(name).is_some() {
            return Err(Error::Constraint("an object store with this name already exists"));
        }
        if auto_increment && key_path.as_ref().map_or(false, |p| p.is_empty_string() || p.is_sequence()) {
            return Err(Error::InvalidAccess("auto-increment needs a non-empty, non-sequence key path"));
        }

        let database = self.connection(connection)?.database;
        let db = self
            .databases
            .get_mut(database)
            .ok_or(Error::InvalidState("database has been deleted"))?;
        let serial = db.create_object_store(name, key_path, auto_increment)?;
        self.txn_mut(txn)?.scope.insert(name.to_owned());
        debug!("created object store {} in {:?}", name, txn);

        Ok(ObjectStoreHandle {
            transaction: txn,
            serial,
        })
    }

    /// Delete an object store and its indexes. Only allowed during an upgrade.
    pub fn delete_object_store(&mut self, connection: ConnectionId, name: &str) -> Result<()> {
        let txn = self.upgrade_transaction_for(connection)?;
        if !self.txn(txn)?.is_active() {
            return Err(Error::TransactionInactive);
        }
        let database = self.connection(connection)?.database;
        let db = self
            .databases
            .get_mut(database)
            .ok_or(Error::InvalidState("database has been deleted"))?;
        db.delete_object_store(name)?;
        self.txn_mut(txn)?.scope.remove(name);
        debug!("deleted object store {} in {:?}", name, txn);
        Ok(())
    }

    /// Start a transaction over `scope` with the environment's default durability
    pub fn transaction(&mut self, connection: ConnectionId, scope: &[&str], mode: TransactionMode) -> Result<TransactionId> {
        let durability = self.default_durability;
        self.transaction_with_durability(connection, scope, mode, durability)
    }

    /// Start a transaction over `scope`.
    ///
    /// The transaction is active until the current task ends, then commits on its
    /// own once it is inactive with every request delivered.
    pub fn transaction_with_durability(
        &mut self,
        connection: ConnectionId,
        scope: &[&str],
        mode: TransactionMode,
        durability: Durability,
    ) -> Result<TransactionId> {
        let conn = self.connection(connection)?;
        let live_upgrade = conn
            .transactions
            .iter()
            .filter_map(|t| self.transactions.get(*t))
            .any(|t| t.is_upgrade() && !t.is_finished());
        if live_upgrade {
            return Err(Error::InvalidState("an upgrade transaction is running on this connection"));
        }
        if conn.close_pending() {
            return Err(Error::InvalidState("connection is closing"));
        }

        let db = self.database_of(connection)?;
        let scope: BTreeSet<String> = scope.iter().map(|name| (*name).to_owned()).collect();
        if scope.iter().any(|name| db.store(name).is_none()) {
            return Err(Error::NotFound("object store does not exist"));
        }
        if scope.is_empty() {
            return Err(Error::InvalidAccess("transaction scope is empty"));
        }
        if mode == TransactionMode::VersionChange {
            return Err(Error::InvalidAccess("upgrade transactions are only created by open"));
        }

        let txn = self.transactions.insert(Transaction::new(connection, mode, durability, scope));
        if let Some(conn) = self.connections.get_mut(connection) {
            conn.transactions.push(txn);
        }
        debug!("transaction {:?} created ({:?}, {:?})", txn, mode, durability);

        // End of the creating task
        self.queue_task(move |env| {
            if let Some(transaction) = env.transactions.get_mut(txn) {
                if transaction.state == TransactionState::Active {
                    transaction.set_state(TransactionState::Inactive);
                }
            }
            env.maybe_autocommit(txn);
        });
        Ok(txn)
    }

    /// Rename an object store during an upgrade
    pub fn rename_object_store(&mut self, store: ObjectStoreHandle, name: &str) -> Result<()> {
        self.check_upgrade_handle(store)?;
        let database = self.database_id_of_txn(store.transaction)?;
        let db = self
            .databases
            .get_mut(database)
            .ok_or(Error::InvalidState("database has been deleted"))?;
        let old = db
            .store_by_serial(store.serial)
            .map(|s| s.name().to_owned())
            .ok_or(Error::InvalidState("object store has been deleted"))?;
        db.rename_object_store(store.serial, name)?;
        let transaction = self.txn_mut(store.transaction)?;
        transaction.scope.remove(&old);
        transaction.scope.insert(name.to_owned());
        Ok(())
    }

    /// Create an index over a store's current records. Only allowed during an upgrade.
    ///
    /// If existing records violate a unique index the upgrade transaction is aborted
    /// with `ConstraintError`.
    pub fn create_index(
        &mut self,
        store: ObjectStoreHandle,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<IndexHandle> {
        self.check_upgrade_handle(store)?;
        let existing = self.resolve_store(store)?;
        if existing.index(name).is_some() {
            return Err(Error::Constraint("an index with this name already exists"));
        }
        if !key_path.is_valid() {
            return Err(Error::Syntax("invalid key path"));
        }
        if key_path.is_sequence() && multi_entry {
            return Err(Error::InvalidAccess("multiEntry index with a sequence key path"));
        }

        let mut flags = IndexFlags::empty();
        flags.set(IndexFlags::UNIQUE, unique);
        flags.set(IndexFlags::MULTI_ENTRY, multi_entry);

        let created = self.resolve_store_mut(store)?.create_index(name, key_path, flags);
        if let Err(error) = created {
            debug!("index {} could not be populated: {}", name, error);
            self.abort_transaction(store.transaction, Some(error.clone()));
            return Err(error);
        }
        Ok(IndexHandle {
            store,
            name: name.to_owned(),
        })
    }

    /// Delete an index during an upgrade
    pub fn delete_index(&mut self, store: ObjectStoreHandle, name: &str) -> Result<()> {
        self.check_upgrade_handle(store)?;
        self.resolve_store_mut(store)?.delete_index(name)
    }

    /// Rename an index during an upgrade. The handle follows the new name.
    pub fn rename_index(&mut self, index: &mut IndexHandle, name: &str) -> Result<()> {
        self.check_upgrade_handle(index.store)?;
        let store = self.resolve_store_mut(index.store)?;
        if store.index(&index.name).is_none() {
            return Err(Error::InvalidState("index has been deleted"));
        }
        store.rename_index(&index.name, name)?;
        index.name = name.to_owned();
        Ok(())
    }

    /// Schema changes need an active upgrade transaction and a live store
    fn check_upgrade_handle(&self, store: ObjectStoreHandle) -> Result<()> {
        let transaction = self.txn(store.transaction)?;
        if !transaction.is_upgrade() {
            return Err(Error::InvalidState("not inside an upgrade transaction"));
        }
        self.resolve_store(store)?;
        if !transaction.is_active() {
            return Err(Error::TransactionInactive);
        }
        Ok(())
    }
}

fn queue_ready<V: HostValue>(
    storage_key: StorageKey,
    name: String,
    request: RequestId,
) -> impl Fn(&Environment<V>) -> bool + 'static {
    move |env| {
        env.queues.get(&storage_key, &name).map_or(true, |queue| {
            queue.all_previous_processed(request, |id| env.requests.get(id).map_or(true, |r| r.is_processed()))
        })
    }
}
