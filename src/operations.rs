//! Object store, index and cursor operations.
//!
//! Every operation validates synchronously and then queues a request; the
//! returned [`RequestId`] settles once [`Environment::run_until_idle`] reaches it.

use log::trace;

use crate::cursor::{Cursor, CursorSource};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::key_range::KeyRange;
use crate::object_store::ObjectStore;
use crate::request::{RequestResult, RequestSource};
use crate::types::{CursorDirection, CursorId, IndexHandle, ObjectStoreHandle, RequestId, TransactionId};
use crate::value::HostValue;

/// Number of results a `get_all` may return; 0 means no limit
fn limit(count: Option<u32>) -> usize {
    match count {
        None | Some(0) => usize::MAX,
        Some(count) => count as usize,
    }
}

/// A point query must name a key or a bounded range
fn point_query(query: KeyRange) -> Result<KeyRange> {
    if query.is_unbounded() {
        return Err(Error::Data("a key or key range is required"));
    }
    Ok(query)
}

impl<V: HostValue> Environment<V> {
    /// Store reachable for reading through `handle`
    fn readable_store(&self, handle: ObjectStoreHandle) -> Result<&ObjectStore<V>> {
        let txn = self.txn(handle.transaction)?;
        let store = self.resolve_store(handle)?;
        if !txn.is_active() {
            return Err(Error::TransactionInactive);
        }
        Ok(store)
    }

    /// Store reachable for writing through `handle`
    fn writable_store(&self, handle: ObjectStoreHandle) -> Result<&ObjectStore<V>> {
        let store = self.readable_store(handle)?;
        if self.txn(handle.transaction)?.is_read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(store)
    }

    fn readable_index(&self, handle: &IndexHandle) -> Result<()> {
        let txn = self.txn(handle.store.transaction)?;
        self.resolve_index(handle)?;
        if !txn.is_active() {
            return Err(Error::TransactionInactive);
        }
        Ok(())
    }

    fn submit<F>(&mut self, source: RequestSource, txn: TransactionId, operation: F) -> RequestId
    where
        F: FnOnce(&mut Environment<V>) -> Result<RequestResult<V>> + 'static,
    {
        let request = self.create_request(source, txn);
        self.execute_request(request, txn, operation);
        request
    }

    /// Add a record. Fails with `ConstraintError` if the key exists.
    pub fn add(&mut self, store: ObjectStoreHandle, value: V, key: Option<Key>) -> Result<RequestId> {
        self.add_or_put(store, value, key, true)
    }

    /// Add or replace a record
    pub fn put(&mut self, store: ObjectStoreHandle, value: V, key: Option<Key>) -> Result<RequestId> {
        self.add_or_put(store, value, key, false)
    }

    fn add_or_put(&mut self, handle: ObjectStoreHandle, value: V, key: Option<Key>, no_overwrite: bool) -> Result<RequestId> {
        let store = self.writable_store(handle)?;
        let key_path = store.key_path().cloned();
        let generated = store.auto_increment();
        if key_path.is_some() && key.is_some() {
            return Err(Error::Data("a key was given for a store with in-line keys"));
        }
        if key_path.is_none() && !generated && key.is_none() {
            return Err(Error::Data("a key is required for a store with out-of-line keys and no generator"));
        }

        let value = self.clone_for_storage(handle.transaction, &value)?;
        if !self.txn(handle.transaction)?.is_active() {
            return Err(Error::TransactionInactive);
        }

        let mut key = key;
        if let Some(path) = &key_path {
            match path.extract_key(&value, false) {
                Err(_) => return Err(Error::Data("key path yielded an invalid key")),
                Ok(Some(extracted)) => key = Some(extracted),
                Ok(None) if !generated => return Err(Error::Data("key path did not yield a value")),
                Ok(None) if !path.can_inject(&value) => {
                    return Err(Error::Data("a generated key could not be injected into the value"))
                }
                Ok(None) => {}
            }
        }

        trace!("{} on store {:?}, key {:?}", if no_overwrite { "add" } else { "put" }, handle, key);
        Ok(self.submit(RequestSource::Store(handle), handle.transaction, move |env| {
            let key = env.resolve_store_mut(handle)?.store_a_record(value, key, no_overwrite)?;
            Ok(RequestResult::Key(key))
        }))
    }

    /// Value of the first record in `query`
    pub fn get(&mut self, store: ObjectStoreHandle, query: impl Into<KeyRange>) -> Result<RequestId> {
        self.readable_store(store)?;
        let range = point_query(query.into())?;
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            let found = env.resolve_store(store)?.first_in_range(&range);
            Ok(found.map_or(RequestResult::Undefined, |record| RequestResult::Value(record.value.clone())))
        }))
    }

    /// Key of the first record in `query`
    pub fn get_key(&mut self, store: ObjectStoreHandle, query: impl Into<KeyRange>) -> Result<RequestId> {
        self.readable_store(store)?;
        let range = point_query(query.into())?;
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            let found = env.resolve_store(store)?.first_in_range(&range);
            Ok(found.map_or(RequestResult::Undefined, |record| RequestResult::Key(record.key.clone())))
        }))
    }

    /// Values of up to `count` records in `query`, in key order
    pub fn get_all(&mut self, store: ObjectStoreHandle, query: Option<KeyRange>, count: Option<u32>) -> Result<RequestId> {
        self.readable_store(store)?;
        let range = query.unwrap_or_else(KeyRange::unbounded);
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            let values = env
                .resolve_store(store)?
                .records_in_range(&range)
                .take(limit(count))
                .map(|record| record.value.clone())
                .collect();
            Ok(RequestResult::Values(values))
        }))
    }

    /// Keys of up to `count` records in `query`, in key order
    pub fn get_all_keys(&mut self, store: ObjectStoreHandle, query: Option<KeyRange>, count: Option<u32>) -> Result<RequestId> {
        self.readable_store(store)?;
        let range = query.unwrap_or_else(KeyRange::unbounded);
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            let keys = env
                .resolve_store(store)?
                .records_in_range(&range)
                .take(limit(count))
                .map(|record| record.key.clone())
                .collect();
            Ok(RequestResult::Keys(keys))
        }))
    }

    pub fn count(&mut self, store: ObjectStoreHandle, query: Option<KeyRange>) -> Result<RequestId> {
        self.readable_store(store)?;
        let range = query.unwrap_or_else(KeyRange::unbounded);
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            Ok(RequestResult::Count(env.resolve_store(store)?.count_records_in_range(&range)))
        }))
    }

    /// Delete every record in `query`
    pub fn delete(&mut self, store: ObjectStoreHandle, query: impl Into<KeyRange>) -> Result<RequestId> {
        self.writable_store(store)?;
        let range = point_query(query.into())?;
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            let removed = env.resolve_store_mut(store)?.remove_records_in_range(&range);
            trace!("delete on store {:?} removed {} records", store, removed);
            Ok(RequestResult::Undefined)
        }))
    }

    /// Delete every record. Key generators are not reset.
    pub fn clear(&mut self, store: ObjectStoreHandle) -> Result<RequestId> {
        self.writable_store(store)?;
        Ok(self.submit(RequestSource::Store(store), store.transaction, move |env| {
            env.resolve_store_mut(store)?.clear();
            Ok(RequestResult::Undefined)
        }))
    }

    /// Open a cursor over the store's records
    pub fn open_cursor(&mut self, store: ObjectStoreHandle, query: Option<KeyRange>, direction: CursorDirection) -> Result<RequestId> {
        self.readable_store(store)?;
        Ok(self.start_cursor(CursorSource::Store(store), query, direction, false))
    }

    /// Open a cursor over the store's keys, without values
    pub fn open_key_cursor(&mut self, store: ObjectStoreHandle, query: Option<KeyRange>, direction: CursorDirection) -> Result<RequestId> {
        self.readable_store(store)?;
        Ok(self.start_cursor(CursorSource::Store(store), query, direction, true))
    }

    fn start_cursor(&mut self, source: CursorSource, query: Option<KeyRange>, direction: CursorDirection, key_only: bool) -> RequestId {
        let txn = source.object_store().transaction;
        let request_source = match &source {
            CursorSource::Store(store) => RequestSource::Store(*store),
            CursorSource::Index(index) => RequestSource::Index(index.clone()),
        };
        let request = self.create_request(request_source, txn);
        let range = query.unwrap_or_else(KeyRange::unbounded);
        let cursor = self
            .cursors
            .insert(Cursor::new(txn, source, direction, range, key_only, request));
        trace!("cursor {:?} opened ({:?}, key only: {})", cursor, direction, key_only);

        self.execute_request(request, txn, move |env| env.iterate_cursor(cursor, None, None, 1));
        request
    }

    /// Handle to one of the store's indexes
    pub fn index(&self, store: ObjectStoreHandle, name: &str) -> Result<IndexHandle> {
        if self.txn(store.transaction)?.is_finished() {
            return Err(Error::InvalidState("transaction has finished"));
        }
        let found = self.resolve_store(store)?;
        if found.index(name).is_none() {
            return Err(Error::NotFound("no index with this name"));
        }
        Ok(IndexHandle {
            store,
            name: name.to_owned(),
        })
    }

    /// Sorted names of the store's indexes
    pub fn index_names(&self, store: ObjectStoreHandle) -> Result<Vec<String>> {
        Ok(self.resolve_store(store)?.index_names())
    }

    /// Referenced value of the first index record in `query`
    pub fn index_get(&mut self, index: &IndexHandle, query: impl Into<KeyRange>) -> Result<RequestId> {
        self.readable_index(index)?;
        let range = point_query(query.into())?;
        let handle = index.clone();
        Ok(self.submit(RequestSource::Index(index.clone()), index.store.transaction, move |env| {
            let (store, index) = env.resolve_index(&handle)?;
            let value = index
                .records_in_range(&range)
                .next()
                .and_then(|record| store.get(&record.value))
                .map(|record| record.value.clone());
            Ok(value.map_or(RequestResult::Undefined, RequestResult::Value))
        }))
    }

    /// Primary key of the first index record in `query`
    pub fn index_get_key(&mut self, index: &IndexHandle, query: impl Into<KeyRange>) -> Result<RequestId> {
        self.readable_index(index)?;
        let range = point_query(query.into())?;
        let handle = index.clone();
        Ok(self.submit(RequestSource::Index(index.clone()), index.store.transaction, move |env| {
            let (_, index) = env.resolve_index(&handle)?;
            let key = index.records_in_range(&range).next().map(|record| record.value.clone());
            Ok(key.map_or(RequestResult::Undefined, RequestResult::Key))
        }))
    }

    /// Referenced values of up to `count` index records in `query`
    pub fn index_get_all(&mut self, index: &IndexHandle, query: Option<KeyRange>, count: Option<u32>) -> Result<RequestId> {
        self.readable_index(index)?;
        let range = query.unwrap_or_else(KeyRange::unbounded);
        let handle = index.clone();
        Ok(self.submit(RequestSource::Index(index.clone()), index.store.transaction, move |env| {
            let (store, index) = env.resolve_index(&handle)?;
            let values = index
                .records_in_range(&range)
                .take(limit(count))
                .filter_map(|record| store.get(&record.value))
                .map(|record| record.value.clone())
                .collect();
            Ok(RequestResult::Values(values))
        }))
    }

    /// Primary keys of up to `count` index records in `query`
    pub fn index_get_all_keys(&mut self, index: &IndexHandle, query: Option<KeyRange>, count: Option<u32>) -> Result<RequestId> {
        self.readable_index(index)?;
        let range = query.unwrap_or_else(KeyRange::unbounded);
        let handle = index.clone();
        Ok(self.submit(RequestSource::Index(index.clone()), index.store.transaction, move |env| {
            let (_, index) = env.resolve_index(&handle)?;
            let keys = index
                .records_in_range(&range)
                .take(limit(count))
                .map(|record| record.value.clone())
                .collect();
            Ok(RequestResult::Keys(keys))
        }))
    }

    pub fn index_count(&mut self, index: &IndexHandle, query: Option<KeyRange>) -> Result<RequestId> {
        self.readable_index(index)?;
        let range = query.unwrap_or_else(KeyRange::unbounded);
        let handle = index.clone();
        Ok(self.submit(RequestSource::Index(index.clone()), index.store.transaction, move |env| {
            let (_, index) = env.resolve_index(&handle)?;
            Ok(RequestResult::Count(index.count_records_in_range(&range)))
        }))
    }

    pub fn index_open_cursor(&mut self, index: &IndexHandle, query: Option<KeyRange>, direction: CursorDirection) -> Result<RequestId> {
        self.readable_index(index)?;
        Ok(self.start_cursor(CursorSource::Index(index.clone()), query, direction, false))
    }

    pub fn index_open_key_cursor(&mut self, index: &IndexHandle, query: Option<KeyRange>, direction: CursorDirection) -> Result<RequestId> {
        self.readable_index(index)?;
        Ok(self.start_cursor(CursorSource::Index(index.clone()), query, direction, true))
    }

    /// Cursor that is allowed to step: transaction active, source alive, sitting on
    /// a record
    fn steppable_cursor(&self, id: CursorId) -> Result<&Cursor<V>> {
        let cursor = self
            .cursors
            .get(id)
            .ok_or(Error::TransactionInactive)?;
        if !self.txn(cursor.transaction)?.is_active() {
            return Err(Error::TransactionInactive);
        }
        match &cursor.source {
            CursorSource::Store(store) => {
                self.resolve_store(*store)?;
            }
            CursorSource::Index(index) => {
                self.resolve_index(index)?;
            }
        }
        Ok(cursor)
    }

    /// Re-run a cursor's request to move it
    fn step_cursor(&mut self, id: CursorId, key: Option<Key>, primary_key: Option<Key>, count: u32) -> Result<()> {
        let cursor = self
            .cursors
            .get_mut(id)
            .ok_or(Error::TransactionInactive)?;
        cursor.got_value = false;
        let (request, txn) = (cursor.request, cursor.transaction);
        trace!("cursor {:?} stepping by {} to {:?}", id, count, key);
        self.execute_request(request, txn, move |env| env.iterate_cursor(id, key, primary_key, count));
        Ok(())
    }

    /// Move the cursor to the next record, or to the first at or past `key`.
    /// The cursor's request fires again.
    pub fn continue_key(&mut self, id: CursorId, key: Option<Key>) -> Result<()> {
        let cursor = self.steppable_cursor(id)?;
        if !cursor.got_value {
            return Err(Error::InvalidState("cursor is not on a record"));
        }
        if let (Some(key), Some(position)) = (&key, &cursor.position) {
            let behind = if cursor.direction.is_forward() {
                key <= position
            } else {
                key >= position
            };
            if behind {
                return Err(Error::Data("key is not past the cursor's position"));
            }
        }
        self.step_cursor(id, key, None, 1)
    }

    /// Move an index cursor to the first record at or past `key` and `primary_key`
    pub fn continue_primary_key(&mut self, id: CursorId, key: Key, primary_key: Key) -> Result<()> {
        let cursor = self.steppable_cursor(id)?;
        if !cursor.source.is_index() {
            return Err(Error::InvalidAccess("cursor is not over an index"));
        }
        if cursor.direction.is_unique() {
            return Err(Error::InvalidAccess("cursor direction is unique"));
        }
        if !cursor.got_value {
            return Err(Error::InvalidState("cursor is not on a record"));
        }
        if let (Some(position), Some(object_store_position)) = (&cursor.position, &cursor.object_store_position) {
            let behind = if cursor.direction.is_forward() {
                key < *position || (key == *position && primary_key <= *object_store_position)
            } else {
                key > *position || (key == *position && primary_key >= *object_store_position)
            };
            if behind {
                return Err(Error::Data("key is not past the cursor's position"));
            }
        }
        self.step_cursor(id, Some(key), Some(primary_key), 1)
    }

    /// Skip `count` records
    pub fn advance(&mut self, id: CursorId, count: u32) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidAccess("advance count must be positive"));
        }
        let cursor = self.steppable_cursor(id)?;
        if !cursor.got_value {
            return Err(Error::InvalidState("cursor is not on a record"));
        }
        self.step_cursor(id, None, None, count)
    }

    /// Cursor that may write its current record; returns the record's primary key
    fn writable_cursor(&self, id: CursorId) -> Result<(ObjectStoreHandle, Key)> {
        let cursor = self
            .cursors
            .get(id)
            .ok_or(Error::TransactionInactive)?;
        let txn = self.txn(cursor.transaction)?;
        if !txn.is_active() {
            return Err(Error::TransactionInactive);
        }
        if txn.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let cursor = self.steppable_cursor(id)?;
        if !cursor.got_value {
            return Err(Error::InvalidState("cursor is not on a record"));
        }
        if cursor.key_only {
            return Err(Error::InvalidState("key cursors cannot write"));
        }
        let primary_key = cursor
            .primary_key
            .clone()
            .ok_or(Error::InvalidState("cursor is not on a record"))?;
        Ok((cursor.source.object_store(), primary_key))
    }

    /// Replace the value of the cursor's current record
    pub fn cursor_update(&mut self, id: CursorId, value: V) -> Result<RequestId> {
        let (store, primary_key) = self.writable_cursor(id)?;
        let value = self.clone_for_storage(store.transaction, &value)?;
        if !self.txn(store.transaction)?.is_active() {
            return Err(Error::TransactionInactive);
        }

        if let Some(path) = self.resolve_store(store)?.key_path() {
            match path.extract_key(&value, false) {
                Ok(Some(key)) if key == primary_key => {}
                _ => return Err(Error::Data("value's key does not match the cursor's primary key")),
            }
        }

        Ok(self.submit(RequestSource::Cursor(id), store.transaction, move |env| {
            let key = env
                .resolve_store_mut(store)?
                .store_a_record(value, Some(primary_key), false)?;
            Ok(RequestResult::Key(key))
        }))
    }

    /// Delete the cursor's current record
    pub fn cursor_delete(&mut self, id: CursorId) -> Result<RequestId> {
        let (store, primary_key) = self.writable_cursor(id)?;
        let range = KeyRange::from(primary_key);
        Ok(self.submit(RequestSource::Cursor(id), store.transaction, move |env| {
            env.resolve_store_mut(store)?.remove_records_in_range(&range);
            Ok(RequestResult::Undefined)
        }))
    }
}
