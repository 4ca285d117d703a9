use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::key_path::KeyPath;
use crate::meta::sorted_name_list;
use crate::object_store::ObjectStore;
use crate::types::{ConnectionId, StorageKey, TransactionId};
use crate::value::HostValue;

/// Named, versioned set of object stores
#[derive(Debug)]
pub struct Database<V> {
    /// Database name
    pub(crate) name: String,
    /// Storage partition
    pub(crate) storage_key: StorageKey,
    /// Current version; 0 until the first upgrade commits
    pub(crate) version: u64,
    /// Object stores by name
    pub(crate) stores: BTreeMap<String, ObjectStore<V>>,
    /// Live connections, in creation order
    pub(crate) connections: Vec<ConnectionId>,
    /// In-flight upgrade transaction
    pub(crate) upgrade_transaction: Option<TransactionId>,
    /// Next object store serial
    next_serial: u64,
}

impl<V: HostValue> Database<V> {
    /// Create an empty database at version 0
    pub(crate) fn new(storage_key: StorageKey, name: String) -> Self {
        Database {
            name,
            storage_key,
            version: 0,
            stores: BTreeMap::new(),
            connections: Vec::new(),
            upgrade_transaction: None,
            next_serial: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        sorted_name_list(self.stores.keys().cloned())
    }

    pub fn store(&self, name: &str) -> Option<&ObjectStore<V>> {
        self.stores.get(name)
    }

    pub(crate) fn store_by_serial(&self, serial: u64) -> Option<&ObjectStore<V>> {
        self.stores.values().find(|store| store.serial() == serial)
    }

    pub(crate) fn store_by_serial_mut(&mut self, serial: u64) -> Option<&mut ObjectStore<V>> {
        self.stores.values_mut().find(|store| store.serial() == serial)
    }

    /// Add an object store. Names are unique within the database.
    pub(crate) fn create_object_store(
        &mut self,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Result<u64> {
        if self.stores.contains_key(name) {
            return Err(Error::Constraint("an object store with this name already exists"));
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        self.stores.insert(
            name.to_owned(),
            ObjectStore::new(name.to_owned(), serial, key_path, auto_increment),
        );
        Ok(serial)
    }

    pub(crate) fn delete_object_store(&mut self, name: &str) -> Result<ObjectStore<V>> {
        self.stores
            .remove(name)
            .ok_or(Error::NotFound("no object store with this name"))
    }

    pub(crate) fn rename_object_store(&mut self, serial: u64, to: &str) -> Result<()> {
        let from = self
            .store_by_serial(serial)
            .map(|store| store.name().to_owned())
            .ok_or(Error::InvalidState("object store has been deleted"))?;
        if from == to {
            return Ok(());
        }
        if self.stores.contains_key(to) {
            return Err(Error::Constraint("an object store with this name already exists"));
        }

        let mut store = self
            .stores
            .remove(&from)
            .ok_or(Error::InvalidState("object store has been deleted"))?;
        store.set_name(to.to_owned());
        self.stores.insert(to.to_owned(), store);
        Ok(())
    }
}
