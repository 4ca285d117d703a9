use std::collections::BTreeMap;

use log::trace;

use crate::constants::IndexFlags;
use crate::error::{Error, Result};
use crate::generator::KeyGenerator;
use crate::index::{Index, IndexRecord};
use crate::key::Key;
use crate::key_path::KeyPath;
use crate::key_range::KeyRange;
use crate::meta::sorted_name_list;
use crate::value::HostValue;

/// Object store record
#[derive(Debug, Clone)]
pub struct Record<V> {
    pub key: Key,
    pub value: V,
}

/// Named container of records sorted by primary key, with its indexes
#[derive(Debug, Clone)]
pub struct ObjectStore<V> {
    name: String,
    /// Distinguishes this store from a later one created under the same name
    serial: u64,
    key_path: Option<KeyPath>,
    key_generator: Option<KeyGenerator>,
    /// Strictly ascending by key
    records: Vec<Record<V>>,
    indexes: BTreeMap<String, Index>,
}

impl<V: HostValue> ObjectStore<V> {
    pub(crate) fn new(name: String, serial: u64, key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        ObjectStore {
            name,
            serial,
            key_path,
            key_generator: auto_increment.then(KeyGenerator::new),
            records: Vec::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub fn uses_inline_keys(&self) -> bool {
        self.key_path.is_some()
    }

    pub fn auto_increment(&self) -> bool {
        self.key_generator.is_some()
    }

    pub fn key_generator(&self) -> Option<&KeyGenerator> {
        self.key_generator.as_ref()
    }

    pub(crate) fn set_key_generator(&mut self, generator: Option<KeyGenerator>) {
        self.key_generator = generator;
    }

    pub fn records(&self) -> &[Record<V>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, key: &Key) -> std::result::Result<usize, usize> {
        self.records.binary_search_by(|record| record.key.cmp(key))
    }

    pub fn has_record_with_key(&self, key: &Key) -> bool {
        self.position(key).is_ok()
    }

    pub fn get(&self, key: &Key) -> Option<&Record<V>> {
        self.position(key).ok().map(|pos| &self.records[pos])
    }

    /// Records whose key lies in `range`, ascending
    pub fn records_in_range<'a>(&'a self, range: &'a KeyRange) -> impl Iterator<Item = &'a Record<V>> + 'a {
        let start = self.records.partition_point(|record| !range.above_lower(&record.key));
        self.records[start..]
            .iter()
            .take_while(move |record| range.below_upper(&record.key))
    }

    pub fn first_in_range<'a>(&'a self, range: &'a KeyRange) -> Option<&'a Record<V>> {
        self.records_in_range(range).next()
    }

    pub fn count_records_in_range(&self, range: &KeyRange) -> u64 {
        self.records_in_range(range).count() as u64
    }

    /// Take the next number from the key generator
    pub fn generate_a_key(&mut self) -> Result<u64> {
        self.key_generator
            .as_mut()
            .ok_or(Error::Data("store has no key generator"))?
            .generate()
    }

    /// Store a record, maintaining every index.
    ///
    /// Without a key the store's generator supplies one (injected into the value for
    /// in-line stores). Nothing is modified if the key exists under `no_overwrite` or
    /// a unique index would gain a duplicate.
    pub fn store_a_record(&mut self, mut value: V, key: Option<Key>, no_overwrite: bool) -> Result<Key> {
        let key = match key {
            Some(key) => {
                if let Some(generator) = self.key_generator.as_mut() {
                    generator.possibly_update(&key);
                }
                key
            }
            None => {
                let number = self.generate_a_key()?;
                let key = Key::Number(number as f64);
                if let Some(path) = &self.key_path {
                    path.inject(&mut value, &key)?;
                }
                key
            }
        };

        let position = self.position(&key);
        if position.is_ok() && no_overwrite {
            return Err(Error::Constraint("a record with this key already exists"));
        }

        let mut derived = Vec::with_capacity(self.indexes.len());
        for (name, index) in &self.indexes {
            let keys = index.derive_keys(&value);
            if index.violates_unique(&keys, &key) {
                trace!("store {}: unique index {} rejects {:?}", self.name, name, key);
                return Err(Error::Constraint("unique index already contains this key"));
            }
            derived.push((name.clone(), keys));
        }

        match position {
            Ok(pos) => {
                self.records[pos].value = value;
                for index in self.indexes.values_mut() {
                    index.remove_primary(&key);
                }
            }
            Err(pos) => self.records.insert(
                pos,
                Record {
                    key: key.clone(),
                    value,
                },
            ),
        }

        for (name, keys) in derived {
            if let Some(index) = self.indexes.get_mut(&name) {
                for index_key in keys {
                    index.store_a_record(IndexRecord {
                        key: index_key,
                        value: key.clone(),
                    });
                }
            }
        }

        Ok(key)
    }

    /// Delete every record in `range`, cascading into the indexes
    pub fn remove_records_in_range(&mut self, range: &KeyRange) -> u64 {
        let start = self.records.partition_point(|record| !range.above_lower(&record.key));
        let len = self.records[start..]
            .iter()
            .take_while(|record| range.below_upper(&record.key))
            .count();
        if len == 0 {
            return 0;
        }

        self.records.drain(start..start + len);
        for index in self.indexes.values_mut() {
            index.remove_primaries_in_range(range);
        }
        len as u64
    }

    pub fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        sorted_name_list(self.indexes.keys().cloned())
    }

    /// Create and populate an index over the current records
    pub(crate) fn create_index(&mut self, name: &str, key_path: KeyPath, flags: IndexFlags) -> Result<()> {
        if self.indexes.contains_key(name) {
            return Err(Error::Constraint("an index with this name already exists"));
        }
        let mut index = Index::new(name.to_owned(), key_path, flags);
        index.populate(self.records.iter().map(|record| (&record.key, &record.value)))?;
        self.indexes.insert(name.to_owned(), index);
        Ok(())
    }

    pub(crate) fn delete_index(&mut self, name: &str) -> Result<()> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or(Error::NotFound("no index with this name"))
    }

    pub(crate) fn rename_index(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.indexes.contains_key(to) {
            return Err(Error::Constraint("an index with this name already exists"));
        }
        let mut index = self
            .indexes
            .remove(from)
            .ok_or(Error::InvalidState("index has been deleted"))?;
        index.set_name(to.to_owned());
        self.indexes.insert(to.to_owned(), index);
        Ok(())
    }
}
