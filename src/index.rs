use std::cmp::Ordering;

use crate::constants::IndexFlags;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::key_path::KeyPath;
use crate::key_range::KeyRange;
use crate::value::HostValue;

/// Index record: derived key plus the primary key of the store record it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: Key,
    pub value: Key,
}

impl IndexRecord {
    fn compare(&self, key: &Key, value: &Key) -> Ordering {
        self.key.cmp(key).then_with(|| self.value.cmp(value))
    }
}

/// Secondary index over an object store. Lives inside its store; the store keeps it
/// consistent on every write.
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    key_path: KeyPath,
    flags: IndexFlags,
    /// Sorted by key, then by primary key
    records: Vec<IndexRecord>,
}

impl Index {
    pub(crate) fn new(name: String, key_path: KeyPath, flags: IndexFlags) -> Self {
        Index {
            name,
            key_path,
            flags,
            records: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn unique(&self) -> bool {
        self.flags.contains(IndexFlags::UNIQUE)
    }

    pub fn multi_entry(&self) -> bool {
        self.flags.contains(IndexFlags::MULTI_ENTRY)
    }

    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index keys a store value produces. Values whose path does not resolve, or
    /// resolves to an invalid key, are simply not indexed.
    pub(crate) fn derive_keys<V: HostValue>(&self, value: &V) -> Vec<Key> {
        let key = match self.key_path.extract_key(value, self.multi_entry()) {
            Ok(Some(key)) => key,
            Ok(None) | Err(_) => return Vec::new(),
        };
        match key {
            Key::Array(items) if self.multi_entry() => items,
            key => vec![key],
        }
    }

    /// Whether storing `keys` for `primary_key` would break uniqueness. Records
    /// already owned by `primary_key` are about to be replaced and do not count.
    pub(crate) fn violates_unique(&self, keys: &[Key], primary_key: &Key) -> bool {
        if !self.unique() {
            return false;
        }
        keys.iter().any(|key| {
            self.records_with_key(key)
                .iter()
                .any(|record| record.value != *primary_key)
        })
    }

    /// Insert keeping the (key, primary key) order
    pub(crate) fn store_a_record(&mut self, record: IndexRecord) {
        match self
            .records
            .binary_search_by(|entry| entry.compare(&record.key, &record.value))
        {
            Ok(_) => {}
            Err(pos) => self.records.insert(pos, record),
        }
    }

    /// Drop every record that points at `primary_key`
    pub(crate) fn remove_primary(&mut self, primary_key: &Key) {
        self.records.retain(|record| record.value != *primary_key);
    }

    pub(crate) fn remove_primaries_in_range(&mut self, range: &KeyRange) {
        self.records.retain(|record| !range.includes(&record.value));
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub fn has_record_with_key(&self, key: &Key) -> bool {
        !self.records_with_key(key).is_empty()
    }

    fn records_with_key(&self, key: &Key) -> &[IndexRecord] {
        let start = self.records.partition_point(|record| record.key < *key);
        let end = self.records.partition_point(|record| record.key <= *key);
        &self.records[start..end]
    }

    /// Records whose key lies in `range`, in ascending order
    pub fn records_in_range<'a>(&'a self, range: &'a KeyRange) -> impl Iterator<Item = &'a IndexRecord> + 'a {
        let start = self.records.partition_point(|record| !range.above_lower(&record.key));
        self.records[start..]
            .iter()
            .take_while(move |record| range.below_upper(&record.key))
    }

    pub fn count_records_in_range(&self, range: &KeyRange) -> u64 {
        self.records_in_range(range).count() as u64
    }

    /// Rebuild from scratch over a store's records
    pub(crate) fn populate<'r, V: HostValue>(
        &mut self,
        records: impl IntoIterator<Item = (&'r Key, &'r V)>,
    ) -> Result<()> {
        self.records.clear();
        for (primary_key, value) in records {
            let keys = self.derive_keys(value);
            if self.violates_unique(&keys, primary_key) {
                self.records.clear();
                return Err(Error::Constraint("existing records violate the unique index"));
            }
            for key in keys {
                self.store_a_record(IndexRecord {
                    key,
                    value: primary_key.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn record(key: i32, value: &str) -> IndexRecord {
        IndexRecord {
            key: Key::from(key),
            value: Key::string(value),
        }
    }

    #[test]
    fn records_sort_by_key_then_primary_key() {
        let mut index = Index::new("i".into(), KeyPath::from("k"), IndexFlags::empty());
        index.store_a_record(record(2, "b"));
        index.store_a_record(record(1, "z"));
        index.store_a_record(record(2, "a"));
        index.store_a_record(record(2, "a"));

        let order: Vec<_> = index.records().iter().cloned().collect();
        assert_eq!(order, vec![record(1, "z"), record(2, "a"), record(2, "b")]);
    }

    #[test]
    fn unique_check_ignores_the_replaced_record() {
        let mut index = Index::new("i".into(), KeyPath::from("k"), IndexFlags::UNIQUE);
        index.store_a_record(record(1, "a"));
        assert!(!index.violates_unique(&[Key::from(1)], &Key::string("a")));
        assert!(index.violates_unique(&[Key::from(1)], &Key::string("b")));
    }

    #[test]
    fn multi_entry_derives_one_key_per_element() {
        let index = Index::new("tags".into(), KeyPath::from("tags"), IndexFlags::MULTI_ENTRY);
        let value = Value::object([("tags", Value::from(vec!["a", "b"]))]);
        assert_eq!(index.derive_keys(&value), vec![Key::string("a"), Key::string("b")]);

        let plain = Index::new("tags".into(), KeyPath::from("tags"), IndexFlags::empty());
        assert_eq!(
            plain.derive_keys(&value),
            vec![Key::array(vec![Key::string("a"), Key::string("b")])]
        );
    }

    #[test]
    fn range_scan_and_count() {
        let mut index = Index::new("i".into(), KeyPath::from("k"), IndexFlags::empty());
        for (k, v) in [(1, "a"), (2, "b"), (2, "c"), (3, "d")] {
            index.store_a_record(record(k, v));
        }
        let range = KeyRange::only(2).unwrap();
        assert_eq!(index.count_records_in_range(&range), 2);
        assert_eq!(index.count_records_in_range(&KeyRange::unbounded()), 4);
        assert!(index.has_record_with_key(&Key::from(3)));
        assert!(!index.has_record_with_key(&Key::from(4)));
    }
}
