use crate::env::Environment;
use crate::error::{Error, Result};
use crate::index::IndexRecord;
use crate::key::Key;
use crate::key_range::KeyRange;
use crate::object_store::Record;
use crate::request::RequestResult;
use crate::types::{CursorDirection, CursorId, IndexHandle, ObjectStoreHandle, RequestId, TransactionId};
use crate::value::HostValue;

/// What a cursor walks over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorSource {
    Store(ObjectStoreHandle),
    Index(IndexHandle),
}

impl CursorSource {
    /// Store whose records the cursor ultimately reads
    pub fn object_store(&self) -> ObjectStoreHandle {
        match self {
            CursorSource::Store(store) => *store,
            CursorSource::Index(index) => index.store,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, CursorSource::Index(_))
    }
}

/// Entry of a sorted record list as the cursor sees it
pub(crate) trait CursorEntry {
    fn key(&self) -> &Key;
    fn primary_key(&self) -> &Key;
}

impl<V> CursorEntry for Record<V> {
    fn key(&self) -> &Key {
        &self.key
    }

    fn primary_key(&self) -> &Key {
        &self.key
    }
}

impl CursorEntry for IndexRecord {
    fn key(&self) -> &Key {
        &self.key
    }

    fn primary_key(&self) -> &Key {
        &self.value
    }
}

/// Stateful iterator over a store or index.
///
/// Records are read live on every step, so writes made by the cursor's own
/// transaction between steps are visible.
#[derive(Debug)]
pub struct Cursor<V> {
    pub(crate) transaction: TransactionId,
    pub(crate) source: CursorSource,
    pub(crate) direction: CursorDirection,
    pub(crate) range: KeyRange,
    /// Key cursors never load values
    pub(crate) key_only: bool,
    /// Request reused for every step
    pub(crate) request: RequestId,
    pub(crate) position: Option<Key>,
    /// Primary key paired with `position`, for index cursors
    pub(crate) object_store_position: Option<Key>,
    pub(crate) got_value: bool,
    pub(crate) key: Option<Key>,
    pub(crate) primary_key: Option<Key>,
    pub(crate) value: Option<V>,
}

impl<V: HostValue> Cursor<V> {
    pub(crate) fn new(
        transaction: TransactionId,
        source: CursorSource,
        direction: CursorDirection,
        range: KeyRange,
        key_only: bool,
        request: RequestId,
    ) -> Self {
        Cursor {
            transaction,
            source,
            direction,
            range,
            key_only,
            request,
            position: None,
            object_store_position: None,
            got_value: false,
            key: None,
            primary_key: None,
            value: None,
        }
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn source(&self) -> &CursorSource {
        &self.source
    }

    pub fn direction(&self) -> CursorDirection {
        self.direction
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    pub fn key_only(&self) -> bool {
        self.key_only
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Whether the cursor sits on a record
    pub fn got_value(&self) -> bool {
        self.got_value
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Primary key of the current record
    pub fn primary_key(&self) -> Option<&Key> {
        self.primary_key.as_ref()
    }

    /// Value of the current record; `None` for key cursors
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Whether `record` is a candidate for the next step from `position`
    fn accepts<E: CursorEntry>(
        &self,
        record: &E,
        key: Option<&Key>,
        primary_key: Option<&Key>,
        position: Option<&Key>,
        object_store_position: Option<&Key>,
    ) -> bool {
        let (k, pk) = (record.key(), record.primary_key());
        if !self.range.includes(k) {
            return false;
        }
        let index_source = self.source.is_index();

        match self.direction {
            CursorDirection::Next | CursorDirection::NextUnique => {
                let unique = self.direction == CursorDirection::NextUnique;
                if key.map_or(false, |key| k < key) {
                    return false;
                }
                if let (Some(key), Some(primary_key), false) = (key, primary_key, unique) {
                    if !(k == key && pk >= primary_key || k > key) {
                        return false;
                    }
                }
                match (position, object_store_position) {
                    (Some(pos), Some(osp)) if index_source && !unique => k == pos && pk > osp || k > pos,
                    (Some(pos), _) => k > pos,
                    (None, _) => true,
                }
            }
            CursorDirection::Prev | CursorDirection::PrevUnique => {
                let unique = self.direction == CursorDirection::PrevUnique;
                if key.map_or(false, |key| k > key) {
                    return false;
                }
                if let (Some(key), Some(primary_key), false) = (key, primary_key, unique) {
                    if !(k == key && pk <= primary_key || k < key) {
                        return false;
                    }
                }
                match (position, object_store_position) {
                    (Some(pos), Some(osp)) if index_source && !unique => k == pos && pk < osp || k < pos,
                    (Some(pos), _) => k < pos,
                    (None, _) => true,
                }
            }
        }
    }

    /// Step `count` times over `records`. Returns the index of the record landed
    /// on, or `None` when the records run out first.
    pub(crate) fn seek<E: CursorEntry>(
        &self,
        records: &[E],
        key: Option<&Key>,
        primary_key: Option<&Key>,
        count: u32,
    ) -> Option<usize> {
        let mut position = self.position.clone();
        let mut object_store_position = self.object_store_position.clone();
        let mut found = None;

        for _ in 0..count.max(1) {
            // Records are sorted, so everything on the wrong side of the position
            // or the target key is skipped by binary search
            let hit = if self.direction.is_forward() {
                let floor = match (position.as_ref(), key) {
                    (Some(position), Some(key)) => Some(position.max(key)),
                    (position, key) => position.or(key),
                };
                let start = floor.map_or(0, |floor| records.partition_point(|r| r.key() < floor));
                records[start..]
                    .iter()
                    .position(|r| self.accepts(r, key, primary_key, position.as_ref(), object_store_position.as_ref()))
                    .map(|at| start + at)
            } else {
                let ceiling = match (position.as_ref(), key) {
                    (Some(position), Some(key)) => Some(position.min(key)),
                    (position, key) => position.or(key),
                };
                let end = ceiling.map_or(records.len(), |ceiling| records.partition_point(|r| r.key() <= ceiling));
                records[..end]
                    .iter()
                    .rposition(|r| self.accepts(r, key, primary_key, position.as_ref(), object_store_position.as_ref()))
            };
            let mut at = hit?;
            // Backwards unique iteration lands on the first record with that key
            if self.direction == CursorDirection::PrevUnique {
                let found_key = records[at].key();
                at = records.partition_point(|r| r.key() < found_key);
            }

            position = Some(records[at].key().clone());
            object_store_position = Some(records[at].primary_key().clone());
            found = Some(at);
        }
        found
    }

    fn land(&mut self, key: Key, primary_key: Key, value: Option<V>) {
        self.position = Some(key.clone());
        if self.source.is_index() {
            self.object_store_position = Some(primary_key.clone());
        }
        self.key = Some(key);
        self.primary_key = Some(primary_key);
        self.value = value;
        self.got_value = true;
    }

    fn exhaust(&mut self) {
        self.key = None;
        if self.source.is_index() {
            self.object_store_position = None;
        }
        self.value = None;
        self.got_value = false;
    }
}

impl<V: HostValue> Environment<V> {
    /// Advance a cursor against the live records of its source. The result is the
    /// cursor, or undefined once it runs off the end.
    pub(crate) fn iterate_cursor(
        &mut self,
        id: CursorId,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    ) -> Result<RequestResult<V>> {
        let cursor = self
            .cursors
            .get(id)
            .ok_or(Error::InvalidState("cursor no longer exists"))?;
        let (key, primary_key) = (key.as_ref(), primary_key.as_ref());

        let found = match &cursor.source {
            CursorSource::Store(handle) => {
                let store = self.resolve_store(*handle)?;
                cursor.seek(store.records(), key, primary_key, count).map(|at| {
                    let record = &store.records()[at];
                    let value = (!cursor.key_only).then(|| record.value.clone());
                    (record.key.clone(), record.key.clone(), value)
                })
            }
            CursorSource::Index(handle) => {
                let (store, index) = self.resolve_index(handle)?;
                cursor.seek(index.records(), key, primary_key, count).map(|at| {
                    let record = &index.records()[at];
                    let value = if cursor.key_only {
                        None
                    } else {
                        store.get(&record.value).map(|r| r.value.clone())
                    };
                    (record.key.clone(), record.value.clone(), value)
                })
            }
        };

        let cursor = self
            .cursors
            .get_mut(id)
            .ok_or(Error::InvalidState("cursor no longer exists"))?;
        match found {
            Some((key, primary_key, value)) => {
                cursor.land(key, primary_key, value);
                Ok(RequestResult::Cursor(id))
            }
            None => {
                cursor.exhaust();
                Ok(RequestResult::Undefined)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::value::Value;

    fn ids() -> (TransactionId, RequestId) {
        let mut txns: Arena<TransactionId, ()> = Arena::new();
        let mut requests: Arena<RequestId, ()> = Arena::new();
        (txns.insert(()), requests.insert(()))
    }

    fn index_cursor(direction: CursorDirection) -> Cursor<Value> {
        let (txn, request) = ids();
        let source = CursorSource::Index(IndexHandle {
            store: ObjectStoreHandle {
                transaction: txn,
                serial: 1,
            },
            name: "i".into(),
        });
        Cursor::new(txn, source, direction, KeyRange::unbounded(), true, request)
    }

    fn records() -> Vec<IndexRecord> {
        [("a", 1), ("a", 2), ("b", 3), ("c", 4), ("c", 5)]
            .into_iter()
            .map(|(k, pk)| IndexRecord {
                key: Key::string(k),
                value: Key::from(pk),
            })
            .collect()
    }

    fn walk(mut cursor: Cursor<Value>) -> Vec<(String, i32)> {
        let records = records();
        let mut seen = Vec::new();
        while let Some(at) = cursor.seek(&records, None, None, 1) {
            let record = &records[at];
            cursor.land(record.key.clone(), record.value.clone(), None);
            if let (Key::String(k), Key::Number(pk)) = (&record.key, &record.value) {
                seen.push((k.clone(), *pk as i32));
            }
        }
        seen
    }

    #[test]
    fn directions_visit_the_expected_records() {
        let pairs = |v: &[(&str, i32)]| v.iter().map(|(k, pk)| (k.to_string(), *pk)).collect::<Vec<_>>();
        assert_eq!(
            walk(index_cursor(CursorDirection::Next)),
            pairs(&[("a", 1), ("a", 2), ("b", 3), ("c", 4), ("c", 5)])
        );
        assert_eq!(
            walk(index_cursor(CursorDirection::NextUnique)),
            pairs(&[("a", 1), ("b", 3), ("c", 4)])
        );
        assert_eq!(
            walk(index_cursor(CursorDirection::Prev)),
            pairs(&[("c", 5), ("c", 4), ("b", 3), ("a", 2), ("a", 1)])
        );
        assert_eq!(
            walk(index_cursor(CursorDirection::PrevUnique)),
            pairs(&[("c", 4), ("b", 3), ("a", 1)])
        );
    }

    #[test]
    fn continue_to_key_and_primary_key() {
        let records = records();
        let cursor = index_cursor(CursorDirection::Next);
        assert_eq!(cursor.seek(&records, Some(&Key::string("b")), None, 1), Some(2));
        assert_eq!(
            cursor.seek(&records, Some(&Key::string("c")), Some(&Key::from(5)), 1),
            Some(4)
        );
        assert_eq!(cursor.seek(&records, Some(&Key::string("d")), None, 1), None);
    }

    #[test]
    fn seek_resumes_from_the_current_position() {
        let records = records();
        let mut cursor = index_cursor(CursorDirection::Prev);
        cursor.land(Key::string("b"), Key::from(3), None);
        assert_eq!(cursor.seek(&records, None, None, 1), Some(1));
        assert_eq!(cursor.seek(&records, Some(&Key::string("a")), Some(&Key::from(1)), 1), Some(0));

        let mut cursor = index_cursor(CursorDirection::Next);
        cursor.land(Key::string("a"), Key::from(2), None);
        assert_eq!(cursor.seek(&records, None, None, 1), Some(2));
        assert_eq!(cursor.seek(&records, None, None, 2), Some(3));
    }

    #[test]
    fn advance_skips_count_records() {
        let records = records();
        let cursor = index_cursor(CursorDirection::Next);
        assert_eq!(cursor.seek(&records, None, None, 3), Some(2));
        assert_eq!(cursor.seek(&records, None, None, 6), None);
    }
}
