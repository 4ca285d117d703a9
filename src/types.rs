use std::fmt;

use crate::arena::define_handle;

define_handle!(
    /// Handle to a database in the environment registry
    DatabaseId
);
define_handle!(
    /// Handle to a connection
    ConnectionId
);
define_handle!(
    /// Handle to a transaction
    TransactionId
);
define_handle!(
    /// Handle to a request
    RequestId
);
define_handle!(
    /// Handle to a cursor
    CursorId
);

/// Storage partition a database lives in (the origin, in browser terms)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(partition: impl Into<String>) -> Self {
        StorageKey(partition.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(partition: &str) -> Self {
        StorageKey::new(partition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    /// Upgrade transaction; only created by the open algorithm
    VersionChange,
}

/// Durability hint. Carried and reported, never acted upon by the in-memory engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    #[default]
    Default,
    Strict,
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Inactive,
    Committing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    ClosePending,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    pub fn is_forward(self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    pub fn is_unique(self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }
}

/// Handle to an object store as seen through one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectStoreHandle {
    pub(crate) transaction: TransactionId,
    /// Serial of the store inside its database; a deleted store's serial never comes back
    pub(crate) serial: u64,
}

impl ObjectStoreHandle {
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }
}

/// Handle to an index of an object store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    pub(crate) store: ObjectStoreHandle,
    pub(crate) name: String,
}

impl IndexHandle {
    pub fn object_store(&self) -> ObjectStoreHandle {
        self.store
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
