use crate::constants::RequestFlags;
use crate::error::Error;
use crate::key::Key;
use crate::types::{ConnectionId, CursorId, IndexHandle, ObjectStoreHandle, TransactionId};

/// What a request was issued against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    Store(ObjectStoreHandle),
    Index(IndexHandle),
    Cursor(CursorId),
}

impl RequestSource {
    /// Object store the request ultimately reads or writes, if not a cursor
    pub fn object_store(&self) -> Option<ObjectStoreHandle> {
        match self {
            RequestSource::Store(store) => Some(*store),
            RequestSource::Index(index) => Some(index.store),
            RequestSource::Cursor(_) => None,
        }
    }
}

/// Outcome of a successful request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestResult<V> {
    /// No value: a miss, a delete, a clear, or an exhausted cursor
    Undefined,
    Key(Key),
    Value(V),
    Values(Vec<V>),
    Keys(Vec<Key>),
    Count(u64),
    Connection(ConnectionId),
    /// Version a deleted database had
    Version(u64),
    Cursor(CursorId),
}

impl<V> RequestResult<V> {
    pub fn is_undefined(&self) -> bool {
        matches!(self, RequestResult::Undefined)
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            RequestResult::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&V> {
        match self {
            RequestResult::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_values(&self) -> Option<&[V]> {
        match self {
            RequestResult::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_keys(&self) -> Option<&[Key]> {
        match self {
            RequestResult::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            RequestResult::Count(count) => Some(*count),
            _ => None,
        }
    }

    pub fn as_connection(&self) -> Option<ConnectionId> {
        match self {
            RequestResult::Connection(connection) => Some(*connection),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<u64> {
        match self {
            RequestResult::Version(version) => Some(*version),
            _ => None,
        }
    }

    pub fn as_cursor(&self) -> Option<CursorId> {
        match self {
            RequestResult::Cursor(cursor) => Some(*cursor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Done,
}

/// Deferred outcome of an operation, an open, or a delete
#[derive(Debug)]
pub struct Request<V> {
    /// `None` for open and delete requests
    pub(crate) source: Option<RequestSource>,
    pub(crate) transaction: Option<TransactionId>,
    pub(crate) result: Option<RequestResult<V>>,
    pub(crate) error: Option<Error>,
    pub(crate) flags: RequestFlags,
}

impl<V> Request<V> {
    pub(crate) fn new(source: Option<RequestSource>, transaction: Option<TransactionId>) -> Self {
        Request {
            source,
            transaction,
            result: None,
            error: None,
            flags: RequestFlags::empty(),
        }
    }

    pub fn source(&self) -> Option<&RequestSource> {
        self.source.as_ref()
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// Result once done; `None` while pending or after an error
    pub fn result(&self) -> Option<&RequestResult<V>> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.is_done() {
            ReadyState::Done
        } else {
            ReadyState::Pending
        }
    }

    pub fn is_processed(&self) -> bool {
        self.flags.contains(RequestFlags::PROCESSED)
    }

    pub fn is_done(&self) -> bool {
        self.flags.contains(RequestFlags::DONE)
    }

    /// Record the outcome and mark the request done
    pub(crate) fn complete(&mut self, outcome: Result<RequestResult<V>, Error>) {
        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.error = None;
            }
            Err(error) => {
                self.result = None;
                self.error = Some(error);
            }
        }
        self.flags.insert(RequestFlags::DONE);
    }

    /// Return to the pending state so the request can run again (cursor iteration)
    pub(crate) fn reset(&mut self) {
        self.result = None;
        self.error = None;
        self.flags = RequestFlags::empty();
    }
}
