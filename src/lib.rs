// src/lib.rs
//! In-process key-value database engine with IndexedDB semantics.
//!
//! Everything hangs off an [`Environment`]: open connections, run upgrade and
//! read/write transactions over ordered object stores and indexes, and drive the
//! queued work with [`Environment::run_until_idle`].

mod arena;
mod connection;
mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod event;
mod executor;
mod generator;
mod index;
mod key;
mod key_path;
mod key_range;
mod meta;
mod object_store;
mod operations;
mod queue;
mod request;
mod scheduler;
mod transaction;
mod types;
mod value;

pub use arena::Handle;
pub use connection::Connection;
pub use constants::{IndexFlags, RequestFlags, DEFAULT_OPEN_VERSION, MAX_GENERATED_KEY, MAX_TURNS_VAR};
pub use cursor::{Cursor, CursorSource};
pub use database::Database;
pub use env::{CloneHook, Environment};
pub use error::{Error, KeyConversionError, Result};
pub use event::{Event, EventKind, EventTarget};
pub use generator::KeyGenerator;
pub use index::{Index, IndexRecord};
pub use key::{Key, KeyType};
pub use key_path::KeyPath;
pub use key_range::KeyRange;
pub use meta::{DatabaseInfo, EnvStat, StoreStat};
pub use object_store::{ObjectStore, Record};
pub use request::{ReadyState, Request, RequestResult, RequestSource};
pub use transaction::Transaction;
pub use types::{
    ConnectionId, ConnectionState, CursorDirection, CursorId, DatabaseId, Durability, IndexHandle, ObjectStoreHandle,
    RequestId, StorageKey, TransactionId, TransactionMode, TransactionState,
};
pub use value::{HostValue, IntoKey, Value};
