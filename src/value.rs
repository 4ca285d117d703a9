//! Host value capability.
//!
//! The engine never looks inside stored payloads except through [`HostValue`]: key
//! conversion, key-path property access, key injection and the deep copy taken
//! when a value is stored. [`Value`] is a self-contained implementation used by
//! hosts that have no value system of their own, and by the tests.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, KeyConversionError, Result};
use crate::key::Key;

/// Capability the host value system provides to the engine
pub trait HostValue: Clone + fmt::Debug + 'static {
    /// Convert a value to a key
    fn to_key(&self) -> std::result::Result<Key, KeyConversionError>;

    /// Convert a key back into a value
    fn from_key(key: &Key) -> Self;

    /// Elements, if the value is an array
    fn as_array(&self) -> Option<Vec<Self>>;

    /// Build an array value
    fn from_array(items: Vec<Self>) -> Self;

    /// A fresh empty object
    fn new_object() -> Self;

    /// Whether the value is an object or an array (can carry properties)
    fn is_object(&self) -> bool;

    /// Own property lookup used by key-path evaluation. `None` when the property is
    /// missing or undefined.
    fn property(&self, name: &str) -> Option<Self>;

    fn property_mut(&mut self, name: &str) -> Option<&mut Self>;

    /// Define a data property. Returns false if the value cannot carry properties.
    fn set_property(&mut self, name: &str, value: Self) -> bool;

    /// Deep copy taken for storage
    fn clone_for_storage(&self) -> Result<Self> {
        Ok(self.clone())
    }
}

/// Convert a value to a multiEntry key: array elements become individual subkeys,
/// invalid elements are skipped and duplicates removed.
pub fn to_multi_entry_key<V: HostValue>(value: &V) -> std::result::Result<Key, KeyConversionError> {
    let Some(items) = value.as_array() else {
        return value.to_key();
    };

    let mut keys: Vec<Key> = Vec::with_capacity(items.len());
    for item in &items {
        if let Ok(key) = item.to_key() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    Ok(Key::Array(keys))
}

/// Anything a key can be derived from
pub trait IntoKey {
    fn into_key(self) -> Result<Key>;
}

impl IntoKey for Key {
    fn into_key(self) -> Result<Key> {
        Ok(self)
    }
}

impl IntoKey for &Key {
    fn into_key(self) -> Result<Key> {
        Ok(self.clone())
    }
}

impl IntoKey for f64 {
    fn into_key(self) -> Result<Key> {
        Ok(Key::number(self)?)
    }
}

impl IntoKey for i32 {
    fn into_key(self) -> Result<Key> {
        Ok(Key::Number(self as f64))
    }
}

impl IntoKey for u64 {
    fn into_key(self) -> Result<Key> {
        Ok(Key::Number(self as f64))
    }
}

impl IntoKey for &str {
    fn into_key(self) -> Result<Key> {
        Ok(Key::string(self))
    }
}

impl IntoKey for String {
    fn into_key(self) -> Result<Key> {
        Ok(Key::String(self))
    }
}

impl IntoKey for &Value {
    fn into_key(self) -> Result<Key> {
        self.to_key().map_err(Error::from)
    }
}

impl IntoKey for Value {
    fn into_key(self) -> Result<Key> {
        (&self).into_key()
    }
}

/// Self-contained structured value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Milliseconds since the epoch
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Build an object from `(name, value)` pairs
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Follow a dotted path of own properties
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |value, name| match value {
            Value::Object(map) => map.get(name),
            _ => None,
        })
    }
}

impl HostValue for Value {
    fn to_key(&self) -> std::result::Result<Key, KeyConversionError> {
        match self {
            Value::Number(n) => Key::number(*n),
            Value::Date(ms) => Key::date(*ms),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Binary(bytes) => Ok(Key::Binary(bytes.clone())),
            // An owned tree cannot contain itself, so no seen-set is needed
            Value::Array(items) => items
                .iter()
                .map(HostValue::to_key)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Key::Array),
            Value::Undefined | Value::Null | Value::Bool(_) | Value::Object(_) => {
                Err(KeyConversionError::InvalidType)
            }
        }
    }

    fn from_key(key: &Key) -> Self {
        match key {
            Key::Number(n) => Value::Number(*n),
            Key::Date(ms) => Value::Date(*ms),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => Value::Binary(bytes.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Value::from_key).collect()),
        }
    }

    fn as_array(&self) -> Option<Vec<Self>> {
        match self {
            Value::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    fn from_array(items: Vec<Self>) -> Self {
        Value::Array(items)
    }

    fn new_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    fn property(&self, name: &str) -> Option<Self> {
        let found = match (self, name) {
            (Value::String(s), "length") => Value::Number(s.encode_utf16().count() as f64),
            (Value::Array(items), "length") => Value::Number(items.len() as f64),
            (Value::Binary(bytes), "byteLength") => Value::Number(bytes.len() as f64),
            (Value::Object(map), _) => map.get(name)?.clone(),
            (Value::Array(items), _) => items.get(name.parse::<usize>().ok()?)?.clone(),
            _ => return None,
        };
        match found {
            Value::Undefined => None,
            value => Some(value),
        }
    }

    fn property_mut(&mut self, name: &str) -> Option<&mut Self> {
        match self {
            Value::Object(map) => map.get_mut(name),
            Value::Array(items) => items.get_mut(name.parse::<usize>().ok()?),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: Self) -> bool {
        match self {
            Value::Object(map) => {
                map.insert(name.to_owned(), value);
                true
            }
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
