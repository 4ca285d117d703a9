//! Keys and the total order every record list is sorted by.
//!
//! Types rank `Number < Date < String < Binary < Array`; a comparison between two
//! different types is decided by rank alone. Within a type, numbers and dates
//! compare as floats, strings by UTF-16 code units, binaries bytewise and arrays
//! element by element with the shorter array first on a common prefix.

use std::cmp::Ordering;
use std::fmt;

use crate::error::KeyConversionError;

/// Key type, in ascending rank order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyType {
    Number,
    Date,
    String,
    Binary,
    Array,
}

/// A key. Never holds NaN when built through the checked constructors or a host conversion.
#[derive(Clone)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the epoch
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    pub fn number(value: f64) -> Result<Key, KeyConversionError> {
        if value.is_nan() {
            return Err(KeyConversionError::NaN);
        }
        Ok(Key::Number(value))
    }

    pub fn date(millis: f64) -> Result<Key, KeyConversionError> {
        if millis.is_nan() {
            return Err(KeyConversionError::NaN);
        }
        Ok(Key::Date(millis))
    }

    pub fn string(value: impl Into<String>) -> Key {
        Key::String(value.into())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Key {
        Key::Binary(bytes.into())
    }

    pub fn array(items: impl IntoIterator<Item = Key>) -> Key {
        Key::Array(items.into_iter().collect())
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Number(_) => KeyType::Number,
            Key::Date(_) => KeyType::Date,
            Key::String(_) => KeyType::String,
            Key::Binary(_) => KeyType::Binary,
            Key::Array(_) => KeyType::Array,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Key]> {
        match self {
            Key::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Compare two keys
    pub fn compare(a: &Key, b: &Key) -> Ordering {
        let (ta, tb) = (a.key_type(), b.key_type());
        if ta != tb {
            return ta.cmp(&tb);
        }

        match (a, b) {
            (Key::Number(x), Key::Number(y)) | (Key::Date(x), Key::Date(y)) => compare_floats(*x, *y),
            (Key::String(x), Key::String(y)) => x.encode_utf16().cmp(y.encode_utf16()),
            (Key::Binary(x), Key::Binary(y)) => x.as_slice().cmp(y.as_slice()),
            (Key::Array(x), Key::Array(y)) => {
                for (left, right) in x.iter().zip(y.iter()) {
                    match Key::compare(left, right) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => unreachable!("key types already compared equal"),
        }
    }
}

// -0 and +0 are the same key. A NaN smuggled in through a variant constructor still
// gets a consistent place in the order.
fn compare_floats(x: f64, y: f64) -> Ordering {
    x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        Key::compare(self, other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        Key::compare(self, other)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "Date({})", ms),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Binary(bytes) => write!(f, "Binary({:02x?})", bytes),
            Key::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::Number(value as f64)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Number(value as f64)
    }
}
