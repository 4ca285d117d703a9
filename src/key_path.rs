//! Key paths: deriving keys from stored values.

use crate::error::{Error, KeyConversionError, Result};
use crate::key::Key;
use crate::value::{to_multi_entry_key, HostValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPath {
    /// Empty string, an identifier, or identifiers joined by `.`
    Single(String),
    /// Evaluates to an array key with one element per path
    Sequence(Vec<String>),
}

impl KeyPath {
    pub fn is_valid(&self) -> bool {
        match self {
            KeyPath::Single(path) => is_valid_path_string(path),
            KeyPath::Sequence(paths) => {
                !paths.is_empty() && paths.iter().all(|p| is_valid_path_string(p))
            }
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    pub fn is_empty_string(&self) -> bool {
        matches!(self, KeyPath::Single(path) if path.is_empty())
    }

    /// Evaluate the path on a value. `None` is failure: a property along the way was
    /// missing or undefined.
    pub fn evaluate<V: HostValue>(&self, value: &V) -> Option<V> {
        match self {
            KeyPath::Sequence(paths) => {
                let items = paths
                    .iter()
                    .map(|path| evaluate_path_string(path, value))
                    .collect::<Option<Vec<V>>>()?;
                Some(V::from_array(items))
            }
            KeyPath::Single(path) => evaluate_path_string(path, value),
        }
    }

    /// Extract a key from a value. `Ok(None)` when the path does not resolve,
    /// `Err` when it resolves to something that is not a valid key.
    pub fn extract_key<V: HostValue>(
        &self,
        value: &V,
        multi_entry: bool,
    ) -> std::result::Result<Option<Key>, KeyConversionError> {
        let Some(resolved) = self.evaluate(value) else {
            return Ok(None);
        };
        let key = if multi_entry {
            to_multi_entry_key(&resolved)?
        } else {
            resolved.to_key()?
        };
        Ok(Some(key))
    }

    /// Whether a generated key could be injected into `value` at this path
    pub fn can_inject<V: HostValue>(&self, value: &V) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        let mut identifiers: Vec<&str> = path.split('.').collect();
        identifiers.pop();

        let mut current = value.clone();
        for identifier in identifiers {
            if !current.is_object() {
                return false;
            }
            match current.property(identifier) {
                Some(next) => current = next,
                None => return true,
            }
        }
        current.is_object()
    }

    /// Inject `key` into `value` at this path, creating intermediate objects
    pub fn inject<V: HostValue>(&self, value: &mut V, key: &Key) -> Result<()> {
        let KeyPath::Single(path) = self else {
            return Err(Error::Data("cannot inject a key through a sequence key path"));
        };
        let mut identifiers: Vec<&str> = path.split('.').collect();
        let last = identifiers
            .pop()
            .ok_or(Error::Data("cannot inject a key through an empty key path"))?;

        let mut current = value;
        for identifier in identifiers {
            if current.property(identifier).is_none() {
                if !current.set_property(identifier, V::new_object()) {
                    return Err(Error::Data("key path crosses a non-object value"));
                }
            }
            current = current
                .property_mut(identifier)
                .ok_or(Error::Data("key path crosses a non-object value"))?;
        }

        if !current.set_property(last, V::from_key(key)) {
            return Err(Error::Data("key could not be injected into value"));
        }
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_owned())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_owned).collect())
    }
}

fn evaluate_path_string<V: HostValue>(path: &str, value: &V) -> Option<V> {
    if path.is_empty() {
        return Some(value.clone());
    }
    path.split('.')
        .try_fold(value.clone(), |current, identifier| current.property(identifier))
}

fn is_valid_path_string(path: &str) -> bool {
    path.is_empty() || path.split('.').all(is_identifier)
}

// IdentifierName, with Unicode ID_Start/ID_Continue approximated by the alphabetic
// and alphanumeric classes.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '\u{200c}' || c == '\u{200d}')
}
