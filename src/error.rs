use std::result;

use thiserror::Error as ThisError;

/// Custom result type for engine operations
pub type Result<T> = result::Result<T, Error>;

/// Engine error kinds
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Operation on a finished or non-upgrade transaction, or on a deleted store/index
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// Store access while the transaction is not active
    #[error("transaction is not active")]
    TransactionInactive,
    /// Write attempted in a read-only transaction
    #[error("transaction is read-only")]
    ReadOnly,
    /// Key conversion failure, invalid key, or a key that does not fit the store
    #[error("data error: {0}")]
    Data(&'static str),
    /// Duplicate unique key, duplicate name, or key generator overflow
    #[error("constraint error: {0}")]
    Constraint(&'static str),
    /// Malformed key path
    #[error("syntax error: {0}")]
    Syntax(&'static str),
    /// Requested version below the current one
    #[error("version error: {0}")]
    Version(&'static str),
    /// Connection forcibly closed, upgrade or transaction aborted
    #[error("abort error: {0}")]
    Abort(&'static str),
    /// Underlying database creation or deletion failed
    #[error("operation error: {0}")]
    Operation(&'static str),
    /// Named object store or index does not exist
    #[error("not found: {0}")]
    NotFound(&'static str),
    /// Parameters are incompatible with each other
    #[error("invalid access: {0}")]
    InvalidAccess(&'static str),
    /// The host could not clone a value for storage
    #[error("data clone error: {0}")]
    DataClone(&'static str),
}

impl Error {
    /// DOM-style name of the error kind, as carried in "error" notifications
    pub fn name(&self) -> &'static str {
        match self {
            Error::InvalidState(_) => "InvalidStateError",
            Error::TransactionInactive => "TransactionInactiveError",
            Error::ReadOnly => "ReadOnlyError",
            Error::Data(_) => "DataError",
            Error::Constraint(_) => "ConstraintError",
            Error::Syntax(_) => "SyntaxError",
            Error::Version(_) => "VersionError",
            Error::Abort(_) => "AbortError",
            Error::Operation(_) => "OperationError",
            Error::NotFound(_) => "NotFoundError",
            Error::InvalidAccess(_) => "InvalidAccessError",
            Error::DataClone(_) => "DataCloneError",
        }
    }
}

/// Reasons a host value cannot become a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum KeyConversionError {
    /// Number or date whose value is NaN
    #[error("NaN is not a valid key")]
    NaN,
    /// Value type has no key representation
    #[error("value type cannot be used as a key")]
    InvalidType,
    /// Array that contains itself
    #[error("array key contains itself")]
    Cyclic,
    /// Sparse array with a missing element
    #[error("array key has a missing element")]
    Hole,
}

impl From<KeyConversionError> for Error {
    fn from(err: KeyConversionError) -> Error {
        match err {
            KeyConversionError::NaN => Error::Data("NaN key"),
            KeyConversionError::InvalidType => Error::Data("value cannot be converted to a key"),
            KeyConversionError::Cyclic => Error::Data("cyclic array key"),
            KeyConversionError::Hole => Error::Data("array key has a missing element"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_errors_become_data_errors() {
        let err: Error = KeyConversionError::NaN.into();
        assert_eq!(err.name(), "DataError");
        assert_eq!(err.to_string(), "data error: NaN key");
    }

    #[test]
    fn names_follow_dom_conventions() {
        assert_eq!(Error::TransactionInactive.name(), "TransactionInactiveError");
        assert_eq!(Error::Constraint("dup").name(), "ConstraintError");
        assert_eq!(Error::Abort("closed").name(), "AbortError");
    }
}
