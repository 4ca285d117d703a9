use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::IntoKey;

/// Interval over keys. Absent bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// Range containing every key
    pub fn unbounded() -> Self {
        KeyRange::default()
    }

    /// Range containing only `key`
    pub fn only(key: impl IntoKey) -> Result<Self> {
        let key = key.into_key()?;
        Ok(KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        })
    }

    pub fn lower_bound(lower: impl IntoKey, open: bool) -> Result<Self> {
        Ok(KeyRange {
            lower: Some(lower.into_key()?),
            upper: None,
            lower_open: open,
            upper_open: true,
        })
    }

    pub fn upper_bound(upper: impl IntoKey, open: bool) -> Result<Self> {
        Ok(KeyRange {
            lower: None,
            upper: Some(upper.into_key()?),
            lower_open: true,
            upper_open: open,
        })
    }

    /// Range between two keys. Fails with a data error if `lower > upper`.
    pub fn bound(
        lower: impl IntoKey,
        upper: impl IntoKey,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let lower = lower.into_key()?;
        let upper = upper.into_key()?;
        if lower > upper {
            return Err(Error::Data("lower bound is greater than upper bound"));
        }
        Ok(KeyRange {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Whether the range holds exactly one key
    pub fn is_single_key(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper)) => lower == upper && !self.lower_open && !self.upper_open,
            _ => false,
        }
    }

    /// Whether `key` lies above the lower bound
    pub fn above_lower(&self, key: &Key) -> bool {
        match &self.lower {
            None => true,
            Some(lower) => match lower.cmp(key) {
                Ordering::Less => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Greater => false,
            },
        }
    }

    /// Whether `key` lies below the upper bound
    pub fn below_upper(&self, key: &Key) -> bool {
        match &self.upper {
            None => true,
            Some(upper) => match upper.cmp(key) {
                Ordering::Greater => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Less => false,
            },
        }
    }

    pub fn includes(&self, key: &Key) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_half_open_membership() {
        let range = KeyRange::bound(2, 8, false, true).unwrap();
        for k in [2, 5] {
            assert!(range.includes(&Key::from(k)), "{} should be included", k);
        }
        for k in [1, 8, 9] {
            assert!(!range.includes(&Key::from(k)), "{} should be excluded", k);
        }
    }

    #[test]
    fn inverted_bounds_are_a_data_error() {
        assert_eq!(
            KeyRange::bound(8, 2, false, false).unwrap_err().name(),
            "DataError"
        );
    }

    #[test]
    fn equal_open_bounds_are_empty() {
        let range = KeyRange::bound(3, 3, true, false).unwrap();
        assert!(!range.includes(&Key::from(3)));
        assert!(!range.is_single_key());
        assert!(KeyRange::only(3).unwrap().is_single_key());
    }

    #[test]
    fn half_ranges() {
        let lower = KeyRange::lower_bound("m", true).unwrap();
        assert!(!lower.includes(&Key::string("m")));
        assert!(lower.includes(&Key::string("z")));
        assert!(lower.includes(&Key::binary(vec![0])));

        let upper = KeyRange::upper_bound(10, false).unwrap();
        assert!(upper.includes(&Key::from(10)));
        assert!(!upper.includes(&Key::string("0")));
    }

    #[test]
    fn nan_bound_is_rejected() {
        assert!(KeyRange::only(f64::NAN).is_err());
    }
}
