use crate::constants::{KEY_GENERATOR_START, MAX_GENERATED_KEY};
use crate::error::{Error, Result};
use crate::key::Key;

/// Monotonic source of auto-increment keys for one object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    current_number: u64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        KeyGenerator {
            current_number: KEY_GENERATOR_START,
        }
    }

    pub fn current_number(&self) -> u64 {
        self.current_number
    }

    /// Hand out the current number and advance. Fails once 2^53 has been passed.
    pub fn generate(&mut self) -> Result<u64> {
        let key = self.current_number;
        if key > MAX_GENERATED_KEY {
            return Err(Error::Constraint("key generator exhausted"));
        }
        self.current_number += 1;
        Ok(key)
    }

    /// Move past an explicitly supplied numeric key
    pub fn possibly_update(&mut self, key: &Key) {
        let Some(value) = key.as_number() else {
            return;
        };
        let value = value.min(MAX_GENERATED_KEY as f64).floor();
        if value >= self.current_number as f64 {
            self.current_number = value as u64 + 1;
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_and_increments() {
        let mut generator = KeyGenerator::new();
        assert_eq!(generator.generate().unwrap(), 1);
        assert_eq!(generator.generate().unwrap(), 2);
        assert_eq!(generator.current_number(), 3);
    }

    #[test]
    fn explicit_keys_push_the_generator_forward() {
        let mut generator = KeyGenerator::new();
        generator.possibly_update(&Key::Number(10.5));
        assert_eq!(generator.generate().unwrap(), 11);

        generator.possibly_update(&Key::Number(3.0));
        generator.possibly_update(&Key::string("99"));
        generator.possibly_update(&Key::Number(-4.0));
        assert_eq!(generator.generate().unwrap(), 12);
    }

    #[test]
    fn overflow_is_a_constraint_error() {
        let mut generator = KeyGenerator::new();
        generator.possibly_update(&Key::Number(1e300));
        assert_eq!(generator.current_number(), MAX_GENERATED_KEY + 1);
        assert_eq!(generator.generate().unwrap_err().name(), "ConstraintError");
    }
}
