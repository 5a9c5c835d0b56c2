//! Secret value wrapper with secure memory handling.
//!
//! Values are zeroized on drop and never rendered by `Debug`.

use std::fmt;
use zeroize::Zeroize;

/// An encoded, non-empty secret.
///
/// The empty string is the "absent" sentinel throughout the store, so a
/// `SecretValue` can only be built from a non-empty string.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wrap an encoded secret. Returns `None` for the empty string.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Borrow the encoded secret.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Number of encoded characters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

/// A named secret and, if present, its value.
#[derive(Debug, Clone)]
pub struct SecretEntry {
    pub name: String,
    pub value: Option<SecretValue>,
}

impl SecretEntry {
    pub fn present(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_not_a_secret() {
        assert!(SecretValue::new("").is_none());
        assert_eq!(SecretValue::new("abc").unwrap().expose(), "abc");
    }

    #[test]
    fn debug_never_shows_value() {
        let value = SecretValue::new("hunter2").unwrap();
        let rendered = format!("{:?}", value);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn entry_presence_follows_value() {
        let entry = SecretEntry {
            name: "SECRET_KEY".to_string(),
            value: None,
        };
        assert!(!entry.present());
    }
}
