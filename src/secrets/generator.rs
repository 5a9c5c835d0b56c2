//! Random key material from the operating system CSPRNG.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Secure random source failures.
#[derive(Debug, Error)]
pub enum EntropyError {
    #[error("Requested key length must be positive")]
    ZeroLength,

    #[error("Secure random source unavailable: {0}")]
    Unavailable(#[from] rand::Error),
}

/// Source of raw key bytes.
pub trait KeyGenerator {
    /// Produce exactly `length` random bytes.
    fn generate(&self, length: usize) -> Result<Vec<u8>, EntropyError>;
}

/// Key generator backed by the OS random device.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyGenerator;

impl OsKeyGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for OsKeyGenerator {
    fn generate(&self, length: usize) -> Result<Vec<u8>, EntropyError> {
        if length == 0 {
            return Err(EntropyError::ZeroLength);
        }
        let mut key = vec![0u8; length];
        OsRng.try_fill_bytes(&mut key)?;
        Ok(key)
    }
}
