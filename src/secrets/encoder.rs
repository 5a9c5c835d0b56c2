//! Text encodings for stored key material.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// How raw key bytes are rendered in the store.
///
/// `Base64` is the RFC 4648 standard alphabet with `=` padding and no line
/// wrapping. `Hex` is lowercase, two characters per byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    Base64,
    Hex,
}

impl KeyEncoding {
    /// Encode bytes. The empty sequence encodes to the empty string.
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            Self::Base64 => BASE64.encode(bytes),
            Self::Hex => hex::encode(bytes),
        }
    }

    pub fn decode(self, text: &str) -> Result<Vec<u8>, DecodeError> {
        match self {
            Self::Base64 => Ok(BASE64.decode(text)?),
            Self::Hex => Ok(hex::decode(text)?),
        }
    }
}

impl fmt::Display for KeyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64 => f.write_str("base64"),
            Self::Hex => f.write_str("hex"),
        }
    }
}
