//! Error types for gridmill-crypt

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed key text: {0}")]
    KeyParse(String),

    #[error("Malformed hex data: {0}")]
    Format(String),

    #[error("Decoded payload of {len} bytes exceeds capacity of {max}")]
    Overflow { len: usize, max: usize },

    #[error("RSA operation failed: {0}")]
    Crypto(String),
}

impl From<rsa::Error> for CryptError {
    fn from(e: rsa::Error) -> Self {
        CryptError::Crypto(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CryptError>;
