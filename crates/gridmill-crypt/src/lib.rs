//! gridmill-crypt: fixed-layout RSA keys, hex envelopes, and code signing
//!
//! This crate is the trust anchor of the grid: every workunit, executable,
//! and input file distributed to volunteer hosts carries a signature made
//! and checked here.
//!
//! - [`key`]: compact fixed-size key records and their hex text format
//! - [`codec`]: the hex-with-dot-terminator envelope used for signatures
//! - [`sign`]: digest-then-RSA sign/verify over files, strings, and blocks
//! - [`bridge`]: lossless conversion to/from the `rsa` crate's native keys
//!
//! Everything here is stateless and safe to call concurrently from any
//! number of scheduler processes.

pub mod bridge;
pub mod codec;
pub mod error;
pub mod key;
pub mod sign;

pub use error::{CryptError, Result};
pub use key::{
    FixedKey, FixedPrivateKey, FixedPublicKey, MAX_RSA_MODULUS_BITS, MAX_RSA_MODULUS_LEN,
    MAX_RSA_PRIME_LEN,
};
pub use sign::MAX_SIGNATURE_LEN;
