//! Fixed-layout RSA key records
//!
//! Keys are stored in compact fixed-size records whose field widths are
//! sized to the maximum supported modulus, independent of the declared bit
//! length. Every big-number field is big-endian and right-justified, so
//! unused leading bytes are zero. The on-disk text form is a decimal
//! bit-length line followed by the hex envelope of the data region (see
//! [`crate::codec`]); round-tripping through it is byte-for-byte exact.

use crate::codec::{decode_hex_exact, encode_hex_block};
use crate::error::{CryptError, Result};

/// Largest supported modulus, in bits.
pub const MAX_RSA_MODULUS_BITS: usize = 1024;
/// Largest supported modulus, in bytes.
pub const MAX_RSA_MODULUS_LEN: usize = MAX_RSA_MODULUS_BITS / 8;
/// Largest supported prime factor, in bytes.
pub const MAX_RSA_PRIME_LEN: usize = MAX_RSA_MODULUS_LEN / 2;

/// Fixed-layout RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPublicKey {
    /// Declared modulus bit length.
    pub bits: u16,
    pub modulus: [u8; MAX_RSA_MODULUS_LEN],
    pub exponent: [u8; MAX_RSA_MODULUS_LEN],
}

/// Fixed-layout RSA private key with the standard CRT fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPrivateKey {
    /// Declared modulus bit length.
    pub bits: u16,
    pub modulus: [u8; MAX_RSA_MODULUS_LEN],
    pub public_exponent: [u8; MAX_RSA_MODULUS_LEN],
    pub exponent: [u8; MAX_RSA_MODULUS_LEN],
    pub prime: [[u8; MAX_RSA_PRIME_LEN]; 2],
    pub prime_exponent: [[u8; MAX_RSA_PRIME_LEN]; 2],
    pub coefficient: [u8; MAX_RSA_PRIME_LEN],
}

/// A public or private key, tagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedKey {
    Public(FixedPublicKey),
    Private(FixedPrivateKey),
}

impl Default for FixedPublicKey {
    fn default() -> Self {
        Self {
            bits: 0,
            modulus: [0; MAX_RSA_MODULUS_LEN],
            exponent: [0; MAX_RSA_MODULUS_LEN],
        }
    }
}

impl Default for FixedPrivateKey {
    fn default() -> Self {
        Self {
            bits: 0,
            modulus: [0; MAX_RSA_MODULUS_LEN],
            public_exponent: [0; MAX_RSA_MODULUS_LEN],
            exponent: [0; MAX_RSA_MODULUS_LEN],
            prime: [[0; MAX_RSA_PRIME_LEN]; 2],
            prime_exponent: [[0; MAX_RSA_PRIME_LEN]; 2],
            coefficient: [0; MAX_RSA_PRIME_LEN],
        }
    }
}

impl FixedPublicKey {
    /// Data-region size: modulus + exponent.
    pub const DATA_LEN: usize = 2 * MAX_RSA_MODULUS_LEN;

    /// Serialize the data region (everything after `bits`), in field order.
    pub fn data_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::DATA_LEN);
        out.extend_from_slice(&self.modulus);
        out.extend_from_slice(&self.exponent);
        out
    }

    /// Encode as the bit-length-plus-hex key text format.
    pub fn encode_hex(&self) -> String {
        encode_key_text(self.bits, &self.data_bytes())
    }

    /// Parse from the key text format.
    pub fn decode_hex(text: &str) -> Result<Self> {
        let (bits, data) = decode_key_text(text, Self::DATA_LEN)?;
        let mut key = Self {
            bits,
            ..Self::default()
        };
        key.modulus.copy_from_slice(&data[..MAX_RSA_MODULUS_LEN]);
        key.exponent.copy_from_slice(&data[MAX_RSA_MODULUS_LEN..]);
        Ok(key)
    }

    /// Read a key file in the text format.
    pub fn read_file(path: &std::path::Path) -> Result<Self> {
        Self::decode_hex(&std::fs::read_to_string(path)?)
    }

    /// Write a key file in the text format.
    pub fn write_file(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.encode_hex())?;
        Ok(())
    }
}

impl FixedPrivateKey {
    /// Data-region size: three modulus-width fields plus five prime-width
    /// fields.
    pub const DATA_LEN: usize = 3 * MAX_RSA_MODULUS_LEN + 5 * MAX_RSA_PRIME_LEN;

    /// Serialize the data region (everything after `bits`), in field order.
    pub fn data_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::DATA_LEN);
        out.extend_from_slice(&self.modulus);
        out.extend_from_slice(&self.public_exponent);
        out.extend_from_slice(&self.exponent);
        out.extend_from_slice(&self.prime[0]);
        out.extend_from_slice(&self.prime[1]);
        out.extend_from_slice(&self.prime_exponent[0]);
        out.extend_from_slice(&self.prime_exponent[1]);
        out.extend_from_slice(&self.coefficient);
        out
    }

    /// Encode as the bit-length-plus-hex key text format.
    pub fn encode_hex(&self) -> String {
        encode_key_text(self.bits, &self.data_bytes())
    }

    /// Parse from the key text format.
    pub fn decode_hex(text: &str) -> Result<Self> {
        let (bits, data) = decode_key_text(text, Self::DATA_LEN)?;
        let mut key = Self {
            bits,
            ..Self::default()
        };
        let m = MAX_RSA_MODULUS_LEN;
        let p = MAX_RSA_PRIME_LEN;
        key.modulus.copy_from_slice(&data[..m]);
        key.public_exponent.copy_from_slice(&data[m..2 * m]);
        key.exponent.copy_from_slice(&data[2 * m..3 * m]);
        let mut off = 3 * m;
        for i in 0..2 {
            key.prime[i].copy_from_slice(&data[off..off + p]);
            off += p;
        }
        for i in 0..2 {
            key.prime_exponent[i].copy_from_slice(&data[off..off + p]);
            off += p;
        }
        key.coefficient.copy_from_slice(&data[off..off + p]);
        Ok(key)
    }

    /// Read a key file in the text format.
    pub fn read_file(path: &std::path::Path) -> Result<Self> {
        Self::decode_hex(&std::fs::read_to_string(path)?)
    }

    /// Write a key file in the text format.
    pub fn write_file(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.encode_hex())?;
        Ok(())
    }
}

impl FixedKey {
    /// Declared modulus bit length.
    pub fn bits(&self) -> u16 {
        match self {
            FixedKey::Public(k) => k.bits,
            FixedKey::Private(k) => k.bits,
        }
    }

    pub fn encode_hex(&self) -> String {
        match self {
            FixedKey::Public(k) => k.encode_hex(),
            FixedKey::Private(k) => k.encode_hex(),
        }
    }
}

/// Write the `bits` line followed by the hex envelope of the data region.
fn encode_key_text(bits: u16, data: &[u8]) -> String {
    let mut out = format!("{}\n", bits);
    out.push_str(&encode_hex_block(data));
    out
}

/// Parse the `bits` line, then exactly `data_len` bytes of hex.
fn decode_key_text(text: &str, data_len: usize) -> Result<(u16, Vec<u8>)> {
    let text = text.trim_start();
    let line_end = text
        .find('\n')
        .ok_or_else(|| CryptError::KeyParse("missing bit-length line".into()))?;
    let bits: u16 = text[..line_end]
        .trim()
        .parse()
        .map_err(|e| CryptError::KeyParse(format!("bad bit-length line: {e}")))?;
    let data = decode_hex_exact(&text[line_end + 1..], data_len)?;
    Ok((bits, data))
}
