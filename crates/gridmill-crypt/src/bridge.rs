//! Key format bridge
//!
//! Lossless two-way conversion between the fixed-layout key records and the
//! `rsa` crate's native key objects. Big-number fields are decoded big-endian
//! and re-encoded right-justified into their fixed-width fields; a value too
//! wide for its field is an internal invariant violation, never a silent
//! truncation. The CRT fields (prime exponents and coefficient) are
//! recomputed from (d, p, q) on export, so imported keys need not carry them.

use num_bigint_dig::ModInverse;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

use crate::error::{CryptError, Result};
use crate::key::{FixedPrivateKey, FixedPublicKey, MAX_RSA_MODULUS_BITS};

/// Decode a big-endian byte field into a big number.
///
/// Leading zero bytes (the fixed-field padding) are harmless.
pub fn decode_be(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Encode a big number big-endian into `dst`, right-justified with zero
/// padding on the left.
pub fn encode_fixed_width_be(n: &BigUint, dst: &mut [u8]) -> Result<()> {
    let bytes = n.to_bytes_be();
    if bytes.len() > dst.len() {
        return Err(CryptError::Crypto(format!(
            "big number of {} bytes exceeds fixed field width {}",
            bytes.len(),
            dst.len()
        )));
    }
    let pad = dst.len() - bytes.len();
    dst[..pad].fill(0);
    dst[pad..].copy_from_slice(&bytes);
    Ok(())
}

/// Convert a fixed-layout public key to the native representation.
pub fn public_to_native(key: &FixedPublicKey) -> Result<RsaPublicKey> {
    RsaPublicKey::new(decode_be(&key.modulus), decode_be(&key.exponent)).map_err(Into::into)
}

/// Convert a native public key to the fixed layout.
pub fn public_from_native(key: &RsaPublicKey, bits: u16) -> Result<FixedPublicKey> {
    let mut out = FixedPublicKey {
        bits,
        ..Default::default()
    };
    encode_fixed_width_be(key.n(), &mut out.modulus)?;
    encode_fixed_width_be(key.e(), &mut out.exponent)?;
    Ok(out)
}

/// Convert a fixed-layout private key to the native representation.
pub fn private_to_native(key: &FixedPrivateKey) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_components(
        decode_be(&key.modulus),
        decode_be(&key.public_exponent),
        decode_be(&key.exponent),
        vec![decode_be(&key.prime[0]), decode_be(&key.prime[1])],
    )
    .map_err(Into::into)
}

/// Convert a native private key to the fixed layout.
///
/// The native key must carry exactly two primes. CRT fields are derived
/// here: dp = d mod (p-1), dq = d mod (q-1), coefficient = q^-1 mod p.
pub fn private_from_native(key: &RsaPrivateKey, bits: u16) -> Result<FixedPrivateKey> {
    let primes = key.primes();
    if primes.len() != 2 {
        return Err(CryptError::Crypto(format!(
            "expected 2 prime factors, key has {}",
            primes.len()
        )));
    }
    let (p, q) = (&primes[0], &primes[1]);
    let one = BigUint::from(1u32);
    let dp = key.d() % &(p - &one);
    let dq = key.d() % &(q - &one);
    let coefficient = q
        .mod_inverse(p)
        .and_then(|i| i.to_biguint())
        .ok_or_else(|| CryptError::Crypto("prime factors are not coprime".into()))?;

    let mut out = FixedPrivateKey {
        bits,
        ..Default::default()
    };
    encode_fixed_width_be(key.n(), &mut out.modulus)?;
    encode_fixed_width_be(key.e(), &mut out.public_exponent)?;
    encode_fixed_width_be(key.d(), &mut out.exponent)?;
    encode_fixed_width_be(p, &mut out.prime[0])?;
    encode_fixed_width_be(q, &mut out.prime[1])?;
    encode_fixed_width_be(&dp, &mut out.prime_exponent[0])?;
    encode_fixed_width_be(&dq, &mut out.prime_exponent[1])?;
    encode_fixed_width_be(&coefficient, &mut out.coefficient)?;
    Ok(out)
}

/// Generate a fresh keypair in the fixed layout.
pub fn generate_keypair(bits: usize) -> Result<(FixedPrivateKey, FixedPublicKey)> {
    if bits > MAX_RSA_MODULUS_BITS {
        return Err(CryptError::Crypto(format!(
            "key size {} exceeds maximum {}",
            bits, MAX_RSA_MODULUS_BITS
        )));
    }
    let mut rng = rand::thread_rng();
    let native = RsaPrivateKey::new(&mut rng, bits)?;
    let private = private_from_native(&native, bits as u16)?;
    let public = public_from_native(&native.to_public_key(), bits as u16)?;
    Ok((private, public))
}
