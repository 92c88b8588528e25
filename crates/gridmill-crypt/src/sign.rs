//! Signature engine
//!
//! Digest-then-raw-RSA scheme: content is hashed to a 32-char lowercase hex
//! digest string, and the *string bytes* are what gets private-key encrypted
//! (PKCS#1 v1.5 block type 1). Verification runs the public-key operation,
//! strips the padding by hand, and compares exactly the digest string's
//! length of leading bytes, the inherited comparison convention, preserved
//! deliberately.
//!
//! All operations are stateless and reentrant.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign};

use crate::bridge::{private_to_native, public_to_native};
use crate::codec::{decode_hex_block, encode_hex_block};
use crate::error::{CryptError, Result};
use crate::key::{FixedPrivateKey, FixedPublicKey, MAX_RSA_MODULUS_LEN};

/// Upper bound on signature length, from the largest supported modulus.
pub const MAX_SIGNATURE_LEN: usize = MAX_RSA_MODULUS_LEN;

/// Hex digest of an in-memory block.
pub fn md5_block(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Hex digest of a file, streamed.
pub fn md5_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Private-key encrypt (PKCS#1 v1.5 block type 1).
///
/// Output length equals the modulus byte length.
pub fn encrypt_private(key: &FixedPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let native = private_to_native(key)?;
    native
        .sign(Pkcs1v15Sign::new_unprefixed(), data)
        .map_err(Into::into)
}

/// Public-key decrypt of a private-key-encrypted block.
///
/// Runs the raw public operation, then checks the 00 01 FF.. 00 framing.
/// Any framing violation is a [`CryptError::Crypto`]: tampered input must
/// fail closed, never decode to garbage.
pub fn decrypt_public(key: &FixedPublicKey, block: &[u8]) -> Result<Vec<u8>> {
    let native = public_to_native(key)?;
    let k = native.size();
    if block.is_empty() || block.len() > k {
        return Err(CryptError::Format(format!(
            "encrypted block of {} bytes does not fit a {}-byte modulus",
            block.len(),
            k
        )));
    }
    let c = BigUint::from_bytes_be(block);
    if &c >= native.n() {
        return Err(CryptError::Crypto("ciphertext exceeds modulus".into()));
    }
    let m = rsa::hazmat::rsa_encrypt(&native, &c)?;
    let em = left_pad(&m.to_bytes_be(), k);
    unpad_type1(&em)
}

/// Sign an in-memory block: digest, then private-key encrypt the digest
/// string bytes.
pub fn sign_block(key: &FixedPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    encrypt_private(key, md5_block(data).as_bytes())
}

/// Sign a file's contents.
pub fn sign_file(key: &FixedPrivateKey, path: &Path) -> Result<Vec<u8>> {
    encrypt_private(key, md5_file(path)?.as_bytes())
}

/// Sign a string and return the hex envelope, ready for embedding in an
/// `<xml_signature>` element.
pub fn sign_string_to_hex(key: &FixedPrivateKey, text: &str) -> Result<String> {
    Ok(encode_hex_block(&sign_block(key, text.as_bytes())?))
}

/// Core comparison: decrypt and match the leading `digest.len()` bytes.
///
/// Tamper detection surfaces as `Ok(false)`; malformed inputs that never
/// reach the RSA operation are errors.
fn verify_digest(key: &FixedPublicKey, digest: &str, signature: &[u8]) -> Result<bool> {
    let clear = match decrypt_public(key, signature) {
        Ok(clear) => clear,
        // Padding-check failure is what a corrupted signature looks like.
        Err(CryptError::Crypto(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    let want = digest.as_bytes();
    Ok(clear.len() >= want.len() && &clear[..want.len()] == want)
}

/// Verify a signature over an in-memory block.
pub fn verify_block(key: &FixedPublicKey, data: &[u8], signature: &[u8]) -> Result<bool> {
    verify_digest(key, &md5_block(data), signature)
}

/// Verify a signature over a string.
pub fn verify_string(key: &FixedPublicKey, text: &str, signature: &[u8]) -> Result<bool> {
    verify_block(key, text.as_bytes(), signature)
}

/// Verify a signature over a file's contents.
pub fn verify_file(key: &FixedPublicKey, path: &Path, signature: &[u8]) -> Result<bool> {
    verify_digest(key, &md5_file(path)?, signature)
}

/// [`verify_string`] over hex-encoded key and signature text.
pub fn verify_string2(key_text: &str, text: &str, signature_hex: &str) -> Result<bool> {
    let key = FixedPublicKey::decode_hex(key_text)?;
    let signature = decode_hex_block(signature_hex, MAX_SIGNATURE_LEN)?;
    verify_string(&key, text, &signature)
}

/// [`verify_file`] over hex-encoded key and signature text.
pub fn verify_file2(key_text: &str, path: &Path, signature_hex: &str) -> Result<bool> {
    let key = FixedPublicKey::decode_hex(key_text)?;
    let signature = decode_hex_block(signature_hex, MAX_SIGNATURE_LEN)?;
    verify_file(&key, path, &signature)
}

/// Try every certificate in `cert_dir` (then `ca_dir`, if given) against a
/// file signature; return the path of the first key that validates.
///
/// Each candidate file holds one public key in the hex key format; files
/// that fail to parse are skipped.
pub fn verify_with_certificate_directory(
    content: &Path,
    signature: &[u8],
    cert_dir: &Path,
    ca_dir: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let digest = md5_file(content)?;
    for dir in std::iter::once(cert_dir).chain(ca_dir) {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for path in entries {
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(key) = FixedPublicKey::decode_hex(&text) else {
                continue;
            };
            if verify_digest(&key, &digest, signature)? {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

/// Left-pad a big-endian value to `len` bytes.
fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let start = len.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(len)..]);
    out
}

/// Strip EMSA-PKCS1-v1_5 block type 1 framing: 00 01 FF{8,} 00 payload.
fn unpad_type1(em: &[u8]) -> Result<Vec<u8>> {
    if em.len() < 11 || em[0] != 0x00 || em[1] != 0x01 {
        return Err(CryptError::Crypto("bad padding header".into()));
    }
    let mut i = 2;
    while i < em.len() && em[i] == 0xff {
        i += 1;
    }
    if i < 10 || i >= em.len() || em[i] != 0x00 {
        return Err(CryptError::Crypto("bad padding body".into()));
    }
    Ok(em[i + 1..].to_vec())
}
