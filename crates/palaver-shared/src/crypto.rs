//! Credential engine: PBKDF2 password hashing and authenticated message
//! encryption.
//!
//! Passwords are stored as `hex(salt) || hex(digest)` where the digest is
//! PBKDF2-HMAC-SHA256 over the password with a fresh 16-byte salt.
//! Message encryption uses XChaCha20-Poly1305; tokens are
//! `base64(nonce || ciphertext)`, or `base64(salt || nonce || ciphertext)`
//! for the password-derived variant so decryption can re-derive the key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::constants::{
    DIGEST_SIZE, NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE, SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// Generate a fresh random symmetric key, base64-encoded for transport.
pub fn generate_key() -> String {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    BASE64.encode(key)
}

fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

/// Hash a password for storage.
///
/// Returns `hex(salt) || hex(digest)` (32 hex chars of salt followed by
/// 64 hex chars of digest).
pub fn hash_password(password: &str) -> String {
    let salt = generate_salt();
    let digest =
        pbkdf2_hmac_array::<Sha256, DIGEST_SIZE>(password.as_bytes(), &salt, PBKDF2_ITERATIONS);

    let mut out = String::with_capacity((SALT_SIZE + DIGEST_SIZE) * 2);
    out.push_str(&hex::encode(salt));
    out.push_str(&hex::encode(digest));
    out
}

/// Verify a password against a stored hash.
///
/// A malformed stored hash verifies false rather than erroring.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    if stored_hash.len() != (SALT_SIZE + DIGEST_SIZE) * 2 {
        return false;
    }

    let (salt_hex, digest_hex) = stored_hash.split_at(SALT_SIZE * 2);
    let salt = match hex::decode(salt_hex) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let stored_digest = match hex::decode(digest_hex) {
        Ok(d) => d,
        Err(_) => return false,
    };

    let digest =
        pbkdf2_hmac_array::<Sha256, DIGEST_SIZE>(password.as_bytes(), &salt, PBKDF2_ITERATIONS);

    digest.ct_eq(stored_digest.as_slice()).into()
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 32-byte symmetric key from a password.
///
/// Uses the supplied salt, or generates a fresh one when `None`.
/// Returns the base64-encoded key and the salt that was used.
pub fn derive_key_from_password(password: &str, salt: Option<[u8; SALT_SIZE]>) -> (String, [u8; SALT_SIZE]) {
    let salt = salt.unwrap_or_else(generate_salt);
    let key = pbkdf2_hmac_array::<Sha256, SYMMETRIC_KEY_SIZE>(
        password.as_bytes(),
        &salt,
        PBKDF2_ITERATIONS,
    );
    (BASE64.encode(key), salt)
}

fn decode_key(key: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = BASE64.decode(key).map_err(|_| CryptoError::InvalidKey)?;
    if bytes.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKey);
    }
    let mut out = [0u8; SYMMETRIC_KEY_SIZE];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Message encryption
// ---------------------------------------------------------------------------

/// Encrypt a message with a base64-encoded 32-byte key.
///
/// Returns `base64(nonce || ciphertext)`.
pub fn encrypt_message(plaintext: &str, key: &str) -> Result<String, CryptoError> {
    let key = decode_key(key)?;
    let cipher = XChaCha20Poly1305::new(&key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    token.extend_from_slice(&nonce_bytes);
    token.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(token))
}

/// Decrypt a token produced by [`encrypt_message`].
///
/// Distinguishes a malformed token from an authentication failure (wrong
/// key or tampered ciphertext).
pub fn decrypt_message(token: &str, key: &str) -> Result<String, CryptoError> {
    let key = decode_key(key)?;
    let data = BASE64.decode(token).map_err(|_| CryptoError::Malformed)?;
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::Malformed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(&key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Tampered)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

/// Encrypt a message with a password-derived key.
///
/// The salt is embedded in the token (`base64(salt || nonce || ciphertext)`)
/// so that [`decrypt_with_password`] can re-derive the same key.
pub fn encrypt_with_password(plaintext: &str, password: &str) -> Result<String, CryptoError> {
    let (key, salt) = derive_key_from_password(password, None);
    let inner = encrypt_message(plaintext, &key)?;
    let inner_bytes = BASE64.decode(inner).map_err(|_| CryptoError::EncryptionFailed)?;

    let mut token = Vec::with_capacity(SALT_SIZE + inner_bytes.len());
    token.extend_from_slice(&salt);
    token.extend_from_slice(&inner_bytes);
    Ok(BASE64.encode(token))
}

/// Decrypt a token produced by [`encrypt_with_password`].
pub fn decrypt_with_password(token: &str, password: &str) -> Result<String, CryptoError> {
    let data = BASE64.decode(token).map_err(|_| CryptoError::Malformed)?;
    if data.len() < SALT_SIZE + NONCE_SIZE {
        return Err(CryptoError::Malformed);
    }

    let (salt_bytes, rest) = data.split_at(SALT_SIZE);
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(salt_bytes);

    let (key, _) = derive_key_from_password(password, Some(salt));
    decrypt_message(&BASE64.encode(rest), &key)
}
