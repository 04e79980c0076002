use thiserror::Error;

/// Errors produced by the credential engine.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// The supplied key is not a valid base64-encoded 32-byte key.
    #[error("Invalid encryption key")]
    InvalidKey,

    /// The token is not valid base64 or is too short to contain a nonce.
    #[error("Malformed token")]
    Malformed,

    /// AEAD authentication failed: wrong key or modified ciphertext.
    #[error("Decryption failed: token was tampered with or key is wrong")]
    Tampered,

    /// Encryption itself failed.
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Decrypted bytes were not valid UTF-8.
    #[error("Decrypted content is not valid UTF-8")]
    Utf8,
}
