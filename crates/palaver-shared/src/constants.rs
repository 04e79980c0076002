/// PBKDF2 salt size in bytes
pub const SALT_SIZE: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count (password hashing and key derivation)
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Password digest size in bytes
pub const DIGEST_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Maximum frame payload size in bytes (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Read chunk size used by the framing layer
pub const READ_CHUNK_SIZE: usize = 1024;

/// Default message retrieval limit
pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;

/// Default server listen port
pub const DEFAULT_PORT: u16 = 5000;

/// Number of words in a secret recovery phrase
pub const PHRASE_WORD_COUNT: usize = 4;
