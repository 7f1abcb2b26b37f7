use thiserror::Error;

/// A blob could not be turned back into a dataset.
///
/// A wrong passphrase and a corrupted blob both surface as `Undecryptable`;
/// the two cases cannot be told apart.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("blob is not in the expected format: {0}")]
    Malformed(String),
    #[error("no key derivation could decrypt the blob (wrong passphrase or corrupt data)")]
    Undecryptable,
    #[error("decrypted payload is not a valid dataset: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("argon2: {0}")]
    Argon2(argon2::Error),
    #[error("hkdf: {0}")]
    Hkdf(hkdf::InvalidLength),
    #[error("encrypt: {0}")]
    Encrypt(chacha20poly1305::aead::Error),
    #[error("decrypt: {0}")]
    Decrypt(chacha20poly1305::aead::Error),
    #[error("nonce must be {expected} bytes, got {found}")]
    NonceLength { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("serialize dataset: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("compress dataset: {0}")]
    Compress(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeRejected {
    #[error("unsupported schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object name: {0:?}")]
    InvalidName(String),
    #[error("creation of new object refused: {0}")]
    Forbidden(String),
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry id must not be empty")]
    EmptyId,
    #[error("entry password must not be empty")]
    EmptyPassword,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Merge(#[from] MergeRejected),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Entry(#[from] EntryError),
}

pub type Result<T> = std::result::Result<T, Error>;
