use crate::error::CryptoError;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;

pub const KDF_PARAMS_LEN: usize = 12;
pub const MAX_KDF_MEMORY_KIB: u32 = 1 << 21; // 2GB
pub const MAX_KDF_TIME_COST: u32 = 64;
pub const MAX_KDF_PARALLELISM: u32 = 64;

const LEGACY_KDF_INFO: &[u8] = b"lockbox-blob-key-v0";

/// Argon2id cost parameters for the current key derivation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: KDF_MEMORY_COST,
            time_cost: KDF_TIME_COST,
            parallelism: KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Little-endian `memory_kib | time_cost | parallelism`, as stored in a
    /// blob header.
    pub fn to_bytes(&self) -> [u8; KDF_PARAMS_LEN] {
        let mut out = [0u8; KDF_PARAMS_LEN];
        out[..4].copy_from_slice(&self.memory_kib.to_le_bytes());
        out[4..8].copy_from_slice(&self.time_cost.to_le_bytes());
        out[8..].copy_from_slice(&self.parallelism.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; KDF_PARAMS_LEN]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Self {
            memory_kib: word(0),
            time_cost: word(4),
            parallelism: word(8),
        }
    }

    /// Upper bounds applied to parameters read from untrusted input.
    pub fn within_limits(&self) -> bool {
        (1..=MAX_KDF_MEMORY_KIB).contains(&self.memory_kib)
            && (1..=MAX_KDF_TIME_COST).contains(&self.time_cost)
            && (1..=MAX_KDF_PARALLELISM).contains(&self.parallelism)
    }
}

/// Key derivation functions a blob may have been written with, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    Argon2id(KdfParams),
    LegacyHkdf,
}

impl Kdf {
    pub fn derive(&self, secret: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match self {
            Kdf::Argon2id(params) => derive_key(secret, salt, params),
            Kdf::LegacyHkdf => derive_legacy_key(secret, salt),
        }
    }
}

pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let params = Params::new(
        params.memory_kib,
        params.time_cost,
        params.parallelism,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(CryptoError::Argon2)?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(secret, salt, &mut key)
        .map_err(CryptoError::Argon2)?;
    Ok(key)
}

/// Single-pass derivation used by blobs written before Argon2id was adopted.
pub fn derive_legacy_key(secret: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut key = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
    hk.expand(LEGACY_KDF_INFO, &mut key)
        .map_err(CryptoError::Hkdf)?;
    Ok(key)
}

pub fn encrypt(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(CryptoError::Encrypt)
}

pub fn decrypt(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::NonceLength {
            expected: NONCE_LEN,
            found: nonce.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(CryptoError::Decrypt)
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn sha512_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn kdfs_disagree_on_same_input() {
        let salt = generate_salt();
        let current = Kdf::Argon2id(cheap()).derive(b"secret", &salt).unwrap();
        let legacy = Kdf::LegacyHkdf.derive(b"secret", &salt).unwrap();
        assert_eq!(current.len(), DERIVED_KEY_LEN);
        assert_ne!(*current, *legacy);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = derive_legacy_key(b"pw", b"salt-salt-salt-1").unwrap();
        let nonce = generate_nonce();
        let ct = encrypt(&key, &nonce, b"payload").unwrap();
        assert_eq!(decrypt(&key, &nonce, &ct).unwrap().as_slice(), b"payload");
        let other = derive_legacy_key(b"pw2", b"salt-salt-salt-1").unwrap();
        assert!(matches!(
            decrypt(&other, &nonce, &ct),
            Err(CryptoError::Decrypt(_))
        ));
        assert!(matches!(
            decrypt(&key, &nonce[..12], &ct),
            Err(CryptoError::NonceLength { expected: 24, found: 12 })
        ));
    }

    #[test]
    fn params_survive_header_encoding() {
        let params = KdfParams {
            memory_kib: 19_456,
            time_cost: 2,
            parallelism: 1,
        };
        assert_eq!(KdfParams::from_bytes(&params.to_bytes()), params);
        assert!(params.within_limits());
        assert!(KdfParams::default().within_limits());
        let hostile = KdfParams {
            memory_kib: u32::MAX,
            ..params
        };
        assert!(!hostile.within_limits());
    }

    #[test]
    fn invalid_argon2_params_are_reported() {
        let params = KdfParams {
            memory_kib: 64,
            time_cost: 1,
            parallelism: 0,
        };
        assert!(matches!(
            derive_key(b"secret", &generate_salt(), &params),
            Err(CryptoError::Argon2(_))
        ));
    }

    #[test]
    fn sha512_hex_is_lowercase_128_chars() {
        let digest = sha512_hex(&[b"USER", b"pass", b"HOST"]);
        assert_eq!(digest.len(), 128);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(digest, sha512_hex(&[b"USERpassHOST"]));
    }
}
