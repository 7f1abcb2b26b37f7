//! Dataset <-> cipher blob conversion.
//!
//! Blob layout, before base64:
//!
//! ```text
//! "Salted__" | argon2 params (12) | salt (16) | nonce (24) | ciphertext
//! ```
//!
//! The params are `memory_kib | time_cost | parallelism`, little-endian u32s.
//! Blobs from before Argon2id have no params and derive their key with the
//! legacy KDF:
//!
//! ```text
//! "Salted__" | salt (16) | nonce (24) | ciphertext
//! ```
//!
//! The ciphertext is XChaCha20-Poly1305 over the zstd-compressed JSON
//! dataset. Nothing marks which layout a blob uses; decoding tries the
//! current one first and falls back to the legacy one.

use crate::crypto::{
    decrypt, encrypt, generate_nonce, generate_salt, Kdf, KdfParams, KDF_PARAMS_LEN, NONCE_LEN,
    SALT_LEN,
};
use crate::error::{DecodeError, EncodeError};
use crate::model::{Dataset, Entry, Timestamp};
use crate::session::SessionContext;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const BLOB_MAGIC: &[u8] = b"Salted__";
const LEGACY_HEADER_LEN: usize = 8 + SALT_LEN + NONCE_LEN;
const HEADER_LEN: usize = 8 + KDF_PARAMS_LEN + SALT_LEN + NONCE_LEN;
const ZSTD_LEVEL: i32 = 3;

/// Opaque, self-contained encrypted dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CipherBlob(String);

impl CipherBlob {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for CipherBlob {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for CipherBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entries are held as raw values so one malformed entry is dropped instead
/// of failing the whole dataset.
#[derive(Deserialize)]
struct RawDataset {
    schema: u32,
    timestamp: Timestamp,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

pub struct CredentialCodec;

impl CredentialCodec {
    /// Encrypt under the context's passphrase. The context's KDF params are
    /// recorded in the blob; decoding never needs them from the caller.
    pub fn encode(dataset: &Dataset, ctx: &SessionContext) -> Result<CipherBlob, EncodeError> {
        Self::encode_with(dataset, ctx, Kdf::Argon2id(ctx.kdf))
    }

    pub(crate) fn encode_with(
        dataset: &Dataset,
        ctx: &SessionContext,
        kdf: Kdf,
    ) -> Result<CipherBlob, EncodeError> {
        let json = serde_json::to_vec(dataset)?;
        let compressed = zstd::encode_all(&json[..], ZSTD_LEVEL)?;
        let salt = generate_salt();
        let nonce = generate_nonce();
        let key = kdf.derive(&ctx.key_material(), &salt)?;
        let ciphertext = encrypt(&key, &nonce, &compressed)?;

        let mut raw = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        raw.extend_from_slice(BLOB_MAGIC);
        if let Kdf::Argon2id(params) = kdf {
            raw.extend_from_slice(&params.to_bytes());
        }
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(CipherBlob(general_purpose::STANDARD.encode(raw)))
    }

    pub fn decode(blob: &str, ctx: &SessionContext) -> Result<Dataset, DecodeError> {
        let raw = general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| DecodeError::Malformed(format!("base64: {e}")))?;
        if raw.len() <= LEGACY_HEADER_LEN || &raw[..BLOB_MAGIC.len()] != BLOB_MAGIC {
            return Err(DecodeError::Malformed("missing blob header".into()));
        }
        let body = &raw[BLOB_MAGIC.len()..];

        let secret = ctx.key_material();
        for (kdf, rest) in candidates(body) {
            let (salt, rest) = rest.split_at(SALT_LEN);
            let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
            let key = match kdf.derive(&secret, salt) {
                Ok(key) => key,
                Err(e) => {
                    debug!(?kdf, "key derivation failed: {e}");
                    continue;
                }
            };
            match decrypt(&key, nonce, ciphertext) {
                Ok(compressed) => return parse_payload(&compressed),
                Err(e) => debug!(?kdf, "decryption attempt failed: {e}"),
            }
        }
        Err(DecodeError::Undecryptable)
    }
}

/// Ways to read `body` (the blob after its magic): the KDF to use and the
/// bytes starting at the salt.
fn candidates(body: &[u8]) -> Vec<(Kdf, &[u8])> {
    let mut out = Vec::with_capacity(2);
    if body.len() > HEADER_LEN - BLOB_MAGIC.len() {
        let (params, rest) = body.split_at(KDF_PARAMS_LEN);
        let mut header = [0u8; KDF_PARAMS_LEN];
        header.copy_from_slice(params);
        let params = KdfParams::from_bytes(&header);
        if params.within_limits() {
            out.push((Kdf::Argon2id(params), rest));
        } else {
            debug!(?params, "ignoring out-of-range kdf params");
        }
    }
    out.push((Kdf::LegacyHkdf, body));
    out
}

fn parse_payload(compressed: &[u8]) -> Result<Dataset, DecodeError> {
    let json = zstd::decode_all(compressed)
        .map_err(|e| DecodeError::Payload(format!("decompress: {e}")))?;
    let raw: RawDataset =
        serde_json::from_slice(&json).map_err(|e| DecodeError::Payload(format!("parse: {e}")))?;
    let total = raw.entries.len();
    let entries: Vec<Entry> = raw
        .entries
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Entry>(value).ok())
        .map(|mut entry| {
            entry.refresh_flags();
            entry
        })
        .collect();
    if entries.len() != total {
        debug!(dropped = total - entries.len(), "dropped incomplete entries");
    }
    Ok(Dataset::with_schema(raw.schema, raw.timestamp, entries))
}
