//! Client settings, kept as plain JSON next to the local cache. Nothing in
//! here is secret.

use crate::crypto::KdfParams;
use crate::session::SessionContext;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Root URL of the lockbox service.
    pub remote_url: String,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub cache_locally: bool,
    /// Per-deployment text mixed into key material and object names.
    pub unique_text: String,
    /// Last username signed in with, offered as the default.
    pub username: Option<String>,
    pub kdf: KdfParams,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:8443".into(),
            cache_dir: None,
            cache_locally: true,
            unique_text: "lockbox".into(),
            username: None,
            kdf: KdfParams::default(),
            request_timeout_secs: 30,
        }
    }
}

impl ClientSettings {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("writing settings to {}", path.display()))?;
        Ok(())
    }

    pub fn cache_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::paths::cache_dir(),
        }
    }

    /// Session context for `username`, carrying this deployment's text and
    /// key derivation cost.
    pub fn session_context(&self, username: &str, passphrase: &str) -> SessionContext {
        SessionContext::new(username, passphrase, &self.unique_text)
            .with_cache(self.cache_locally)
            .with_kdf(self.kdf)
    }
}
