use anyhow::Context;
use lockbox_core::StoreOptions;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "service.json";
pub const DEFAULT_MAX_PAYLOAD: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Store root. Relative paths resolve against the working directory.
    pub data_dir: PathBuf,
    /// Keep replaced and deleted objects as timestamped siblings.
    pub backup_files: bool,
    /// Only allow creation of objects that take over from an existing one.
    pub block_new: bool,
    /// Honour `backups=true` on listing requests.
    pub allow_list_backups: bool,
    pub max_payload_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8443)),
            data_dir: PathBuf::from("storage"),
            backup_files: true,
            block_new: false,
            allow_list_backups: false,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ServiceConfig {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("writing config {}", path.display()))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            backup_files: self.backup_files,
            block_new: self.block_new,
        }
    }
}
