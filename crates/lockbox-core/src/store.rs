//! File-backed named-object store.
//!
//! Objects live as regular files directly under a single root directory.
//! Names are opaque to the store; they are resolved lexically against the
//! root and anything that does not land on a direct child is refused before
//! the filesystem is touched.
//!
//! Replacement goes through a staging file and an atomic rename, so the
//! target name always refers to either the old or the new content. When
//! backups are enabled the old content is kept under
//! `<name>.<mtime millis>-<sequence>`.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const STAGING_DIR: &str = ".staging";
const STAGING_SUFFIX: &str = ".staging";
const BACKUP_STAMP_DIGITS: usize = 13;

/// Disambiguates backups taken within the same millisecond.
static BACKUP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreOptions {
    /// Keep replaced and deleted objects as backup siblings.
    pub backup_files: bool,
    /// Refuse to create an object unless it replaces a named predecessor.
    pub block_new: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            backup_files: true,
            block_new: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    staging_root: PathBuf,
    options: StoreOptions,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;
        let root = fs::canonicalize(root).await?;
        let staging_root = root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root).await?;
        restrict_dir_permissions(&root).await;
        cleanup_staging_dir(&staging_root).await;
        Ok(Self {
            root,
            staging_root,
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Resolve `raw` to a path that is a direct child of the root.
    pub fn map_name(&self, raw: &str) -> Result<PathBuf> {
        let invalid = || StorageError::InvalidName(raw.to_string());
        if raw.is_empty() || raw.contains('\0') {
            return Err(invalid());
        }
        let mut resolved = self.root.clone();
        for component in Path::new(raw).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(invalid());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(invalid()),
            }
        }
        if resolved.parent() != Some(self.root.as_path()) {
            return Err(invalid());
        }
        match resolved.file_name() {
            Some(file) if file != STAGING_DIR => Ok(resolved),
            _ => Err(invalid()),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.map_name(name)?;
        Ok(is_file(&path).await?)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.map_name(name)?;
        info!(path = %path.display(), "reading object");
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(name.into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `content` under `name`. Dispatches to [`FileStore::update`] when
    /// the object exists and to [`FileStore::create`] otherwise.
    pub async fn write(&self, name: &str, content: &[u8], previous_name: Option<&str>) -> Result<()> {
        let target = self.map_name(name)?;
        if is_file(&target).await? {
            self.update(name, content, previous_name).await
        } else {
            self.create(name, content, previous_name).await
        }
    }

    /// Create a new object. With `block_new` set, creation is only allowed
    /// when `previous_name` is given and exists; the new object then takes
    /// over from it (e.g. after a passphrase change renamed the object).
    pub async fn create(&self, name: &str, content: &[u8], previous_name: Option<&str>) -> Result<()> {
        let target = self.map_name(name)?;
        let previous = previous_name.map(|p| self.map_name(p)).transpose()?;
        if self.options.block_new {
            let predecessor_exists = match &previous {
                Some(path) => is_file(path).await?,
                None => false,
            };
            if !predecessor_exists {
                warn!(name, "refusing to create new object without an existing predecessor");
                return Err(StorageError::Forbidden(name.to_string()));
            }
        }
        self.commit(&target, content, previous.as_deref()).await
    }

    /// Replace an existing object.
    pub async fn update(&self, name: &str, content: &[u8], previous_name: Option<&str>) -> Result<()> {
        let target = self.map_name(name)?;
        let previous = previous_name.map(|p| self.map_name(p)).transpose()?;
        if !is_file(&target).await? {
            return Err(StorageError::NotFound(name.to_string()));
        }
        self.commit(&target, content, previous.as_deref()).await
    }

    /// Move an object out of the live set: renamed to a backup name when
    /// backups are enabled, removed otherwise. Returns the backup name, if
    /// one was made. Absent objects are left alone.
    pub async fn backup(&self, name: &str) -> Result<Option<String>> {
        let path = self.map_name(name)?;
        self.backup_path(&path).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.map_name(name)?;
        if !is_file(&path).await? {
            return Err(StorageError::NotFound(name.to_string()));
        }
        info!(path = %path.display(), "deleting object");
        self.backup_path(&path).await?;
        fsync_dir(&self.root).await
    }

    /// Names of the stored objects in ascending order. Backup siblings are
    /// included only when asked for.
    pub async fn list(&self, include_backups: bool) -> Result<Vec<String>> {
        info!(root = %self.root.display(), "listing objects");
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if include_backups || !is_backup_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn commit(&self, target: &Path, content: &[u8], previous: Option<&Path>) -> Result<()> {
        info!(path = %target.display(), "writing object");
        let staged = self.stage(content).await?;
        if self.options.backup_files {
            if let Err(e) = self.preserve(target).await {
                discard(&staged).await;
                return Err(e);
            }
        }
        if let Err(e) = fs::rename(&staged, target).await {
            discard(&staged).await;
            return Err(e.into());
        }
        // The predecessor is only retired once its successor is in place.
        if let Some(previous) = previous.filter(|p| *p != target) {
            self.backup_path(previous).await?;
        }
        fsync_dir(&self.root).await
    }

    async fn stage(&self, content: &[u8]) -> Result<PathBuf> {
        let staging_path = self
            .staging_root
            .join(format!("{}{}", Uuid::new_v4(), STAGING_SUFFIX));
        let written = async {
            let mut file = fs::File::create(&staging_path).await?;
            file.write_all(content).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            discard(&staging_path).await;
            return Err(e.into());
        }
        fsync_dir(&self.staging_root).await?;
        Ok(staging_path)
    }

    /// Link the current content to a fresh backup name without removing the
    /// live object, so the following rename replaces it atomically.
    async fn preserve(&self, path: &Path) -> Result<()> {
        if !is_file(path).await? {
            return Ok(());
        }
        let backup = self.next_backup_path(path).await?;
        if let Err(e) = fs::hard_link(path, &backup).await {
            debug!("hard link failed ({e}); copying backup instead");
            fs::copy(path, &backup).await?;
        }
        debug!(backup = %backup.display(), "preserved previous version");
        Ok(())
    }

    async fn backup_path(&self, path: &Path) -> Result<Option<String>> {
        if !is_file(path).await? {
            return Ok(None);
        }
        if !self.options.backup_files {
            fs::remove_file(path).await?;
            return Ok(None);
        }
        let backup = self.next_backup_path(path).await?;
        fs::rename(path, &backup).await?;
        debug!(backup = %backup.display(), "moved object to backup");
        Ok(backup.file_name().and_then(|n| n.to_str()).map(str::to_owned))
    }

    async fn next_backup_path(&self, path: &Path) -> Result<PathBuf> {
        let modified = fs::metadata(path).await?.modified()?;
        let stamp = DateTime::<Utc>::from(modified).timestamp_millis();
        let sequence = BACKUP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidName(path.display().to_string()))?;
        let backup = path.with_file_name(format!("{name}.{stamp}-{sequence}"));
        if is_file(&backup).await? {
            fs::remove_file(&backup).await?;
        }
        Ok(backup)
    }
}

/// True for names ending in `.<13 digit millis>-<sequence>`.
pub fn is_backup_name(name: &str) -> bool {
    let Some((_, suffix)) = name.rsplit_once('.') else {
        return false;
    };
    let Some((stamp, sequence)) = suffix.split_once('-') else {
        return false;
    };
    stamp.len() == BACKUP_STAMP_DIGITS
        && stamp.bytes().all(|b| b.is_ascii_digit())
        && !sequence.is_empty()
        && sequence.bytes().all(|b| b.is_ascii_digit())
}

async fn is_file(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), "cannot remove staging file: {e}");
        }
    }
}

async fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Remove any leftover staging files from a previous crash.
async fn cleanup_staging_dir(staging_root: &Path) {
    let Ok(mut entries) = fs::read_dir(staging_root).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(STAGING_SUFFIX) {
            warn!(path = %entry.path().display(), "removing orphaned staging file");
            let _ = fs::remove_file(entry.path()).await;
        }
    }
}

async fn fsync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = fs::File::open(path).await?;
        dir.sync_all().await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
