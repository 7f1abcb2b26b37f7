//! Sign-in session tying the codec, the reconciler and the two stores
//! together.
//!
//! Local failures are logged and otherwise ignored; remote failures are
//! reported back as [`SyncEvent`]s. Neither ever discards the in-memory
//! dataset, which stays authoritative until the next successful contact.

use crate::codec::CredentialCodec;
use crate::error::{EntryError, StorageError};
use crate::model::{now_millis, Dataset, Entry};
use crate::reconcile::{MergeKind, SyncReconciler};
use crate::remote::BlobStore;
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Remote => f.write_str("remote"),
        }
    }
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    DecryptionFailed { origin: Origin },
    UnsupportedSchema { origin: Origin },
    /// The remote copy had changes; both replicas now hold the merge.
    Synchronized,
    RemoteReadFailed { has_local_data: bool, reason: String },
    RemoteWriteFailed { cached_locally: bool, reason: String },
    PassphraseChangeFailed,
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::DecryptionFailed { origin } => {
                write!(f, "Decryption failure for {origin} data. Wrong password?")
            }
            SyncEvent::UnsupportedSchema { origin } => {
                write!(f, "Unsupported schema or corrupt {origin} data.")
            }
            SyncEvent::Synchronized => {
                f.write_str("Remote data had changes; local and remote are now synchronized.")
            }
            SyncEvent::RemoteReadFailed {
                has_local_data,
                reason,
            } => {
                let implication = if *has_local_data {
                    "using local data"
                } else {
                    "no local data available"
                };
                write!(f, "Error reading from remote; {implication}. ({reason})")
            }
            SyncEvent::RemoteWriteFailed {
                cached_locally,
                reason,
            } => {
                let implication = if *cached_locally {
                    "Data was saved locally; remote will be updated when possible."
                } else {
                    "Not caching, so data may be lost when the session ends!"
                };
                write!(f, "Error saving to remote. {implication} ({reason})")
            }
            SyncEvent::PassphraseChangeFailed => {
                f.write_str("Master passphrase update failed; passphrase unchanged!")
            }
        }
    }
}

pub struct Session {
    ctx: SessionContext,
    dataset: Dataset,
    local: Option<Arc<dyn BlobStore>>,
    remote: Arc<dyn BlobStore>,
    reconciler: SyncReconciler,
}

impl Session {
    /// Start a session. When the context disables caching, any previously
    /// cached copy for this identity is removed.
    pub async fn open(
        ctx: SessionContext,
        local: Option<Arc<dyn BlobStore>>,
        remote: Arc<dyn BlobStore>,
    ) -> Self {
        let session = Self {
            ctx,
            dataset: Dataset::empty(),
            local,
            remote,
            reconciler: SyncReconciler,
        };
        if !session.ctx.cache_locally {
            session.remove_local().await;
        }
        session
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Import the cached copy, if there is one.
    pub async fn load_local(&mut self) -> Option<SyncEvent> {
        let local = self.local.clone()?;
        match local.get(&self.ctx.credential_name()).await {
            Ok(blob) => self.import(&blob, Origin::Local).await,
            Err(StorageError::NotFound(_)) => None,
            Err(e) => {
                warn!("cannot read local cache: {e}");
                None
            }
        }
    }

    /// Fetch the remote copy and reconcile it with what is loaded.
    pub async fn sync_remote(&mut self) -> Vec<SyncEvent> {
        info!("reading from remote");
        match self.remote.get(&self.ctx.credential_name()).await {
            Ok(blob) => self.import(&blob, Origin::Remote).await.into_iter().collect(),
            Err(e) => {
                warn!(name = %self.ctx.credential_name(), "remote read failed: {e}");
                vec![SyncEvent::RemoteReadFailed {
                    has_local_data: !self.dataset.is_empty(),
                    reason: e.to_string(),
                }]
            }
        }
    }

    /// Decode `blob` and merge it into the loaded dataset, persisting the
    /// result wherever the merge says it is needed.
    pub async fn import(&mut self, blob: &str, origin: Origin) -> Option<SyncEvent> {
        let incoming = match CredentialCodec::decode(blob, &self.ctx) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(%origin, "decode failed: {e}");
                return Some(SyncEvent::DecryptionFailed { origin });
            }
        };
        let outcome = match self.reconciler.merge(&self.dataset, &incoming) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%origin, "merge rejected: {e}");
                return Some(SyncEvent::UnsupportedSchema { origin });
            }
        };
        match outcome.kind {
            MergeKind::Identical => None,
            MergeKind::Adopted => {
                self.dataset = outcome.dataset;
                if origin == Origin::Remote {
                    self.save_local().await;
                }
                None
            }
            MergeKind::FastForwarded => {
                self.dataset = outcome.dataset;
                self.save_local().await;
                None
            }
            MergeKind::Merged => {
                self.dataset = outcome.dataset;
                let failure = self.commit(None).await;
                match (failure, origin) {
                    (Some(event), _) => Some(event),
                    (None, Origin::Remote) => Some(SyncEvent::Synchronized),
                    (None, Origin::Local) => None,
                }
            }
        }
    }

    /// Add or replace an entry. `replacing` names the entry being edited
    /// when the edit changed its id.
    pub async fn upsert_entry(
        &mut self,
        entry: Entry,
        replacing: Option<&str>,
    ) -> Option<SyncEvent> {
        self.dataset.upsert(entry, replacing);
        self.commit(None).await
    }

    pub async fn remove_entry(&mut self, id: &str) -> Option<SyncEvent> {
        if !self.dataset.remove(id) {
            return None;
        }
        self.commit(None).await
    }

    /// Build an entry stamped with the current time.
    pub fn new_entry(
        &self,
        id: &str,
        username: &str,
        password: &str,
        website: &str,
        notes: &str,
    ) -> Result<Entry, EntryError> {
        Entry::new(id, username, password, website, notes, now_millis())
    }

    /// Stamp the dataset and write it to both replicas. Returns the failure
    /// to report, if the remote write did not succeed.
    pub async fn commit(&mut self, previous_name: Option<&str>) -> Option<SyncEvent> {
        self.dataset.timestamp = now_millis();
        self.save_local().await;
        self.save_remote(previous_name).await
    }

    /// Re-encrypt everything under a new passphrase. The remote object is
    /// renamed through the store's predecessor mechanism; on failure the old
    /// passphrase and local cache are restored.
    pub async fn change_passphrase(&mut self, new_passphrase: &str) -> Option<SyncEvent> {
        let previous_ctx = self.ctx.clone();
        let previous_name = previous_ctx.credential_name();
        self.remove_local().await;
        self.ctx.set_passphrase(new_passphrase);
        match self.commit(Some(&previous_name)).await {
            None => {
                if let Err(e) = self.remote.delete(&previous_name).await {
                    if !e.is_not_found() {
                        warn!("cannot remove previous remote object: {e}");
                    }
                }
                None
            }
            Some(event) => {
                warn!("passphrase change failed: {event}");
                self.remove_local().await;
                self.ctx = previous_ctx;
                self.save_local().await;
                Some(SyncEvent::PassphraseChangeFailed)
            }
        }
    }

    async fn save_local(&self) {
        if !self.ctx.cache_locally {
            return;
        }
        let Some(local) = &self.local else {
            return;
        };
        let blob = match CredentialCodec::encode(&self.dataset, &self.ctx) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("cannot encode dataset for local cache: {e}");
                return;
            }
        };
        if let Err(e) = local.put(&self.ctx.credential_name(), blob.as_str(), None).await {
            warn!("cannot write local cache: {e}");
        }
    }

    async fn save_remote(&self, previous_name: Option<&str>) -> Option<SyncEvent> {
        info!("saving to remote");
        let failure = |reason: String| SyncEvent::RemoteWriteFailed {
            cached_locally: self.ctx.cache_locally && self.local.is_some(),
            reason,
        };
        let blob = match CredentialCodec::encode(&self.dataset, &self.ctx) {
            Ok(blob) => blob,
            Err(e) => return Some(failure(e.to_string())),
        };
        match self
            .remote
            .put(&self.ctx.credential_name(), blob.as_str(), previous_name)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!(name = %self.ctx.credential_name(), "remote write failed: {e}");
                Some(failure(e.to_string()))
            }
        }
    }

    async fn remove_local(&self) {
        let Some(local) = &self.local else {
            return;
        };
        match local.delete(&self.ctx.credential_name()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("cannot remove local cache: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::store::{FileStore, StoreOptions};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Offline;

    #[async_trait]
    impl BlobStore for Offline {
        async fn get(&self, _name: &str) -> Result<String, StorageError> {
            Err(StorageError::Io(std::io::Error::other("offline")))
        }

        async fn put(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("offline")))
        }

        async fn delete(&self, _name: &str) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("offline")))
        }
    }

    fn ctx(passphrase: &str) -> SessionContext {
        SessionContext::new("alice", passphrase, "sync.test").with_kdf(KdfParams {
            memory_kib: 64,
            time_cost: 1,
            parallelism: 1,
        })
    }

    async fn file_store(dir: &TempDir, sub: &str) -> Arc<FileStore> {
        Arc::new(
            FileStore::open(dir.path().join(sub), StoreOptions::default())
                .await
                .unwrap(),
        )
    }

    async fn open(ctx: SessionContext, local: &Arc<FileStore>, remote: Arc<dyn BlobStore>) -> Session {
        let local: Arc<dyn BlobStore> = local.clone();
        Session::open(ctx, Some(local), remote).await
    }

    // Keeps consecutive commits on distinct milliseconds.
    async fn tick() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    async fn read_back(store: &FileStore, ctx: &SessionContext) -> Dataset {
        let blob = store.get(&ctx.credential_name()).await.unwrap();
        CredentialCodec::decode(&blob, ctx).unwrap()
    }

    #[tokio::test]
    async fn commit_reaches_both_replicas() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let remote = file_store(&dir, "remote").await;
        let mut session = open(ctx("pw"), &local, remote.clone()).await;

        let entry = session.new_entry("mail", "alice", "s3cret!pass", "", "").unwrap();
        assert_eq!(session.upsert_entry(entry, None).await, None);

        let ctx = session.context().clone();
        assert!(read_back(&remote, &ctx).await.get("mail").is_some());
        assert_eq!(read_back(&local, &ctx).await, *session.dataset());
    }

    #[tokio::test]
    async fn second_device_adopts_then_merges() {
        let dir = tempdir().unwrap();
        let remote = file_store(&dir, "remote").await;
        let local_a = file_store(&dir, "a").await;
        let local_b = file_store(&dir, "b").await;

        let mut a = open(ctx("pw"), &local_a, remote.clone()).await;
        let first = a.new_entry("first", "u", "pw", "", "").unwrap();
        a.upsert_entry(first, None).await;

        let mut b = open(ctx("pw"), &local_b, remote.clone()).await;
        assert!(b.sync_remote().await.is_empty());
        assert!(b.dataset().get("first").is_some());
        assert_eq!(read_back(&local_b, b.context()).await, *b.dataset());

        tick().await;
        let second = a.new_entry("second", "u", "pw", "", "").unwrap();
        a.upsert_entry(second, None).await;

        tick().await;
        let third = b.new_entry("third", "u", "pw", "", "").unwrap();
        b.dataset.upsert(third, None);
        assert_eq!(b.sync_remote().await, vec![SyncEvent::Synchronized]);
        for id in ["first", "second", "third"] {
            assert!(b.dataset().get(id).is_some(), "{id} missing");
        }
        assert_eq!(read_back(&remote, b.context()).await, *b.dataset());
    }

    #[tokio::test]
    async fn reopening_from_cache_matches_remote() {
        let dir = tempdir().unwrap();
        let remote = file_store(&dir, "remote").await;
        let local = file_store(&dir, "local").await;
        let mut session = open(ctx("pw"), &local, remote.clone()).await;
        let entry = session.new_entry("x", "u", "pw", "", "").unwrap();
        session.upsert_entry(entry, None).await;

        let mut reopened = open(ctx("pw"), &local, remote.clone()).await;
        assert_eq!(reopened.load_local().await, None);
        assert!(reopened.sync_remote().await.is_empty());
        assert_eq!(reopened.dataset(), session.dataset());
    }

    #[tokio::test]
    async fn offline_remote_keeps_local_copy() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let mut session = open(ctx("pw"), &local, Arc::new(Offline)).await;

        let events = session.sync_remote().await;
        assert!(matches!(
            events.as_slice(),
            [SyncEvent::RemoteReadFailed { has_local_data: false, .. }]
        ));

        let entry = session.new_entry("x", "u", "pw", "", "").unwrap();
        let event = session.upsert_entry(entry, None).await;
        assert!(matches!(
            event,
            Some(SyncEvent::RemoteWriteFailed { cached_locally: true, .. })
        ));
        assert!(read_back(&local, session.context()).await.get("x").is_some());
    }

    #[tokio::test]
    async fn foreign_blob_is_reported_not_merged() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let mut session = open(ctx("pw"), &local, Arc::new(Offline)).await;
        let foreign = CredentialCodec::encode(
            &Dataset::new(10, vec![Entry::new("x", "u", "p", "", "", 1).unwrap()]),
            &ctx("other"),
        )
        .unwrap();
        let event = session.import(foreign.as_str(), Origin::Remote).await;
        assert_eq!(event, Some(SyncEvent::DecryptionFailed { origin: Origin::Remote }));
        assert!(session.dataset().is_empty());
    }

    #[tokio::test]
    async fn newer_schema_is_rejected() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let mut session = open(ctx("pw"), &local, Arc::new(Offline)).await;
        let future = Dataset::with_schema(crate::model::SCHEMA_VERSION + 1, 10, vec![]);
        let blob = CredentialCodec::encode(&future, session.context()).unwrap();
        let event = session.import(blob.as_str(), Origin::Local).await;
        assert_eq!(event, Some(SyncEvent::UnsupportedSchema { origin: Origin::Local }));
    }

    #[tokio::test]
    async fn passphrase_change_moves_the_remote_object() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let remote = file_store(&dir, "remote").await;
        let mut session = open(ctx("old"), &local, remote.clone()).await;
        let entry = session.new_entry("x", "u", "pw", "", "").unwrap();
        session.upsert_entry(entry, None).await;
        let old_name = session.context().credential_name();

        assert_eq!(session.change_passphrase("new").await, None);

        let new_ctx = ctx("new");
        assert_eq!(session.context().credential_name(), new_ctx.credential_name());
        assert!(remote.get(&old_name).await.unwrap_err().is_not_found());
        assert!(local.get(&old_name).await.unwrap_err().is_not_found());
        assert!(read_back(&remote, &new_ctx).await.get("x").is_some());
        assert!(read_back(&local, &new_ctx).await.get("x").is_some());
    }

    #[tokio::test]
    async fn failed_passphrase_change_restores_old_identity() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let mut session = open(ctx("old"), &local, Arc::new(Offline)).await;
        let entry = session.new_entry("x", "u", "pw", "", "").unwrap();
        session.upsert_entry(entry, None).await;

        assert_eq!(
            session.change_passphrase("new").await,
            Some(SyncEvent::PassphraseChangeFailed)
        );
        let old_ctx = ctx("old");
        assert_eq!(session.context().credential_name(), old_ctx.credential_name());
        assert!(read_back(&local, &old_ctx).await.get("x").is_some());
        assert!(local
            .get(&ctx("new").credential_name())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn disabling_the_cache_removes_it() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let remote = file_store(&dir, "remote").await;
        let mut session = open(ctx("pw"), &local, remote.clone()).await;
        let entry = session.new_entry("x", "u", "pw", "", "").unwrap();
        session.upsert_entry(entry, None).await;
        let name = session.context().credential_name();
        assert!(local.exists(&name).await.unwrap());

        let mut uncached = open(ctx("pw").with_cache(false), &local, remote.clone()).await;
        assert!(!local.exists(&name).await.unwrap());
        assert!(uncached.sync_remote().await.is_empty());
        assert!(!local.exists(&name).await.unwrap());
        assert!(uncached.dataset().get("x").is_some());
    }

    #[tokio::test]
    async fn removing_unknown_entry_is_a_noop() {
        let dir = tempdir().unwrap();
        let local = file_store(&dir, "local").await;
        let mut session = open(ctx("pw"), &local, Arc::new(Offline)).await;
        assert_eq!(session.remove_entry("ghost").await, None);
        assert_eq!(session.dataset().timestamp, 0);
    }
}
