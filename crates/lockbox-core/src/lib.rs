//! lockbox-core: encrypted two-replica credential vault
//!
//! # Layout
//! - `model`: entries and the dataset they live in.
//! - `codec`: dataset <-> self-contained encrypted blob.
//! - `reconcile`: merging a local and a remote dataset without tombstones.
//! - `store`: the file-backed named-object store the service exposes.
//! - `remote`: the blob protocol, spoken by the file store and over HTTP.
//! - `sync`: a signed-in session driving all of the above.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod model;
pub mod paths;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod settings;
pub mod store;
pub mod sync;

pub use codec::{CipherBlob, CredentialCodec};
pub use error::{
    CryptoError, DecodeError, EncodeError, EntryError, Error, MergeRejected, Result, StorageError,
};
pub use model::{Dataset, Entry, Timestamp, Weakness, SCHEMA_VERSION};
pub use reconcile::{MergeKind, MergeOutcome, SyncReconciler};
pub use remote::{BlobStore, HttpRemote};
pub use session::SessionContext;
pub use settings::ClientSettings;
pub use store::{FileStore, StoreOptions};
pub use sync::{Origin, Session, SyncEvent};
