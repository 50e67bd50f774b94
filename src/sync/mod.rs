//! Synchronization with the remote backend.
//!
//! ## Protocol
//!
//! - **Push** drains the action log: every pending entry is mapped to a remote
//!   verb (`CREATE`, `UPDATE`, `DELETE`), its payload sanitized, and the whole
//!   batch sent in one request. Entries are deleted only after the remote
//!   acknowledges; on failure nothing is deleted and the batch is retried on
//!   the next trigger.
//! - **Pull** fetches one snapshot keyed by collection name and replaces each
//!   tracked collection it contains, marking rows as synced.
//!
//! Every attempt leaves a [`SyncRun`](crate::db::SyncRun) audit record.

mod engine;
mod error;
mod protocol;
mod scheduler;
mod transform;
mod transport;

pub use engine::{PullSummary, PushOutcome, SyncEngine};
pub use error::{SyncError, SyncResult, TransportError};
pub use protocol::{
    sanitize_payload, snapshot_rows, PushAck, PushLog, PushRequest, RemoteVerb, Snapshot,
};
pub use scheduler::{should_push, PushPolicy};
pub use transform::{CollectionTransform, SchemaTransform};
pub use transport::{
    CredentialProvider, HttpTransport, MockTransport, StaticCredentials, SyncTransport,
};
