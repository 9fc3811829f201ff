//! Error types.

use thiserror::Error;

use crate::scene::{ObjectId, ObjectKind};

/// A shared entry that can't be turned into a scene object.
///
/// Recovered locally: the entry is skipped and logged, the rest of the batch
/// still applies.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("entry is not a map")]
    NotAMap,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),
    #[error("unknown object kind `{0}`")]
    UnknownKind(String),
    #[error("invalid object id `{0}`")]
    InvalidId(String),
    #[error("entry carries non-materializable content (`{0}`)")]
    NonMaterializable(&'static str),
    #[error("kind changed from {expected} to {found}")]
    KindMismatch {
        expected: ObjectKind,
        found: ObjectKind,
    },
}

/// Transport-level failures. Reconnection is the host's decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Errors surfaced by the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("crdt error: {0}")]
    Crdt(#[from] loro::LoroError),
    #[error("crdt export failed: {0}")]
    Export(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("operation requires the presenter role")]
    PermissionDenied,
    #[error("object {0} has no owner")]
    Unowned(ObjectId),
    #[error("not connected")]
    NotConnected,
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
