//! Types shared between the host and its client windows. Everything in here
//! crosses the transport boundary and is serialized as camelCase JSON.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::Descriptor;

/// Version a client sends when it has no replica yet. Always answered with a
/// full snapshot.
pub const NO_VERSION: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEvent {
    Add,
    Change,
    Remove,
}

/// A single recorded mutation of a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescriptor {
    pub event: ChangeEvent,

    pub path: PathBuf,

    /// Fresh descriptor for `Add` and `Change`; absent for `Remove`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,

    /// The root version this change produced.
    pub version: u64,
}

impl ChangeDescriptor {
    pub fn add(descriptor: Descriptor, version: u64) -> Self {
        Self {
            event: ChangeEvent::Add,
            path: descriptor.path.clone(),
            descriptor: Some(descriptor),
            version,
        }
    }

    pub fn change(descriptor: Descriptor, version: u64) -> Self {
        Self {
            event: ChangeEvent::Change,
            path: descriptor.path.clone(),
            descriptor: Some(descriptor),
            version,
        }
    }

    pub fn remove<P: Into<PathBuf>>(path: P, version: u64) -> Self {
        Self {
            event: ChangeEvent::Remove,
            path: path.into(),
            descriptor: None,
            version,
        }
    }
}

/// An opaque filesystem event as reported by a watcher. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RawEvent {
    Create { path: PathBuf },
    Write { path: PathBuf },
    Remove { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
}

impl RawEvent {
    /// Every path the event touches.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            RawEvent::Create { path } | RawEvent::Write { path } | RawEvent::Remove { path } => {
                vec![path.as_path()]
            }
            RawEvent::Rename { from, to } => vec![from.as_path(), to.as_path()],
        }
    }
}

/// Answer to `get-changes-since`. The two shapes are told apart by their
/// fields, not by a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangesResponse {
    Snapshot(FullSnapshot),
    Delta(DeltaBatch),
}

impl ChangesResponse {
    pub fn current_version(&self) -> u64 {
        match self {
            ChangesResponse::Snapshot(snapshot) => snapshot.current_version,
            ChangesResponse::Delta(batch) => batch.current_version,
        }
    }
}

/// A complete copy of a root's tree, without parent references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSnapshot {
    pub descriptor: Descriptor,
    pub current_version: u64,
}

/// The changes covering exactly `(since, current_version]`, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBatch {
    pub changes: Vec<ChangeDescriptor>,
    pub current_version: u64,
}

/// Push notifications sent from the host to every window. They carry nothing
/// but the root path; listeners always re-pull instead of trusting a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum HostNotification {
    WorkspaceAdded { root_path: PathBuf },
    WorkspaceChanged { root_path: PathBuf },
    WorkspaceRemoved { root_path: PathBuf },
}

impl HostNotification {
    pub fn root_path(&self) -> &Path {
        match self {
            HostNotification::WorkspaceAdded { root_path }
            | HostNotification::WorkspaceChanged { root_path }
            | HostNotification::WorkspaceRemoved { root_path } => root_path,
        }
    }
}

/// Summary of one open root, as listed by `GET /api/roots`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootInfo {
    pub root_path: PathBuf,
    pub version: u64,
    pub retained_changes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub kind: ErrorResponseKind,
    pub details: String,
}

impl ErrorResponse {
    pub fn not_found<S: Into<String>>(details: S) -> Self {
        Self {
            kind: ErrorResponseKind::NotFound,
            details: details.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(details: S) -> Self {
        Self {
            kind: ErrorResponseKind::BadRequest,
            details: details.into(),
        }
    }

    pub fn internal_error<S: Into<String>>(details: S) -> Self {
        Self {
            kind: ErrorResponseKind::InternalError,
            details: details.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ErrorResponseKind {
    NotFound,
    BadRequest,
    InternalError,
}

/// The request/response half of the host connection, as seen by a client
/// window.
pub trait TreeSource: Send + Sync {
    /// `since` of `None` asks for a full snapshot.
    fn changes_since<'a>(
        &'a self,
        root_path: &'a Path,
        since: Option<u64>,
    ) -> BoxFuture<'a, Result<ChangesResponse, FetchError>>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Root {} is not open on the host", .0.display())]
    UnknownRoot(PathBuf),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Converts the wire representation of a version, where `-1` means "none".
pub fn version_from_wire(version: i64) -> Option<u64> {
    u64::try_from(version).ok()
}
