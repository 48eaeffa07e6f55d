//! External-service synchronization: Dropbox files and Google Sheets/Drive.
//!
//! Handlers always return [`SyncResult`]; the HTTP layer wraps successful
//! payloads in a [`SyncOutcome`].

pub mod dropbox;
pub mod error;
pub mod google;

pub use error::{SyncError, SyncResult};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
}

/// Tagged result body returned by sync endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome<T: Serialize> {
    pub status: SyncStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SyncOutcome<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: SyncStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    File,
    Folder,
}

/// Snapshot of a file or folder held by a remote store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteFileRef {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
    pub kind: RemoteKind,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Writes `bytes` next to `dest` under a `.part` name and renames it into
/// place, so an interrupted write never leaves a truncated `dest`.
pub(crate) async fn write_atomically(dest: &std::path::Path, bytes: &[u8]) -> SyncResult<()> {
    let part = part_path(dest);
    if let Err(e) = tokio::fs::write(&part, bytes).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    tokio::fs::rename(&part, dest).await?;
    Ok(())
}

pub(crate) fn part_path(dest: &std::path::Path) -> std::path::PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
