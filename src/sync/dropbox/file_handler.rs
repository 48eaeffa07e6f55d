use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SyncDirectories;
use crate::sync::{RemoteFileRef, SyncError, SyncResult};

use super::client::{ConnectionState, DownloadedFile, DropboxClient};

/// File-level Dropbox operations rooted in the local sync directories.
///
/// Relative local paths resolve against the uploads directory (for uploads)
/// or the downloads directory (for downloads).
#[derive(Clone)]
pub struct FileHandler {
    client: Arc<DropboxClient>,
    dirs: SyncDirectories,
}

impl FileHandler {
    pub fn new(client: Arc<DropboxClient>, dirs: SyncDirectories) -> Self {
        Self { client, dirs }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    pub async fn list_files(&self, path: &str) -> SyncResult<Vec<RemoteFileRef>> {
        self.client.list_files(path).await
    }

    /// Names of the entries directly under `path`.
    pub async fn list_names(&self, path: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .client
            .list_files(path)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect())
    }

    pub async fn upload(
        &self,
        local_path: &Path,
        dropbox_path: &str,
        overwrite: bool,
    ) -> SyncResult<RemoteFileRef> {
        let local = resolve(&self.dirs.uploads, local_path);
        self.client.upload_file(&local, dropbox_path, overwrite).await
    }

    /// Downloads into `local_path`, or into the downloads directory under the
    /// remote file name when none is given. An existing local file with the
    /// same name is replaced.
    pub async fn download(
        &self,
        dropbox_path: &str,
        local_path: Option<&Path>,
    ) -> SyncResult<DownloadedFile> {
        let target = match local_path {
            Some(path) => resolve(&self.dirs.downloads, path),
            None => {
                let name = remote_file_name(dropbox_path).ok_or_else(|| {
                    SyncError::FileNotFound(format!("{dropbox_path} does not name a file"))
                })?;
                self.dirs.downloads.join(name)
            }
        };
        self.client.download_file(dropbox_path, &target).await
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn remote_file_name(dropbox_path: &str) -> Option<&str> {
    dropbox_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}
