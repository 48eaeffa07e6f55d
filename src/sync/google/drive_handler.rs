use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::sync::{part_path, RemoteFileRef, RemoteKind, SyncError, SyncResult};

use super::client::{GoogleClient, Lookup, FOLDER_MIME, SPREADSHEET_MIME};

const DEFAULT_MAX_RESULTS: usize = 100;
const DEFAULT_RECENT_RESULTS: usize = 10;

/// Drive rejects page sizes above this.
const MAX_PAGE_SIZE: usize = 1000;

const FILE_FIELDS: &str = "id,name,mimeType,createdTime,modifiedTime,size,webViewLink";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    /// Drive reports sizes as decimal strings; Google-native files have none.
    pub size: Option<String>,
    pub web_view_link: Option<String>,
}

impl DriveFile {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

impl From<DriveFile> for RemoteFileRef {
    fn from(file: DriveFile) -> Self {
        RemoteFileRef {
            size: file.size_bytes(),
            kind: if file.is_folder() {
                RemoteKind::Folder
            } else {
                RemoteKind::File
            },
            id: file.id,
            name: file.name,
            path: None,
            modified: file.modified_time,
            mime_type: Some(file.mime_type),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Drive v3 listing, metadata and media download.
#[derive(Clone)]
pub struct DriveHandler {
    client: Arc<GoogleClient>,
    downloads_dir: PathBuf,
}

impl DriveHandler {
    pub fn new(client: Arc<GoogleClient>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Lists files matching a Drive query, following page tokens until
    /// `max_results` files are collected. `None` uses the default of 100.
    pub async fn list_files(
        &self,
        query: Option<&str>,
        max_results: Option<usize>,
    ) -> SyncResult<Vec<DriveFile>> {
        self.list(query, None, max_results.unwrap_or(DEFAULT_MAX_RESULTS))
            .await
    }

    async fn list(
        &self,
        query: Option<&str>,
        order_by: Option<&str>,
        max_results: usize,
    ) -> SyncResult<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        while files.len() < max_results {
            let mut url = self.client.drive_endpoint(&["drive", "v3", "files"])?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs
                    .append_pair(
                        "pageSize",
                        &(max_results - files.len()).min(MAX_PAGE_SIZE).to_string(),
                    )
                    .append_pair("fields", &format!("nextPageToken,files({FILE_FIELDS})"));
                if let Some(q) = query {
                    pairs.append_pair("q", q);
                }
                if let Some(order) = order_by {
                    pairs.append_pair("orderBy", order);
                }
                if let Some(token) = &page_token {
                    pairs.append_pair("pageToken", token);
                }
            }

            let page: FileList = self.client.get_json(&url, Lookup::File, "drive listing").await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        files.truncate(max_results);
        debug!(count = files.len(), query = ?query, "Listed Drive files");
        Ok(files)
    }

    pub async fn get_file_by_id(&self, file_id: &str) -> SyncResult<DriveFile> {
        let mut url = self
            .client
            .drive_endpoint(&["drive", "v3", "files", file_id])?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        self.client.get_json(&url, Lookup::File, file_id).await
    }

    /// Streams a file's content to disk and returns the written path.
    ///
    /// Without `output_path` the file lands in the downloads directory under
    /// its Drive name, replacing any file already there.
    pub async fn download_file(
        &self,
        file_id: &str,
        output_path: Option<&Path>,
    ) -> SyncResult<PathBuf> {
        let metadata = self.get_file_by_id(file_id).await?;
        if metadata.mime_type.starts_with("application/vnd.google-apps.") {
            return Err(SyncError::Download(format!(
                "{} is a Google-native {} with no binary content",
                metadata.name, metadata.mime_type
            )));
        }

        let dest = match output_path {
            Some(path) => path.to_path_buf(),
            None => {
                tokio::fs::create_dir_all(&self.downloads_dir).await?;
                self.downloads_dir.join(local_name(&metadata.name))
            }
        };

        let mut url = self
            .client
            .drive_endpoint(&["drive", "v3", "files", file_id])?;
        url.query_pairs_mut().append_pair("alt", "media");
        let resp = self.client.get(&url, Lookup::File, file_id).await?;

        let part = part_path(&dest);
        if let Err(e) = stream_to(resp, &part, metadata.size_bytes()).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, &dest).await?;

        info!(file_id = %file_id, path = %dest.display(), "Downloaded Drive file");
        Ok(dest)
    }

    pub async fn search_files_by_name(
        &self,
        name: &str,
        exact_match: bool,
    ) -> SyncResult<Vec<DriveFile>> {
        let op = if exact_match { "=" } else { "contains" };
        let query = format!("name {op} '{}'", escape_query(name));
        self.list_files(Some(&query), None).await
    }

    pub async fn search_files_by_type(&self, mime_type: &str) -> SyncResult<Vec<DriveFile>> {
        let query = format!("mimeType = '{}'", escape_query(mime_type));
        self.list_files(Some(&query), None).await
    }

    pub async fn get_spreadsheets(&self) -> SyncResult<Vec<DriveFile>> {
        self.search_files_by_type(SPREADSHEET_MIME).await
    }

    pub async fn get_recent_files(&self, max_results: Option<usize>) -> SyncResult<Vec<DriveFile>> {
        self.list(
            None,
            Some("modifiedTime desc"),
            max_results.unwrap_or(DEFAULT_RECENT_RESULTS),
        )
        .await
    }
}

async fn stream_to(
    mut resp: reqwest::Response,
    part: &Path,
    total: Option<u64>,
) -> SyncResult<()> {
    let mut file = tokio::fs::File::create(part).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| SyncError::Download(format!("transfer interrupted: {e}")))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        match total {
            Some(total) if total > 0 => {
                debug!(written, total, percent = written * 100 / total, "Download progress")
            }
            _ => debug!(written, "Download progress"),
        }
    }
    file.flush().await?;

    if let Some(total) = total {
        if written != total {
            warn!(written, total, "Drive download size mismatch");
            return Err(SyncError::Download(format!(
                "expected {total} bytes, received {written}"
            )));
        }
    }
    Ok(())
}

/// Drive names may contain path separators.
fn local_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "downloaded_file".to_string(),
        _ => cleaned,
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::google::client::tests::client_for;
    use mockito::{Matcher, Server};

    const REPORT: &str = r#"{
        "id": "f1", "name": "ventas.csv", "mimeType": "text/csv",
        "modifiedTime": "2024-03-01T10:00:00.000Z", "size": "8"
    }"#;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("O'Brien\\x"), "O\\'Brien\\\\x");
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name("a/b.pdf"), "a_b.pdf");
        assert_eq!(local_name(".."), "downloaded_file");
    }

    #[test]
    fn test_drive_file_into_remote_ref() {
        let file: DriveFile = serde_json::from_str(REPORT).unwrap();
        let remote = RemoteFileRef::from(file);
        assert_eq!(remote.size, Some(8));
        assert_eq!(remote.kind, RemoteKind::File);
    }

    #[tokio::test]
    async fn test_list_files_follows_pages() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "name contains 'ventas'".into()),
                Matcher::UrlEncoded("pageToken".into(), "p2".into()),
                Matcher::UrlEncoded("pageSize".into(), "99".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"files": [{"id": "b", "name": "ventas-b", "mimeType": "text/csv"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "name contains 'ventas'".into()),
                Matcher::UrlEncoded("pageSize".into(), "100".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"files": [{"id": "a", "name": "ventas-a", "mimeType": "text/csv"}],
                    "nextPageToken": "p2"}"#,
            )
            .create_async()
            .await;
        let handler = DriveHandler::new(client_for(&mut server).await, "downloads");

        let files = handler.search_files_by_name("ventas", false).await.unwrap();

        let ids: Vec<_> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_recent_files_ordered_by_modified_time() {
        let mut server = Server::new_async().await;
        let listing = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("orderBy".into(), "modifiedTime desc".into()),
                Matcher::UrlEncoded("pageSize".into(), "3".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"files": []}"#)
            .create_async()
            .await;
        let handler = DriveHandler::new(client_for(&mut server).await, "downloads");

        assert!(handler.get_recent_files(Some(3)).await.unwrap().is_empty());
        listing.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_file_is_file_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files/missing")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error": {"code": 404}}"#)
            .create_async()
            .await;
        let handler = DriveHandler::new(client_for(&mut server).await, "downloads");

        let err = handler.get_file_by_id("missing").await.unwrap_err();
        assert!(matches!(err, SyncError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_download_to_default_directory() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files/f1")
            .match_query(Matcher::UrlEncoded("fields".into(), FILE_FIELDS.into()))
            .with_status(200)
            .with_body(REPORT)
            .create_async()
            .await;
        server
            .mock("GET", "/drive/v3/files/f1")
            .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_status(200)
            .with_body("a,b\n1,2\n")
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let handler = DriveHandler::new(client_for(&mut server).await, &downloads);

        let path = handler.download_file("f1", None).await.unwrap();

        assert_eq!(path, downloads.join("ventas.csv"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n1,2\n");
        assert!(!part_path(&path).exists());
    }

    #[tokio::test]
    async fn test_short_download_removes_partial_file() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files/f1")
            .match_query(Matcher::UrlEncoded("fields".into(), FILE_FIELDS.into()))
            .with_status(200)
            .with_body(REPORT)
            .create_async()
            .await;
        server
            .mock("GET", "/drive/v3/files/f1")
            .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_status(200)
            .with_body("a,b")
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.csv");
        let handler = DriveHandler::new(client_for(&mut server).await, dir.path());

        let err = handler.download_file("f1", Some(&dest)).await.unwrap_err();

        assert!(matches!(err, SyncError::Download(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_native_document_cannot_be_downloaded() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files/s1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(
                r#"{{"id": "s1", "name": "Ventas", "mimeType": "{SPREADSHEET_MIME}"}}"#
            ))
            .create_async()
            .await;
        let handler = DriveHandler::new(client_for(&mut server).await, "downloads");

        let err = handler.download_file("s1", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Download(_)));
    }
}
