use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DropboxCredentials;
use crate::http_client::HttpClient;
use crate::sync::{write_atomically, RemoteFileRef, RemoteKind, SyncError, SyncResult};

const DROPBOX_API_URL: &str = "https://api.dropboxapi.com";
const DROPBOX_CONTENT_URL: &str = "https://content.dropboxapi.com";
const DROPBOX_AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

/// Access tokens are re-minted this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    expires_at: Option<Instant>,
}

impl Session {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + TOKEN_REFRESH_MARGIN < at,
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    surname: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account_id: String,
    email: Option<String>,
    name: AccountName,
}

/// Tokens granted for an authorization code.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub account_id: Option<String>,
}

/// Account the client is authenticated as.
#[derive(Debug, Clone, Serialize)]
pub struct DropboxAccount {
    pub account_id: String,
    pub email: Option<String>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    name: String,
    id: String,
    path_display: Option<String>,
    size: u64,
    server_modified: DateTime<Utc>,
}

impl From<FileMetadata> for RemoteFileRef {
    fn from(meta: FileMetadata) -> Self {
        RemoteFileRef {
            id: meta.id,
            name: meta.name,
            path: meta.path_display,
            kind: RemoteKind::File,
            size: Some(meta.size),
            modified: Some(meta.server_modified),
            mime_type: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Entry {
    File(FileMetadata),
    Folder {
        name: String,
        id: String,
        path_display: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<Entry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_summary: String,
}

/// Result of a completed download.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadedFile {
    pub remote: RemoteFileRef,
    pub local_path: PathBuf,
}

/// Dropbox API client.
///
/// Constructed once at startup and shared behind an `Arc`. The session is
/// established on first use; concurrent first callers wait on the same lock
/// so only one authentication round-trip happens.
pub struct DropboxClient {
    http: HttpClient,
    credentials: DropboxCredentials,
    api_url: String,
    content_url: String,
    state: AtomicU8,
    session: Mutex<Option<Session>>,
}

impl DropboxClient {
    pub fn new(http: HttpClient, credentials: DropboxCredentials) -> Self {
        Self::with_base_urls(http, credentials, DROPBOX_API_URL, DROPBOX_CONTENT_URL)
    }

    pub fn with_base_urls(
        http: HttpClient,
        credentials: DropboxCredentials,
        api_url: impl Into<String>,
        content_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            api_url: api_url.into(),
            content_url: content_url.into(),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns a usable access token, connecting first if needed.
    async fn access_token(&self) -> SyncResult<String> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref().filter(|s| s.is_fresh()) {
            return Ok(current.access_token.clone());
        }

        self.set_state(ConnectionState::Connecting);
        match self.authenticate().await {
            Ok(fresh) => {
                let token = fresh.access_token.clone();
                *session = Some(fresh);
                self.set_state(ConnectionState::Connected);
                Ok(token)
            }
            Err(e) => {
                *session = None;
                self.set_state(ConnectionState::Disconnected);
                warn!("Dropbox authentication failed: {}", e);
                Err(e)
            }
        }
    }

    async fn authenticate(&self) -> SyncResult<Session> {
        let creds = &self.credentials;
        let session = match (&creds.refresh_token, &creds.app_key, &creds.app_secret) {
            (Some(refresh_token), Some(app_key), Some(app_secret)) => {
                debug!("Refreshing Dropbox access token");
                self.refresh(refresh_token, app_key, app_secret).await?
            }
            _ => match &creds.access_token {
                Some(token) => Session {
                    access_token: token.clone(),
                    expires_at: None,
                },
                None => {
                    return Err(SyncError::Authentication(
                        "Dropbox needs a refresh token with app key/secret, or an access token"
                            .to_string(),
                    ))
                }
            },
        };

        let account = self.current_account(&session.access_token).await?;
        info!(account_id = %account.account_id, "Connected to Dropbox");
        Ok(session)
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        app_key: &str,
        app_secret: &str,
    ) -> SyncResult<Session> {
        let url = format!("{}/oauth2/token", self.api_url);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", app_key),
            ("client_secret", app_secret),
        ];
        let resp = self
            .http
            .send_idempotent(|c| c.post(&url).form(&form))
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Authentication(format!(
                "Dropbox rejected the refresh token: {body}"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Connection(format!(
                "Dropbox token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;
        Ok(Session {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    /// Page where the account owner approves the app; requests offline
    /// access so the grant includes a refresh token.
    pub fn authorize_url(&self) -> SyncResult<String> {
        let app_key = self
            .credentials
            .app_key
            .as_deref()
            .ok_or(SyncError::NotConfigured("DROPBOX_APP_KEY"))?;
        let mut url = reqwest::Url::parse(DROPBOX_AUTHORIZE_URL)
            .map_err(|e| SyncError::Connection(format!("invalid authorize url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", app_key)
            .append_pair("response_type", "code")
            .append_pair("token_access_type", "offline");
        Ok(url.into())
    }

    /// Exchanges a one-time authorization code. Codes are single use, so
    /// the request is never retried.
    pub async fn exchange_code(&self, code: &str) -> SyncResult<GrantedTokens> {
        let (Some(app_key), Some(app_secret)) =
            (&self.credentials.app_key, &self.credentials.app_secret)
        else {
            return Err(SyncError::NotConfigured("Dropbox app credentials"));
        };
        let url = format!("{}/oauth2/token", self.api_url);
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.trim()),
            ("client_id", app_key.as_str()),
            ("client_secret", app_secret.as_str()),
        ];
        let resp = self
            .http
            .send_once(self.http.inner().post(&url).form(&form))
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Authentication(format!(
                "Dropbox rejected the authorization code: {body}"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Connection(format!(
                "Dropbox token endpoint returned {status}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))
    }

    async fn current_account(&self, token: &str) -> SyncResult<DropboxAccount> {
        let url = format!("{}/2/users/get_current_account", self.api_url);
        let resp = self
            .http
            .send_idempotent(|c| c.post(&url).bearer_auth(token))
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;
        let resp = classify(resp, "account").await?;
        let account: AccountResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;

        Ok(DropboxAccount {
            account_id: account.account_id,
            email: account.email,
            name: format!("{} {}", account.name.given_name, account.name.surname)
                .trim()
                .to_string(),
        })
    }

    /// Like [`classify`], but also drops the session when the token was
    /// rejected so the next call reconnects. Must not be called while the
    /// session lock is held.
    async fn check(&self, resp: Response, path: &str) -> SyncResult<Response> {
        let result = classify(resp, path).await;
        if let Err(SyncError::Authentication(_)) = &result {
            self.invalidate().await;
        }
        result
    }

    async fn invalidate(&self) {
        *self.session.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn test_connection(&self) -> SyncResult<DropboxAccount> {
        let token = self.access_token().await?;
        let result = self.current_account(&token).await;
        if let Err(SyncError::Authentication(_)) = &result {
            self.invalidate().await;
        }
        result
    }

    /// Lists the entries of a folder. An empty path or `/` is the root.
    pub async fn list_files(&self, path: &str) -> SyncResult<Vec<RemoteFileRef>> {
        let token = self.access_token().await?;
        let path = normalize_folder(path);

        let url = format!("{}/2/files/list_folder", self.api_url);
        let body = json!({ "path": path });
        let resp = self
            .http
            .send_idempotent(|c| c.post(&url).bearer_auth(&token).json(&body))
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;
        let mut page: ListFolderResponse = self
            .check(resp, &path)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;

        let mut files = Vec::new();
        loop {
            files.extend(page.entries.into_iter().filter_map(entry_to_ref));
            if !page.has_more {
                break;
            }
            let url = format!("{}/2/files/list_folder/continue", self.api_url);
            let body = json!({ "cursor": page.cursor });
            let resp = self
                .http
                .send_idempotent(|c| c.post(&url).bearer_auth(&token).json(&body))
                .await
                .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;
            page = self
                .check(resp, &path)
                .await?
                .json()
                .await
                .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;
        }

        debug!(path = %path, count = files.len(), "Listed Dropbox folder");
        Ok(files)
    }

    /// Downloads `dropbox_path` to `local_path`, creating the parent directory.
    /// The file appears at `local_path` only once fully written.
    pub async fn download_file(
        &self,
        dropbox_path: &str,
        local_path: &Path,
    ) -> SyncResult<DownloadedFile> {
        let token = self.access_token().await?;
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("{}/2/files/download", self.content_url);
        let arg = api_arg(&json!({ "path": dropbox_path }));
        let resp = self
            .http
            .send_idempotent(|c| c.post(&url).bearer_auth(&token).header(API_ARG_HEADER, &arg))
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;
        let resp = self.check(resp, dropbox_path).await?;

        let meta: FileMetadata = resp
            .headers()
            .get(API_RESULT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| serde_json::from_str(v).ok())
            .ok_or_else(|| {
                SyncError::DataFormat(format!("missing download metadata for {dropbox_path}"))
            })?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Download(format!("{dropbox_path}: {e}")))?;

        write_atomically(local_path, &bytes).await?;
        info!(
            path = %dropbox_path,
            local = %local_path.display(),
            size = bytes.len(),
            "Downloaded file from Dropbox"
        );

        Ok(DownloadedFile {
            remote: meta.into(),
            local_path: local_path.to_path_buf(),
        })
    }

    /// Uploads a local file. Without `overwrite` an existing remote file is
    /// left untouched and [`SyncError::AlreadyExists`] is returned.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        dropbox_path: &str,
        overwrite: bool,
    ) -> SyncResult<RemoteFileRef> {
        let data = match tokio::fs::read(local_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::FileNotFound(local_path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let token = self.access_token().await?;

        let mode = if overwrite { "overwrite" } else { "add" };
        let arg = api_arg(&json!({
            "path": dropbox_path,
            "mode": mode,
            "autorename": false,
            "mute": false,
        }));
        let url = format!("{}/2/files/upload", self.content_url);
        let request = self
            .http
            .inner()
            .post(&url)
            .bearer_auth(&token)
            .header(API_ARG_HEADER, arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let resp = self
            .http
            .send_once(request)
            .await
            .map_err(|e| SyncError::Upload(format!("{dropbox_path}: {e}")))?;
        let meta: FileMetadata = self
            .check(resp, dropbox_path)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::from_reqwest("Dropbox", e))?;

        info!(path = %dropbox_path, size = meta.size, mode, "Uploaded file to Dropbox");
        Ok(meta.into())
    }
}

/// Maps Dropbox error responses onto the sync taxonomy.
async fn classify(resp: Response, path: &str) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::Authentication(format!(
            "Dropbox rejected the access token: {body}"
        )));
    }

    if status == StatusCode::CONFLICT {
        let summary = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error_summary)
            .unwrap_or(body);
        if summary.contains("not_found") {
            return Err(SyncError::FileNotFound(path.to_string()));
        }
        if summary.contains("conflict") {
            return Err(SyncError::AlreadyExists(path.to_string()));
        }
        return Err(SyncError::Connection(format!(
            "Dropbox request for {path} failed: {summary}"
        )));
    }

    Err(SyncError::Connection(format!(
        "Dropbox request for {path} returned {status}: {body}"
    )))
}

fn entry_to_ref(entry: Entry) -> Option<RemoteFileRef> {
    match entry {
        Entry::File(meta) => Some(meta.into()),
        Entry::Folder {
            name,
            id,
            path_display,
        } => Some(RemoteFileRef {
            id,
            name,
            path: path_display,
            kind: RemoteKind::Folder,
            size: None,
            modified: None,
            mime_type: None,
        }),
        Entry::Other => None,
    }
}

fn normalize_folder(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return String::new();
    }
    if trimmed.starts_with('/') || trimmed.starts_with("id:") {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Serializes a `Dropbox-API-Arg` header value. Header values must be ASCII,
/// so every non-ASCII character is written as a JSON `\u` escape.
fn api_arg(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
