use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::GoogleCredentials;
use crate::http_client::HttpClient;
use crate::sync::{SyncError, SyncResult};

use super::credentials::{ServiceAccountAuth, ServiceAccountKey};

const SHEETS_API_URL: &str = "https://sheets.googleapis.com";
const DRIVE_API_URL: &str = "https://www.googleapis.com";

pub(crate) const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
pub(crate) const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Which error a missing resource maps to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Lookup {
    Sheet,
    File,
}

impl Lookup {
    fn not_found(self, what: &str) -> SyncError {
        match self {
            Lookup::Sheet => SyncError::SheetNotFound(what.to_string()),
            Lookup::File => SyncError::FileNotFound(what.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GoogleConnection {
    pub client_email: String,
    pub sheets_available: usize,
    pub drive_connected: bool,
}

enum KeySource {
    File(GoogleCredentials),
    Key(ServiceAccountKey, Vec<String>),
}

/// Authenticated access to the Sheets v4 and Drive v3 REST APIs.
///
/// The service-account key is read and validated on first use. The
/// handlers share one client through an `Arc`.
pub struct GoogleClient {
    http: HttpClient,
    source: KeySource,
    auth: OnceCell<ServiceAccountAuth>,
    sheets_url: String,
    drive_url: String,
}

impl GoogleClient {
    pub fn new(http: HttpClient, credentials: GoogleCredentials) -> Self {
        Self {
            http,
            source: KeySource::File(credentials),
            auth: OnceCell::new(),
            sheets_url: SHEETS_API_URL.to_string(),
            drive_url: DRIVE_API_URL.to_string(),
        }
    }

    pub fn from_key(http: HttpClient, key: ServiceAccountKey, scopes: Vec<String>) -> Self {
        Self {
            http,
            source: KeySource::Key(key, scopes),
            auth: OnceCell::new(),
            sheets_url: SHEETS_API_URL.to_string(),
            drive_url: DRIVE_API_URL.to_string(),
        }
    }

    pub fn with_base_urls(
        mut self,
        sheets_url: impl Into<String>,
        drive_url: impl Into<String>,
    ) -> Self {
        self.sheets_url = sheets_url.into();
        self.drive_url = drive_url.into();
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    async fn auth(&self) -> SyncResult<&ServiceAccountAuth> {
        self.auth
            .get_or_try_init(|| async {
                let auth = match &self.source {
                    KeySource::File(creds) => {
                        let key = ServiceAccountKey::from_file(&creds.service_account_file)?;
                        ServiceAccountAuth::new(self.http.clone(), key, &creds.scopes)?
                    }
                    KeySource::Key(key, scopes) => {
                        ServiceAccountAuth::new(self.http.clone(), key.clone(), scopes)?
                    }
                };
                info!(client_email = %auth.client_email(), "Google client initialised");
                Ok::<_, SyncError>(auth)
            })
            .await
    }

    pub(crate) fn sheets_endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        endpoint(&self.sheets_url, segments)
    }

    pub(crate) fn drive_endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        endpoint(&self.drive_url, segments)
    }

    /// Sends a read request (retried on transient failures) and returns the
    /// successful response.
    pub(crate) async fn get(&self, url: &Url, lookup: Lookup, what: &str) -> SyncResult<Response> {
        let auth = self.auth().await?;
        let token = auth.token().await?;
        let resp = self
            .http
            .send_idempotent(|c| c.get(url.clone()).bearer_auth(&token))
            .await
            .map_err(|e| SyncError::from_reqwest("Google", e))?;
        self.check(resp, lookup, what).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        lookup: Lookup,
        what: &str,
    ) -> SyncResult<T> {
        self.get(url, lookup, what)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::DataFormat(format!("{what}: {e}")))
    }

    /// Sends a write request exactly once.
    pub(crate) async fn send_json<B, T, F>(
        &self,
        build: F,
        body: &B,
        lookup: Lookup,
        what: &str,
    ) -> SyncResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
        F: FnOnce(&Client) -> RequestBuilder,
    {
        let auth = self.auth().await?;
        let token = auth.token().await?;
        let request = build(self.http.inner()).bearer_auth(&token).json(body);
        let resp = self
            .http
            .send_once(request)
            .await
            .map_err(|e| SyncError::from_reqwest("Google", e))?;
        if resp.status() == StatusCode::BAD_REQUEST {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::DataFormat(format!("{what} rejected: {body}")));
        }
        self.check(resp, lookup, what)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::DataFormat(format!("{what}: {e}")))
    }

    async fn check(&self, resp: Response, lookup: Lookup, what: &str) -> SyncResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => {
                if let Ok(auth) = self.auth().await {
                    auth.invalidate().await;
                }
                Err(SyncError::Authentication(format!(
                    "Google rejected the access token: {body}"
                )))
            }
            StatusCode::FORBIDDEN if is_rate_limited(&body) => Err(SyncError::Connection(
                format!("Google rate limit reached for {what}: {body}"),
            )),
            // Google answers 403 for resources the account cannot see and
            // 400 for malformed spreadsheet ids.
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Err(lookup.not_found(what)),
            StatusCode::BAD_REQUEST if matches!(lookup, Lookup::Sheet) => {
                Err(SyncError::SheetNotFound(format!("{what}: {body}")))
            }
            _ => Err(SyncError::Connection(format!(
                "Google request for {what} returned {status}: {body}"
            ))),
        }
    }

    /// Confirms both APIs answer with the configured account.
    pub async fn test_connection(&self) -> SyncResult<GoogleConnection> {
        let client_email = self.auth().await?.client_email().to_string();

        let mut url = self.drive_endpoint(&["drive", "v3", "files"])?;
        url.query_pairs_mut()
            .append_pair("q", &format!("mimeType = '{SPREADSHEET_MIME}' and trashed = false"))
            .append_pair("pageSize", "1000")
            .append_pair("fields", "files(id)");
        let listing: IdList = self.get_json(&url, Lookup::File, "drive listing").await?;

        Ok(GoogleConnection {
            client_email,
            sheets_available: listing.files.len(),
            drive_connected: true,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

/// Google reports quota exhaustion as 403 with a rate-limit reason.
fn is_rate_limited(body: &str) -> bool {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed.error.status == "RESOURCE_EXHAUSTED"
        || parsed.error.errors.iter().any(|e| {
            matches!(
                e.reason.as_str(),
                "rateLimitExceeded" | "userRateLimitExceeded" | "quotaExceeded"
            )
        })
}

#[derive(Debug, Deserialize)]
struct IdList {
    #[serde(default)]
    files: Vec<serde_json::Value>,
}

fn endpoint(base: &str, segments: &[&str]) -> SyncResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| SyncError::Connection(format!("invalid Google API url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::Connection(format!("invalid Google API url {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
