use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{Config, ConfigValidation};
use crate::error::AppResult;
use crate::http_client::HttpClient;
use crate::middleware::AuthenticatedUser;
use crate::sync::dropbox::{ConnectionState, DropboxClient, FileHandler};
use crate::sync::google::{
    DriveFile, DriveHandler, GoogleClient, SheetHandler, SpreadsheetSummary, WorksheetSelector,
};
use crate::sync::{RemoteFileRef, SyncError, SyncOutcome};

use super::AppState;

/// Upper bound on `max_results` accepted from clients.
const MAX_RESULTS_LIMIT: usize = 1000;

fn capped(max_results: Option<usize>) -> Option<usize> {
    max_results.map(|n| n.min(MAX_RESULTS_LIMIT))
}

/// Sync handlers built at startup; `None` when the service has no
/// credentials configured.
#[derive(Clone)]
pub struct SyncState {
    pub validation: ConfigValidation,
    pub dropbox: Option<FileHandler>,
    pub sheets: Option<SheetHandler>,
    pub drive: Option<DriveHandler>,
}

impl SyncState {
    /// Builds a handler for every service whose credentials are present.
    /// Nothing connects until the first request uses it.
    pub fn from_config(config: &Config, http: HttpClient) -> Self {
        let dropbox = if config.dropbox.is_configured() {
            let client = Arc::new(DropboxClient::new(http.clone(), config.dropbox.clone()));
            Some(FileHandler::new(client, config.sync_dirs.clone()))
        } else {
            warn!("Dropbox credentials not set; Dropbox routes are disabled");
            None
        };

        let (sheets, drive) = if config.google.service_account_file.exists() {
            let client = GoogleClient::new(http, config.google.clone()).into_shared();
            (
                Some(SheetHandler::new(client.clone())),
                Some(DriveHandler::new(client, config.sync_dirs.downloads.clone())),
            )
        } else {
            warn!(
                path = %config.google.service_account_file.display(),
                "Google service account file not found; Google routes are disabled"
            );
            (None, None)
        };

        Self {
            validation: config.validate(),
            dropbox,
            sheets,
            drive,
        }
    }

    fn dropbox(&self) -> Result<&FileHandler, SyncError> {
        self.dropbox.as_ref().ok_or(SyncError::NotConfigured("Dropbox"))
    }

    fn sheets(&self) -> Result<&SheetHandler, SyncError> {
        self.sheets.as_ref().ok_or(SyncError::NotConfigured("Google Sheets"))
    }

    fn drive(&self) -> Result<&DriveHandler, SyncError> {
        self.drive.as_ref().ok_or(SyncError::NotConfigured("Google Drive"))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync-google-sheets/:spreadsheet_key", get(sync_google_sheet))
        .route("/sync/status", get(status))
        .route("/sync/dropbox/files", get(dropbox_files))
        .route("/sync/drive/files", get(drive_files))
        .route("/sync/drive/recent", get(drive_recent))
        .route("/sync/drive/spreadsheets", get(drive_spreadsheets))
}

async fn sync_google_sheet(
    _user: AuthenticatedUser,
    State(state): State<AppState>,
    Path(spreadsheet_key): Path<String>,
) -> AppResult<Json<SyncOutcome<Vec<Vec<String>>>>> {
    let sheets = state.sync.sheets()?;
    let values = sheets
        .get_all_values(&spreadsheet_key, &WorksheetSelector::default())
        .await?;
    Ok(Json(SyncOutcome::success(
        format!("Read {} rows from spreadsheet", values.len()),
        values,
    )))
}

#[derive(Debug, Serialize)]
struct SyncStatusBody {
    configuration: ConfigValidation,
    dropbox: Option<ConnectionState>,
    google: bool,
}

async fn status(_user: AuthenticatedUser, State(state): State<AppState>) -> Json<SyncStatusBody> {
    Json(SyncStatusBody {
        configuration: state.sync.validation.clone(),
        dropbox: state.sync.dropbox.as_ref().map(FileHandler::connection_state),
        google: state.sync.sheets.is_some(),
    })
}

#[derive(Debug, Deserialize)]
struct DropboxListQuery {
    #[serde(default)]
    path: String,
}

async fn dropbox_files(
    _user: AuthenticatedUser,
    State(state): State<AppState>,
    Query(query): Query<DropboxListQuery>,
) -> AppResult<Json<SyncOutcome<Vec<RemoteFileRef>>>> {
    let files = state.sync.dropbox()?.list_files(&query.path).await?;
    Ok(Json(SyncOutcome::success(
        format!("Found {} entries", files.len()),
        files,
    )))
}

#[derive(Debug, Deserialize)]
struct DriveListQuery {
    q: Option<String>,
    max_results: Option<usize>,
}

async fn drive_files(
    _user: AuthenticatedUser,
    State(state): State<AppState>,
    Query(query): Query<DriveListQuery>,
) -> AppResult<Json<SyncOutcome<Vec<DriveFile>>>> {
    let files = state
        .sync
        .drive()?
        .list_files(query.q.as_deref(), capped(query.max_results))
        .await?;
    Ok(Json(SyncOutcome::success(
        format!("Found {} files", files.len()),
        files,
    )))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    max_results: Option<usize>,
}

async fn drive_recent(
    _user: AuthenticatedUser,
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> AppResult<Json<SyncOutcome<Vec<DriveFile>>>> {
    let files = state.sync.drive()?.get_recent_files(capped(query.max_results)).await?;
    Ok(Json(SyncOutcome::success(
        format!("Found {} recent files", files.len()),
        files,
    )))
}

async fn drive_spreadsheets(
    _user: AuthenticatedUser,
    State(state): State<AppState>,
) -> AppResult<Json<SyncOutcome<Vec<SpreadsheetSummary>>>> {
    let sheets = state.sync.sheets()?;
    let drive = state.sync.drive()?;
    let spreadsheets = sheets.available_spreadsheets(drive).await?;
    Ok(Json(SyncOutcome::success(
        format!("Found {} spreadsheets", spreadsheets.len()),
        spreadsheets,
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::router;
    use super::super::test_support::*;
    use super::{DriveHandler, SheetHandler};
    use crate::db::memory::MemoryUserRepository;
    use crate::sync::google::client::tests::client_for;
    use axum::http::StatusCode;
    use mockito::{Matcher, Server};

    async fn google_app(server: &mut Server) -> axum::Router {
        let client = client_for(server).await;
        let mut sync = no_sync();
        sync.sheets = Some(SheetHandler::new(client.clone()));
        sync.drive = Some(DriveHandler::new(client, "downloads"));
        router(state_with(Arc::new(MemoryUserRepository::new()), sync))
    }

    async fn mock_first_sheet(server: &mut Server) {
        server
            .mock("GET", "/v4/spreadsheets/sheet-1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"spreadsheetId": "sheet-1", "properties": {"title": "Ventas"},
                    "sheets": [{"properties": {"sheetId": 0, "title": "Hoja 1", "index": 0}}]}"#,
            )
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn test_sync_routes_require_auth() {
        let (status, _) = send(&app(), get("/sync-google-sheets/sheet-1", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_services_are_503() {
        let app = app();
        let token = register(&app, "a@x.com", "p1").await;

        let (status, body) = send(&app, get("/sync/dropbox/files?path=/informes", Some(&token))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Dropbox is not configured");

        let (status, _) = send(&app, get("/sync-google-sheets/sheet-1", Some(&token))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_status_reports_configuration() {
        let app = app();
        let token = register(&app, "a@x.com", "p1").await;

        let (status, body) = send(&app, get("/sync/status", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["configuration"]["database"], true);
        assert_eq!(body["configuration"]["dropbox"], false);
        assert!(body["dropbox"].is_null());
    }

    #[tokio::test]
    async fn test_sync_google_sheet_returns_values() {
        let mut server = Server::new_async().await;
        mock_first_sheet(&mut server).await;
        server
            .mock("GET", "/v4/spreadsheets/sheet-1/values/'Hoja%201'")
            .with_status(200)
            .with_body(r#"{"values": [["mes", "total"], ["enero", "1200"]]}"#)
            .create_async()
            .await;
        let app = google_app(&mut server).await;
        let token = register(&app, "a@x.com", "p1").await;

        let (status, body) = send(&app, get("/sync-google-sheets/sheet-1", Some(&token))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"][1][0], "enero");
    }

    #[tokio::test]
    async fn test_sync_unknown_spreadsheet_is_404() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v4/spreadsheets/missing")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        let app = google_app(&mut server).await;
        let token = register(&app, "a@x.com", "p1").await;

        let (status, body) = send(&app, get("/sync-google-sheets/missing", Some(&token))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_drive_files_passes_query() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "name contains 'ventas'".into()),
                Matcher::UrlEncoded("pageSize".into(), "5".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"files": [{"id": "f1", "name": "ventas.csv", "mimeType": "text/csv"}]}"#)
            .create_async()
            .await;
        let app = google_app(&mut server).await;
        let token = register(&app, "a@x.com", "p1").await;

        let (status, body) = send(
            &app,
            get(
                "/sync/drive/files?q=name%20contains%20%27ventas%27&max_results=5",
                Some(&token),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], "f1");
    }

    #[tokio::test]
    async fn test_drive_max_results_is_capped() {
        let mut server = Server::new_async().await;
        let files: Vec<_> = (0..1000)
            .map(|i| serde_json::json!({"id": format!("f{i}"), "name": "r.csv", "mimeType": "text/csv"}))
            .collect();
        let first = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded("pageSize".into(), "1000".into()))
            .with_status(200)
            .with_body(serde_json::json!({"files": files, "nextPageToken": "p2"}).to_string())
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_status(200)
            .with_body(r#"{"files": []}"#)
            .expect(0)
            .create_async()
            .await;
        let app = google_app(&mut server).await;
        let token = register(&app, "a@x.com", "p1").await;

        let (status, body) = send(
            &app,
            get("/sync/drive/files?max_results=1000000000", Some(&token)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1000);
        first.assert_async().await;
        second.assert_async().await;
    }
}
