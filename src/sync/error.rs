use thiserror::Error;

/// Failures raised by the Dropbox and Google sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Spreadsheet not found: {0}")]
    SheetNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unexpected data format: {0}")]
    DataFormat(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Remote file already exists: {0}")]
    AlreadyExists(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Classifies a transport-level failure. Status codes are inspected by the
    /// callers that know which lookup was attempted.
    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SyncError::DataFormat(format!("{service} returned an unexpected payload: {err}"));
        }
        SyncError::Connection(format!("{service} request failed: {err}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
