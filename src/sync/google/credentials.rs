use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http_client::HttpClient;
use crate::sync::{SyncError, SyncResult};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion (Google's maximum).
const ASSERTION_TTL_SECS: i64 = 3600;

/// Cached tokens are replaced this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a Google service-account JSON key that token minting needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub project_id: Option<String>,
    pub private_key_id: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Err(SyncError::Authentication(format!(
                "credentials file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::Authentication(format!("invalid service account key: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Mints and caches OAuth access tokens for a service account.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: HttpClient,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(http: HttpClient, key: ServiceAccountKey, scopes: &[String]) -> SyncResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SyncError::Authentication(format!("invalid private key: {e}")))?;
        Ok(Self {
            key,
            encoding_key,
            scope: scopes.join(" "),
            http,
            cache: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Returns a cached token, or exchanges a fresh signed assertion for one.
    pub async fn token(&self) -> SyncResult<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        debug!(client_email = %self.key.client_email, "Requesting Google access token");
        let assertion = self.sign_assertion()?;
        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
        let resp = self
            .http
            .send_idempotent(|c| c.post(&self.key.token_uri).form(&form))
            .await
            .map_err(|e| SyncError::from_reqwest("Google OAuth", e))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Authentication(format!(
                "Google rejected the service account assertion: {body}"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Connection(format!(
                "Google token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::from_reqwest("Google OAuth", e))?;
        info!(client_email = %self.key.client_email, "Obtained Google access token");

        let access_token = token.access_token.clone();
        *cache = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    /// Forgets the cached token so the next call mints a new one.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    fn sign_assertion(&self) -> SyncResult<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| SyncError::Authentication(format!("failed to sign assertion: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    pub(crate) fn fixture_key(token_uri: &str) -> ServiceAccountKey {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/service_account.json");
        let mut key = ServiceAccountKey::from_file(&path).unwrap();
        key.token_uri = token_uri.to_string();
        key
    }

    pub(crate) async fn mock_token(server: &mut Server) -> mockito::Mock {
        server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                JWT_BEARER_GRANT.into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token": "ya29.test", "expires_in": 3599, "token_type": "Bearer"}"#)
            .create_async()
            .await
    }

    fn http() -> HttpClient {
        HttpClient::new(Duration::from_secs(5), 0).unwrap()
    }

    #[test]
    fn test_missing_file_is_authentication_error() {
        let err = ServiceAccountKey::from_file(Path::new("/no/such/service_account.json"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
    }

    #[test]
    fn test_key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "a@b.iam.gserviceaccount.com", "private_key": "x"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert!(!format!("{key:?}").contains("private_key:"));
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "a@b.iam.gserviceaccount.com", "private_key": "not a pem"}"#,
        )
        .unwrap();
        let err = ServiceAccountAuth::new(http(), key, &[]).err().unwrap();
        assert!(matches!(err, SyncError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token": "ya29.test", "expires_in": 3599}"#)
            .expect(1)
            .create_async()
            .await;
        let key = fixture_key(&format!("{}/token", server.url()));
        let auth = ServiceAccountAuth::new(http(), key, &["scope-a".to_string()]).unwrap();

        assert_eq!(auth.token().await.unwrap(), "ya29.test");
        assert_eq!(auth.token().await.unwrap(), "ya29.test");
        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_assertion() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;
        let key = fixture_key(&format!("{}/token", server.url()));
        let auth = ServiceAccountAuth::new(http(), key, &[]).unwrap();

        let err = auth.token().await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
    }

    #[test]
    fn test_assertion_claims() {
        let key = fixture_key("https://oauth2.googleapis.com/token");
        let auth = ServiceAccountAuth::new(
            http(),
            key,
            &["https://www.googleapis.com/auth/spreadsheets".to_string(), "b".to_string()],
        )
        .unwrap();

        let assertion = auth.sign_assertion().unwrap();
        let header = jsonwebtoken::decode_header(&assertion).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("test-key-1"));

        let payload = assertion.split('.').nth(1).unwrap();
        use base64::Engine as _;
        let claims: serde_json::Value = serde_json::from_slice(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(payload)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            claims["scope"],
            "https://www.googleapis.com/auth/spreadsheets b"
        );
        assert_eq!(claims["aud"], "https://oauth2.googleapis.com/token");
        assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 3600);
    }
}
