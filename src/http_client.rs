use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Outbound HTTP client shared by the sync clients.
///
/// Every request is bounded by the client timeout. Reads that are safe to
/// repeat go through [`HttpClient::send_idempotent`], which retries transport
/// failures, 429 and 5xx with jittered exponential backoff. Writes use
/// [`HttpClient::send_once`] and are never retried.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry_policy: ExponentialBuilder,
}

impl HttpClient {
    pub fn new(timeout: Duration, read_retries: usize) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            retry_policy: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(2))
                .with_max_times(read_retries)
                .with_jitter(),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends a repeatable request. `build` is invoked once per attempt.
    pub async fn send_idempotent<F>(&self, build: F) -> reqwest::Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        (|| async {
            let resp = build(&self.client).send().await?;
            if is_retryable_status(resp.status()) {
                let status = resp.status();
                tracing::debug!(%status, url = %resp.url(), "Upstream returned retryable status");
                return resp.error_for_status();
            }
            Ok(resp)
        })
        .retry(self.retry_policy)
        .when(is_retryable_error)
        .await
    }

    pub async fn send_once(&self, request: RequestBuilder) -> reqwest::Result<Response> {
        request.send().await
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    err.status().map(is_retryable_status).unwrap_or(false)
}
