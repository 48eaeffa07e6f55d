//! Walks through the Dropbox authorization-code flow and prints the refresh
//! token to put in `DROPBOX_REFRESH_TOKEN`.

use std::time::Duration;

use anyhow::{bail, Context};
use pyme_reporter::config::DropboxCredentials;
use pyme_reporter::http_client::HttpClient;
use pyme_reporter::sync::dropbox::DropboxClient;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pyme_reporter=warn".into()),
        )
        .init();

    let credentials = DropboxCredentials::from_env();
    if !credentials.has_app() {
        bail!("DROPBOX_APP_KEY and DROPBOX_APP_SECRET must be set");
    }

    let http = HttpClient::new(Duration::from_secs(30), 0).context("Failed to build HTTP client")?;
    let client = DropboxClient::new(http, credentials);

    println!("1. Open this URL and approve the app:");
    println!("   {}", client.authorize_url()?);
    println!("2. Paste the authorization code here:");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let code = lines
        .next_line()
        .await
        .context("Failed to read authorization code")?
        .unwrap_or_default();
    if code.trim().is_empty() {
        bail!("No authorization code entered");
    }

    let granted = client.exchange_code(&code).await?;
    match granted.refresh_token {
        Some(refresh_token) => {
            println!();
            println!("DROPBOX_REFRESH_TOKEN={}", refresh_token);
            if let Some(account_id) = granted.account_id {
                println!("# account {}", account_id);
            }
        }
        None => bail!("Dropbox did not return a refresh token"),
    }

    Ok(())
}
