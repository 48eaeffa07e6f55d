//! Checks configuration, the database connection and remote access for the
//! Google and Dropbox integrations, printing one line per check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pyme_reporter::config::{Config, GoogleCredentials};
use pyme_reporter::db::{create_pool, PgUserRepository, UserRepository};
use pyme_reporter::http_client::HttpClient;
use pyme_reporter::sync::dropbox::DropboxClient;
use pyme_reporter::sync::google::{DriveHandler, GoogleClient, ServiceAccountKey, SheetHandler};

fn mark(ok: bool) -> &'static str {
    if ok {
        "OK "
    } else {
        "ERR"
    }
}

async fn check_database(config: &Config) {
    println!("=== Database ===");
    let pool = match create_pool(&config.database_url, 1).await {
        Ok(pool) => pool,
        Err(e) => {
            println!("[ERR] connect: {}", e);
            return;
        }
    };
    println!("[OK ] connect");
    match PgUserRepository::new(pool.clone()).ping().await {
        Ok(()) => println!("[OK ] SELECT 1"),
        Err(e) => println!("[ERR] SELECT 1: {}", e),
    }
    pool.close().await;
}

async fn check_google(config: &Config, http: HttpClient) {
    println!("=== Google API ===");
    let GoogleCredentials {
        service_account_file,
        ..
    } = &config.google;

    match ServiceAccountKey::from_file(service_account_file) {
        Ok(key) => {
            let complete = key.project_id.is_some();
            println!(
                "[{}] service account file {} ({})",
                mark(complete),
                service_account_file.display(),
                key.client_email
            );
            if !complete {
                println!("      key file has no project_id");
            }
        }
        Err(e) => {
            println!("[ERR] service account file: {}", e);
            return;
        }
    }

    let client: Arc<GoogleClient> = GoogleClient::new(http, config.google.clone()).into_shared();
    match client.test_connection().await {
        Ok(conn) => println!(
            "[OK ] connected as {} ({} spreadsheets visible)",
            conn.client_email, conn.sheets_available
        ),
        Err(e) => {
            println!("[ERR] connection: {}", e);
            return;
        }
    }

    let drive = DriveHandler::new(client.clone(), config.sync_dirs.downloads.clone());
    let sheets = SheetHandler::new(client);
    match sheets.available_spreadsheets(&drive).await {
        Ok(sheets) => {
            println!("[OK ] sheets access: {} spreadsheets", sheets.len());
            for sheet in sheets.iter().take(5) {
                println!("      {} ({})", sheet.title, sheet.id);
            }
        }
        Err(e) => println!("[ERR] sheets access: {}", e),
    }

    if let Some(key) = &config.google.default_spreadsheet_id {
        match sheets.get_spreadsheet(key).await {
            Ok(spreadsheet) => println!(
                "[OK ] default spreadsheet \"{}\" ({} worksheets)",
                spreadsheet.title,
                spreadsheet.worksheets.len()
            ),
            Err(e) => println!("[ERR] default spreadsheet {}: {}", key, e),
        }
    }

    match drive.list_files(None, Some(10)).await {
        Ok(files) => {
            println!("[OK ] drive access: {} files", files.len());
            for file in files.iter().take(5) {
                println!("      {} [{}]", file.name, file.mime_type);
            }
        }
        Err(e) => println!("[ERR] drive access: {}", e),
    }
}

async fn check_dropbox(config: &Config, http: HttpClient) {
    println!("=== Dropbox API ===");
    let creds = &config.dropbox;
    println!("[{}] app key present", mark(creds.app_key.is_some()));
    println!("[{}] app secret present", mark(creds.app_secret.is_some()));
    let token_present = creds.refresh_token.is_some() || creds.access_token.is_some();
    println!("[{}] token present", mark(token_present));
    if !token_present {
        return;
    }

    let client = DropboxClient::new(http, creds.clone());
    match client.test_connection().await {
        Ok(account) => println!(
            "[OK ] connected as {} <{}>",
            account.name,
            account.email.as_deref().unwrap_or("no email")
        ),
        Err(e) => println!("[ERR] connection: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pyme_reporter=warn".into()),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let http = HttpClient::new(
        Duration::from_secs(config.http_timeout_secs),
        config.http_read_retries,
    )
    .context("Failed to build HTTP client")?;

    println!("=== Configuration ===");
    let validation = config.validate();
    println!("[{}] database", mark(validation.database));
    println!("[{}] google_api", mark(validation.google_api));
    println!("[{}] dropbox", mark(validation.dropbox));
    println!();

    check_database(&config).await;
    println!();
    check_google(&config, http.clone()).await;
    println!();
    check_dropbox(&config, http).await;

    Ok(())
}
