pub mod config;
pub mod db;
pub mod error;
pub mod http_client;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod sync;

pub use config::Config;
pub use error::{AppError, AppResult};
