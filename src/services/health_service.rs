use std::sync::Arc;

use serde::Serialize;
use tracing::error;

use crate::db::UserRepository;

pub const SERVICES: &[&str] = &["auth", "reports", "sync"];

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub services: Vec<&'static str>,
}

#[derive(Clone)]
pub struct HealthService {
    repo: Arc<dyn UserRepository>,
}

impl HealthService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// `None` when the database does not answer.
    pub async fn check(&self) -> Option<HealthReport> {
        match self.repo.ping().await {
            Ok(()) => Some(HealthReport {
                status: "healthy",
                database: "connected",
                services: SERVICES.to_vec(),
            }),
            Err(e) => {
                error!(error = %e, "Health check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryUserRepository;

    #[tokio::test]
    async fn test_reports_database_state() {
        let repo = Arc::new(MemoryUserRepository::new());
        let health = HealthService::new(repo.clone());

        let report = health.check().await.unwrap();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.services, vec!["auth", "reports", "sync"]);

        repo.set_offline(true);
        assert!(health.check().await.is_none());
    }
}
