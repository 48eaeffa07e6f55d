pub mod auth_service;
pub mod health_service;
pub mod user_service;

pub use auth_service::AuthService;
pub use health_service::HealthService;
pub use user_service::UserService;
