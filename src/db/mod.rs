pub mod pool;
pub mod users;

#[cfg(test)]
pub mod memory;

pub use pool::{create_pool, run_migrations};
pub use users::{PgUserRepository, UserRepository};
