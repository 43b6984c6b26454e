//! Batched, resumable migration of remote image URLs in form submissions into a
//! local media library.

pub mod api;
pub mod cli;
pub mod config;
pub mod database_ops;
pub mod migration;
pub mod logging;

pub mod util {
    pub mod env;
}

pub use config::{MigrationService, MigratorConfig};
pub use migration::{MigrationCoordinator, MigrationError, Target};
