pub mod config;
pub mod database;
pub mod json_store;
pub mod snapshot_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use json_store::JsonSnapshotStore;
pub use snapshot_repository::PgSnapshotStore;
