pub mod database;
pub mod error;
pub mod schema;

pub use database::SqliteUsageStore;
pub use error::StorageError;

pub const USAGE_DB_FILENAME: &str = "usage.db";
