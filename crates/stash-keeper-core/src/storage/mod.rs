pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::BackupRecord;
pub use sqlite::HashIndex;
