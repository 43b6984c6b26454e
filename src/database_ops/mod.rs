//! SQLite and filesystem implementations of the migration collaborators.

pub mod db;
pub mod job_state;
pub mod media_library;
pub mod submissions;

pub use db::Db;
pub use job_state::SqliteJobStore;
pub use media_library::LocalMediaLibrary;
pub use submissions::SqliteRecordStore;
