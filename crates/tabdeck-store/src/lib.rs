pub mod database;
pub mod display_cache;
pub mod error;
pub mod schema;

pub use database::Database;
pub use display_cache::{spawn_writer, DisplayCache, DisplayRecord, DISPLAY_RECORD};
pub use error::StoreError;
