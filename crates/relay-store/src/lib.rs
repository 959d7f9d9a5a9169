pub mod backend;
pub mod clock;
pub mod database;
pub mod error;
pub mod memory;
pub mod row_helpers;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use backend::ContextBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use store::{Lookup, SessionStore, StoreConfig};
