//! Transaction state management
//!
//! Handles:
//! - The pending set and bounded history behind one lock
//! - History persistence through a key-value store
//! - In-memory, file and PostgreSQL store backends

pub mod book;
pub mod history;
pub mod postgres;
pub mod store;

pub use book::{BookInner, TxBook};
pub use history::HistoryStore;
pub use postgres::PgStore;
pub use store::{FileStore, KeyValueStore, MemoryStore};
