//! Raindrop Sync database layer.
//!
//! One SQLite file holds the native bookmark tree and the key-value store.
//!
//! ```no_run
//! use raindrop_sync::database::Database;
//!
//! let db = Database::open("raindrop-sync.db").expect("failed to open database");
//! let conn = db.connection();
//! ```

pub mod connection;
pub mod migrations;

pub use connection::Database;
