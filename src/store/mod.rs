//! Persistence layer — SQLite-backed storage for sessions, cards, votes, and settings.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
