//! SQLite-backed storage implementation.

mod comments;
pub mod config;
mod create;
mod delete;
mod dependencies;
mod dirty;
mod ids;
mod issues;
mod labels;
pub mod migrate;
mod queries;
pub mod schema;
mod store;
mod transaction;

pub use store::SqliteStore;
