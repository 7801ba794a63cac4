//! SQLite backend for strata.
//!
//! History tables, change capture and summary maintenance are realised as
//! ordinary SQLite tables and generated row-level triggers. The blocking
//! [`Engine`] does the work on a `rusqlite` connection; [`SqliteStore`] wraps
//! it with [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime.

mod catalog;
mod encode;
mod engine;
mod manager;
mod plan;
mod query;
mod schema;
mod session;
mod store;
mod summary;
mod sync;
mod tracking;

pub mod error;

pub use encode::{decode_dt, encode_dt};
pub use engine::Engine;
pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
