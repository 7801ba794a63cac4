//! Core types and trait definitions for strata, a temporal history engine.
//!
//! strata mirrors every tracked live table into a history table whose rows
//! carry a validity interval, and keeps per-group summaries of tree-shaped
//! node tables up to date. This crate holds the storage-independent parts;
//! it depends on no database.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod catalog;
pub mod clock;
pub mod error;
pub mod period;
pub mod schema;
pub mod store;
pub mod summary;

pub use error::{Error, Result};
