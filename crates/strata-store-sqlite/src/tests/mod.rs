//! Integration tests for `SqliteStore` against in-memory databases.

mod history;
mod tracking;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_core::{catalog::ChangeContext, clock::ManualClock};

use crate::{Error, SqliteStore};

pub(super) fn t(secs: i64) -> DateTime<Utc> {
  DateTime::from_timestamp(secs, 0).unwrap()
}

pub(super) fn admin() -> ChangeContext { ChangeContext::migration(1, "test setup") }

pub(super) fn user() -> ChangeContext { ChangeContext::backend(7) }

/// A store whose write transactions start at the time of `clock`.
pub(super) async fn store_at(secs: i64) -> (SqliteStore, Arc<ManualClock>) {
  let clock = Arc::new(ManualClock::at_secs(secs));
  let store = SqliteStore::open_in_memory_with_clock(clock.clone())
    .await
    .expect("in-memory store");
  (store, clock)
}

/// Run `sql` as one application write.
pub(super) async fn exec(store: &SqliteStore, sql: &str) -> Result<(), Error> {
  let sql = sql.to_owned();
  store.write(user(), move |tx| tx.execute_batch(&sql)).await
}

pub(super) async fn count(store: &SqliteStore, sql: &str) -> i64 {
  let sql = sql.to_owned();
  store
    .query(move |conn| conn.query_row(&sql, [], |row| row.get(0)))
    .await
    .unwrap()
}
