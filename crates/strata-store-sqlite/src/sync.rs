//! Bringing a history table in line with its live table.

use rusqlite::Connection;
use strata_core::{Error as CoreError, store::SyncReport};
use tracing::info;

use crate::{Result, engine::Engine};

/// Copy every live row into the empty history table of `live_table`.
pub fn populate(engine: &Engine, conn: &Connection, live_table: &str) -> Result<u64> {
  let plan = engine.plan(conn, live_table)?;
  let existing: i64 = conn.query_row(&plan.count_history(), [], |row| row.get(0))?;
  if existing > 0 {
    return Err(CoreError::HistoryNotEmpty(plan.history_table.clone()).into());
  }

  let rows = conn.execute(&plan.populate, [])? as u64;
  info!(table = live_table, rows, "history table populated");
  Ok(rows)
}

/// Version changed live rows and open a version for every live row that
/// lacks one. Open versions of deleted live rows are left alone.
pub fn sync(engine: &Engine, conn: &Connection, live_table: &str) -> Result<SyncReport> {
  let plan = engine.plan(conn, live_table)?;

  let rewritten = conn.execute(&plan.sync_rewrite, [])? as u64;
  let closed = conn.execute(&plan.sync_close, [])? as u64;
  let opened = conn.execute(&plan.sync_open_missing, [])? as u64;

  let report = SyncReport {
    updated:  rewritten + closed,
    inserted: opened.saturating_sub(closed),
    closed:   0,
  };
  info!(
    table = live_table,
    updated = report.updated,
    inserted = report.inserted,
    "history table synced"
  );
  Ok(report)
}

/// End the open versions of keys that no longer exist in the live table.
///
/// Versions opened by the current transaction are removed rather than
/// closed. Returns the number of keys affected.
pub fn close_orphans(engine: &Engine, conn: &Connection, live_table: &str) -> Result<u64> {
  let plan = engine.plan(conn, live_table)?;
  let removed = conn.execute(&plan.remove_orphans, [])? as u64;
  let closed = conn.execute(&plan.close_orphans, [])? as u64;
  Ok(removed + closed)
}
