//! Switching change capture on and off.

use rusqlite::Connection;
use strata_core::store::{SyncReport, TrackingFailure, TrackingReport};
use tracing::{debug, info, warn};

use crate::{
  Result, catalog,
  engine::Engine,
  plan::drop_triggers_sql,
  sync,
};

/// (Re)create the change-capture triggers of `live_table`.
pub fn install_triggers(engine: &Engine, conn: &Connection, live_table: &str) -> Result<()> {
  let plan = engine.plan(conn, live_table)?;
  debug!(table = live_table, sql = %plan.install_triggers, "installing triggers");
  conn.execute_batch(&plan.drop_triggers)?;
  conn.execute_batch(&plan.install_triggers)?;
  catalog::set_triggers_installed(conn, live_table, true)
}

/// Drop the change-capture triggers of `live_table`, whether or not they
/// are currently installed.
pub fn remove_triggers(conn: &Connection, live_table: &str) -> Result<()> {
  conn.execute_batch(&drop_triggers_sql(live_table))?;
  Ok(())
}

/// Returns whether tracking was on before the call.
pub fn disable(conn: &Connection, live_table: &str) -> Result<bool> {
  let entry = catalog::require(conn, live_table)?;
  remove_triggers(conn, live_table)?;
  catalog::set_triggers_installed(conn, live_table, false)?;
  if entry.triggers_installed {
    info!(table = live_table, "tracking disabled");
  }
  Ok(entry.triggers_installed)
}

/// Catch up on changes made while untracked, then install the triggers.
/// Returns `None` if tracking was already on.
pub fn enable(
  engine: &Engine,
  conn: &Connection,
  live_table: &str,
) -> Result<Option<SyncReport>> {
  let entry = catalog::require(conn, live_table)?;
  if entry.triggers_installed {
    return Ok(None);
  }

  let mut report = sync::sync(engine, conn, live_table)?;
  report.closed = sync::close_orphans(engine, conn, live_table)?;
  install_triggers(engine, conn, live_table)?;

  info!(
    table = live_table,
    updated = report.updated,
    inserted = report.inserted,
    closed = report.closed,
    "tracking enabled"
  );
  Ok(Some(report))
}

/// Enable every tracked table that is currently off.
///
/// With `allow_silent_failure`, each table runs in its own savepoint and a
/// failing table is rolled back and reported; otherwise the first failure is
/// returned.
pub fn enable_all(
  engine: &Engine,
  conn: &Connection,
  allow_silent_failure: bool,
) -> Result<TrackingReport> {
  let mut report = TrackingReport::default();

  for entry in catalog::list(conn)? {
    if entry.triggers_installed {
      continue;
    }
    let live_table = entry.live_table_name;

    if !allow_silent_failure {
      enable(engine, conn, &live_table)?;
      report.enabled.push(live_table);
      continue;
    }

    conn.execute_batch("SAVEPOINT strata_enable")?;
    match enable(engine, conn, &live_table) {
      Ok(_) => {
        conn.execute_batch("RELEASE strata_enable")?;
        report.enabled.push(live_table);
      }
      Err(err) => {
        conn.execute_batch("ROLLBACK TO strata_enable; RELEASE strata_enable")?;
        engine.forget_plan(&live_table);
        warn!(table = %live_table, error = %err, "could not enable tracking");
        report.failed.push(TrackingFailure {
          live_table,
          error: err.to_string(),
        });
      }
    }
  }
  Ok(report)
}

/// Disable every tracked table; returns how many were on.
pub fn disable_all(conn: &Connection) -> Result<usize> {
  let mut count = 0;
  for entry in catalog::list(conn)? {
    if disable(conn, &entry.live_table_name)? {
      count += 1;
    }
  }
  Ok(count)
}
