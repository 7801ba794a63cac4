//! Creating, dropping and extending history tables.

use rusqlite::Connection;
use strata_core::{
  Error as CoreError,
  catalog::CatalogEntry,
  store::CreateOptions,
};
use tracing::{debug, info};

use crate::{Result, catalog, engine::Engine, plan::ident, sync, tracking};

/// Create the history table described by `options`, and those of its
/// declared ancestors first when `copy_inheritance` is set.
pub fn create(
  engine: &Engine,
  conn: &Connection,
  options: &CreateOptions,
) -> Result<CatalogEntry> {
  if options.copy_inheritance {
    let tree = catalog::inheritance_tree(conn)?;
    for ancestor in tree.ancestors(&options.live_table) {
      create_one(engine, conn, ancestor, None, options)?;
    }
  }
  create_one(
    engine,
    conn,
    &options.live_table,
    options.time_column.as_deref(),
    options,
  )
}

fn create_one(
  engine: &Engine,
  conn: &Connection,
  live_table: &str,
  time_column: Option<&str>,
  options: &CreateOptions,
) -> Result<CatalogEntry> {
  let entry = catalog::register(conn, live_table, time_column)?;

  // An existing history table is left as it is.
  if catalog::table_exists(conn, &entry.history_table_name)? {
    debug!(table = live_table, history = %entry.history_table_name, "history table exists");
    return Ok(entry);
  }

  let plan = engine.plan(conn, live_table)?;
  debug!(table = live_table, sql = %plan.create_history, "creating history table");
  conn.execute_batch(&plan.create_history)?;
  info!(
    table = live_table,
    history = %entry.history_table_name,
    "history table created"
  );

  if options.sync {
    sync::sync(engine, conn, live_table)?;
  }
  if options.install_triggers && !entry.triggers_installed {
    tracking::install_triggers(engine, conn, live_table)?;
  }
  catalog::require(conn, live_table)
}

/// Drop the history table of `live_table` and of every tracked descendant.
pub fn drop_with_descendants(engine: &Engine, conn: &Connection, live_table: &str) -> Result<()> {
  let root = catalog::require(conn, live_table)?;

  // Pre-order walk over catalog parent links, dropped in reverse so every
  // child goes before its parent.
  let mut order = Vec::new();
  let mut stack = vec![root];
  while let Some(entry) = stack.pop() {
    stack.extend(catalog::children_of(conn, &entry.history_table_name)?);
    order.push(entry);
  }
  for entry in order.into_iter().rev() {
    drop_one(engine, conn, &entry)?;
  }
  Ok(())
}

/// Drop every history table; returns how many were dropped.
pub fn drop_all(engine: &Engine, conn: &Connection) -> Result<usize> {
  let entries = catalog::list(conn)?;
  for entry in &entries {
    drop_one(engine, conn, entry)?;
  }
  Ok(entries.len())
}

fn drop_one(engine: &Engine, conn: &Connection, entry: &CatalogEntry) -> Result<()> {
  tracking::remove_triggers(conn, &entry.live_table_name)?;
  conn.execute_batch(&format!(
    "DROP TABLE IF EXISTS {}",
    ident(&entry.history_table_name)
  ))?;
  catalog::remove(conn, &entry.live_table_name)?;
  engine.forget_plan(&entry.live_table_name);
  info!(
    table = %entry.live_table_name,
    history = %entry.history_table_name,
    "history table dropped"
  );
  Ok(())
}

/// Add columns the live table gained to its history table and regenerate
/// its triggers. Returns the added column names.
pub fn refresh_schema(
  engine: &Engine,
  conn: &Connection,
  live_table: &str,
) -> Result<Vec<String>> {
  let entry = catalog::require(conn, live_table)?;
  let live = catalog::require_schema(conn, live_table)?;
  live.check_reserved()?;
  let history = catalog::introspect(conn, &entry.history_table_name)?
    .ok_or_else(|| CoreError::UnknownTable(entry.history_table_name.clone()))?;

  engine.forget_plan(live_table);
  let plan = engine.plan(conn, live_table)?;

  let mut added = Vec::new();
  for column in &live.columns {
    if history.column(&column.name).is_none() {
      conn.execute(&plan.add_history_column(&column.name, &column.decl_type), [])?;
      added.push(column.name.clone());
    }
  }

  if entry.triggers_installed {
    tracking::install_triggers(engine, conn, live_table)?;
  }
  if !added.is_empty() {
    info!(table = live_table, columns = ?added, "history schema refreshed");
  }
  Ok(added)
}
