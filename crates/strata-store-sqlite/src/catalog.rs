//! Catalog access: tracked tables, inheritance links and live-table
//! introspection.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  Error as CoreError,
  catalog::{CatalogEntry, history_table_name},
  schema::{ColumnDef, TableSchema, TableTree},
};

use crate::{
  Result,
  encode::RawCatalogEntry,
  schema::INTERNAL_PREFIX,
  session::NOW_FN,
};

// ─── Introspection ───────────────────────────────────────────────────────────

/// Columns of `table`, or `None` if it does not exist.
pub fn introspect(conn: &Connection, table: &str) -> Result<Option<TableSchema>> {
  let mut stmt =
    conn.prepare_cached("SELECT name, type, pk FROM pragma_table_info(?1)")?;
  let columns = stmt
    .query_map(params![table], |row| {
      Ok(ColumnDef {
        name:        row.get(0)?,
        decl_type:   row.get(1)?,
        pk_position: row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  if columns.is_empty() {
    return Ok(None);
  }
  Ok(Some(TableSchema { name: table.to_owned(), columns }))
}

pub fn require_schema(conn: &Connection, table: &str) -> Result<TableSchema> {
  Ok(
    introspect(conn, table)?
      .ok_or_else(|| CoreError::UnknownTable(table.to_owned()))?,
  )
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
  let found = conn
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
      params![table],
      |_| Ok(()),
    )
    .optional()?;
  Ok(found.is_some())
}

// ─── Catalog entries ─────────────────────────────────────────────────────────

fn query_entries(
  conn: &Connection,
  filter: &str,
  args: impl rusqlite::Params,
) -> Result<Vec<CatalogEntry>> {
  let sql = format!(
    "SELECT {} FROM strata_history_table {filter}",
    RawCatalogEntry::COLUMNS
  );
  let mut stmt = conn.prepare_cached(&sql)?;
  let raws = stmt
    .query_map(args, RawCatalogEntry::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawCatalogEntry::into_entry).collect()
}

pub fn lookup(conn: &Connection, live_table: &str) -> Result<Option<CatalogEntry>> {
  Ok(
    query_entries(conn, "WHERE live_table_name = ?1", params![live_table])?
      .into_iter()
      .next(),
  )
}

pub fn require(conn: &Connection, live_table: &str) -> Result<CatalogEntry> {
  Ok(
    lookup(conn, live_table)?
      .ok_or_else(|| CoreError::NotTracked(live_table.to_owned()))?,
  )
}

pub fn list(conn: &Connection) -> Result<Vec<CatalogEntry>> {
  query_entries(conn, "ORDER BY live_table_name", [])
}

/// Register `live_table`. Returns the existing entry if already registered.
pub fn register(
  conn: &Connection,
  live_table: &str,
  time_column: Option<&str>,
) -> Result<CatalogEntry> {
  if let Some(entry) = lookup(conn, live_table)? {
    return Ok(entry);
  }

  let schema = require_schema(conn, live_table)?;
  schema.check_reserved()?;
  let pkey = schema.primary_key()?.name.clone();
  if let Some(column) = time_column {
    schema.require_column(column)?;
  }
  let history = history_table_name(live_table)?;

  let parent_history = match inheritance_tree(conn)?.parent(live_table) {
    Some(parent) => Some(match lookup(conn, parent)? {
      Some(entry) => entry.history_table_name,
      None => history_table_name(parent)?,
    }),
    None => None,
  };

  conn.execute(
    &format!(
      "INSERT INTO strata_history_table
         (history_table_name, live_table_name, triggers_installed,
          live_table_time_column, live_table_pkey_column,
          parent_history_table, creation_time)
       VALUES (?1, ?2, 0, ?3, ?4, ?5, {NOW_FN}())"
    ),
    params![history, live_table, time_column, pkey, parent_history],
  )?;
  require(conn, live_table)
}

pub fn set_triggers_installed(
  conn: &Connection,
  live_table: &str,
  installed: bool,
) -> Result<()> {
  conn.execute(
    "UPDATE strata_history_table SET triggers_installed = ?2
      WHERE live_table_name = ?1",
    params![live_table, installed],
  )?;
  Ok(())
}

pub fn remove(conn: &Connection, live_table: &str) -> Result<()> {
  conn.execute(
    "DELETE FROM strata_history_table WHERE live_table_name = ?1",
    params![live_table],
  )?;
  Ok(())
}

/// Tracked tables whose parent history table is `history_table`.
pub fn children_of(conn: &Connection, history_table: &str) -> Result<Vec<CatalogEntry>> {
  query_entries(
    conn,
    "WHERE parent_history_table = ?1 ORDER BY live_table_name",
    params![history_table],
  )
}

// ─── Inheritance ─────────────────────────────────────────────────────────────

pub fn inheritance_tree(conn: &Connection) -> Result<TableTree> {
  let mut stmt = conn
    .prepare_cached("SELECT child_table, parent_table FROM strata_table_inheritance")?;
  let links = stmt
    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(TableTree::from_links(links)?)
}

/// Record that `child` extends `parent`, after checking that both tables
/// exist, that `child` carries every column of `parent` and that the link
/// keeps the inheritance graph a forest.
pub fn declare_inheritance(conn: &Connection, child: &str, parent: &str) -> Result<()> {
  let child_schema = require_schema(conn, child)?;
  let parent_schema = require_schema(conn, parent)?;
  child_schema.check_extends(&parent_schema)?;

  let mut tree = inheritance_tree(conn)?;
  tree.link(child, parent)?;

  conn.execute(
    "INSERT OR IGNORE INTO strata_table_inheritance (child_table, parent_table)
     VALUES (?1, ?2)",
    params![child, parent],
  )?;

  // A child registered before the link was declared picks up its parent now.
  if let Some(entry) = lookup(conn, child)?
    && entry.parent_history_table.is_none()
  {
    let parent_history = match lookup(conn, parent)? {
      Some(p) => p.history_table_name,
      None => history_table_name(parent)?,
    };
    conn.execute(
      "UPDATE strata_history_table SET parent_history_table = ?2
        WHERE live_table_name = ?1",
      params![child, parent_history],
    )?;
  }
  Ok(())
}

// ─── Audit ───────────────────────────────────────────────────────────────────

/// User tables that are neither tracked, derived by strata, nor exempt.
pub fn audit_untracked(conn: &Connection, exempt: &[String]) -> Result<Vec<String>> {
  let mut known: HashSet<String> = exempt.iter().cloned().collect();
  for entry in list(conn)? {
    known.insert(entry.live_table_name);
    known.insert(entry.history_table_name);
  }
  let mut stmt = conn.prepare_cached("SELECT summary_table_name FROM strata_summary_table")?;
  for name in stmt.query_map([], |row| row.get::<_, String>(0))? {
    known.insert(name?);
  }

  let mut stmt = conn.prepare_cached(
    "SELECT name FROM sqlite_master
      WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
      ORDER BY name",
  )?;
  let tables = stmt
    .query_map([], |row| row.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(
    tables
      .into_iter()
      .filter(|t| !t.starts_with(INTERNAL_PREFIX) && !known.contains(t))
      .collect(),
  )
}
