//! Incrementally maintained per-group summaries of node tables.
//!
//! Three row triggers on the node table turn every insert, update and delete
//! into signed deltas (node count, cable length) for the touched row and for
//! the rows that name it as their parent, and fold them into the summary
//! table with one upsert per row event.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  Error as CoreError,
  catalog::MAX_IDENTIFIER_LEN,
  summary::{self, Aggregate, NodeSample, SkeletonSummary, SummaryMismatch, SummarySpec},
};
use tracing::{debug, info, warn};

use crate::{
  Result, catalog,
  encode::{RawSummary, read_time},
  plan::ident,
  session::{EDGE_LENGTH_FN, NOW_FN, TIME_FN},
};

/// Allowed drift between maintained and recomputed cable length.
const CABLE_TOLERANCE: f64 = 1e-6;

/// Statements derived from one [`SummarySpec`].
#[derive(Debug)]
struct SummaryPlan {
  create_table:     String,
  install_triggers: String,
  drop_triggers:    String,
  drop_table:       String,
  rebuild:          String,
  select_one:       String,
  select_all:       String,
  select_nodes:     String,
}

fn trigger_names(node_table: &str) -> [String; 3] {
  ["insert", "update", "delete"]
    .map(|event| format!("strata_{node_table}_summary_{event}"))
}

impl SummaryPlan {
  fn new(spec: &SummarySpec) -> Self {
    let n = ident(&spec.node_table);
    let s = ident(&spec.summary_table);
    let id = ident(&spec.id_column);
    let parent = ident(&spec.parent_column);
    let g = ident(&spec.group_column);
    let (x, y, z) = (
      ident(&spec.x_column),
      ident(&spec.y_column),
      ident(&spec.z_column),
    );
    let editor = ident(&spec.editor_column);
    let ct = ident(&spec.creation_time_column);
    let et = ident(&spec.edition_time_column);
    let now = format!("{NOW_FN}()");

    let dist = |a: &str, b: &str| {
      format!("{EDGE_LENGTH_FN}({a}.{x}, {a}.{y}, {a}.{z}, {b}.{x}, {b}.{y}, {b}.{z})")
    };
    // Length of the edge from row `r` to its parent; zero for roots,
    // self-loops and dangling parents.
    let own_edge = |r: &str| {
      format!(
        "(CASE WHEN {r}.{parent} IS NULL OR {r}.{parent} = {r}.{id} THEN 0.0
               ELSE COALESCE((SELECT {} FROM {n} AS p WHERE p.{id} = {r}.{parent}), 0.0) END)",
        dist(r, "p"),
      )
    };
    let children = |r: &str, delta: String| {
      format!(
        "SELECT c.{g}, 0, {delta}, NULL, NULL, NULL FROM {n} AS c
          WHERE c.{parent} = {r}.{id} AND c.{id} <> {r}.{id}"
      )
    };
    let upsert = |deltas: Vec<String>| {
      format!(
        "INSERT INTO {s} ({g}, num_nodes, cable_length, original_creation_time,
                         last_edition_time, last_editor_id, last_summary_update)
    SELECT d.g, SUM(d.dn), TOTAL(d.dc), MIN(d.ct), MAX(d.et), MAX(d.ed), {now}
      FROM ({}) AS d
     WHERE d.g IS NOT NULL
     GROUP BY d.g
    ON CONFLICT ({g}) DO UPDATE SET
      num_nodes = num_nodes + excluded.num_nodes,
      cable_length = cable_length + excluded.cable_length,
      original_creation_time = COALESCE(
        min(original_creation_time, excluded.original_creation_time),
        original_creation_time, excluded.original_creation_time),
      last_editor_id = CASE
        WHEN excluded.last_edition_time IS NOT NULL
         AND (last_edition_time IS NULL OR excluded.last_edition_time >= last_edition_time)
        THEN excluded.last_editor_id ELSE last_editor_id END,
      last_edition_time = COALESCE(
        max(last_edition_time, excluded.last_edition_time),
        last_edition_time, excluded.last_edition_time),
      last_summary_update = excluded.last_summary_update;",
        deltas.join("\n      UNION ALL\n      ")
      )
    };
    let node_row = |r: &str, sign: &str, stamped: bool| {
      let stamps = if stamped {
        format!(
          "{TIME_FN}({r}.{ct}) AS ct, {TIME_FN}({r}.{et}) AS et, {r}.{editor} AS ed"
        )
      } else {
        "NULL AS ct, NULL AS et, NULL AS ed".to_owned()
      };
      format!(
        "SELECT {r}.{g} AS g, {sign}1 AS dn, {sign}{} AS dc, {stamps}",
        own_edge(r),
      )
    };

    let [insert_name, update_name, delete_name] =
      trigger_names(&spec.node_table).map(|t| ident(&t));

    let on_insert = upsert(vec![
      node_row("NEW", "", true),
      children("NEW", dist("c", "NEW")),
    ]);
    let on_update = upsert(vec![
      node_row("OLD", "-", false),
      node_row("NEW", "", true),
      children("NEW", format!("{} - {}", dist("c", "NEW"), dist("c", "OLD"))),
    ]);
    let on_delete = upsert(vec![
      node_row("OLD", "-", false),
      children("OLD", format!("-{}", dist("c", "OLD"))),
    ]);

    let install_triggers = format!(
      "CREATE TRIGGER {insert_name} AFTER INSERT ON {n} FOR EACH ROW BEGIN
    {on_insert}
END;
CREATE TRIGGER {update_name}
AFTER UPDATE OF {id}, {parent}, {g}, {x}, {y}, {z}, {editor}, {ct}, {et} ON {n} FOR EACH ROW BEGIN
    {on_update}
END;
CREATE TRIGGER {delete_name} AFTER DELETE ON {n} FOR EACH ROW BEGIN
    {on_delete}
END;
"
    );
    let drop_triggers = trigger_names(&spec.node_table)
      .iter()
      .map(|t| format!("DROP TRIGGER IF EXISTS {};\n", ident(t)))
      .collect();

    let create_table = format!(
      "CREATE TABLE {s} (
    {g} INTEGER PRIMARY KEY,
    num_nodes              INTEGER NOT NULL DEFAULT 0,
    cable_length           REAL NOT NULL DEFAULT 0,
    original_creation_time TEXT,
    last_edition_time      TEXT,
    last_editor_id         INTEGER,
    last_summary_update    TEXT NOT NULL
);"
    );

    let rebuild = format!(
      "DELETE FROM {s};
INSERT INTO {s} ({g}, num_nodes, cable_length, original_creation_time,
                 last_edition_time, last_editor_id, last_summary_update)
SELECT n.{g}, COUNT(*), TOTAL({}), MIN({TIME_FN}(n.{ct})), MAX({TIME_FN}(n.{et})),
       (SELECT e.{editor} FROM {n} AS e WHERE e.{g} = n.{g}
         ORDER BY {TIME_FN}(e.{et}) DESC, e.{id} DESC LIMIT 1),
       {now}
  FROM {n} AS n
 WHERE n.{g} IS NOT NULL
 GROUP BY n.{g};",
      own_edge("n"),
    );

    let columns = format!(
      "{g}, num_nodes, cable_length, original_creation_time, \
       last_edition_time, last_editor_id, last_summary_update"
    );
    Self {
      create_table,
      install_triggers,
      drop_triggers,
      drop_table: format!("DROP TABLE IF EXISTS {s};"),
      rebuild,
      select_one: format!("SELECT {columns} FROM {s} WHERE {g} = ?1"),
      select_all: format!("SELECT {columns} FROM {s} ORDER BY {g}"),
      select_nodes: format!(
        "SELECT {id}, {parent}, {g}, {x}, {y}, {z}, {editor}, {ct}, {et} FROM {n}"
      ),
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

fn load_spec(conn: &Connection, node_table: &str) -> Result<Option<SummarySpec>> {
  let json: Option<String> = conn
    .query_row(
      "SELECT spec_json FROM strata_summary_table WHERE node_table_name = ?1",
      params![node_table],
      |row| row.get(0),
    )
    .optional()?;
  Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
}

fn require_spec(conn: &Connection, node_table: &str) -> Result<SummarySpec> {
  Ok(
    load_spec(conn, node_table)?
      .ok_or_else(|| CoreError::SummaryNotInstalled(node_table.to_owned()))?,
  )
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// Create the summary table and triggers for `spec` and fill the table.
/// Returns the number of groups.
pub fn install(conn: &Connection, spec: &SummarySpec) -> Result<usize> {
  if load_spec(conn, &spec.node_table)?.is_some() {
    return Err(CoreError::SummaryAlreadyInstalled(spec.node_table.clone()).into());
  }
  if spec.summary_table.len() > MAX_IDENTIFIER_LEN {
    return Err(CoreError::IdentifierTooLong(spec.summary_table.clone()).into());
  }

  let schema = catalog::require_schema(conn, &spec.node_table)?;
  for column in [
    &spec.id_column,
    &spec.parent_column,
    &spec.group_column,
    &spec.x_column,
    &spec.y_column,
    &spec.z_column,
    &spec.editor_column,
    &spec.creation_time_column,
    &spec.edition_time_column,
  ] {
    schema.require_column(column)?;
  }

  let plan = SummaryPlan::new(spec);
  debug!(table = %spec.node_table, sql = %plan.install_triggers, "installing summary triggers");
  conn.execute_batch(&plan.create_table)?;
  conn.execute_batch(&plan.install_triggers)?;
  conn.execute(
    &format!(
      "INSERT INTO strata_summary_table
         (node_table_name, summary_table_name, spec_json, creation_time)
       VALUES (?1, ?2, ?3, {NOW_FN}())"
    ),
    params![spec.node_table, spec.summary_table, serde_json::to_string(spec)?],
  )?;

  let groups = fill(conn, &plan)?;
  info!(
    table = %spec.node_table,
    summary = %spec.summary_table,
    groups,
    "summary installed"
  );
  Ok(groups)
}

pub fn uninstall(conn: &Connection, node_table: &str) -> Result<()> {
  let spec = require_spec(conn, node_table)?;
  let plan = SummaryPlan::new(&spec);
  conn.execute_batch(&plan.drop_triggers)?;
  conn.execute_batch(&plan.drop_table)?;
  conn.execute(
    "DELETE FROM strata_summary_table WHERE node_table_name = ?1",
    params![node_table],
  )?;
  info!(table = node_table, "summary uninstalled");
  Ok(())
}

/// Recompute the summary of `node_table` from scratch.
pub fn rebuild(conn: &Connection, node_table: &str) -> Result<usize> {
  let spec = require_spec(conn, node_table)?;
  let groups = fill(conn, &SummaryPlan::new(&spec))?;
  info!(table = node_table, groups, "summary rebuilt");
  Ok(groups)
}

fn fill(conn: &Connection, plan: &SummaryPlan) -> Result<usize> {
  conn.execute_batch(&plan.rebuild)?;
  Ok(conn.changes() as usize)
}

pub fn get(
  conn: &Connection,
  node_table: &str,
  group_id: i64,
) -> Result<Option<SkeletonSummary>> {
  let plan = SummaryPlan::new(&require_spec(conn, node_table)?);
  conn
    .query_row(&plan.select_one, params![group_id], RawSummary::from_row)
    .optional()?
    .map(RawSummary::into_summary)
    .transpose()
}

pub fn list(conn: &Connection, node_table: &str) -> Result<Vec<SkeletonSummary>> {
  let plan = SummaryPlan::new(&require_spec(conn, node_table)?);
  let mut stmt = conn.prepare(&plan.select_all)?;
  let raws = stmt
    .query_map([], RawSummary::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawSummary::into_summary).collect()
}

/// Compare the maintained summary of `node_table` with a recomputation over
/// the node table.
pub fn verify(conn: &Connection, node_table: &str) -> Result<Vec<SummaryMismatch>> {
  let spec = require_spec(conn, node_table)?;
  let plan = SummaryPlan::new(&spec);

  let mut stmt = conn.prepare(&plan.select_nodes)?;
  let rows = stmt
    .query_map([], |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, Option<i64>>(1)?,
        row.get::<_, Option<i64>>(2)?,
        [
          row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
          row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
          row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        ],
        row.get::<_, Option<i64>>(6)?,
        row.get::<_, Option<String>>(7)?,
        row.get::<_, Option<String>>(8)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let nodes = rows
    .into_iter()
    .map(|(id, parent_id, group_id, position, editor_id, ct, et)| {
      Ok(NodeSample {
        id,
        parent_id,
        group_id,
        position,
        editor_id,
        creation_time: ct.as_deref().map(read_time).transpose()?,
        edition_time: et.as_deref().map(read_time).transpose()?,
      })
    })
    .collect::<Result<Vec<_>>>()?;
  let expected = summary::recompute(&nodes);

  let maintained: BTreeMap<i64, Aggregate> = list(conn, node_table)?
    .into_iter()
    .map(|s| {
      (s.group_id, Aggregate {
        num_nodes:              s.num_nodes,
        cable_length:           s.cable_length,
        original_creation_time: s.original_creation_time,
        last_edition_time:      s.last_edition_time,
      })
    })
    .collect();

  let mismatches = summary::diff(&maintained, &expected, CABLE_TOLERANCE);
  if !mismatches.is_empty() {
    warn!(table = node_table, groups = mismatches.len(), "summary drift detected");
  }
  Ok(mismatches)
}
