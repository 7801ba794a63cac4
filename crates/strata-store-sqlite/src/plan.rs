//! Per-table statement plans.
//!
//! A [`TablePlan`] is derived once from a catalog entry and the live table's
//! columns. It holds every statement the engine runs against that table pair:
//! history DDL, the three change-capture triggers, the synchronisation steps
//! and the history reads.

use strata_core::{
  catalog::{CatalogEntry, PERIOD_FROM_COLUMN, PERIOD_TO_COLUMN, TRANSACTION_COLUMN},
  schema::TableSchema,
};

use crate::session::{NOW_FN, TIME_AFTER_FN, TIME_FN, TXID_FN};

/// Message prefix of the abort raised when no open version can be closed.
pub const MISSING_OPEN_MARKER: &str = "strata:missing_open_interval:";
/// Message prefix of the abort raised when a key already has an open version.
pub const DUPLICATE_OPEN_MARKER: &str = "strata:duplicate_open_interval:";
/// Message prefix of the error raised for a native time that cannot be read.
pub const INVALID_TIME_MARKER: &str = "strata:invalid_time:";

/// Quote an SQL identifier.
pub fn ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal.
pub fn literal(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}

/// Names of the change-capture triggers of `live_table`:
/// insert, update, delete.
pub fn trigger_names(live_table: &str) -> [String; 3] {
  ["insert", "update", "delete"]
    .map(|event| format!("strata_{live_table}_history_{event}"))
}

/// Statements dropping the change-capture triggers of `live_table`.
pub fn drop_triggers_sql(live_table: &str) -> String {
  trigger_names(live_table)
    .iter()
    .map(|name| format!("DROP TRIGGER IF EXISTS {};\n", ident(name)))
    .collect()
}

#[derive(Debug)]
pub struct TablePlan {
  pub live_table:    String,
  pub history_table: String,
  pub pkey_column:   String,
  pub time_column:   Option<String>,
  pub schema:        TableSchema,
  /// Quoted live column names, in table order.
  column_list:       String,

  pub create_history:      String,
  pub install_triggers:    String,
  pub drop_triggers:       String,
  pub populate:            String,
  pub sync_rewrite:        String,
  pub sync_close:          String,
  pub sync_open_missing:   String,
  pub remove_orphans:      String,
  pub close_orphans:       String,
  pub select_history:      String,
  pub select_as_of:        String,
  pub select_periods:      String,
  pub select_untracked:    String,
}

impl TablePlan {
  pub fn new(entry: &CatalogEntry, schema: TableSchema) -> Self {
    let live = ident(&entry.live_table_name);
    let history = ident(&entry.history_table_name);
    let key = ident(&entry.live_table_pkey_column);
    let from = ident(PERIOD_FROM_COLUMN);
    let to = ident(PERIOD_TO_COLUMN);
    let txid = ident(TRANSACTION_COLUMN);
    let now = format!("{NOW_FN}()");
    let current_tx = format!("{TXID_FN}()");
    // Versions opened by the running transaction may be rewritten or removed;
    // anything older is only ever closed.
    let own = |table: &str| format!("COALESCE({table}.{txid} = {current_tx}, 0)");
    let after = |t: &str, floor: &str| format!("{TIME_AFTER_FN}({t}, {floor})");

    let columns: Vec<String> = schema.column_names().map(ident).collect();
    let column_list = columns.join(", ");
    let prefixed = |alias: &str| {
      columns
        .iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
    };
    let differs = |a: &str, b: &str| {
      columns
        .iter()
        .map(|c| format!("{a}.{c} IS NOT {b}.{c}"))
        .collect::<Vec<_>>()
        .join(" OR ")
    };

    let time = entry.live_table_time_column.as_deref().map(ident);
    let native = |alias: &str| {
      time.as_ref().map(|tc| format!("{TIME_FN}({alias}.{tc})"))
    };

    // ── DDL ──────────────────────────────────────────────────────────────
    let mut create_history = format!("CREATE TABLE {history} (\n");
    for c in &schema.columns {
      if c.decl_type.is_empty() {
        create_history.push_str(&format!("    {},\n", ident(&c.name)));
      } else {
        create_history
          .push_str(&format!("    {} {},\n", ident(&c.name), c.decl_type));
      }
    }
    create_history.push_str(&format!(
      "    {from} TEXT NOT NULL,\n    {to} TEXT,\n    {txid} INTEGER\n);\n"
    ));
    create_history.push_str(&format!(
      "CREATE INDEX {} ON {history} ({from}, {to});\n\
       CREATE INDEX {} ON {history} ({key}, {from});\n\
       CREATE UNIQUE INDEX {} ON {history} ({key}) WHERE {to} IS NULL;\n",
      ident(&format!("{}_sys_period", entry.history_table_name)),
      ident(&format!("{}_key", entry.history_table_name)),
      ident(&format!("{}_open", entry.history_table_name)),
    ));

    // ── Change capture ───────────────────────────────────────────────────
    let [insert_name, update_name, delete_name] =
      trigger_names(&entry.live_table_name).map(|n| ident(&n));
    let missing = literal(&format!(
      "{MISSING_OPEN_MARKER}{}",
      entry.history_table_name
    ));
    let duplicate = literal(&format!(
      "{DUPLICATE_OPEN_MARKER}{}",
      entry.history_table_name
    ));

    let insert_time = match native("NEW") {
      Some(t) => format!("COALESCE({t}, {now})"),
      None => now.clone(),
    };
    // The native time counts only when it moved past the open version's start.
    let update_time = match (&time, native("NEW")) {
      (Some(tc), Some(t)) => format!(
        "(CASE WHEN NEW.{tc} IS NOT OLD.{tc} AND {t} > \
         (SELECT {from} FROM {history} WHERE {key} = OLD.{key} AND {to} IS NULL) \
         THEN {t} ELSE {now} END)"
      ),
      _ => now.clone(),
    };
    let assign_new = columns
      .iter()
      .map(|c| format!("{c} = NEW.{c}"))
      .collect::<Vec<_>>()
      .join(", ");
    let new_values = prefixed("NEW");

    let insert_trigger = format!(
      "CREATE TRIGGER {insert_name} AFTER INSERT ON {live} FOR EACH ROW BEGIN
    SELECT RAISE(ABORT, {duplicate})
     WHERE EXISTS (SELECT 1 FROM {history} WHERE {key} = NEW.{key} AND {to} IS NULL);
    INSERT INTO {history} ({column_list}, {from}, {to}, {txid})
    VALUES ({new_values},
            max({insert_time},
                COALESCE((SELECT MAX({to}) FROM {history} WHERE {key} = NEW.{key}), '')),
            NULL, {current_tx});
END;
"
    );

    // An own version that started at or after the effective time is rewritten
    // in place; anything else is closed and followed by a new version.
    let update_trigger = format!(
      "CREATE TRIGGER {update_name} AFTER UPDATE ON {live} FOR EACH ROW
WHEN {changed}
BEGIN
    SELECT RAISE(ABORT, {missing})
     WHERE NOT EXISTS (SELECT 1 FROM {history} WHERE {key} = OLD.{key} AND {to} IS NULL);
    UPDATE {history} SET {assign_new}, {txid} = {current_tx}
     WHERE {key} = OLD.{key} AND {to} IS NULL AND {own_row} AND {from} >= {update_time};
    UPDATE {history} SET {to} = {close_at}
     WHERE {key} = OLD.{key} AND {to} IS NULL AND NOT ({own_row} AND {from} >= {update_time});
    INSERT INTO {history} ({column_list}, {from}, {to}, {txid})
    SELECT {new_values},
           COALESCE((SELECT MAX({to}) FROM {history} WHERE {key} = OLD.{key}), {now}),
           NULL, {current_tx}
     WHERE NOT EXISTS (SELECT 1 FROM {history} WHERE {key} = NEW.{key} AND {to} IS NULL);
END;
",
      changed = differs("OLD", "NEW"),
      own_row = own(&history),
      close_at = after(&update_time, &from),
    );

    // A version opened by the deleting transaction itself was never visible
    // to anyone else and is removed instead of closed. A close never lands on
    // or before the version's start.
    let delete_trigger = format!(
      "CREATE TRIGGER {delete_name} AFTER DELETE ON {live} FOR EACH ROW BEGIN
    SELECT RAISE(ABORT, {missing})
     WHERE NOT EXISTS (SELECT 1 FROM {history} WHERE {key} = OLD.{key} AND {to} IS NULL);
    DELETE FROM {history}
     WHERE {key} = OLD.{key} AND {to} IS NULL AND {own_row} AND {from} >= {now};
    UPDATE {history} SET {to} = {close_at}
     WHERE {key} = OLD.{key} AND {to} IS NULL;
END;
",
      own_row = own(&history),
      close_at = after(&now, &from),
    );

    let install_triggers =
      format!("{insert_trigger}{update_trigger}{delete_trigger}");
    let drop_triggers = drop_triggers_sql(&entry.live_table_name);

    // ── Synchronisation ──────────────────────────────────────────────────
    let live_values = prefixed("l");
    let effective = match native("l") {
      Some(t) => format!("COALESCE({t}, {now})"),
      None => now.clone(),
    };

    let populate = format!(
      "INSERT INTO {history} ({column_list}, {from}, {to}, {txid})
       SELECT {live_values}, {effective}, NULL, {current_tx} FROM {live} AS l"
    );

    // A changed live row takes its native time when that moved past the open
    // version's start, and the transaction time otherwise. Own versions that
    // start at or after that time are rewritten in place.
    let changed_at = match native("l") {
      Some(t) => format!(
        "(CASE WHEN {t} > {history}.{from} THEN {t} ELSE {now} END)"
      ),
      None => now.clone(),
    };
    let own_history = own(&history);
    let diff = differs("l", &history);
    let changed = |condition: String| {
      format!(
        "EXISTS (SELECT 1 FROM {live} AS l
                  WHERE l.{key} = {history}.{key} AND ({diff}) AND {condition})"
      )
    };

    let sync_rewrite = format!(
      "UPDATE {history}
          SET ({column_list}) = (SELECT {live_values} FROM {live} AS l
                                  WHERE l.{key} = {history}.{key}),
              {txid} = {current_tx}
        WHERE {to} IS NULL AND {own_history} AND {}",
      changed(format!("{history}.{from} >= {changed_at}")),
    );
    let sync_close = format!(
      "UPDATE {history}
          SET {to} = (SELECT {} FROM {live} AS l
                       WHERE l.{key} = {history}.{key})
        WHERE {to} IS NULL AND {}",
      after(&changed_at, &format!("{history}.{from}")),
      changed(format!("NOT ({own_history} AND {history}.{from} >= {changed_at})")),
    );

    let sync_open_missing = format!(
      "INSERT INTO {history} ({column_list}, {from}, {to}, {txid})
       SELECT {live_values},
              max({effective},
                  COALESCE((SELECT MAX(h.{to}) FROM {history} AS h WHERE h.{key} = l.{key}), '')),
              NULL, {current_tx}
         FROM {live} AS l
        WHERE NOT EXISTS (SELECT 1 FROM {history} AS h
                           WHERE h.{key} = l.{key} AND h.{to} IS NULL)"
    );

    let orphan = format!(
      "{to} IS NULL AND NOT EXISTS (SELECT 1 FROM {live} AS l WHERE l.{key} = {history}.{key})"
    );
    let remove_orphans = format!(
      "DELETE FROM {history} WHERE {orphan} AND {own_history} AND {from} >= {now}"
    );
    let close_orphans = format!(
      "UPDATE {history} SET {to} = {} WHERE {orphan}",
      after(&now, &from)
    );

    // ── Reads ────────────────────────────────────────────────────────────
    let select_history = format!(
      "SELECT {column_list}, {from}, {to}, {txid} FROM {history}
        WHERE {key} = ?1 ORDER BY {from}"
    );
    let select_as_of = format!(
      "SELECT {column_list}, {from}, {to}, {txid} FROM {history}
        WHERE {key} = ?1 AND {from} <= ?2 AND ({to} IS NULL OR {to} > ?2)
        ORDER BY {from} DESC LIMIT 1"
    );
    let select_periods = format!(
      "SELECT h.{key}, h.{from}, h.{to},
              EXISTS (SELECT 1 FROM {live} AS l WHERE l.{key} = h.{key})
         FROM {history} AS h ORDER BY h.{key}, h.{from}"
    );
    let select_untracked = format!(
      "SELECT l.{key} FROM {live} AS l
        WHERE NOT EXISTS (SELECT 1 FROM {history} AS h WHERE h.{key} = l.{key})"
    );

    Self {
      live_table: entry.live_table_name.clone(),
      history_table: entry.history_table_name.clone(),
      pkey_column: entry.live_table_pkey_column.clone(),
      time_column: entry.live_table_time_column.clone(),
      schema,
      column_list,
      create_history,
      install_triggers,
      drop_triggers,
      populate,
      sync_rewrite,
      sync_close,
      sync_open_missing,
      remove_orphans,
      close_orphans,
      select_history,
      select_as_of,
      select_periods,
      select_untracked,
    }
  }

  /// Live column names, in table order.
  pub fn column_names(&self) -> Vec<String> {
    self.schema.column_names().map(str::to_owned).collect()
  }

  pub fn count_history(&self) -> String {
    format!("SELECT COUNT(*) FROM {}", ident(&self.history_table))
  }

  pub fn add_history_column(&self, name: &str, decl_type: &str) -> String {
    format!(
      "ALTER TABLE {} ADD COLUMN {} {decl_type}",
      ident(&self.history_table),
      ident(name)
    )
  }

  pub fn quoted_columns(&self) -> &str { &self.column_list }
}
