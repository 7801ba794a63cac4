//! Reads over history tables and the transaction log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  catalog::TransactionInfo,
  period::{HistoryRow, IntervalViolation, RowKey, SysPeriod, check_contiguity},
};

use crate::{
  Result,
  encode::{RawTransactionInfo, decode_dt, encode_dt, key_from_sql, key_to_sql, row_values},
  engine::Engine,
};

/// A history row as read, before timestamps are decoded.
struct RawHistoryRow {
  values:         BTreeMap<String, serde_json::Value>,
  from:           String,
  to:             Option<String>,
  transaction_id: Option<i64>,
}

impl RawHistoryRow {
  fn from_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Self> {
    let n = columns.len();
    Ok(Self {
      values:         row_values(row, columns)?,
      from:           row.get(n)?,
      to:             row.get(n + 1)?,
      transaction_id: row.get(n + 2)?,
    })
  }

  fn into_row(self) -> Result<HistoryRow> {
    Ok(HistoryRow {
      values:         self.values,
      period:         SysPeriod {
        from: decode_dt(&self.from)?,
        to:   self.to.as_deref().map(decode_dt).transpose()?,
      },
      transaction_id: self.transaction_id,
    })
  }
}

/// Every version of `key`, oldest first.
pub fn history(
  engine: &Engine,
  conn: &Connection,
  live_table: &str,
  key: &RowKey,
) -> Result<Vec<HistoryRow>> {
  let plan = engine.plan(conn, live_table)?;
  let columns = plan.column_names();

  let mut stmt = conn.prepare_cached(&plan.select_history)?;
  let raws = stmt
    .query_map(params![key_to_sql(key)], |row| RawHistoryRow::from_row(row, &columns))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawHistoryRow::into_row).collect()
}

/// The version of `key` valid at `at`.
pub fn as_of(
  engine: &Engine,
  conn: &Connection,
  live_table: &str,
  key: &RowKey,
  at: DateTime<Utc>,
) -> Result<Option<HistoryRow>> {
  let plan = engine.plan(conn, live_table)?;
  let columns = plan.column_names();

  conn
    .prepare_cached(&plan.select_as_of)?
    .query_row(params![key_to_sql(key), encode_dt(at)], |row| {
      RawHistoryRow::from_row(row, &columns)
    })
    .optional()?
    .map(RawHistoryRow::into_row)
    .transpose()
}

/// Check every key of the history table of `live_table`.
pub fn verify(
  engine: &Engine,
  conn: &Connection,
  live_table: &str,
) -> Result<Vec<IntervalViolation>> {
  let plan = engine.plan(conn, live_table)?;

  let mut stmt = conn.prepare(&plan.select_periods)?;
  let rows = stmt
    .query_map([], |row| {
      Ok((
        key_from_sql(row.get_ref(0)?),
        row.get::<_, String>(1)?,
        row.get::<_, Option<String>>(2)?,
        row.get::<_, bool>(3)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut keys: BTreeMap<RowKey, (Vec<SysPeriod>, bool)> = BTreeMap::new();
  for (key, from, to, live) in rows {
    let Some(key) = key else { continue };
    let period = SysPeriod {
      from: decode_dt(&from)?,
      to:   to.as_deref().map(decode_dt).transpose()?,
    };
    let slot = keys.entry(key).or_insert_with(|| (Vec::new(), live));
    slot.0.push(period);
  }

  let mut violations: Vec<IntervalViolation> = keys
    .iter()
    .flat_map(|(key, (periods, live))| check_contiguity(key, periods, *live))
    .collect();

  // Live rows that never made it into the history table.
  let mut stmt = conn.prepare(&plan.select_untracked)?;
  for key in stmt.query_map([], |row| Ok(key_from_sql(row.get_ref(0)?)))? {
    if let Some(key) = key? {
      violations.push(IntervalViolation::MissingOpen { key });
    }
  }
  Ok(violations)
}

/// The `limit` most recent write transactions, newest first.
pub fn transactions(conn: &Connection, limit: usize) -> Result<Vec<TransactionInfo>> {
  let mut stmt = conn.prepare_cached(
    "SELECT transaction_id, execution_time, user_id, change_type, label
       FROM strata_transaction_info
      ORDER BY transaction_id DESC
      LIMIT ?1",
  )?;
  let raws = stmt
    .query_map(params![limit as i64], |row| {
      Ok(RawTransactionInfo {
        transaction_id: row.get(0)?,
        execution_time: row.get(1)?,
        user_id:        row.get(2)?,
        change_type:    row.get(3)?,
        label:          row.get(4)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawTransactionInfo::into_info).collect()
}
