//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with microsecond
//! precision, so that text comparison orders them chronologically. Values of
//! native time columns are normalised to that encoding before they enter a
//! period.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone as _, Utc};
use rusqlite::types::{Value, ValueRef};
use strata_core::{
  catalog::{CatalogEntry, ChangeType, TransactionInfo},
  period::RowKey,
  summary::SkeletonSummary,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Canonical text form of a timestamp.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// Forms accepted for native time columns besides RFC 3339. Offset-less
/// values are read as UTC, as SQLite's own date functions produce them.
const NAIVE_FORMATS: [&str; 4] = [
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%dT%H:%M",
];

/// Read a native time column value.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  NAIVE_FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .or_else(|| {
      NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
    .map(|naive| Utc.from_utc_datetime(&naive))
}

/// [`parse_time`], failing with [`Error::DateParse`].
pub fn read_time(s: &str) -> Result<DateTime<Utc>> {
  parse_time(s).ok_or_else(|| Error::DateParse(format!("{s:?}: not a timestamp")))
}

fn decode_dt_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Column values ───────────────────────────────────────────────────────────

/// Convert a raw SQLite value into JSON for [`strata_core::period::HistoryRow`].
pub fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
  match value {
    ValueRef::Null => serde_json::Value::Null,
    ValueRef::Integer(i) => serde_json::Value::from(i),
    ValueRef::Real(f) => serde_json::Number::from_f64(f)
      .map_or(serde_json::Value::Null, serde_json::Value::Number),
    ValueRef::Text(t) => {
      serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
    }
    ValueRef::Blob(b) => serde_json::Value::Array(
      b.iter().map(|&byte| serde_json::Value::from(byte)).collect(),
    ),
  }
}

pub fn key_to_sql(key: &RowKey) -> Value {
  match key {
    RowKey::Integer(i) => Value::Integer(*i),
    RowKey::Text(s) => Value::Text(s.clone()),
  }
}

/// Read a primary-key value; `None` for NULL.
pub fn key_from_sql(value: ValueRef<'_>) -> Option<RowKey> {
  match value {
    ValueRef::Null => None,
    ValueRef::Integer(i) => Some(RowKey::Integer(i)),
    ValueRef::Real(f) => Some(RowKey::Text(f.to_string())),
    ValueRef::Text(t) | ValueRef::Blob(t) => {
      Some(RowKey::Text(String::from_utf8_lossy(t).into_owned()))
    }
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `strata_history_table` row.
pub struct RawCatalogEntry {
  pub history_table_name:     String,
  pub live_table_name:        String,
  pub triggers_installed:     bool,
  pub live_table_time_column: Option<String>,
  pub live_table_pkey_column: String,
  pub parent_history_table:   Option<String>,
  pub creation_time:          String,
}

impl RawCatalogEntry {
  pub const COLUMNS: &'static str = "history_table_name, live_table_name, \
     triggers_installed, live_table_time_column, live_table_pkey_column, \
     parent_history_table, creation_time";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      history_table_name:     row.get(0)?,
      live_table_name:        row.get(1)?,
      triggers_installed:     row.get(2)?,
      live_table_time_column: row.get(3)?,
      live_table_pkey_column: row.get(4)?,
      parent_history_table:   row.get(5)?,
      creation_time:          row.get(6)?,
    })
  }

  pub fn into_entry(self) -> Result<CatalogEntry> {
    Ok(CatalogEntry {
      history_table_name:     self.history_table_name,
      live_table_name:        self.live_table_name,
      triggers_installed:     self.triggers_installed,
      live_table_time_column: self.live_table_time_column,
      live_table_pkey_column: self.live_table_pkey_column,
      parent_history_table:   self.parent_history_table,
      creation_time:          decode_dt(&self.creation_time)?,
    })
  }
}

/// Raw values read from `strata_transaction_info`.
pub struct RawTransactionInfo {
  pub transaction_id: i64,
  pub execution_time: String,
  pub user_id:        Option<i64>,
  pub change_type:    String,
  pub label:          Option<String>,
}

impl RawTransactionInfo {
  pub fn into_info(self) -> Result<TransactionInfo> {
    Ok(TransactionInfo {
      transaction_id: self.transaction_id,
      execution_time: decode_dt(&self.execution_time)?,
      user_id:        self.user_id,
      change_type:    ChangeType::parse(&self.change_type)?,
      label:          self.label,
    })
  }
}

/// Raw values read from a summary table.
pub struct RawSummary {
  pub group_id:               i64,
  pub num_nodes:              i64,
  pub cable_length:           f64,
  pub original_creation_time: Option<String>,
  pub last_edition_time:      Option<String>,
  pub last_editor_id:         Option<i64>,
  pub last_summary_update:    String,
}

impl RawSummary {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:               row.get(0)?,
      num_nodes:              row.get(1)?,
      cable_length:           row.get(2)?,
      original_creation_time: row.get(3)?,
      last_edition_time:      row.get(4)?,
      last_editor_id:         row.get(5)?,
      last_summary_update:    row.get(6)?,
    })
  }

  pub fn into_summary(self) -> Result<SkeletonSummary> {
    Ok(SkeletonSummary {
      group_id:               self.group_id,
      num_nodes:              self.num_nodes,
      cable_length:           self.cable_length,
      original_creation_time: decode_dt_opt(self.original_creation_time)?,
      last_edition_time:      decode_dt_opt(self.last_edition_time)?,
      last_editor_id:         self.last_editor_id,
      last_summary_update:    decode_dt(&self.last_summary_update)?,
    })
  }
}

/// Collect the named columns of `row` into a JSON map.
pub fn row_values(
  row: &rusqlite::Row<'_>,
  columns: &[String],
) -> rusqlite::Result<BTreeMap<String, serde_json::Value>> {
  columns
    .iter()
    .enumerate()
    .map(|(i, name)| Ok((name.clone(), value_to_json(row.get_ref(i)?))))
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_timestamps_sort_chronologically() {
    let a = Utc.timestamp_opt(99, 0).unwrap();
    let b = Utc.timestamp_opt(100, 500_000).unwrap();
    let c = Utc.timestamp_opt(1_000_000, 0).unwrap();
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert!(ea < eb && eb < ec);
    assert_eq!(ea.len(), eb.len());
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }
}
