//! Catalog records: which live tables are versioned and how, plus the
//! attribution attached to every write transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Longest identifier the store accepts for derived table names.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Suffix appended to a live table name to name its history table.
pub const HISTORY_SUFFIX: &str = "_history";

/// Columns every history table carries in addition to the live columns.
pub const PERIOD_FROM_COLUMN: &str = "sys_period_from";
pub const PERIOD_TO_COLUMN: &str = "sys_period_to";
pub const TRANSACTION_COLUMN: &str = "exec_transaction_id";

pub const RESERVED_COLUMNS: [&str; 3] =
  [PERIOD_FROM_COLUMN, PERIOD_TO_COLUMN, TRANSACTION_COLUMN];

/// Derive the history table name for `live_table`.
///
/// Fails with [`Error::IdentifierTooLong`] when the result would not fit the
/// store's identifier limit.
pub fn history_table_name(live_table: &str) -> Result<String> {
  let name = format!("{live_table}{HISTORY_SUFFIX}");
  if name.len() > MAX_IDENTIFIER_LEN {
    return Err(Error::IdentifierTooLong(name));
  }
  Ok(name)
}

// ─── Catalog entry ───────────────────────────────────────────────────────────

/// One tracked live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub history_table_name:     String,
  pub live_table_name:        String,
  /// Whether change capture is currently installed on the live table.
  pub triggers_installed:     bool,
  /// Column holding the authoritative change time, if any. Without one, the
  /// write transaction's start time is used.
  pub live_table_time_column: Option<String>,
  pub live_table_pkey_column: String,
  /// History table of the live table's structural parent.
  pub parent_history_table:   Option<String>,
  pub creation_time:          DateTime<Utc>,
}

// ─── Attribution ─────────────────────────────────────────────────────────────

/// Why a write transaction happened.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
pub enum ChangeType {
  /// Regular application traffic.
  #[default]
  Backend,
  /// Schema or data migrations, including history administration.
  Migration,
  /// Changes made by tools outside the application.
  External,
}

impl ChangeType {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownChangeType(s.to_owned()))
  }
}

/// Attribution passed explicitly to every mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContext {
  pub actor_id:    i64,
  pub change_type: ChangeType,
  pub label:       Option<String>,
}

impl ChangeContext {
  /// Application traffic performed by `actor_id`.
  pub fn backend(actor_id: i64) -> Self {
    Self { actor_id, change_type: ChangeType::Backend, label: None }
  }

  /// An administrative change with a human-readable label.
  pub fn migration(actor_id: i64, label: impl Into<String>) -> Self {
    Self {
      actor_id,
      change_type: ChangeType::Migration,
      label: Some(label.into()),
    }
  }

  pub fn with_label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }
}

/// A recorded write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
  pub transaction_id: i64,
  pub execution_time: DateTime<Utc>,
  pub user_id:        Option<i64>,
  pub change_type:    ChangeType,
  pub label:          Option<String>,
}
