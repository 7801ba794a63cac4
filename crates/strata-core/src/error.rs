//! Error types for `strata-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("table {0:?} has no primary key")]
  NoPrimaryKey(String),

  #[error("table {table:?} has a composite primary key ({columns:?})")]
  CompositePrimaryKey { table: String, columns: Vec<String> },

  #[error("identifier {0:?} exceeds {max} bytes", max = crate::catalog::MAX_IDENTIFIER_LEN)]
  IdentifierTooLong(String),

  #[error("table {child:?} already inherits from {existing:?}, cannot also inherit from {requested:?}")]
  UnsupportedMultipleInheritance {
    child:     String,
    existing:  String,
    requested: String,
  },

  #[error("table {0:?} would become its own ancestor")]
  InheritanceCycle(String),

  #[error("table {child:?} lacks column {column:?} of its parent {parent:?}")]
  InheritanceMismatch {
    child:  String,
    parent: String,
    column: String,
  },

  /// An update or delete found no open history row to close.
  #[error("no open history interval in {0:?}; run a sync and retry")]
  MissingOpenInterval(String),

  /// An insert found a key that already has an open history row.
  #[error("an open history interval already exists in {0:?}")]
  DuplicateOpenInterval(String),

  /// A native time column held a value that is not a timestamp.
  #[error("cannot read {0:?} as a timestamp")]
  InvalidTimestamp(String),

  #[error("table {0:?} is not tracked")]
  NotTracked(String),

  #[error("table {0:?} does not exist")]
  UnknownTable(String),

  #[error("table {table:?} has no column {column:?}")]
  UnknownColumn { table: String, column: String },

  #[error("table {table:?} uses reserved column name {column:?}")]
  ReservedColumn { table: String, column: String },

  #[error("history table {0:?} is not empty")]
  HistoryNotEmpty(String),

  #[error("no summary is maintained for {0:?}")]
  SummaryNotInstalled(String),

  #[error("a summary is already maintained for {0:?}")]
  SummaryAlreadyInstalled(String),

  #[error("unknown change type: {0:?}")]
  UnknownChangeType(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
