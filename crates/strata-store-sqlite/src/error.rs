//! Error type for `strata-store-sqlite`.

use thiserror::Error;

use crate::plan::{DUPLICATE_OPEN_MARKER, INVALID_TIME_MARKER, MISSING_OPEN_MARKER};

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] strata_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[source] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("session state lock poisoned")]
  SessionPoisoned,
}

/// Aborts raised by generated triggers carry a marker so they can be mapped
/// back onto the domain errors.
impl From<rusqlite::Error> for Error {
  fn from(err: rusqlite::Error) -> Self {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
      if let Some(table) = message.strip_prefix(MISSING_OPEN_MARKER) {
        return Self::Core(strata_core::Error::MissingOpenInterval(table.to_owned()));
      }
      if let Some(table) = message.strip_prefix(DUPLICATE_OPEN_MARKER) {
        return Self::Core(strata_core::Error::DuplicateOpenInterval(
          table.to_owned(),
        ));
      }
      if let Some(value) = message.strip_prefix(INVALID_TIME_MARKER) {
        return Self::Core(strata_core::Error::InvalidTimestamp(value.to_owned()));
      }
    }
    Self::Sqlite(err)
  }
}

impl Error {
  /// The domain error, if this is one.
  pub fn core(&self) -> Option<&strata_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
