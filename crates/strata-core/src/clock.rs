//! Time sources for write transactions.

use std::{fmt, sync::Mutex};

use chrono::{DateTime, Duration, Utc};

/// Supplies the start time of each write transaction.
pub trait Clock: fmt::Debug + Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self { Self { now: Mutex::new(start) } }

  /// Start at `secs` seconds after the Unix epoch.
  pub fn at_secs(secs: i64) -> Self {
    Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
  }

  pub fn set_secs(&self, secs: i64) {
    self.set(DateTime::from_timestamp(secs, 0).unwrap_or_default());
  }

  pub fn advance(&self, by: Duration) {
    let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *guard += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}
