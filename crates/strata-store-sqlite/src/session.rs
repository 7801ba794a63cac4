//! Write context shared between the engine and the generated triggers.
//!
//! Triggers cannot take parameters, so the engine exposes the state of the
//! current write transaction through application-defined SQL functions:
//!
//! * `strata_now()`: start time of the current write transaction, or the
//!   clock's time outside of one;
//! * `strata_txid()`: id of the current write transaction, or NULL;
//! * `strata_edge_length(x1, y1, z1, x2, y2, z2)`: Euclidean distance, with
//!   NULL coordinates read as zero;
//! * `strata_time(v)`: a native time column value in the canonical encoding,
//!   from text in any accepted form or from unix seconds;
//! * `strata_time_after(t, floor)`: `t`, or the first microsecond after
//!   `floor` if `t` does not lie past it.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, functions::FunctionFlags, types::ValueRef};
use strata_core::{clock::Clock, summary::edge_length};

use crate::{
  Error, Result,
  encode::{encode_dt, parse_time, value_to_json},
  plan::INVALID_TIME_MARKER,
};

pub const NOW_FN: &str = "strata_now";
pub const TXID_FN: &str = "strata_txid";
pub const EDGE_LENGTH_FN: &str = "strata_edge_length";
pub const TIME_FN: &str = "strata_time";
pub const TIME_AFTER_FN: &str = "strata_time_after";

#[derive(Debug, Clone, Copy)]
pub struct ActiveTransaction {
  pub id:         i64,
  pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
  clock:  Arc<dyn Clock>,
  active: Option<ActiveTransaction>,
}

impl Session {
  pub fn new(clock: Arc<dyn Clock>) -> Self { Self { clock, active: None } }

  pub fn now(&self) -> DateTime<Utc> {
    self.active.map_or_else(|| self.clock.now(), |tx| tx.started_at)
  }

  pub fn clock_now(&self) -> DateTime<Utc> { self.clock.now() }

  pub fn transaction_id(&self) -> Option<i64> { self.active.map(|tx| tx.id) }

  pub fn begin(&mut self, tx: ActiveTransaction) { self.active = Some(tx); }

  pub fn end(&mut self) { self.active = None; }
}

pub type SessionHandle = Arc<Mutex<Session>>;

pub fn lock(session: &SessionHandle) -> Result<MutexGuard<'_, Session>> {
  session.lock().map_err(|_| Error::SessionPoisoned)
}

/// Clears the active transaction when dropped, whichever way the write ends.
pub struct EndOnDrop<'a>(pub &'a SessionHandle);

impl Drop for EndOnDrop<'_> {
  fn drop(&mut self) {
    if let Ok(mut session) = self.0.lock() {
      session.end();
    }
  }
}

fn poisoned() -> rusqlite::Error {
  rusqlite::Error::UserFunctionError("strata session state poisoned".into())
}

fn invalid_time(value: ValueRef<'_>) -> rusqlite::Error {
  let shown = match value {
    ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    other => value_to_json(other).to_string(),
  };
  rusqlite::Error::UserFunctionError(format!("{INVALID_TIME_MARKER}{shown}").into())
}

fn read_time_arg(value: ValueRef<'_>) -> rusqlite::Result<Option<DateTime<Utc>>> {
  match value {
    ValueRef::Null => Ok(None),
    ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0)
      .map(Some)
      .ok_or_else(|| invalid_time(value)),
    ValueRef::Text(bytes) => std::str::from_utf8(bytes)
      .ok()
      .and_then(parse_time)
      .map(Some)
      .ok_or_else(|| invalid_time(value)),
    _ => Err(invalid_time(value)),
  }
}

/// Register the strata SQL functions on `conn`.
pub fn install_functions(
  conn: &Connection,
  session: &SessionHandle,
) -> rusqlite::Result<()> {
  let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_INNOCUOUS;

  let s = Arc::clone(session);
  conn.create_scalar_function(NOW_FN, 0, flags, move |_| {
    let session = s.lock().map_err(|_| poisoned())?;
    Ok(encode_dt(session.now()))
  })?;

  let s = Arc::clone(session);
  conn.create_scalar_function(TXID_FN, 0, flags, move |_| {
    let session = s.lock().map_err(|_| poisoned())?;
    Ok(session.transaction_id())
  })?;

  conn.create_scalar_function(
    EDGE_LENGTH_FN,
    6,
    flags | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      let mut coords = [0.0_f64; 6];
      for (i, slot) in coords.iter_mut().enumerate() {
        *slot = ctx.get::<Option<f64>>(i)?.unwrap_or(0.0);
      }
      Ok(edge_length(
        [coords[0], coords[1], coords[2]],
        [coords[3], coords[4], coords[5]],
      ))
    },
  )?;

  conn.create_scalar_function(
    TIME_FN,
    1,
    flags | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| Ok(read_time_arg(ctx.get_raw(0))?.map(encode_dt)),
  )?;

  conn.create_scalar_function(
    TIME_AFTER_FN,
    2,
    flags | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      let Some(t) = read_time_arg(ctx.get_raw(0))? else {
        return Ok(None);
      };
      let floor = read_time_arg(ctx.get_raw(1))?;
      Ok(Some(encode_dt(match floor {
        Some(floor) if t <= floor => floor + TimeDelta::microseconds(1),
        _ => t,
      })))
    },
  )?;

  Ok(())
}
