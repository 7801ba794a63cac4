//! [`Engine`]: the blocking core of the SQLite backend.
//!
//! The engine owns the session state read by the strata SQL functions and a
//! cache of per-table statement plans. Every mutating operation runs through
//! [`Engine::write`], which opens an immediate transaction, allocates a
//! transaction id and records the caller's attribution before any tracked
//! table is touched.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use strata_core::{Error as CoreError, catalog::ChangeContext, clock::Clock};
use tracing::debug;

use crate::{
  Error, Result, catalog,
  encode::encode_dt,
  plan::TablePlan,
  schema::SCHEMA,
  session::{self, ActiveTransaction, EndOnDrop, Session, SessionHandle},
};

#[derive(Debug)]
pub struct Engine {
  session: SessionHandle,
  plans:   Mutex<HashMap<String, Arc<TablePlan>>>,
}

impl Engine {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      session: Arc::new(Mutex::new(Session::new(clock))),
      plans:   Mutex::new(HashMap::new()),
    }
  }

  /// Register the strata SQL functions on `conn` and create the bookkeeping
  /// tables. Must run once per connection before any other call.
  pub fn attach(&self, conn: &Connection) -> Result<()> {
    session::install_functions(conn, &self.session)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
  }

  /// Start time of the current write transaction, or the clock's time.
  pub fn now(&self) -> Result<DateTime<Utc>> {
    Ok(session::lock(&self.session)?.now())
  }

  /// Run `f` inside a new write transaction attributed to `ctx`.
  ///
  /// The transaction is committed if `f` succeeds and rolled back otherwise.
  /// Cached plans are discarded on failure since `f` may have changed the
  /// schema before failing.
  pub fn write<T>(
    &self,
    conn: &mut Connection,
    ctx: &ChangeContext,
    f: impl FnOnce(&Engine, &Transaction<'_>) -> Result<T>,
  ) -> Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let started_at = session::lock(&self.session)?.clock_now();
    let id: i64 = tx.query_row(
      "SELECT COALESCE(MAX(transaction_id), 0) + 1 FROM strata_transaction_info",
      [],
      |row| row.get(0),
    )?;
    tx.execute(
      "INSERT INTO strata_transaction_info
         (transaction_id, execution_time, user_id, change_type, label)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        id,
        encode_dt(started_at),
        ctx.actor_id,
        ctx.change_type.as_ref(),
        ctx.label,
      ],
    )?;

    session::lock(&self.session)?.begin(ActiveTransaction { id, started_at });
    let _end = EndOnDrop(&self.session);
    debug!(transaction_id = id, change_type = %ctx.change_type, "write transaction started");

    let outcome = f(self, &tx).and_then(|value| {
      tx.commit()?;
      Ok(value)
    });
    if outcome.is_err() {
      self.clear_plans();
    }
    outcome
  }

  /// The statement plan of tracked table `live_table`.
  pub(crate) fn plan(&self, conn: &Connection, live_table: &str) -> Result<Arc<TablePlan>> {
    if let Some(plan) = self.plans_lock()?.get(live_table) {
      return Ok(Arc::clone(plan));
    }

    let entry = catalog::lookup(conn, live_table)?
      .ok_or_else(|| CoreError::NotTracked(live_table.to_owned()))?;
    let schema = catalog::introspect(conn, live_table)?
      .ok_or_else(|| CoreError::UnknownTable(live_table.to_owned()))?;
    let plan = Arc::new(TablePlan::new(&entry, schema));

    self
      .plans_lock()?
      .insert(live_table.to_owned(), Arc::clone(&plan));
    Ok(plan)
  }

  /// Drop the cached plan of `live_table`, e.g. after its schema changed.
  pub(crate) fn forget_plan(&self, live_table: &str) {
    if let Ok(mut plans) = self.plans.lock() {
      plans.remove(live_table);
    }
  }

  fn clear_plans(&self) {
    if let Ok(mut plans) = self.plans.lock() {
      plans.clear();
    }
  }

  fn plans_lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<TablePlan>>>> {
    self.plans.lock().map_err(|_| Error::SessionPoisoned)
  }
}
