//! [`SqliteStore`]: the SQLite implementation of [`TemporalStore`].

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use strata_core::{
  catalog::{CatalogEntry, ChangeContext, TransactionInfo},
  clock::{Clock, SystemClock},
  period::{HistoryRow, IntervalViolation, RowKey},
  store::{CreateOptions, SyncReport, TemporalStore, TrackingReport},
  summary::{SkeletonSummary, SummaryMismatch, SummarySpec},
};
use tracing::info;

use crate::{
  Error, Result, catalog, engine::Engine, manager, query, summary, sync, tracking,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A strata engine bound to a single SQLite database.
///
/// Cloning is cheap; the connection and engine are reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  engine: Arc<Engine>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` using the system clock.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_clock(path, Arc::new(SystemClock)).await
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with_clock(Arc::new(SystemClock)).await
  }

  pub async fn open_with_clock(
    path: impl AsRef<Path>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::attach(conn, clock).await
  }

  pub async fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::attach(conn, clock).await
  }

  async fn attach(conn: tokio_rusqlite::Connection, clock: Arc<dyn Clock>) -> Result<Self> {
    let store = Self { conn, engine: Arc::new(Engine::new(clock)) };
    store.read(|engine, conn| engine.attach(conn)).await?;
    Ok(store)
  }

  /// Run application statements in a write transaction attributed to
  /// `ctx`. Tracked tables are versioned by their triggers as part of the
  /// same transaction.
  pub async fn write<T, F>(&self, ctx: ChangeContext, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
  {
    self.write_with(ctx, move |_, tx| Ok(f(tx)?)).await
  }

  /// Run read-only statements against the database.
  pub async fn query<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
  {
    self.read(move |_, conn| Ok(f(conn)?)).await
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Engine, &Connection) -> Result<T> + Send + 'static,
  {
    let engine = Arc::clone(&self.engine);
    self.conn.call(move |conn| Ok(f(&engine, conn))).await?
  }

  async fn write_with<T, F>(&self, ctx: ChangeContext, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Engine, &Transaction<'_>) -> Result<T> + Send + 'static,
  {
    let engine = Arc::clone(&self.engine);
    self
      .conn
      .call(move |conn| Ok(engine.write(conn, &ctx, f)))
      .await?
  }
}

// ─── TemporalStore impl ──────────────────────────────────────────────────────

impl TemporalStore for SqliteStore {
  type Error = Error;

  // ── Catalog ───────────────────────────────────────────────────────────────

  async fn declare_inheritance(
    &self,
    ctx: ChangeContext,
    child: &str,
    parent: &str,
  ) -> Result<()> {
    let (child, parent) = (child.to_owned(), parent.to_owned());
    self
      .write_with(ctx, move |_, tx| catalog::declare_inheritance(tx, &child, &parent))
      .await
  }

  async fn register_table(
    &self,
    ctx: ChangeContext,
    live_table: &str,
    time_column: Option<&str>,
  ) -> Result<String> {
    let live_table = live_table.to_owned();
    let time_column = time_column.map(str::to_owned);
    self
      .write_with(ctx, move |_, tx| {
        let entry = catalog::register(tx, &live_table, time_column.as_deref())?;
        Ok(entry.history_table_name)
      })
      .await
  }

  async fn lookup(&self, live_table: &str) -> Result<Option<CatalogEntry>> {
    let live_table = live_table.to_owned();
    self.read(move |_, conn| catalog::lookup(conn, &live_table)).await
  }

  async fn list_catalog(&self) -> Result<Vec<CatalogEntry>> {
    self.read(|_, conn| catalog::list(conn)).await
  }

  async fn audit_untracked(&self, exempt: &[String]) -> Result<Vec<String>> {
    let exempt = exempt.to_vec();
    self.read(move |_, conn| catalog::audit_untracked(conn, &exempt)).await
  }

  // ── History tables ────────────────────────────────────────────────────────

  async fn create_history_table(
    &self,
    ctx: ChangeContext,
    options: CreateOptions,
  ) -> Result<CatalogEntry> {
    self
      .write_with(ctx, move |engine, tx| manager::create(engine, tx, &options))
      .await
  }

  async fn drop_history_table(&self, ctx: ChangeContext, live_table: &str) -> Result<()> {
    let live_table = live_table.to_owned();
    self
      .write_with(ctx, move |engine, tx| {
        manager::drop_with_descendants(engine, tx, &live_table)
      })
      .await
  }

  async fn drop_all_history_tables(&self, ctx: ChangeContext) -> Result<usize> {
    let dropped = self
      .write_with(ctx, |engine, tx| manager::drop_all(engine, tx))
      .await?;
    info!(dropped, "all history tables dropped");
    Ok(dropped)
  }

  async fn refresh_history_schema(
    &self,
    ctx: ChangeContext,
    live_table: &str,
  ) -> Result<Vec<String>> {
    let live_table = live_table.to_owned();
    self
      .write_with(ctx, move |engine, tx| {
        manager::refresh_schema(engine, tx, &live_table)
      })
      .await
  }

  // ── Synchronisation ───────────────────────────────────────────────────────

  async fn populate_history_table(&self, ctx: ChangeContext, live_table: &str) -> Result<u64> {
    let live_table = live_table.to_owned();
    self
      .write_with(ctx, move |engine, tx| sync::populate(engine, tx, &live_table))
      .await
  }

  async fn sync_history_table(
    &self,
    ctx: ChangeContext,
    live_table: &str,
  ) -> Result<SyncReport> {
    let live_table = live_table.to_owned();
    self
      .write_with(ctx, move |engine, tx| sync::sync(engine, tx, &live_table))
      .await
  }

  // ── Tracking toggle ───────────────────────────────────────────────────────

  async fn enable_tracking(
    &self,
    ctx: ChangeContext,
    live_table: &str,
  ) -> Result<Option<SyncReport>> {
    let live_table = live_table.to_owned();
    self
      .write_with(ctx, move |engine, tx| tracking::enable(engine, tx, &live_table))
      .await
  }

  async fn disable_tracking(&self, ctx: ChangeContext, live_table: &str) -> Result<bool> {
    let live_table = live_table.to_owned();
    self
      .write_with(ctx, move |_, tx| tracking::disable(tx, &live_table))
      .await
  }

  async fn enable_all(
    &self,
    ctx: ChangeContext,
    allow_silent_failure: bool,
  ) -> Result<TrackingReport> {
    self
      .write_with(ctx, move |engine, tx| {
        tracking::enable_all(engine, tx, allow_silent_failure)
      })
      .await
  }

  async fn disable_all(&self, ctx: ChangeContext) -> Result<usize> {
    self.write_with(ctx, |_, tx| tracking::disable_all(tx)).await
  }

  // ── History reads ─────────────────────────────────────────────────────────

  async fn history(&self, live_table: &str, key: RowKey) -> Result<Vec<HistoryRow>> {
    let live_table = live_table.to_owned();
    self
      .read(move |engine, conn| query::history(engine, conn, &live_table, &key))
      .await
  }

  async fn as_of(
    &self,
    live_table: &str,
    key: RowKey,
    at: DateTime<Utc>,
  ) -> Result<Option<HistoryRow>> {
    let live_table = live_table.to_owned();
    self
      .read(move |engine, conn| query::as_of(engine, conn, &live_table, &key, at))
      .await
  }

  async fn verify_history(&self, live_table: &str) -> Result<Vec<IntervalViolation>> {
    let live_table = live_table.to_owned();
    self
      .read(move |engine, conn| query::verify(engine, conn, &live_table))
      .await
  }

  async fn transactions(&self, limit: usize) -> Result<Vec<TransactionInfo>> {
    self.read(move |_, conn| query::transactions(conn, limit)).await
  }

  // ── Summaries ─────────────────────────────────────────────────────────────

  async fn install_summary(&self, ctx: ChangeContext, spec: SummarySpec) -> Result<usize> {
    self
      .write_with(ctx, move |_, tx| summary::install(tx, &spec))
      .await
  }

  async fn uninstall_summary(&self, ctx: ChangeContext, node_table: &str) -> Result<()> {
    let node_table = node_table.to_owned();
    self
      .write_with(ctx, move |_, tx| summary::uninstall(tx, &node_table))
      .await
  }

  async fn rebuild_summary(&self, ctx: ChangeContext, node_table: &str) -> Result<usize> {
    let node_table = node_table.to_owned();
    self
      .write_with(ctx, move |_, tx| summary::rebuild(tx, &node_table))
      .await
  }

  async fn summary(&self, node_table: &str, group_id: i64) -> Result<Option<SkeletonSummary>> {
    let node_table = node_table.to_owned();
    self
      .read(move |_, conn| summary::get(conn, &node_table, group_id))
      .await
  }

  async fn summaries(&self, node_table: &str) -> Result<Vec<SkeletonSummary>> {
    let node_table = node_table.to_owned();
    self.read(move |_, conn| summary::list(conn, &node_table)).await
  }

  async fn verify_summary(&self, node_table: &str) -> Result<Vec<SummaryMismatch>> {
    let node_table = node_table.to_owned();
    self.read(move |_, conn| summary::verify(conn, &node_table)).await
  }
}
