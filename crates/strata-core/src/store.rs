//! The `TemporalStore` trait and supporting option/report types.
//!
//! The trait is implemented by storage backends (e.g. `strata-store-sqlite`).
//! Operator tooling depends on this abstraction rather than on a concrete
//! engine.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  catalog::{CatalogEntry, ChangeContext, TransactionInfo},
  period::{HistoryRow, IntervalViolation, RowKey},
  summary::{SkeletonSummary, SummaryMismatch, SummarySpec},
};

// ─── Options and reports ─────────────────────────────────────────────────────

/// Parameters for [`TemporalStore::create_history_table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
  pub live_table:       String,
  pub time_column:      Option<String>,
  /// Install change capture right away.
  pub install_triggers: bool,
  /// Create the history tables of all declared ancestors first.
  pub copy_inheritance: bool,
  /// Bring the new history table in line with the live table.
  pub sync:             bool,
}

impl CreateOptions {
  /// All flags on, no time column.
  pub fn new(live_table: impl Into<String>) -> Self {
    Self {
      live_table:       live_table.into(),
      time_column:      None,
      install_triggers: true,
      copy_inheritance: true,
      sync:             true,
    }
  }

  pub fn time_column(mut self, column: impl Into<String>) -> Self {
    self.time_column = Some(column.into());
    self
  }

  pub fn without_triggers(mut self) -> Self {
    self.install_triggers = false;
    self
  }

  pub fn without_inheritance(mut self) -> Self {
    self.copy_inheritance = false;
    self
  }

  pub fn without_sync(mut self) -> Self {
    self.sync = false;
    self
  }
}

/// Row counts touched by a synchronisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
  /// Open intervals closed because the live row changed.
  pub updated:  u64,
  /// Open intervals started for live rows that had none.
  pub inserted: u64,
  /// Open intervals closed because the live row is gone.
  pub closed:   u64,
}

/// A table that could not be switched on during a batch enable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingFailure {
  pub live_table: String,
  pub error:      String,
}

/// Outcome of [`TemporalStore::enable_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingReport {
  pub enabled: Vec<String>,
  pub failed:  Vec<TrackingFailure>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a temporal history engine.
///
/// Every mutating operation takes an explicit [`ChangeContext`], which is
/// recorded as the transaction's attribution.
pub trait TemporalStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Catalog ───────────────────────────────────────────────────────────

  /// Record that `child` structurally extends `parent`.
  fn declare_inheritance<'a>(
    &'a self,
    ctx: ChangeContext,
    child: &'a str,
    parent: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Register a live table and return its history table name. Idempotent.
  fn register_table<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
    time_column: Option<&'a str>,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'a;

  fn lookup<'a>(
    &'a self,
    live_table: &'a str,
  ) -> impl Future<Output = Result<Option<CatalogEntry>, Self::Error>> + Send + 'a;

  fn list_catalog(
    &self,
  ) -> impl Future<Output = Result<Vec<CatalogEntry>, Self::Error>> + Send + '_;

  /// User tables that are neither tracked nor listed in `exempt`.
  fn audit_untracked<'a>(
    &'a self,
    exempt: &'a [String],
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  // ── History tables ────────────────────────────────────────────────────

  fn create_history_table(
    &self,
    ctx: ChangeContext,
    options: CreateOptions,
  ) -> impl Future<Output = Result<CatalogEntry, Self::Error>> + Send + '_;

  /// Drop the history table of `live_table` and of all its descendants.
  fn drop_history_table<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Uninstall every history table; returns how many were dropped.
  fn drop_all_history_tables(
    &self,
    ctx: ChangeContext,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Extend a history table with columns added to its live table.
  fn refresh_history_schema<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  // ── Synchronisation ───────────────────────────────────────────────────

  /// Copy every live row into an empty history table.
  fn populate_history_table<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  fn sync_history_table<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
  ) -> impl Future<Output = Result<SyncReport, Self::Error>> + Send + 'a;

  // ── Tracking toggle ───────────────────────────────────────────────────

  /// Returns `None` if tracking was already on.
  fn enable_tracking<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
  ) -> impl Future<Output = Result<Option<SyncReport>, Self::Error>> + Send + 'a;

  /// Returns whether tracking was on before the call.
  fn disable_tracking<'a>(
    &'a self,
    ctx: ChangeContext,
    live_table: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn enable_all(
    &self,
    ctx: ChangeContext,
    allow_silent_failure: bool,
  ) -> impl Future<Output = Result<TrackingReport, Self::Error>> + Send + '_;

  fn disable_all(
    &self,
    ctx: ChangeContext,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── History reads ─────────────────────────────────────────────────────

  /// All versions of one key, oldest first.
  fn history<'a>(
    &'a self,
    live_table: &'a str,
    key: RowKey,
  ) -> impl Future<Output = Result<Vec<HistoryRow>, Self::Error>> + Send + 'a;

  /// The version of one key that was current at `at`.
  fn as_of<'a>(
    &'a self,
    live_table: &'a str,
    key: RowKey,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<HistoryRow>, Self::Error>> + Send + 'a;

  /// Check every key of a history table against the interval invariants.
  fn verify_history<'a>(
    &'a self,
    live_table: &'a str,
  ) -> impl Future<Output = Result<Vec<IntervalViolation>, Self::Error>> + Send + 'a;

  /// Recorded write transactions, newest first.
  fn transactions(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<TransactionInfo>, Self::Error>> + Send + '_;

  // ── Summaries ─────────────────────────────────────────────────────────

  /// Create and fill a summary table; returns the number of groups.
  fn install_summary(
    &self,
    ctx: ChangeContext,
    spec: SummarySpec,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn uninstall_summary<'a>(
    &'a self,
    ctx: ChangeContext,
    node_table: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Recompute a summary table from scratch; returns the number of groups.
  fn rebuild_summary<'a>(
    &'a self,
    ctx: ChangeContext,
    node_table: &'a str,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  fn summary<'a>(
    &'a self,
    node_table: &'a str,
    group_id: i64,
  ) -> impl Future<Output = Result<Option<SkeletonSummary>, Self::Error>> + Send + 'a;

  fn summaries<'a>(
    &'a self,
    node_table: &'a str,
  ) -> impl Future<Output = Result<Vec<SkeletonSummary>, Self::Error>> + Send + 'a;

  /// Compare the maintained summary with a full recomputation.
  fn verify_summary<'a>(
    &'a self,
    node_table: &'a str,
  ) -> impl Future<Output = Result<Vec<SummaryMismatch>, Self::Error>> + Send + 'a;
}
