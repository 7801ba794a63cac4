//! `strata`: operator tool for history tables and skeleton summaries.
//!
//! # Usage
//!
//! ```text
//! strata --database catmaid.db create treenode --time-column edition_time
//! strata disable treenode
//! strata enable --allow-silent-failure
//! strata summary install treenode
//! strata --config /etc/strata.toml audit
//! ```

mod config;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use strata_core::{
  catalog::ChangeContext,
  period::RowKey,
  store::{CreateOptions, TemporalStore},
  summary::SummarySpec,
};
use strata_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "Temporal history tables for SQLite")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "strata.toml")]
  config: PathBuf,

  /// Database file; overrides the configuration.
  #[arg(short, long)]
  database: Option<PathBuf>,

  /// User id recorded for the change; overrides the configuration.
  #[arg(long)]
  actor: Option<i64>,

  /// Label recorded for the change.
  #[arg(long)]
  label: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the catalog of tracked tables.
  List,
  /// Add a live table to the catalog without creating its history table.
  Register {
    table:       String,
    #[arg(long)]
    time_column: Option<String>,
  },
  /// Declare that CHILD structurally extends PARENT.
  Inherit { child: String, parent: String },
  /// Create (and by default sync and track) a history table.
  Create {
    table:          String,
    #[arg(long)]
    time_column:    Option<String>,
    #[arg(long)]
    no_triggers:    bool,
    #[arg(long)]
    no_inheritance: bool,
    #[arg(long)]
    no_sync:        bool,
  },
  /// Drop a history table and those of its descendants.
  Drop { table: String },
  /// Drop every history table.
  DropAll,
  /// Add columns the live table gained to its history table.
  Refresh { table: String },
  /// Copy all live rows into an empty history table.
  Populate { table: String },
  /// Bring a history table in line with its live table.
  Sync { table: String },
  /// Switch change capture on, for one table or all of them.
  Enable {
    table:                Option<String>,
    /// Keep going when a table fails and report it instead.
    #[arg(long)]
    allow_silent_failure: bool,
  },
  /// Switch change capture off, for one table or all of them.
  Disable { table: Option<String> },
  /// List user tables that are neither tracked nor exempt.
  Audit,
  /// Print every version of one row.
  History { table: String, key: String },
  /// Print the version of one row valid at a point in time (RFC 3339).
  AsOf { table: String, key: String, at: DateTime<Utc> },
  /// Check a history table for gaps, overlaps and stray open intervals.
  Verify { table: String },
  /// Print recent write transactions.
  Transactions {
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
  /// Manage per-skeleton summaries of a node table.
  #[command(subcommand)]
  Summary(SummaryCommand),
}

#[derive(Subcommand, Debug)]
enum SummaryCommand {
  /// Install a summary using the treenode column layout.
  Install { node_table: String },
  Uninstall { node_table: String },
  /// Recompute a summary from scratch.
  Rebuild { node_table: String },
  /// Print the summary of one skeleton, or of all.
  Show { node_table: String, group: Option<i64> },
  /// Compare the maintained summary with a full recomputation.
  Verify { node_table: String },
}

impl Command {
  fn is_read_only(&self) -> bool {
    matches!(
      self,
      Self::List
        | Self::Audit
        | Self::History { .. }
        | Self::AsOf { .. }
        | Self::Verify { .. }
        | Self::Transactions { .. }
        | Self::Summary(SummaryCommand::Show { .. } | SummaryCommand::Verify { .. })
    )
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let mut cfg = CliConfig::load(&cli.config)?;
  if let Some(database) = cli.database {
    cfg.database = database;
  }
  if let Some(actor) = cli.actor {
    cfg.actor_id = actor;
  }

  let store = SqliteStore::open(&cfg.database)
    .await
    .with_context(|| format!("failed to open database at {:?}", cfg.database))?;

  let ctx = ChangeContext::migration(
    cfg.actor_id,
    cli.label.unwrap_or_else(|| format!("strata {:?}", cli.command)),
  );
  if !cli.command.is_read_only() {
    tracing::info!(actor = cfg.actor_id, "running {:?}", cli.command);
  }

  run(&store, &cfg, ctx, cli.command).await
}

async fn run(
  store: &SqliteStore,
  cfg: &CliConfig,
  ctx: ChangeContext,
  command: Command,
) -> Result<()> {
  match command {
    Command::List => print(&store.list_catalog().await?),
    Command::Register { table, time_column } => {
      let history = store.register_table(ctx, &table, time_column.as_deref()).await?;
      println!("{history}");
      Ok(())
    }
    Command::Inherit { child, parent } => {
      store
        .declare_inheritance(ctx, &child, &parent)
        .await
        .with_context(|| format!("cannot declare {child} as a child of {parent}"))?;
      Ok(())
    }
    Command::Create { table, time_column, no_triggers, no_inheritance, no_sync } => {
      let options = CreateOptions {
        live_table: table.clone(),
        time_column,
        install_triggers: !no_triggers,
        copy_inheritance: !no_inheritance,
        sync: !no_sync,
      };
      let entry = store
        .create_history_table(ctx, options)
        .await
        .with_context(|| format!("cannot create history table for {table}"))?;
      print(&entry)
    }
    Command::Drop { table } => Ok(store.drop_history_table(ctx, &table).await?),
    Command::DropAll => print(&store.drop_all_history_tables(ctx).await?),
    Command::Refresh { table } => print(&store.refresh_history_schema(ctx, &table).await?),
    Command::Populate { table } => print(&store.populate_history_table(ctx, &table).await?),
    Command::Sync { table } => print(&store.sync_history_table(ctx, &table).await?),
    Command::Enable { table: Some(table), .. } => {
      print(&store.enable_tracking(ctx, &table).await?)
    }
    Command::Enable { table: None, allow_silent_failure } => {
      print(&store.enable_all(ctx, allow_silent_failure).await?)
    }
    Command::Disable { table: Some(table) } => print(&store.disable_tracking(ctx, &table).await?),
    Command::Disable { table: None } => print(&store.disable_all(ctx).await?),
    Command::Audit => print(&store.audit_untracked(&cfg.exempt_tables).await?),
    Command::History { table, key } => print(&store.history(&table, parse_key(&key)).await?),
    Command::AsOf { table, key, at } => {
      print(&store.as_of(&table, parse_key(&key), at).await?)
    }
    Command::Verify { table } => {
      let violations = store.verify_history(&table).await?;
      print(&violations)?;
      anyhow::ensure!(violations.is_empty(), "{} has {} violations", table, violations.len());
      Ok(())
    }
    Command::Transactions { limit } => print(&store.transactions(limit).await?),
    Command::Summary(command) => run_summary(store, ctx, command).await,
  }
}

async fn run_summary(
  store: &SqliteStore,
  ctx: ChangeContext,
  command: SummaryCommand,
) -> Result<()> {
  match command {
    SummaryCommand::Install { node_table } => {
      print(&store.install_summary(ctx, SummarySpec::treenode(node_table)).await?)
    }
    SummaryCommand::Uninstall { node_table } => {
      Ok(store.uninstall_summary(ctx, &node_table).await?)
    }
    SummaryCommand::Rebuild { node_table } => {
      print(&store.rebuild_summary(ctx, &node_table).await?)
    }
    SummaryCommand::Show { node_table, group: Some(group) } => {
      print(&store.summary(&node_table, group).await?)
    }
    SummaryCommand::Show { node_table, group: None } => {
      print(&store.summaries(&node_table).await?)
    }
    SummaryCommand::Verify { node_table } => {
      let mismatches = store.verify_summary(&node_table).await?;
      print(&mismatches)?;
      anyhow::ensure!(
        mismatches.is_empty(),
        "summary of {} drifted in {} skeletons; run `strata summary rebuild {}`",
        node_table,
        mismatches.len(),
        node_table
      );
      Ok(())
    }
  }
}

/// Integer keys are the common case; anything else is a text key.
fn parse_key(raw: &str) -> RowKey {
  raw.parse::<i64>().map_or_else(|_| RowKey::from(raw), RowKey::from)
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory as _;

  use super::*;

  #[test]
  fn cli_definition_is_consistent() { Cli::command().debug_assert(); }

  #[test]
  fn keys_parse_as_integers_when_possible() {
    assert_eq!(parse_key("42"), RowKey::Integer(42));
    assert_eq!(parse_key("abc"), RowKey::Text("abc".into()));
  }

  #[test]
  fn reads_are_not_logged_as_changes() {
    let cli = Cli::parse_from(["strata", "summary", "show", "treenode", "7"]);
    assert!(cli.command.is_read_only());
    let cli = Cli::parse_from(["strata", "enable", "--allow-silent-failure"]);
    assert!(!cli.command.is_read_only());
  }
}
