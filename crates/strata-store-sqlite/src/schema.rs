//! Bookkeeping tables owned by strata.
//!
//! Executed once per connection; idempotent thanks to
//! `CREATE TABLE IF NOT EXISTS`.

/// Full bookkeeping DDL.
pub const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

-- One row per tracked live table.
CREATE TABLE IF NOT EXISTS strata_history_table (
    history_table_name     TEXT PRIMARY KEY,
    live_table_name        TEXT NOT NULL UNIQUE,
    triggers_installed     INTEGER NOT NULL DEFAULT 0,
    live_table_time_column TEXT,
    live_table_pkey_column TEXT NOT NULL,
    parent_history_table   TEXT,
    creation_time          TEXT NOT NULL
);

-- Structural inheritance between live tables; one parent per child.
CREATE TABLE IF NOT EXISTS strata_table_inheritance (
    child_table  TEXT PRIMARY KEY,
    parent_table TEXT NOT NULL
);

-- Attribution of every write transaction opened through the engine.
CREATE TABLE IF NOT EXISTS strata_transaction_info (
    transaction_id INTEGER NOT NULL,
    execution_time TEXT NOT NULL,
    user_id        INTEGER,
    change_type    TEXT NOT NULL
                   CHECK (change_type IN ('Backend', 'Migration', 'External')),
    label          TEXT,
    PRIMARY KEY (transaction_id, execution_time)
);

-- Node tables with a maintained summary; spec_json is a SummarySpec.
CREATE TABLE IF NOT EXISTS strata_summary_table (
    node_table_name    TEXT PRIMARY KEY,
    summary_table_name TEXT NOT NULL UNIQUE,
    spec_json          TEXT NOT NULL,
    creation_time      TEXT NOT NULL
);
";

/// Prefix shared by every bookkeeping table.
pub const INTERNAL_PREFIX: &str = "strata_";
