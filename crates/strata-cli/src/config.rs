//! Operator configuration: an optional TOML file overlaid with `STRATA_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use config::{Config, Environment, File, builder::DefaultState};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
  /// SQLite database holding the live and history tables.
  #[serde(default = "default_database")]
  pub database:      PathBuf,
  /// User id recorded for administrative transactions.
  #[serde(default)]
  pub actor_id:      i64,
  /// Tables `audit` should not report.
  #[serde(default)]
  pub exempt_tables: Vec<String>,
}

fn default_database() -> PathBuf { PathBuf::from("strata.db") }

impl CliConfig {
  /// Load `path` if it exists, then apply the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_builder(Config::builder().add_source(File::from(path).required(false)))
  }

  fn from_builder(
    builder: config::ConfigBuilder<DefaultState>,
  ) -> anyhow::Result<Self> {
    builder
      .add_source(
        Environment::with_prefix("STRATA")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("exempt_tables"),
      )
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise CliConfig")
  }
}
