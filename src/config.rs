//! `qan-profile.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::RequestScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
}

impl clap::ValueEnum for Reporter {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Pretty, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Pretty => clap::builder::PossibleValue::new("pretty"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Default output format for CLI commands.
    #[serde(default = "default_reporter")]
    pub reporter: Reporter,

    /// Ranked classes per profile when `--limit` is not given.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Compute per-entry series on parallel threads.
    #[serde(default)]
    pub concurrent_series: bool,

    /// Deadline for one profile request.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_reporter() -> Reporter {
    Reporter::Pretty
}

fn default_limit() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reporter: default_reporter(),
            default_limit: default_limit(),
            concurrent_series: false,
            timeout_ms: None,
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn request_scope(&self) -> RequestScope {
        RequestScope::from_timeout_ms(self.timeout_ms)
    }
}
