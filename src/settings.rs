use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::parser::labels::LabelMapping;
use crate::parser::normalize::GarbleRule;

const DEFAULTS: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_path: PathBuf,
    pub bind: String,
    pub max_upload_bytes: usize,
    pub preview_chars: usize,
    pub excerpt_chars: usize,
    pub title_chars: usize,
    pub unparsed_prefix_chars: usize,
    pub persist: PersistSettings,
    #[serde(default)]
    pub garble: Vec<GarbleRule>,
    #[serde(default)]
    pub labels: Vec<LabelMapping>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistSettings {
    pub html_candidates: Vec<String>,
    pub rank_guesses: Vec<String>,
    #[serde(default = "default_true")]
    pub introspect: bool,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Embedded defaults, then `catalog_ingest.toml` (or `path`), then `CATALOG_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));
        builder = match path {
            Some(p) => builder.add_source(File::from(p)),
            None => builder.add_source(File::with_name("catalog_ingest").required(false)),
        };
        let settings = builder
            .add_source(
                Environment::with_prefix("CATALOG")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to load settings")?
            .try_deserialize::<Settings>()
            .context("Invalid settings")?;
        Ok(settings)
    }

    /// Only the embedded defaults; no file or environment lookup.
    pub fn defaults() -> Result<Self> {
        Ok(Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .build()?
            .try_deserialize::<Settings>()?)
    }
}
