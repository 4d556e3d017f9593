// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::{ConfigSource, Source};

const ENV_PATH: &str = "FEED_SOURCES_PATH";

/// Standalone configuration: where checkpoints live and which feeds to poll.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default, rename = "source", alias = "sources")]
    pub sources: Vec<Source>,
}

impl ConfigSource for FeedConfig {
    fn list_sources(&self) -> Result<Vec<Source>> {
        validate_sources(self.sources.clone())
    }
}

/// Load feed config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<FeedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing feed config {}", path.display()))
}

/// Load feed config using env var + fallbacks:
/// 1) $FEED_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_config_default() -> Result<FeedConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("FEED_SOURCES_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(FeedConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<FeedConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str(s).context("invalid JSON feed config");
    }
    toml::from_str(s).context("invalid TOML feed config")
}

/// Trim fields, reject blanks and duplicate names. Order is preserved.
pub fn validate_sources(sources: Vec<Source>) -> Result<Vec<Source>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(sources.len());
    for mut s in sources {
        s.name = s.name.trim().to_string();
        s.url = s.url.trim().to_string();
        s.order_field = s.order_field.trim().to_string();
        s.default_checkpoint = s.default_checkpoint.trim().to_string();

        if s.name.is_empty() {
            bail!("source with url `{}` has no name", s.url);
        }
        for (field, value) in [
            ("url", &s.url),
            ("order_field", &s.order_field),
            ("default_checkpoint", &s.default_checkpoint),
        ] {
            if value.is_empty() {
                bail!("source `{}` is missing `{field}`", s.name);
            }
        }
        if !seen.insert(s.name.clone()) {
            bail!("duplicate source name `{}`", s.name);
        }
        out.push(s);
    }
    Ok(out)
}
