use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs::{config_dir, home_dir};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::query_ast::Capabilities;

const CONFIG_FILE: &str = "engine.json";

/// Per-target adjustments to a handler's declared capabilities.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityOverrides {
    pub filter: Option<bool>,
    pub sort: Option<bool>,
    pub limit: Option<bool>,
    pub offset: Option<bool>,
    pub window_ceiling: Option<u64>,
    pub default_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cap for remote requests that would otherwise be unbounded.
    pub default_limit: u64,
    pub http_timeout_secs: u64,
    pub log_level: String,
    pub targets: HashMap<String, CapabilityOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            http_timeout_secs: 30,
            log_level: "info".into(),
            targets: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `engine.json` from the config directory if present, then
    /// `SQLBRIDGE_*` environment variables.
    pub fn load() -> Self {
        let path = config_path();
        let mut config = if path.exists() {
            match Self::from_file(&path) {
                Ok(c) => {
                    info!("Loaded engine config from {}", path.display());
                    c
                }
                Err(e) => {
                    warn!("Ignoring unreadable config {}: {}", path.display(), e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SQLBRIDGE_DEFAULT_LIMIT") {
            match v.trim().parse() {
                Ok(n) => self.default_limit = n,
                Err(_) => warn!("SQLBRIDGE_DEFAULT_LIMIT is not a number: {}", v),
            }
        }
        if let Some(v) = lookup("SQLBRIDGE_HTTP_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(n) => self.http_timeout_secs = n,
                Err(_) => warn!("SQLBRIDGE_HTTP_TIMEOUT_SECS is not a number: {}", v),
            }
        }
        if let Some(v) = lookup("SQLBRIDGE_LOG")
            && !v.trim().is_empty()
        {
            self.log_level = v.trim().to_string();
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// `base` with any configured overrides for `target` applied.
    pub fn capabilities_for(&self, target: &str, base: Capabilities) -> Capabilities {
        let Some(o) = self.targets.get(target) else {
            return base;
        };
        Capabilities {
            filter: o.filter.unwrap_or(base.filter),
            sort: o.sort.unwrap_or(base.sort),
            limit: o.limit.unwrap_or(base.limit),
            offset: o.offset.unwrap_or(base.offset),
            window_ceiling: o.window_ceiling.or(base.window_ceiling),
            default_limit: o.default_limit.or(base.default_limit),
        }
    }
}

/// `<config dir>/sqlbridge`, falling back to `~/.sqlbridge`.
pub fn config_dir_path() -> PathBuf {
    if let Ok(dir) = std::env::var("SQLBRIDGE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match config_dir().or_else(home_dir) {
        Some(mut dir) => {
            dir.push("sqlbridge");
            dir
        }
        None => PathBuf::from(".sqlbridge"),
    }
}

fn config_path() -> PathBuf {
    config_dir_path().join(CONFIG_FILE)
}
