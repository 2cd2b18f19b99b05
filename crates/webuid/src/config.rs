//! Daemon configuration (`webuid.toml`).
//!
//! Every section and field is optional. Command-line flags win over the
//! file, and the file wins over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use webui_controller::ControllerConfig;

pub const DEFAULT_PORT: u16 = 8480;
pub const DEFAULT_DATA_DIR: &str = "/var/lib/webuid";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    pub store: Option<StoreConfig>,
    pub api: Option<ApiConfig>,
    pub controller: Option<ControllerSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub port: Option<u16>,
}

/// `[controller]` section. Durations are strings such as `"100ms"` or `"5m"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerSection {
    pub workers: Option<usize>,
    pub coalesce_window: Option<String>,
    pub resync_interval: Option<String>,
    pub retry_base: Option<String>,
    pub retry_max: Option<String>,
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn port(&self) -> u16 {
        self.api
            .as_ref()
            .and_then(|api| api.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|store| store.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Resolve the `[controller]` section over the defaults and validate it.
    pub fn controller(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = ControllerConfig::default();
        let Some(section) = &self.controller else {
            return Ok(config);
        };

        if let Some(workers) = section.workers {
            config.workers = workers;
        }
        let durations = [
            ("coalesce_window", &section.coalesce_window, &mut config.coalesce_window),
            ("resync_interval", &section.resync_interval, &mut config.resync_interval),
            ("retry_base", &section.retry_base, &mut config.retry_base),
            ("retry_max", &section.retry_max, &mut config.retry_max),
        ];
        for (field, value, slot) in durations {
            if let Some(value) = value {
                *slot = parse_duration(value).with_context(|| format!("controller.{field}"))?;
            }
        }
        Ok(config)
    }
}

/// Reject settings the controller cannot run with.
pub fn validate(config: &ControllerConfig) -> anyhow::Result<()> {
    if config.workers == 0 {
        bail!("controller.workers must be at least 1");
    }
    if config.resync_interval.is_zero() {
        bail!("controller.resync_interval must be greater than zero");
    }
    if config.retry_base > config.retry_max {
        bail!(
            "controller.retry_base ({:?}) exceeds controller.retry_max ({:?})",
            config.retry_base,
            config.retry_max
        );
    }
    Ok(())
}

/// Parse `"250ms"`, `"30s"`, `"5m"`, `"1h"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (digits, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (s, 1_000)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid duration {s:?}"))?;
    let millis = value
        .checked_mul(unit_ms)
        .with_context(|| format!("duration {s:?} is too large"))?;
    Ok(Duration::from_millis(millis))
}
