use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

use bnode_core::NodeConfig;
use bnode_observe::LoggerConfig;

/// Contents of the agent configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub logger: LoggerConfig,
    pub metrics: MetricsConfig,
}

/// Prometheus textfile export, for node_exporter's textfile collector.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub textfile: Option<PathBuf>,
    pub interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            textfile: None,
            interval_ms: 15_000,
        }
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1_000))
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
