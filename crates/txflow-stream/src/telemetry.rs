//! Subscriber setup for runs driven by `txflow-stream`.
//!
//! The pipeline, runner and cursor stores all log through `tracing`; this module
//! installs the subscriber that filters and prints those events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which txflow events get printed, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter level for every target without an override (`"info"` unless set).
    pub level: String,
    /// Levels for individual crates such as `txflow-stream`; dashes become underscores.
    #[serde(rename = "crates")]
    pub components: BTreeMap<String, String>,
    /// Print one JSON object per event rather than formatted lines.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Set the level for one crate, e.g. `("txflow-stream", "debug")`.
    pub fn component(mut self, name: impl Into<String>, level: impl Into<String>) -> Self {
        self.components.insert(name.into(), level.into());
        self
    }

    /// Filter directives, e.g. `"info,txflow_stream=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install a global subscriber for `config`.
///
/// Returns `false` if a subscriber was already installed (e.g. by another test).
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let cfg = LogConfig::default()
            .component("txflow-stream", "debug")
            .component("txflow-core", "trace");
        assert_eq!(cfg.directives(), "info,txflow_core=trace,txflow_stream=debug");
    }

    #[test]
    fn log_config_from_json() {
        let cfg: LogConfig = serde_json::from_str(r#"{ "json": true }"#).unwrap();
        assert_eq!(cfg.level, "info");
        assert!(cfg.json);
        assert!(cfg.components.is_empty());

        let cfg: LogConfig =
            serde_json::from_str(r#"{ "level": "warn", "crates": { "txflow-storage": "debug" } }"#)
                .unwrap();
        assert!(!cfg.json);
        assert_eq!(cfg.directives(), "warn,txflow_storage=debug");
    }
}
