use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::reachability::DEFAULT_FAILURE_THRESHOLD;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub from: String,
    pub to: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfiguration {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_link_probe_interval_ms")]
    pub link_probe_interval_ms: u64,
    #[serde(default = "default_pool_sync_interval_ms")]
    pub pool_sync_interval_ms: u64,
    #[serde(default = "default_access_sync_interval_ms")]
    pub access_sync_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_failure_limit")]
    pub heartbeat_failure_limit: u32,
    #[serde(default)]
    pub tunnels: Vec<TunnelRequest>,
}

fn default_api_port() -> u16 {
    3307
}

fn default_probe_interval_ms() -> u64 {
    3000
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_link_probe_interval_ms() -> u64 {
    10_000
}

fn default_pool_sync_interval_ms() -> u64 {
    30_000
}

fn default_access_sync_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_failure_limit() -> u32 {
    5
}

impl Default for MonitorConfiguration {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            api_secret: None,
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            link_probe_interval_ms: default_link_probe_interval_ms(),
            pool_sync_interval_ms: default_pool_sync_interval_ms(),
            access_sync_interval_ms: default_access_sync_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_failure_limit: default_heartbeat_failure_limit(),
            tunnels: Vec::new(),
        }
    }
}

impl MonitorConfiguration {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wsrx")
            .join("wsrx-monitor.toml")
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(configuration) => {
                    log::info!("[config] loaded from {}", path.display());
                    configuration
                }
                Err(error) => {
                    log::warn!("[config] failed to parse {}: {error}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "[config] no configuration file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let configuration: Self = toml::from_str(content)
            .map_err(|error| format!("Failed to parse configuration: {error}"))?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("probe_interval_ms", self.probe_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("link_probe_interval_ms", self.link_probe_interval_ms),
            ("pool_sync_interval_ms", self.pool_sync_interval_ms),
            ("access_sync_interval_ms", self.access_sync_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(format!("{name} must be greater than zero"));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn link_probe_interval(&self) -> Duration {
        Duration::from_millis(self.link_probe_interval_ms)
    }

    pub fn pool_sync_interval(&self) -> Duration {
        Duration::from_millis(self.pool_sync_interval_ms)
    }

    pub fn access_sync_interval(&self) -> Duration {
        Duration::from_millis(self.access_sync_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let configuration = MonitorConfiguration::parse("").unwrap();
        assert_eq!(configuration, MonitorConfiguration::default());
        assert_eq!(configuration.probe_interval(), Duration::from_secs(3));
        assert_eq!(configuration.probe_timeout(), Duration::from_secs(2));
        assert_eq!(configuration.failure_threshold, 3);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let configuration = MonitorConfiguration::parse(
            r#"
            api_port = 40123
            api_secret = "hunter2"

            [[tunnels]]
            from = "127.0.0.1:8080"
            to = "wss://relay.example/t"
            "#,
        )
        .unwrap();

        assert_eq!(configuration.api_port, 40123);
        assert_eq!(configuration.api_secret.as_deref(), Some("hunter2"));
        assert_eq!(configuration.pool_sync_interval_ms, 30_000);
        assert_eq!(
            configuration.tunnels,
            vec![TunnelRequest {
                from: "127.0.0.1:8080".into(),
                to: "wss://relay.example/t".into(),
            }]
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let error = MonitorConfiguration::parse("probe_interval_ms = 0").unwrap_err();
        assert!(error.contains("probe_interval_ms"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("wsrx-monitor-does-not-exist.toml");
        assert_eq!(MonitorConfiguration::load(&path), MonitorConfiguration::default());
    }
}
