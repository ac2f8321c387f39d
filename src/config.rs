use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelConfig,
    pub diagnostics: DiagnosticsConfig,
    pub improvement: ImprovementConfig,
    pub scorer: ScorerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub url: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub ack_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9000/telemetry".to_string(),
            max_attempts: 5,
            retry_delay_ms: 1000,
            ack_timeout_ms: 5000,
        }
    }
}

impl ChannelConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub interval_secs: u64,
    pub repair_interval_secs: u64,
    pub predictive_interval_secs: u64,
    pub risk_threshold: f64,
    /// Health points subtracted per open issue.
    pub issue_penalty: f64,
    pub repair_after_run: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            repair_interval_secs: 300,
            predictive_interval_secs: 300,
            risk_threshold: 0.7,
            issue_penalty: 10.0,
            repair_after_run: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovementConfig {
    pub interval_secs: u64,
    pub cpu_threshold: f64,
    pub error_rate_threshold: f64,
    pub latency_threshold: f64,
}

impl Default for ImprovementConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            cpu_threshold: 75.0,
            error_rate_threshold: 2.0,
            latency_threshold: 150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// File (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PULSEWATCH_URL") {
            self.channel.url = url;
        }
        if let Ok(url) = std::env::var("PULSEWATCH_SCORER_URL") {
            self.scorer.url = Some(url);
        }
        if let Some(port) = std::env::var("PULSEWATCH_API_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.api.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.channel.max_attempts, 5);
        assert_eq!(config.channel.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.channel.ack_timeout(), Duration::from_millis(5000));
        assert_eq!(config.diagnostics.interval_secs, 60);
        assert_eq!(config.diagnostics.risk_threshold, 0.7);
        assert_eq!(config.improvement.interval_secs, 3600);
        assert!(config.scorer.url.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[channel]\nurl = \"wss://probe.example.com/ws\"\nmax_attempts = 3\n\n[improvement]\ncpu_threshold = 60.0"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.channel.url, "wss://probe.example.com/ws");
        assert_eq!(config.channel.max_attempts, 3);
        assert_eq!(config.channel.ack_timeout_ms, 5000);
        assert_eq!(config.improvement.cpu_threshold, 60.0);
        assert_eq!(config.improvement.latency_threshold, 150.0);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[channel\nurl = 1").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nport = 9100").unwrap();

        std::env::set_var("PULSEWATCH_API_PORT", "9200");
        std::env::set_var("PULSEWATCH_SCORER_URL", "http://scorer.local");

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.api.port, 9200);
        assert_eq!(config.scorer.url.as_deref(), Some("http://scorer.local"));

        std::env::remove_var("PULSEWATCH_API_PORT");
        std::env::remove_var("PULSEWATCH_SCORER_URL");
    }
}
