//! 命令行客户端配置

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use serde::Deserialize;
use crate::core::SchedulerOptions;

fn default_request_timeout() -> u64 {
    300
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 要上传的文件
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerOptions,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Something went wrong reading {}", path.display()))?;
        Self::from_toml_str(&config_str).with_context(|| format!("Can't load {}", path.display()))
    }

    pub fn from_toml_str(config_str: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(config_str).context("Invalid config")?;
        if !config.endpoint.starts_with("http") {
            anyhow::bail!("endpoint must be an http(s) url: {}", config.endpoint);
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config() {
        let config = Config::from_toml_str(r#"endpoint = "http://localhost:3000""#).unwrap();
        assert!(config.token.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.scheduler, SchedulerOptions::default());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            endpoint = "https://media.example.com"
            token = "secret"
            request_timeout_secs = 30
            files = ["a.mp4", "b.jpg"]

            [scheduler]
            concurrency = 5
            chunk_timeout_ms = 15000

            [scheduler.retry]
            max_attempts = 4
            base_delay_ms = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.files.len(), 2);
        assert_eq!(config.scheduler.concurrency, 5);
        assert_eq!(config.scheduler.chunk_timeout, Duration::from_secs(15));
        assert_eq!(config.scheduler.retry.max_attempts, 4);
        assert_eq!(config.scheduler.retry.base_delay, Duration::from_millis(200));
        assert_eq!(config.scheduler.retry.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(Config::from_toml_str(r#"endpoint = "localhost""#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"endpoint = "http://127.0.0.1:8080""#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.endpoint, "http://127.0.0.1:8080");
        assert!(Config::load("/nonexistent/config.toml").is_err());
    }
}
