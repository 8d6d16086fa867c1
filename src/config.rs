//! Configuration.
//!
//! Sources (highest priority first):
//! 1. Environment variables (QUORUM_HOME, QUORUM_TRANSCRIBE_URL,
//!    QUORUM_EXTRACT_URL, QUORUM_MESSAGING_URL, QUORUM_VETO_SECS)
//! 2. Config file (.quorum/config.yaml, discovered by walking up from
//!    the current directory)
//! 3. Defaults (~/.quorum, local service ports, 120 s veto window)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RetryPolicy;

/// Default veto window, program-wide
pub const DEFAULT_VETO_SECS: u64 = 120;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Home directory override (relative paths resolve against the
    /// config file's parent)
    pub home: Option<String>,

    #[serde(default)]
    pub services: ServicesConfig,

    /// Veto window in seconds
    pub veto_secs: Option<u64>,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Channel results are posted to
    pub results_channel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
    pub transcribe_url: Option<String>,
    pub extract_url: Option<String>,
    pub messaging_url: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// State directory (session logs, capture files)
    pub home: PathBuf,

    pub transcribe_url: String,
    pub extract_url: String,
    pub messaging_url: String,
    pub results_channel: String,

    pub veto_secs: u64,
    pub retry: RetryPolicy,
}

impl QuorumConfig {
    /// Load configuration from env, discovered file, and defaults
    pub fn load() -> Result<Self> {
        let file = match find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let mut parsed: ConfigFile = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                resolve_home(&mut parsed, &path);
                parsed
            }
            None => ConfigFile::default(),
        };

        let home = std::env::var("QUORUM_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| file.home.clone().map(PathBuf::from))
            .or_else(|| dirs::home_dir().map(|h| h.join(".quorum")))
            .context("Cannot determine home directory")?;

        Ok(Self {
            home,
            transcribe_url: env_or("QUORUM_TRANSCRIBE_URL", file.services.transcribe_url)
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            extract_url: env_or("QUORUM_EXTRACT_URL", file.services.extract_url)
                .unwrap_or_else(|| "http://localhost:9000".to_string()),
            messaging_url: env_or("QUORUM_MESSAGING_URL", file.services.messaging_url)
                .unwrap_or_else(|| "http://localhost:7000".to_string()),
            results_channel: file
                .results_channel
                .unwrap_or_else(|| "decisions".to_string()),
            veto_secs: std::env::var("QUORUM_VETO_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.veto_secs)
                .unwrap_or(DEFAULT_VETO_SECS),
            retry: file.retry.unwrap_or_default(),
        })
    }

    /// Session audit logs live here
    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    /// Capture files live here
    pub fn captures_dir(&self) -> PathBuf {
        self.home.join("captures")
    }

    /// The veto window as a Duration
    pub fn veto_window(&self) -> Duration {
        Duration::from_secs(self.veto_secs)
    }
}

fn env_or(key: &str, fallback: Option<String>) -> Option<String> {
    std::env::var(key).ok().or(fallback)
}

/// Paths in the config file are relative to the file's parent directory
fn resolve_home(file: &mut ConfigFile, config_path: &Path) {
    if let Some(home) = &file.home {
        let path = PathBuf::from(home);
        if path.is_relative() {
            if let Some(base) = config_path.parent().and_then(|p| p.parent()) {
                file.home = Some(base.join(path).to_string_lossy().to_string());
            }
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".quorum").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_parsing() {
        let yaml = r#"
home: /var/lib/quorum
services:
  transcribe_url: http://transcribe.internal:8000
veto_secs: 60
retry:
  max_attempts: 5
results_channel: meeting-decisions
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.home.as_deref(), Some("/var/lib/quorum"));
        assert_eq!(
            file.services.transcribe_url.as_deref(),
            Some("http://transcribe.internal:8000")
        );
        assert_eq!(file.veto_secs, Some(60));
        assert_eq!(file.retry.unwrap().max_attempts, 5);
        assert_eq!(file.results_channel.as_deref(), Some("meeting-decisions"));
    }

    #[test]
    fn test_empty_config_file_is_valid() {
        let file: ConfigFile = serde_yaml::from_str("{}").unwrap();
        assert!(file.home.is_none());
        assert!(file.veto_secs.is_none());
    }
}
