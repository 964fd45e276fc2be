use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "llama3";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub cache_path: PathBuf,
    /// Plain-text applicant profile handed to the answer generator.
    pub profile_path: Option<PathBuf>,
    pub model: String,
    pub browser: BrowserConfig,
    pub tuning: Tuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    /// Chrome profile holding the logged-in session.
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
}

/// Fixed waits and scroll budget for page interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub action_delay_ms: u64,
    pub wait_timeout_ms: u64,
    pub scroll_count: u32,
    pub scroll_step: i64,
}

impl Tuning {
    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "jobpilot")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        let data = data_dir();
        Self {
            db_path: data.join("tracker.db"),
            cache_path: data.join("question_cache.json"),
            profile_path: None,
            model: DEFAULT_MODEL.to_string(),
            browser: BrowserConfig::default(),
            tuning: Tuning::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            user_data_dir: None,
            headless: false,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            action_delay_ms: 1000,
            wait_timeout_ms: 5000,
            scroll_count: 5,
            scroll_step: 1000,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "jobpilot")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("jobpilot.toml"))
    }

    /// Reads `path` (or the default location). A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// The applicant profile text, empty when no profile is configured.
    pub fn applicant_profile(&self) -> Result<String> {
        match &self.profile_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read applicant profile: {}", path.display())),
            None => {
                tracing::warn!("No profile_path configured; answers will be generated without an applicant profile");
                Ok(String::new())
            }
        }
    }
}
