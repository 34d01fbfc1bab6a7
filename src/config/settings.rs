use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runner options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory downloaded files are written to.
    pub download_dir: PathBuf,

    /// Run the browser without a window.
    pub headless: bool,

    /// Automation engine backend to launch.
    pub browser_name: String,

    /// Upper bound for every browser wait (navigation, element, tab, download).
    pub step_timeout_ms: u64,

    /// Keep one browser alive across runs instead of launching one per run.
    pub reuse_browser: bool,

    /// HTTP timeout for direct URL downloads, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            headless: true,
            browser_name: "chromium".into(),
            step_timeout_ms: 30_000,
            reuse_browser: false,
            fetch_timeout_secs: 60,
        }
    }
}

impl RunnerConfig {
    /// Load options from a YAML file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Defaults overlaid with `FEEDGUIDE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlay values found through `lookup` (keyed by env var name).
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("FEEDGUIDE_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("FEEDGUIDE_HEADLESS") {
            self.headless = parse_flag(&v);
        }
        if let Some(name) = lookup("FEEDGUIDE_BROWSER") {
            self.browser_name = name;
        }
        if let Some(v) = lookup("FEEDGUIDE_STEP_TIMEOUT_MS") {
            self.step_timeout_ms = parse_number("FEEDGUIDE_STEP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FEEDGUIDE_REUSE_BROWSER") {
            self.reuse_browser = parse_flag(&v);
        }
        if let Some(v) = lookup("FEEDGUIDE_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = parse_number("FEEDGUIDE_FETCH_TIMEOUT_SECS", &v)?;
        }
        Ok(self)
    }

    /// Step timeout as a duration.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Direct-download timeout as a duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Absolute download directory, created if absent.
    pub fn prepare_download_dir(&self) -> Result<PathBuf> {
        let dir = if self.download_dir.is_absolute() {
            self.download_dir.clone()
        } else {
            std::env::current_dir()?.join(&self.download_dir)
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn parse_flag(value: &str) -> bool {
    value == "true" || value == "1"
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
}
