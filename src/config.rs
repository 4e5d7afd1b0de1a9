use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Result, Context};

pub const CONFIG_PATH: &str = "data/config.yaml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,
    #[serde(default = "default_true")]
    pub retry_transient: bool,
    #[serde(default = "default_max_pages_per_site")]
    pub max_pages_per_site: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_request_interval_ms() -> u64 {
    1200 // per site
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_pages_per_site() -> u32 {
    20
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracing_level: default_tracing_level(),
            user_agent: default_user_agent(),
            request_interval_ms: default_request_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            respect_robots_txt: true,
            retry_transient: true,
            max_pages_per_site: default_max_pages_per_site(),
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Reads data/config.yaml if present, then applies environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_PATH))?;
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// A missing file yields the defaults; a malformed one is an error
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(config_str) => serde_yaml::from_str(&config_str)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(_) => Ok(Self::default()),
        }
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(user_agent) = lookup("RENT_SURVEY_USER_AGENT") {
            self.user_agent = user_agent;
        }

        if let Some(interval) = lookup("REQUEST_INTERVAL_MS") {
            self.request_interval_ms = interval.parse()
                .context("Failed to parse REQUEST_INTERVAL_MS environment variable")?;
        }

        if let Some(timeout) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = timeout.parse()
                .context("Failed to parse REQUEST_TIMEOUT_SECS environment variable")?;
        }

        if let Some(tracing_level) = lookup("TRACING_LEVEL") {
            self.tracing_level = tracing_level;
        }

        if let Some(respect) = lookup("RESPECT_ROBOTS_TXT") {
            self.respect_robots_txt = respect.parse()
                .context("Failed to parse RESPECT_ROBOTS_TXT environment variable")?;
        }

        if let Some(output_dir) = lookup("OUTPUT_DIR") {
            self.output_dir = output_dir;
        }

        Ok(())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn create_default() -> Result<()> {
        Self::write_default(Path::new(CONFIG_PATH))
    }

    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_str = serde_yaml::to_string(&Self::default())?;
        fs::write(path, config_str)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_interval(), Duration::from_millis(1200));
        assert_eq!(config.max_pages_per_site, 20);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "request_interval_ms: 3000\nrespect_robots_txt: false\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.request_interval_ms, 3000);
        assert!(!config.respect_robots_txt);
        assert_eq!(config.output_dir, "outputs");
        assert_eq!(config.tracing_level, "info");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "request_interval_ms: [oops").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("config.yaml");
        Config::write_default(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REQUEST_INTERVAL_MS", "2500"),
            ("RESPECT_ROBOTS_TXT", "false"),
            ("OUTPUT_DIR", "/tmp/survey"),
            ("RENT_SURVEY_USER_AGENT", "rent-survey/0.1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.request_interval_ms, 2500);
        assert!(!config.respect_robots_txt);
        assert_eq!(config.output_dir, "/tmp/survey");
        assert_eq!(config.user_agent, "rent-survey/0.1");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_bad_env_value_is_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| (name == "REQUEST_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert!(result.is_err());
    }
}
