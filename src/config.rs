//! Configuration loading.
//!
//! Every section of `ocaz.toml` is optional. A missing file at the default
//! location yields [`Config::default`]; an explicitly named file that does not
//! exist is an error.
//!
//! ```toml
//! [db]
//! path = "./data/ocaz.sqlite"
//!
//! [fetch]
//! prefix_size = 10000000
//!
//! [classifiers.nsfw-opennsfw2]
//! url = "http://ocaz-classifier-nsfw-opennsfw2:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Number of leading bytes hashed into an object's prefix hash.
pub const DEFAULT_PREFIX_SIZE: u64 = 10_000_000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub classifiers: BTreeMap<String, ClassifierConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ocaz.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_prefix_size")]
    pub prefix_size: u64,
    /// Connect and idle-read timeout. Transfers that keep progressing are
    /// not cut off.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            prefix_size: default_prefix_size(),
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_prefix_size() -> u64 {
    DEFAULT_PREFIX_SIZE
}
fn default_fetch_timeout_secs() -> u64 {
    300
}
fn default_user_agent() -> String {
    format!("ocaz/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_chunk_size() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Path or name of the `ffprobe` executable.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffprobe: default_ffprobe(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}
fn default_probe_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// An external classifier reachable over the `/classify` contract.
#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Base URL; requests go to `<url>/classify`.
    pub url: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_classifier_timeout_secs() -> u64 {
    60
}

impl ClassifierConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

impl Config {
    /// Looks up a classifier by service name.
    pub fn classifier(&self, service: &str) -> Option<&ClassifierConfig> {
        self.classifiers.get(service)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch.prefix_size == 0 {
            bail!("fetch.prefix_size must be greater than zero");
        }
        if self.batch.max_workers == 0 {
            bail!("batch.max_workers must be greater than zero");
        }
        if self.batch.chunk_size == 0 {
            bail!("batch.chunk_size must be greater than zero");
        }
        for (name, classifier) in &self.classifiers {
            let parsed = url::Url::parse(&classifier.url)
                .with_context(|| format!("classifiers.{}.url is not a valid URL", name))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!(
                    "classifiers.{}.url must use http or https, got '{}'",
                    name,
                    parsed.scheme()
                );
            }
        }
        Ok(())
    }
}

/// Parses and validates a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration file at `path`.
///
/// When `required` is false and the file does not exist, defaults are used.
pub fn load_config(path: &Path, required: bool) -> Result<Config> {
    if !path.exists() {
        if required {
            bail!("Config file not found: {}", path.display());
        }
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}
