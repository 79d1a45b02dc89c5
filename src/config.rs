use std::time::Duration;

use anyhow::{bail, Context};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

/// Fixed capture tick (Chrome rate-limits tab screenshots)
const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 15_000;
const DEFAULT_NAVIGATION_SETTLE_MS: u64 = 2_000;
const DEFAULT_FOCUS_SETTLE_MS: u64 = 1_000;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_CLEANUP_HOUR: u32 = 3;
/// Only a semantic fingerprint of the page is needed
const DEFAULT_EMBED_TEXT_LIMIT: usize = 1_000;
const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BACKFILL_DELAY_MS: u64 = 500;

/// Default embedding model, 384 dimensions
const DEFAULT_SEMANTIC_MODEL: &str = "all-MiniLM-L6-v2";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_EXPANSION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EXPANSION_KEY_ENV: &str = "TRACEBACK_LLM_KEY";

fn default_excluded_url_patterns() -> Vec<String> {
    [
        r"^chrome://",
        r"^chrome-extension://",
        r"^edge://",
        r"^about:",
        r"^devtools://",
        r"^view-source:",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

/// Configuration for the embedding model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticSearchConfig {
    /// Enable or disable the vector path of search
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// OpenAI-compatible chat endpoint used to expand short queries into related terms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryExpansionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Full chat completions URL
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_expansion_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_expansion_key_env")]
    pub api_key_env: String,
}

impl Default for QueryExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            model: DEFAULT_EXPANSION_MODEL.to_string(),
            api_key_env: DEFAULT_EXPANSION_KEY_ENV.to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_expansion_model() -> String {
    DEFAULT_EXPANSION_MODEL.to_string()
}

fn default_expansion_key_env() -> String {
    DEFAULT_EXPANSION_KEY_ENV.to_string()
}

fn default_capture_interval_ms() -> u64 {
    DEFAULT_CAPTURE_INTERVAL_MS
}

fn default_navigation_settle_ms() -> u64 {
    DEFAULT_NAVIGATION_SETTLE_MS
}

fn default_focus_settle_ms() -> u64 {
    DEFAULT_FOCUS_SETTLE_MS
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_cleanup_hour() -> u32 {
    DEFAULT_CLEANUP_HOUR
}

fn default_embed_text_limit() -> usize {
    DEFAULT_EMBED_TEXT_LIMIT
}

fn default_relay_timeout_secs() -> u64 {
    DEFAULT_RELAY_TIMEOUT_SECS
}

fn default_backfill_delay_ms() -> u64 {
    DEFAULT_BACKFILL_DELAY_MS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,
    #[serde(default = "default_navigation_settle_ms")]
    pub navigation_settle_ms: u64,
    #[serde(default = "default_focus_settle_ms")]
    pub focus_settle_ms: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Local hour of the daily retention purge
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u32,
    /// Maximum number of characters sent to the embedding model per capture
    #[serde(default = "default_embed_text_limit")]
    pub embed_text_limit: usize,
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,
    #[serde(default = "default_backfill_delay_ms")]
    pub backfill_delay_ms: u64,
    /// Regular expressions matched against page URLs; matching pages are never captured
    #[serde(default = "default_excluded_url_patterns")]
    pub excluded_url_patterns: Vec<String>,
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,
    #[serde(default)]
    pub query_expansion: QueryExpansionConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            navigation_settle_ms: DEFAULT_NAVIGATION_SETTLE_MS,
            focus_settle_ms: DEFAULT_FOCUS_SETTLE_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_hour: DEFAULT_CLEANUP_HOUR,
            embed_text_limit: DEFAULT_EMBED_TEXT_LIMIT,
            relay_timeout_secs: DEFAULT_RELAY_TIMEOUT_SECS,
            backfill_delay_ms: DEFAULT_BACKFILL_DELAY_MS,
            excluded_url_patterns: default_excluded_url_patterns(),
            semantic_search: SemanticSearchConfig::default(),
            query_expansion: QueryExpansionConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capture_interval_ms == 0 {
            bail!("capture_interval_ms must be greater than 0");
        }

        if self.retention_days == 0 {
            bail!("retention_days must be greater than 0");
        }

        if self.cleanup_hour > 23 {
            bail!("cleanup_hour must be between 0 and 23, got {}", self.cleanup_hour);
        }

        if self.embed_text_limit == 0 {
            bail!("embed_text_limit must be greater than 0");
        }

        if self.relay_timeout_secs == 0 {
            bail!("relay_timeout_secs must be greater than 0");
        }

        for pattern in &self.excluded_url_patterns {
            Regex::new(pattern)
                .with_context(|| format!("excluded_url_patterns: invalid pattern {pattern:?}"))?;
        }

        if self.semantic_search.download_timeout_secs == 0 {
            bail!("semantic_search.download_timeout_secs must be greater than 0");
        }

        let exp = &self.query_expansion;
        if exp.enabled && exp.url.is_empty() {
            bail!("query_expansion.url must be set when query_expansion is enabled");
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn backfill_delay(&self) -> Duration {
        Duration::from_millis(self.backfill_delay_ms)
    }
}
