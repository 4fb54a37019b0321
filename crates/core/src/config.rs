//! Engine configuration
//!
//! Loaded from `chat_actions.toml` in the working directory, falling back to
//! `<config dir>/chat-actions/config.toml`, falling back to defaults.
//!
//! ```toml
//! [engine]
//! max_candidates = 10
//! debug_errors = false
//!
//! [options.task]
//! priority = ["Low", "Med", "High"]
//!
//! [aliases]
//! medium = "med"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Domain;

/// Hard ceiling on disambiguation lists
pub const MAX_CANDIDATES: usize = 10;

/// File name looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "chat_actions.toml";

/// Directory name within the platform config dir
const CONFIG_SUBDIR: &str = "chat-actions";

/// Environment override for `engine.debug_errors`
const DEBUG_ENV: &str = "CHAT_ACTIONS_DEBUG";

// ============================================================================
// Sections
// ============================================================================

/// `[engine]` tunables
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// `limit` passed to each store `find` call
    #[serde(default = "default_find_limit")]
    pub find_limit: usize,
    /// Query variants tried before the "≥2 unique matches" early stop applies
    #[serde(default = "default_min_variants_before_stop")]
    pub min_variants_before_stop: usize,
    /// Unset means pending actions never expire
    #[serde(default)]
    pub pending_ttl_secs: Option<u64>,
    /// Show store diagnostics (status, code, request id) to the user
    #[serde(default)]
    pub debug_errors: bool,
}

fn default_max_candidates() -> usize {
    MAX_CANDIDATES
}

fn default_find_limit() -> usize {
    10
}

fn default_min_variants_before_stop() -> usize {
    2
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            find_limit: default_find_limit(),
            min_variants_before_stop: default_min_variants_before_stop(),
            pending_ttl_secs: None,
            debug_errors: false,
        }
    }
}

impl EngineSettings {
    pub fn max_candidates(&self) -> usize {
        self.max_candidates.clamp(1, MAX_CANDIDATES)
    }
}

/// `[llm]` settings for the optional reply classifier
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_llm_model() -> String {
    "openai/gpt-oss-20b".to_string()
}

fn default_llm_timeout() -> u64 {
    20
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Legal option values: domain → field → values
pub type OptionTable = HashMap<Domain, HashMap<String, Vec<String>>>;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default = "default_options")]
    pub options: OptionTable,
    /// Normalized alias key → canonical token
    #[serde(default = "default_aliases")]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            options: default_options(),
            aliases: default_aliases(),
            llm: LlmConfig::default(),
        }
    }
}

fn values(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_options() -> OptionTable {
    let mut table = OptionTable::new();
    table.insert(
        Domain::Task,
        HashMap::from([
            ("status".to_string(), values(&["Open", "In Progress", "Done", "Deprecated"])),
            ("priority".to_string(), values(&["Low", "Med", "High"])),
            ("tags".to_string(), values(&["work", "personal", "errand"])),
        ]),
    );
    table.insert(
        Domain::Idea,
        HashMap::from([
            ("category".to_string(), values(&["Product", "Content", "Research", "Personal"])),
            ("tags".to_string(), values(&["ai", "ux", "marketing"])),
        ]),
    );
    table.insert(
        Domain::Social,
        HashMap::from([
            ("platform".to_string(), values(&["Instagram", "LinkedIn", "X", "TikTok", "YouTube"])),
            ("status".to_string(), values(&["Draft", "Scheduled", "Published"])),
        ]),
    );
    table.insert(
        Domain::Journal,
        HashMap::from([
            ("mood".to_string(), values(&["Great", "Good", "Neutral", "Low", "Bad"])),
            ("topics".to_string(), values(&["health", "work", "family", "travel"])),
        ]),
    );
    table
}

fn default_aliases() -> HashMap<String, String> {
    [
        ("medium", "med"),
        ("mid", "med"),
        ("normal", "med"),
        ("mittel", "med"),
        ("urgent", "high"),
        ("hoch", "high"),
        ("niedrig", "low"),
        ("twitter", "x"),
        ("insta", "instagram"),
        ("ig", "instagram"),
        ("yt", "youtube"),
        ("wip", "inprogress"),
        ("doing", "inprogress"),
        ("todo", "open"),
        ("finished", "done"),
        ("erledigt", "done"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    /// Load from an explicit path
    pub fn load(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Load from the first existing default location, or use defaults
    pub fn load_default() -> Result<Config> {
        for path in default_paths() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config");
                return Config::load(&path);
            }
        }
        let mut config = Config::default();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(DEBUG_ENV) {
            self.engine.debug_errors = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(LOCAL_CONFIG_FILE));
    }
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(CONFIG_SUBDIR).join("config.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_domain() {
        let config = Config::default();
        for domain in Domain::ALL {
            assert!(config.options.contains_key(&domain), "missing {}", domain);
        }
        assert_eq!(config.engine.max_candidates(), 10);
        assert!(config.engine.pending_ttl_secs.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [engine]
            max_candidates = 25
            pending_ttl_secs = 3600

            [options.task]
            priority = ["P1", "P2"]

            [aliases]
            urgent = "p1"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        // Clamped to the hard ceiling
        assert_eq!(config.engine.max_candidates(), 10);
        assert_eq!(config.engine.find_limit, 10);
        assert_eq!(config.engine.pending_ttl_secs, Some(3600));
        assert_eq!(config.options[&Domain::Task]["priority"], vec!["P1", "P2"]);
        assert!(!config.options.contains_key(&Domain::Idea));
        assert_eq!(config.aliases["urgent"], "p1");
        assert_eq!(config.llm.model, "openai/gpt-oss-20b");
    }

    #[test]
    fn test_load_missing_file_fails_with_path() {
        let err = Config::load(Path::new("/nonexistent/chat_actions.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chat_actions.toml"));
    }
}
