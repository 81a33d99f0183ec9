//! Application settings storage
//!
//! Stores folder paths, model endpoint and clustering knobs in a JSON file in
//! the app data directory. A loaded `Settings` value is passed by reference to
//! every stage; nothing here is process-global.

use crate::error::{PaperError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the model API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Reserved directory for titles the model could not place
pub const UNCLASSIFIED_DIR: &str = "Unclassified";

/// How the elbow of the inertia curve is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ElbowRule {
    /// Maximum second difference of the inertia curve
    #[default]
    Knee,
    /// First k with the smallest inertia (legacy behaviour, usually the largest k)
    GlobalMinimum,
}

impl ElbowRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElbowRule::Knee => "knee",
            ElbowRule::GlobalMinimum => "global-minimum",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "knee" => Some(ElbowRule::Knee),
            "global-minimum" | "min" => Some(ElbowRule::GlobalMinimum),
            _ => None,
        }
    }
}

/// Whether organized files leave the source folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "move" => Some(TransferMode::Move),
            "copy" => Some(TransferMode::Copy),
            _ => None,
        }
    }
}

/// Fixed cache filenames (relative paths resolve against the working directory)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePaths {
    #[serde(default = "default_titles_cache")]
    pub titles: PathBuf,
    #[serde(default = "default_clusters_cache")]
    pub clusters: PathBuf,
    #[serde(default = "default_snapshot_cache")]
    pub snapshot: PathBuf,
    #[serde(default = "default_classification_cache")]
    pub classification: PathBuf,
}

fn default_titles_cache() -> PathBuf {
    PathBuf::from("pdf_titles_cache.json")
}

fn default_clusters_cache() -> PathBuf {
    PathBuf::from("pdf_names_clustered_results.json")
}

fn default_snapshot_cache() -> PathBuf {
    PathBuf::from("pdf_data_cache.json")
}

fn default_classification_cache() -> PathBuf {
    PathBuf::from("pdf_classification_results.json")
}

impl Default for CachePaths {
    fn default() -> Self {
        Self {
            titles: default_titles_cache(),
            clusters: default_clusters_cache(),
            snapshot: default_snapshot_cache(),
            classification: default_classification_cache(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used for the classification conversation
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Model used for single-shot title reconstruction
    #[serde(default = "default_enrichment_model")]
    pub enrichment_model: String,
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_formatted_dir")]
    pub formatted_dir: PathBuf,
    #[serde(default = "default_classified_dir")]
    pub classified_dir: PathBuf,
    #[serde(default)]
    pub cache_paths: CachePaths,
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    /// Characters of leading PDF text sent to the model
    #[serde(default = "default_pdf_text_limit")]
    pub pdf_text_limit: usize,
    #[serde(default)]
    pub elbow_rule: ElbowRule,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default)]
    pub transfer_mode: TransferMode,
}

fn default_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_model_name() -> String {
    "deepseek-chat".to_string()
}

fn default_enrichment_model() -> String {
    "deepseek-coder".to_string()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("pdf_files")
}

fn default_formatted_dir() -> PathBuf {
    PathBuf::from("formatted_pdf_files")
}

fn default_classified_dir() -> PathBuf {
    PathBuf::from("classified_pdf_files")
}

fn default_max_clusters() -> usize {
    10
}

fn default_pdf_text_limit() -> usize {
    500
}

fn default_random_seed() -> u64 {
    42
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model_name: default_model_name(),
            enrichment_model: default_enrichment_model(),
            source_dir: default_source_dir(),
            formatted_dir: default_formatted_dir(),
            classified_dir: default_classified_dir(),
            cache_paths: CachePaths::default(),
            max_clusters: default_max_clusters(),
            pdf_text_limit: default_pdf_text_limit(),
            elbow_rule: ElbowRule::default(),
            random_seed: default_random_seed(),
            transfer_mode: TransferMode::default(),
        }
    }
}

/// Default settings file: `<data_dir>/papersort/settings.json`
pub fn default_settings_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("papersort"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("settings.json")
}

impl Settings {
    /// Load settings from disk or create default
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Settings::default(),
            }
        } else {
            Settings::default()
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// Get the API key (env var takes precedence over the stored setting).
    /// Not validated here: a missing key only surfaces when a model call is made.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                return Some(key);
            }
        }
        self.api_key.clone().filter(|k| !k.is_empty())
    }

    /// Set a single option by its JSON name
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api_key" => self.api_key = if value.is_empty() { None } else { Some(value.to_string()) },
            "base_url" => self.base_url = value.trim_end_matches('/').to_string(),
            "model_name" => self.model_name = value.to_string(),
            "enrichment_model" => self.enrichment_model = value.to_string(),
            "source_dir" => self.source_dir = PathBuf::from(value),
            "formatted_dir" => self.formatted_dir = PathBuf::from(value),
            "classified_dir" => self.classified_dir = PathBuf::from(value),
            "max_clusters" => self.max_clusters = parse_positive(key, value)?,
            "pdf_text_limit" => self.pdf_text_limit = parse_positive(key, value)?,
            "random_seed" => {
                self.random_seed = value
                    .parse()
                    .map_err(|_| PaperError::config(format!("random_seed must be an integer, got '{}'", value)))?
            }
            "elbow_rule" => {
                self.elbow_rule = ElbowRule::from_str(value)
                    .ok_or_else(|| PaperError::config(format!("Unknown elbow rule '{}'. Valid: knee, global-minimum", value)))?
            }
            "transfer_mode" => {
                self.transfer_mode = TransferMode::from_str(value)
                    .ok_or_else(|| PaperError::config(format!("Unknown transfer mode '{}'. Valid: move, copy", value)))?
            }
            "cache_paths.titles" => self.cache_paths.titles = PathBuf::from(value),
            "cache_paths.clusters" => self.cache_paths.clusters = PathBuf::from(value),
            "cache_paths.snapshot" => self.cache_paths.snapshot = PathBuf::from(value),
            "cache_paths.classification" => self.cache_paths.classification = PathBuf::from(value),
            _ => return Err(PaperError::config(format!("Unknown setting '{}'", key))),
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(PaperError::config(format!("{} must be a positive integer, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json"));
        assert_eq!(settings.max_clusters, 10);
        assert_eq!(settings.pdf_text_limit, 500);
        assert_eq!(settings.elbow_rule, ElbowRule::Knee);
        assert_eq!(settings.base_url, "https://api.deepseek.com");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"max_clusters": 4, "elbow_rule": "global-minimum"}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.max_clusters, 4);
        assert_eq!(settings.elbow_rule, ElbowRule::GlobalMinimum);
        assert_eq!(settings.model_name, "deepseek-chat");
        assert_eq!(settings.cache_paths.clusters, PathBuf::from("pdf_names_clustered_results.json"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.set("source_dir", "/papers/raw").unwrap();
        settings.set("transfer_mode", "copy").unwrap();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.source_dir, PathBuf::from("/papers/raw"));
        assert_eq!(loaded.transfer_mode, TransferMode::Copy);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut settings = Settings::default();
        assert!(settings.set("max_clusters", "0").is_err());
        assert!(settings.set("elbow_rule", "steepest").is_err());
        assert!(settings.set("colour", "blue").is_err());
        settings.set("base_url", "http://localhost:8080/").unwrap();
        assert_eq!(settings.base_url, "http://localhost:8080");
    }
}
