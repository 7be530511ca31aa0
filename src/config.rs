//! Configuration management for prayer-writer.
//!
//! Loads config from YAML files in standard locations. Every section falls
//! back to its defaults, so an empty or missing file is a valid config.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub default_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            default_model: "gpt-4.1".into(),
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Empty means `~/.prayer-writer`.
    pub data_dir: String,
}

impl StorageConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".prayer-writer")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub program: String,
    pub voice: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub sentence_gap_ms: u64,
    pub newline_pause_ms: u64,
    pub watchdog_interval_ms: u64,
    pub stale_pause_secs: u64,
    pub max_restarts: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".into(),
            voice: String::new(),
            rate: 0.9,
            pitch: 1.0,
            volume: 1.0,
            sentence_gap_ms: 100,
            newline_pause_ms: 400,
            watchdog_interval_ms: 5000,
            stale_pause_secs: 45,
            max_restarts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Empty means `<data_dir>/exports`.
    pub dir: String,
    pub open_command: String,
    pub auto_open: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            open_command: if cfg!(target_os = "macos") {
                "open".into()
            } else {
                "xdg-open".into()
            },
            auto_open: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_duration: f64,
    pub device_index: Option<usize>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            max_duration: 600.0,
            device_index: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub speech: SpeechConfig,
    pub export: ExportConfig,
    pub recording: RecordingConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/prayer-writer/config.yaml
    /// 3. /etc/prayer-writer/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/prayer-writer/config.yaml")),
                Some(PathBuf::from("/etc/prayer-writer/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    pub fn export_dir(&self) -> PathBuf {
        if self.export.dir.is_empty() {
            self.storage.resolved_dir().join("exports")
        } else {
            PathBuf::from(&self.export.dir)
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
