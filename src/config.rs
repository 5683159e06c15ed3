//! Configuration for tubescribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TUBESCRIBE_HOME, TUBESCRIBE_DOWNLOADS, ...)
//! 2. Config file (.tubescribe/config.yaml)
//! 3. Defaults (~/.tubescribe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .tubescribe/config.yaml
//! - Paths in config file are relative to the config file's parent directory

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".tubescribe";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub transform: TransformSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .tubescribe/)
    pub home: Option<String>,
    /// Temporary payload directory (relative to project root)
    pub downloads: Option<String>,
    /// Transcript output directory (relative to project root)
    pub output: Option<String>,
    /// SQLite database file (relative to home)
    pub database: Option<String>,
    /// Discovery manifest (relative to project root)
    pub manifest: Option<String>,
}

/// Storage budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Hard ceiling for temporary payload files (default: 2 GiB)
    #[serde(default = "default_ceiling_bytes")]
    pub temp_storage_ceiling_bytes: u64,

    /// Largest payload a single item may have (default: 100 MiB)
    #[serde(default = "default_per_item_max_bytes")]
    pub per_item_max_bytes: u64,

    /// Longest declared duration accepted (default: 3 hours)
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,

    /// Keep payloads of failed transcriptions for debugging
    #[serde(default)]
    pub retain_failed_payloads: bool,
}

fn default_ceiling_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_per_item_max_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_max_duration_seconds() -> u64 {
    180 * 60
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            temp_storage_ceiling_bytes: default_ceiling_bytes(),
            per_item_max_bytes: default_per_item_max_bytes(),
            max_duration_seconds: default_max_duration_seconds(),
            retain_failed_payloads: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
}

fn default_check_interval() -> u64 {
    60
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            check_interval_minutes: default_check_interval(),
        }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.max(1) * 60)
    }
}

/// How payloads are retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchBackend {
    /// Audio-only download through yt-dlp
    YtDlp,
    /// Plain HTTP download of a direct media URL
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_fetch_backend")]
    pub backend: FetchBackend,

    /// Per-item fetch timeout (default: 30 min)
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
}

fn default_fetch_backend() -> FetchBackend {
    FetchBackend::YtDlp
}
fn default_fetch_timeout() -> u64 {
    1800
}
fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            backend: default_fetch_backend(),
            timeout_seconds: default_fetch_timeout(),
            ytdlp_path: default_ytdlp_path(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSettings {
    #[serde(default = "default_model")]
    pub whisper_model: String,

    #[serde(default = "default_model")]
    pub whisperx_model: String,

    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_compute_type")]
    pub compute_type: String,

    /// Force a language instead of auto-detection
    #[serde(default)]
    pub language: Option<String>,

    /// Per-provider timeout (default: 2 hours)
    #[serde(default = "default_transform_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_whisper_path")]
    pub whisper_path: String,

    #[serde(default = "default_whisperx_path")]
    pub whisperx_path: String,
}

fn default_model() -> String {
    "base".to_string()
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_compute_type() -> String {
    "int8".to_string()
}
fn default_transform_timeout() -> u64 {
    7200
}
fn default_whisper_path() -> String {
    "whisper".to_string()
}
fn default_whisperx_path() -> String {
    "whisperx".to_string()
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            whisper_model: default_model(),
            whisperx_model: default_model(),
            device: default_device(),
            compute_type: default_compute_type(),
            language: None,
            timeout_seconds: default_transform_timeout(),
            whisper_path: default_whisper_path(),
            whisperx_path: default_whisperx_path(),
        }
    }
}

impl TransformSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (database, journal, lock file)
    pub home: PathBuf,
    /// Temporary payload root watched by the quota manager
    pub downloads: PathBuf,
    /// Transcript artifacts
    pub output: PathBuf,
    /// SQLite item store
    pub database: PathBuf,
    /// Discovery manifest (JSONL of new items), if configured
    pub manifest: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub storage: StorageSettings,
    pub schedule: ScheduleSettings,
    pub fetch: FetchSettings,
    pub transform: TransformSettings,
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with default settings
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            downloads: home.join("downloads"),
            output: home.join("transcriptions"),
            database: home.join("tubescribe.db"),
            manifest: None,
            config_file: None,
            storage: StorageSettings::default(),
            schedule: ScheduleSettings::default(),
            fetch: FetchSettings::default(),
            transform: TransformSettings::default(),
            home,
        }
    }

    /// Append-only pipeline journal
    pub fn journal_path(&self) -> PathBuf {
        self.home.join("journal.jsonl")
    }

    /// Advisory lock held while a pipeline is running
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("pipeline.lock")
    }

    /// Create the directories the pipeline writes into
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.home, &self.downloads, &self.output] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().map(PathBuf::from)
}

/// Build a resolved config from an optional config file, then apply env overrides
fn resolve_config(default_home: PathBuf, config_file: Option<PathBuf>) -> Result<ResolvedConfig> {
    let mut resolved = match config_file {
        Some(ref config_path) => {
            let file = load_config_file(config_path)?;

            // .tubescribe/ and the project root above it
            let config_dir = config_path.parent().unwrap_or(Path::new("."));
            let base_dir = config_dir.parent().unwrap_or(Path::new("."));

            let home = match file.paths.home {
                Some(ref home) => resolve_path(config_dir, home),
                None => default_home,
            };

            let mut resolved = ResolvedConfig::with_home(home);
            if let Some(ref downloads) = file.paths.downloads {
                resolved.downloads = resolve_path(base_dir, downloads);
            }
            if let Some(ref output) = file.paths.output {
                resolved.output = resolve_path(base_dir, output);
            }
            if let Some(ref database) = file.paths.database {
                resolved.database = resolve_path(&resolved.home, database);
            }
            resolved.manifest = file.paths.manifest.as_deref().map(|m| resolve_path(base_dir, m));
            resolved.storage = file.storage;
            resolved.schedule = file.schedule;
            resolved.fetch = file.fetch;
            resolved.transform = file.transform;
            resolved.config_file = config_file.clone();
            resolved
        }
        None => ResolvedConfig::with_home(default_home),
    };

    apply_env_overrides(&mut resolved);
    Ok(resolved)
}

fn apply_env_overrides(config: &mut ResolvedConfig) {
    if let Some(home) = env_path("TUBESCRIBE_HOME") {
        // Derived paths follow home unless they were set explicitly
        let defaults = ResolvedConfig::with_home(config.home.clone());
        let relocated = ResolvedConfig::with_home(home.clone());
        if config.downloads == defaults.downloads {
            config.downloads = relocated.downloads;
        }
        if config.output == defaults.output {
            config.output = relocated.output;
        }
        if config.database == defaults.database {
            config.database = relocated.database;
        }
        config.home = home;
    }
    if let Some(downloads) = env_path("TUBESCRIBE_DOWNLOADS") {
        config.downloads = downloads;
    }
    if let Some(output) = env_path("TUBESCRIBE_OUTPUT") {
        config.output = output;
    }
    if let Some(manifest) = env_path("TUBESCRIBE_MANIFEST") {
        config.manifest = Some(manifest);
    }
    if let Ok(path) = std::env::var("WHISPER_PATH") {
        config.transform.whisper_path = path;
    }
    if let Ok(path) = std::env::var("WHISPERX_PATH") {
        config.transform.whisperx_path = path;
    }
    if let Ok(path) = std::env::var("YTDLP_PATH") {
        config.fetch.ytdlp_path = path;
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    resolve_config(default_home, find_config_file())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
