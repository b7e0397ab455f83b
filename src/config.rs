//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\track-renamer\config.toml
//! - macOS: ~/Library/Application Support/track-renamer/config.toml
//! - Linux: ~/.config/track-renamer/config.toml
//!
//! One explicit, versioned, typed struct. It is loaded once at startup and
//! passed by reference into each component; nothing reads ambient global
//! state for thresholds, rate limits, or timeouts.

use serde::{Deserialize, Serialize};

use crate::template::SanitizeStrategy;

/// Current config schema version. Bump when a field changes meaning.
pub const CONFIG_VERSION: u32 = 1;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version of this file
    pub version: u32,

    /// API credentials (keep separate for potential future encryption)
    pub credentials: Credentials,

    /// Metadata resolution settings
    pub resolver: ResolverConfig,

    /// Filename template settings
    pub template: TemplateConfig,

    /// Rename operation settings
    pub operations: OperationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            credentials: Credentials::default(),
            resolver: ResolverConfig::default(),
            template: TemplateConfig::default(),
            operations: OperationsConfig::default(),
        }
    }
}

/// API credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// AcoustID API key for fingerprint lookups
    pub acoustid_api_key: Option<String>,
}

/// Metadata resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Whether to query the fingerprint identification service at all
    pub fingerprint_enabled: bool,

    /// Verify tag values against the fingerprint service even when tags
    /// are already populated
    pub force_verification: bool,

    /// Minimum lookup confidence to accept a fingerprint value (0.0 to 1.0)
    pub confidence_threshold: f32,

    /// Relative disagreement below which two tempo values are "the same"
    pub tempo_tolerance: f64,

    /// Lower bound of the acceptable BPM band
    pub tempo_band_min: f64,

    /// Upper bound of the acceptable BPM band
    pub tempo_band_max: f64,

    /// Minimum interval between lookup requests, in milliseconds
    pub rate_limit_ms: u64,

    /// Wall-clock timeout for feature analysis of a single file, in seconds
    pub analysis_timeout_secs: u64,

    /// Display musical keys with flats instead of sharps
    pub prefer_flats: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fingerprint_enabled: true,
            force_verification: false,
            confidence_threshold: 0.5,
            tempo_tolerance: 0.02,
            tempo_band_min: 60.0,
            tempo_band_max: 200.0,
            rate_limit_ms: 1000,
            analysis_timeout_secs: 30,
            prefer_flats: false,
        }
    }
}

/// Filename template settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Template used when none is given on the command line
    pub default_template: String,

    /// How illegal filesystem characters are replaced
    pub sanitize: SanitizeStrategy,

    /// Zero-padding width for the track token (0 = no padding)
    pub track_pad_width: usize,

    /// Maximum filename component length in bytes (name + extension)
    pub max_name_bytes: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_template: "{artist} - {title}".to_string(),
            sanitize: SanitizeStrategy::Underscore,
            track_pad_width: 2,
            max_name_bytes: 255,
        }
    }
}

/// Rename operation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// How long an undo session stays available, in seconds
    pub undo_ttl_secs: u64,

    /// How long finished operation records are retained, in seconds
    pub operation_ttl_secs: u64,

    /// Log batch progress every N processed files
    pub progress_log_every: usize,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            undo_ttl_secs: 1800,
            operation_ttl_secs: 3600,
            progress_log_every: 25,
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("track-renamer"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<std::path::PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => {
                if config.version != CONFIG_VERSION {
                    tracing::warn!(
                        "Config file {:?} has version {}, expected {}",
                        path,
                        config.version,
                        CONFIG_VERSION
                    );
                }
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join("config.toml");

    // Ensure directory exists
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateDir(dir.clone(), e))?;

    // Serialize to pretty TOML
    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(std::path::PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(std::path::PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(std::path::PathBuf, std::path::PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
