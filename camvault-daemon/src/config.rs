//! Deployment configuration.
//!
//! Knobs come from environment variables, optionally overlaid by a
//! shell-style config file (`export VAR=value` lines). Parsing is done by
//! pure functions over string maps so every rule is testable without
//! touching the process environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use camvault_archive::ClipFlags;
use camvault_snapshot::GIB;
use thiserror::Error;

/// Default host bytes withheld from the backing image.
pub const DEFAULT_RESERVE_BYTES: u64 = 10 * GIB;

/// Default settle delay when no idle detector is configured, seconds.
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 20;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid size string: {0}")]
    InvalidSize(String),

    #[error("unknown archive system: {0} (expected 'rclone' or 'none')")]
    UnknownArchiveSystem(String),

    #[error("ARCHIVE_SYSTEM=rclone requires RCLONE_DRIVE")]
    MissingRcloneRemote,

    #[error("invalid ARCHIVE_DELAY: {0}")]
    InvalidDelay(String),

    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("cannot read config file {0}: {1}")]
    Unreadable(PathBuf, String),
}

/// Which archive backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSystem {
    /// Push clips through rclone.
    Rclone,
    /// Archiving disabled; the coordinator still sweeps snapshots.
    None,
}

/// Archive-related settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSettings {
    pub system: ArchiveSystem,
    pub rclone_remote: String,
    pub rclone_path: String,
    pub rclone_flags: Vec<String>,
    pub clips: ClipFlags,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            system: ArchiveSystem::None,
            rclone_remote: String::new(),
            rclone_path: String::new(),
            rclone_flags: Vec::new(),
            clips: ClipFlags::default(),
        }
    }
}

/// Deployment configuration for camvault.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Host bytes withheld from the backing image (layout sizing).
    pub reserve_bytes: u64,
    /// Settle delay between reachability and snapshot when no idle
    /// detector is present, seconds.
    pub settle_delay_secs: u64,
    pub archive: ArchiveSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reserve_bytes: DEFAULT_RESERVE_BYTES,
            settle_delay_secs: DEFAULT_SETTLE_DELAY_SECS,
            archive: ArchiveSettings::default(),
        }
    }
}

impl Config {
    /// Build a config from a variable map (environment or parsed file).
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(reserve) = vars.get("RESERVE") {
            config.reserve_bytes = parse_size(reserve)?;
        }
        if let Some(delay) = vars.get("ARCHIVE_DELAY") {
            config.settle_delay_secs = delay
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidDelay(delay.clone()))?;
        }

        let system = vars
            .get("ARCHIVE_SYSTEM")
            .map(String::as_str)
            .unwrap_or("none");
        config.archive.system = match system.to_ascii_lowercase().as_str() {
            "rclone" => ArchiveSystem::Rclone,
            "none" => ArchiveSystem::None,
            other => return Err(ConfigError::UnknownArchiveSystem(other.to_string())),
        };

        if let Some(remote) = vars.get("RCLONE_DRIVE") {
            config.archive.rclone_remote = remote.clone();
        }
        if let Some(path) = vars.get("RCLONE_PATH") {
            config.archive.rclone_path = path.clone();
        }
        if let Some(flags) = vars.get("RCLONE_FLAGS") {
            config.archive.rclone_flags =
                flags.split_whitespace().map(String::from).collect();
        }

        // SavedClips, SentryClips, and TrackMode archive unless disabled;
        // RecentClips only when enabled.
        config.archive.clips = ClipFlags {
            saved: parse_bool(vars.get("ARCHIVE_SAVEDCLIPS"), true),
            sentry: parse_bool(vars.get("ARCHIVE_SENTRYCLIPS"), true),
            recent: vars
                .get("ARCHIVE_RECENTCLIPS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            track: parse_bool(vars.get("ARCHIVE_TRACKMODECLIPS"), true),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment, overlaid by `config_file` if given.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut vars: HashMap<String, String> = std::env::vars().collect();
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Unreadable(path.to_path_buf(), e.to_string()))?;
            vars.extend(parse_config_text(&text));
        }
        Self::from_env_map(&vars)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.archive.system == ArchiveSystem::Rclone && self.archive.rclone_remote.is_empty() {
            return Err(ConfigError::MissingRcloneRemote);
        }
        Ok(())
    }
}

fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value {
        Some(v) if v.eq_ignore_ascii_case("false") => false,
        Some(v) if v.eq_ignore_ascii_case("true") => true,
        _ => default,
    }
}

/// Parse a size string like `40G`, `500M`, or `1048576` to bytes.
pub fn parse_size(size: &str) -> Result<u64, ConfigError> {
    let s = size.trim().to_ascii_uppercase();
    if s.is_empty() || s.ends_with('%') {
        return Err(ConfigError::InvalidSize(size.to_string()));
    }

    let suffix_start = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(suffix_start);
    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidSize(size.to_string()))?;

    let multiplier: u64 = match suffix.trim_end_matches('B') {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024u64.pow(4),
        _ => return Err(ConfigError::InvalidSize(size.to_string())),
    };

    Ok((value * multiplier as f64) as u64)
}

/// Parse shell-style config text (`export VAR=value`, `VAR=value`,
/// comments, quoted values) into a variable map.
pub fn parse_config_text(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let mut value = value.trim();
        if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            value = &value[1..value.len() - 1];
        }
        vars.insert(key, value.to_string());
    }
    vars
}
