//! User settings file.
//!
//! # Invariants
//! - A missing file yields defaults; a malformed one is an error, never a
//!   silent reset.
//! - Unknown keys are ignored and missing keys take their defaults, so
//!   older and newer settings files both load.

use crate::command::StackLimits;
use crate::model::mode::{Notation, NumericFormat};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum undo steps kept.
    pub undo_limit: usize,
    /// Maximum bytes of snapshots held by the undo history.
    pub undo_memory_limit_bytes: usize,
    /// Window in which repeated edits of one cell merge into one undo step.
    pub merge_window_ms: u64,
    pub autosave_enabled: bool,
    pub autosave_interval_secs: u64,
    /// Keep the previous file as `<file>~` when saving.
    pub keep_backup: bool,
    pub compress_by_default: bool,
    /// `e`, `f` or `g`.
    pub default_numeric_format: char,
    pub default_numeric_digits: u8,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        let limits = StackLimits::default();
        Self {
            undo_limit: limits.max_depth,
            undo_memory_limit_bytes: limits.max_bytes,
            merge_window_ms: 500,
            autosave_enabled: true,
            autosave_interval_secs: 600,
            keep_backup: true,
            compress_by_default: false,
            default_numeric_format: 'g',
            default_numeric_digits: 6,
            log_level: crate::logging::default_log_level().to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "settings I/O error on `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "invalid settings file `{}`: {source}", path.display())
            }
            Self::Serialize(source) => write!(f, "failed to serialize settings: {source}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } | Self::Serialize(source) => Some(source),
        }
    }
}

impl Settings {
    /// Reads settings from `path`; a missing file gives defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(io_error)
    }

    pub fn stack_limits(&self) -> StackLimits {
        StackLimits {
            max_depth: self.undo_limit.max(1),
            max_bytes: self.undo_memory_limit_bytes,
            merge_window: Duration::from_millis(self.merge_window_ms),
        }
    }

    /// Format given to new numeric columns; invalid settings fall back to
    /// the built-in default.
    pub fn numeric_format(&self) -> NumericFormat {
        Notation::from_char(self.default_numeric_format)
            .map(|notation| NumericFormat::new(notation, self.default_numeric_digits))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Settings};
    use crate::model::mode::{Notation, NumericFormat};
    use std::time::Duration;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = Settings::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.stack_limits().max_depth, 100);
        assert_eq!(settings.stack_limits().merge_window, Duration::from_millis(500));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"undo_limit": 7, "default_numeric_format": "e", "extra": 1}"#)
            .expect("write settings");
        let settings = Settings::load(&path).expect("parse");
        assert_eq!(settings.undo_limit, 7);
        assert!(settings.keep_backup);
        assert_eq!(
            settings.numeric_format(),
            NumericFormat::new(Notation::Scientific, 6)
        );
    }

    #[test]
    fn malformed_file_is_an_error_and_save_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            autosave_interval_secs: 30,
            ..Settings::default()
        };
        settings.save(&path).expect("save");
        assert_eq!(Settings::load(&path).expect("reload"), settings);

        std::fs::write(&path, "{ not json").expect("corrupt");
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
