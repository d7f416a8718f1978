//! Project files on disk.
//!
//! # Invariants
//! - Saving writes a temporary file in the target directory and renames it
//!   over the destination; a failed save leaves the old file untouched.
//! - With `keep_backup`, the previous file survives as `<file>~`.
//! - Compressed files are recognized by the zstd frame magic, not by name.

use crate::model::aspect::Aspect;
use crate::persistence::loader::{load_str, FormatError, LoadedProject};
use crate::persistence::writer::to_xml;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZSTD_LEVEL: i32 = 3;
const COMPRESSED_EXTENSION: &str = "zst";
const BACKUP_SUFFIX: &str = "~";

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug)]
pub enum PersistError {
    Format(FormatError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize(String),
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "I/O error on `{}`: {source}", path.display()),
            Self::Serialize(message) => write!(f, "failed to serialize project: {message}"),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Format(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Serialize(_) => None,
        }
    }
}

impl From<FormatError> for PersistError {
    fn from(value: FormatError) -> Self {
        Self::Format(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Compress with zstd; implied when the path ends in `.zst`.
    pub compress: bool,
    /// Keep the replaced file as `<file>~`.
    pub keep_backup: bool,
}

pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&ZSTD_MAGIC)
}

fn wants_compression(path: &Path, options: SaveOptions) -> bool {
    options.compress
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(COMPRESSED_EXTENSION))
}

/// `<file>~`, where the previous version is kept.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Serializes `root` and atomically replaces `path`. Returns bytes written.
pub fn save(root: &Aspect, path: &Path, options: SaveOptions) -> PersistResult<usize> {
    let xml = to_xml(root).map_err(PersistError::Serialize)?;
    let compressed = wants_compression(path, options);
    let bytes = if compressed {
        zstd::encode_all(xml.as_bytes(), ZSTD_LEVEL).map_err(|err| PersistError::io(path, err))?
    } else {
        xml.into_bytes()
    };
    match write_atomic(path, &bytes, options.keep_backup) {
        Ok(()) => {
            info!(
                "event=project_save module=persistence status=ok bytes={} compressed={} backup={}",
                bytes.len(),
                compressed,
                options.keep_backup
            );
            Ok(bytes.len())
        }
        Err(err) => {
            error!(
                "event=project_save module=persistence status=error error={}",
                err
            );
            Err(err)
        }
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8], keep_backup: bool) -> PersistResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|err| PersistError::io(dir, err))?;
    temp.write_all(bytes)
        .map_err(|err| PersistError::io(temp.path(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| PersistError::io(temp.path(), err))?;

    if keep_backup && path.exists() {
        let backup = backup_path(path);
        std::fs::copy(path, &backup).map_err(|err| PersistError::io(&backup, err))?;
    }
    temp.persist(path)
        .map_err(|err| PersistError::io(path, err.error))?;
    Ok(())
}

/// Reads a project file, compressed or not.
pub fn load(path: &Path) -> PersistResult<LoadedProject> {
    let raw = std::fs::read(path).map_err(|err| PersistError::io(path, err))?;
    let bytes = if is_compressed(&raw) {
        zstd::decode_all(raw.as_slice()).map_err(|err| {
            PersistError::Format(FormatError::Malformed(format!(
                "corrupt compressed data: {err}"
            )))
        })?
    } else {
        raw
    };
    let xml = String::from_utf8(bytes).map_err(|err| {
        PersistError::Format(FormatError::Malformed(format!("not valid UTF-8: {err}")))
    })?;
    let loaded = load_str(&xml)?;
    info!(
        "event=project_open module=persistence status={} problems={} warnings={}",
        if loaded.report.is_partial() { "partial" } else { "ok" },
        loaded.report.problems.len(),
        loaded.report.warnings.len()
    );
    Ok(loaded)
}

/// Reads the `<file>~` backup of `path`.
pub fn load_backup(path: &Path) -> PersistResult<LoadedProject> {
    load(&backup_path(path))
}

#[cfg(test)]
mod tests {
    use super::{backup_path, is_compressed, load, save, SaveOptions};
    use crate::model::aspect::Aspect;
    use std::path::Path;

    #[test]
    fn backup_path_appends_tilde() {
        assert_eq!(
            backup_path(Path::new("/data/run.tabula")),
            Path::new("/data/run.tabula~")
        );
    }

    #[test]
    fn zst_extension_compresses_and_loads_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("p.tabula.zst");
        let root = Aspect::project("P").with_child(Aspect::folder("F"));
        save(&root, &path, SaveOptions::default()).expect("save");

        let raw = std::fs::read(&path).expect("read back");
        assert!(is_compressed(&raw));
        let loaded = load(&path).expect("load");
        assert_eq!(loaded.root, root);
    }

    #[test]
    fn keep_backup_preserves_previous_version() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("p.tabula");
        let first = Aspect::project("First");
        let second = Aspect::project("Second");
        let options = SaveOptions {
            compress: false,
            keep_backup: true,
        };
        save(&first, &path, options).expect("first save");
        save(&second, &path, options).expect("second save");

        assert_eq!(load(&path).expect("current").root.name(), "Second");
        assert_eq!(
            load(&backup_path(&path)).expect("backup").root.name(),
            "First"
        );
    }
}
