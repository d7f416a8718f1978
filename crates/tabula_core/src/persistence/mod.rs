//! Project file persistence.
//!
//! # Responsibility
//! - Serialize the aspect tree to a versioned XML document and back.
//! - Keep loading lenient: one broken table, matrix or column is reported
//!   and skipped, the rest of the project still opens.
//! - Write files atomically, optionally zstd-compressed, with an optional
//!   backup of the previous version.
//!
//! # See also
//! - `crate::project::Project::save` / `Project::open`

pub mod autosave;
pub mod file;
pub mod loader;
pub mod writer;
pub mod xml;

use std::fmt::{Display, Formatter};

pub use file::{PersistError, PersistResult, SaveOptions};
pub use loader::{FormatError, LoadIssue, LoadReport, LoadedProject};

/// Root element of a project document.
pub const ROOT_ELEMENT: &str = "tabula_project";

/// Version written by this build. Files with a newer major version are
/// refused; newer minor versions are read leniently.
pub const CURRENT_VERSION: FormatVersion = FormatVersion { major: 1, minor: 0 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Parses `"<major>"` or `"<major>.<minor>"`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (major, minor) = match value.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (value, "0"),
        };
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    pub fn is_supported(&self) -> bool {
        self.major == CURRENT_VERSION.major
    }
}

impl Display for FormatVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
