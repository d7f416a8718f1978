//! Periodic autosave and the save busy flag.
//!
//! # Invariants
//! - A user save and an autosave never write at the same time: both hold a
//!   `SaveGuard` from the project's `SaveLock` while writing.
//! - Autosave writes `<file>.autosave` next to the project file and never
//!   marks the project clean.
//! - Nothing is written while the project is unmodified.

use crate::config::Settings;
use crate::persistence::file::{save, PersistResult, SaveOptions};
use crate::project::Project;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const AUTOSAVE_SUFFIX: &str = ".autosave";

/// Shared "save in progress" flag.
#[derive(Debug, Clone, Default)]
pub struct SaveLock {
    busy: Arc<AtomicBool>,
}

impl SaveLock {
    /// Returns `None` while another save holds the lock.
    pub fn try_acquire(&self) -> Option<SaveGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SaveGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct SaveGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub fn autosave_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(AUTOSAVE_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveOutcome {
    Disabled,
    NotDue,
    Unmodified,
    /// Project has never been saved, so there is nowhere to autosave to.
    NoTarget,
    /// A save was already running; retried on the next due tick.
    Busy,
    Saved(PathBuf),
}

/// Timer-driven autosave. The embedding event loop calls `on_timer`.
#[derive(Debug, Clone)]
pub struct Autosaver {
    enabled: bool,
    interval: Duration,
    last_run: Instant,
}

impl Autosaver {
    pub fn new(enabled: bool, interval: Duration, now: Instant) -> Self {
        Self {
            enabled,
            interval,
            last_run: now,
        }
    }

    pub fn from_settings(settings: &Settings, now: Instant) -> Self {
        Self::new(
            settings.autosave_enabled,
            Duration::from_secs(settings.autosave_interval_secs),
            now,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Writes an autosave copy if enabled, due and needed.
    ///
    /// # Errors
    /// - `PersistError` when writing the autosave file fails; the project
    ///   file itself is never touched.
    pub fn on_timer(&mut self, project: &Project, now: Instant) -> PersistResult<AutosaveOutcome> {
        if !self.enabled {
            return Ok(AutosaveOutcome::Disabled);
        }
        if now.saturating_duration_since(self.last_run) < self.interval {
            return Ok(AutosaveOutcome::NotDue);
        }
        if !project.is_modified() {
            self.last_run = now;
            return Ok(AutosaveOutcome::Unmodified);
        }
        let Some(path) = project.file_path() else {
            self.last_run = now;
            return Ok(AutosaveOutcome::NoTarget);
        };
        let Some(_guard) = project.save_lock().try_acquire() else {
            warn!("event=autosave module=persistence status=skipped reason=busy");
            return Ok(AutosaveOutcome::Busy);
        };

        let target = autosave_path(path);
        let options = SaveOptions {
            compress: project.settings().compress_by_default,
            keep_backup: false,
        };
        save(project.root(), &target, options)?;
        self.last_run = now;
        info!("event=autosave module=persistence status=ok");
        Ok(AutosaveOutcome::Saved(target))
    }
}

#[cfg(test)]
mod tests {
    use super::{autosave_path, SaveLock};
    use std::path::Path;

    #[test]
    fn lock_is_exclusive_until_guard_drops() {
        let lock = SaveLock::default();
        let guard = lock.try_acquire().expect("free lock");
        assert!(lock.is_busy());
        assert!(lock.clone().try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_busy());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn autosave_file_sits_next_to_project() {
        assert_eq!(
            autosave_path(Path::new("/data/run.tabula")),
            Path::new("/data/run.tabula.autosave")
        );
    }
}
