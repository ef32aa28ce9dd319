// Runtime state file for external tooling

//! Runtime state file
//!
//! Records the running instance (pid, start time, active policy) so `stop`
//! and `status` invocations can find it. The record goes to the first
//! writable path of an ordered candidate list and must be removed on every
//! exit path of a run.

use crate::error::{Result, RouteGuardError};
use crate::types::{PolicyModel, RuntimeState};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Preferred location, needs root
pub const RUN_STATE_FILE: &str = "/run/routeguard/state.json";
/// Fallback location
pub const TMP_STATE_FILE: &str = "/tmp/routeguard-state.json";

/// Reads and writes the runtime state record
#[derive(Debug, Clone)]
pub struct StateStore {
    candidates: Vec<PathBuf>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(vec![
            PathBuf::from(RUN_STATE_FILE),
            PathBuf::from(TMP_STATE_FILE),
        ])
    }
}

impl StateStore {
    /// Create a store over `candidates`, tried in order
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Candidate paths, in preference order
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Write the state record, returning the path used
    ///
    /// `extra` keys are merged into the top-level object.
    ///
    /// # Errors
    ///
    /// Returns [`RouteGuardError::State`] if no candidate is writable.
    pub fn write(
        &self,
        policy: &PolicyModel,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PathBuf> {
        let state = RuntimeState {
            pid: std::process::id(),
            started_at: timestamp(),
            config: policy.clone(),
            extra,
        };
        let content = serde_json::to_string_pretty(&state)
            .map_err(|e| RouteGuardError::State(e.to_string()))?;

        let mut last_err = String::from("no candidate paths configured");
        for path in &self.candidates {
            match write_one(path, &content) {
                Ok(()) => {
                    log::debug!("Wrote state file {}", path.display());
                    return Ok(path.clone());
                }
                Err(e) => {
                    log::debug!("State path {} not writable: {}", path.display(), e);
                    last_err = format!("{}: {}", path.display(), e);
                }
            }
        }

        Err(RouteGuardError::State(last_err))
    }

    /// Read the first existing record; `None` if absent or unparseable
    pub fn read(&self) -> Option<RuntimeState> {
        let path = self.candidates.iter().find(|p| p.exists())?;
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                log::debug!("Ignoring unreadable state file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Remove every candidate path; never fails
    pub fn remove(&self) {
        for path in &self.candidates {
            let _ = fs::remove_file(path);
        }
    }
}

/// Write `content` to `path`, refusing to follow a symlink at the final component
fn write_one(path: &Path, content: &str) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    file.write_all(content.as_bytes())
}

/// Local wall-clock time, second precision
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
