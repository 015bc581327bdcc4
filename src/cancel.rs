//! Cooperative stop flag shared by every worker and study session.
//!
//! Nothing is interrupted: workers poll [`CancellationSignal::is_set`] at
//! their checkpoints and wind down on their own. When a marker path is given
//! the flag is mirrored to a file so a separate process can request a stop by
//! creating it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct CancellationSignal {
    flag: AtomicBool,
    marker: Option<PathBuf>,
}

impl CancellationSignal {
    /// In-memory flag only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag mirrored to a marker file.
    pub fn with_marker(path: impl Into<PathBuf>) -> Self {
        Self {
            flag: AtomicBool::new(false),
            marker: Some(path.into()),
        }
    }

    pub fn marker(&self) -> Option<&Path> {
        self.marker.as_deref()
    }

    /// Request a stop.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Some(path) = &self.marker {
            if let Err(e) = std::fs::write(path, b"stop") {
                warn!(path = %path.display(), "Failed to write stop marker: {e}");
            }
        }
        info!("Stop requested");
    }

    /// Drop any stale request, including a marker left by a previous run.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
        if let Some(path) = &self.marker {
            match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Removed stale stop marker"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove stop marker: {e}"),
            }
        }
    }

    pub fn is_set(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.marker.as_ref().is_some_and(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_flag_set_and_clear() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_set());
        signal.set();
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }

    #[test]
    fn marker_file_mirrors_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop_flag");
        let signal = CancellationSignal::with_marker(&path);

        signal.set();
        assert!(path.exists());
        signal.clear();
        assert!(!path.exists());
        assert!(!signal.is_set());
    }

    #[test]
    fn external_marker_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop_flag");
        let signal = CancellationSignal::with_marker(&path);
        assert!(!signal.is_set());

        // Another process drops the marker.
        std::fs::write(&path, "stop").unwrap();
        assert!(signal.is_set());
    }

    #[test]
    fn clear_without_marker_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let signal = CancellationSignal::with_marker(dir.path().join("missing"));
        signal.clear();
        assert!(!signal.is_set());
    }
}
