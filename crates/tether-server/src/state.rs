//! Process-wide daemon state: backing root, write verifier, write-log.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::writelog::WriteLog;

/// Shared state for one daemon process.
///
/// The verifier is fixed for the lifetime of the process; a restart changes
/// it, which is exactly what lets clients detect that buffered-but-uncommitted
/// writes were lost.
pub struct ServerState {
    root: PathBuf,
    verifier: String,
    pub write_log: WriteLog,
}

impl ServerState {
    /// Construct with a fresh time-based verifier.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_verifier(root, generate_verifier())
    }

    /// Construct with an explicit verifier (restart simulation in tests).
    pub fn with_verifier(root: impl Into<PathBuf>, verifier: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            verifier: verifier.into(),
            write_log: WriteLog::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The process-lifetime write verifier. Never mutated.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Map a client path onto the backing directory by plain concatenation
    /// (client paths always start with `/`).
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut full = OsString::from(self.root.as_os_str());
        full.push(path);
        PathBuf::from(full)
    }
}

/// A verifier unique per server process: nanoseconds since the epoch at
/// construction time.
fn generate_verifier() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
