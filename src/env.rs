use std::env as stdenv;
use std::path::{Path, PathBuf};

/// Per-session state carried between input lines.
///
/// The working directory lives here rather than in the process: children are
/// started in `cwd`, relative redirection targets are opened against it, and
/// only the `cd` built-in changes it.
#[derive(Debug, Clone)]
pub struct ShellState {
    cwd: PathBuf,
}

impl ShellState {
    /// Capture the process working directory at startup.
    pub fn new() -> Self {
        let cwd = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self { cwd }
    }

    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub(crate) fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}
