//! Sandbox capability consumed by tool handlers.
//!
//! The core never executes commands or touches paths itself; file and
//! shell tools receive a [`Sandbox`] from the caller and go through it.
//! Implementations (container, VM, plain chroot-style directories) live
//! outside this crate.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Outcome of one sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Isolation boundary for tool side effects.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Resolves a relative path to an absolute one inside the sandbox
    /// root, rejecting anything that escapes it.
    fn validate_path(&self, relative: &str) -> Result<PathBuf>;

    /// Runs a command inside the sandbox.
    async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult>;
}
