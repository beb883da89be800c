//! # burrow-ops
//!
//! External-process operations running against a [`burrow_core`] jail.
//!
//! Operations are the thin orchestration layer a workload manifest drives:
//! each one consumes from the jail only what the collaborator boundary
//! offers — the workload root as a host path for child processes, and the
//! jail's file operations. Anything heavier (timeouts, sequencing,
//! environment assembly) lives here, not in the jail.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

pub mod command;

use std::collections::HashMap;

use burrow_core::Jail;
use thiserror::Error;

pub use command::CommandRun;

/// Errors from running an operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OperationError {
    /// The child process could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        /// The command line that failed to start.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The child process exited with a non-zero status.
    #[error("command `{command}` exited with status {status}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// Its exit status, `-1` when terminated by a signal.
        status: i32,
    },

    /// The child process outlived its time budget and was killed.
    #[error("command `{command}` timed out after {timeout_secs}s")]
    TimedOut {
        /// The command line that timed out.
        command: String,
        /// The budget it exceeded.
        timeout_secs: u64,
    },

    /// A command line that cannot be split into arguments.
    #[error("malformed command line: {reason}")]
    Malformed {
        /// What was wrong with it.
        reason: String,
    },

    /// A jail operation performed on behalf of the operation failed.
    #[error(transparent)]
    Jail(#[from] burrow_core::JailError),
}

/// What an operation gets to work with: the workload's jail and its
/// environment variables.
#[derive(Debug)]
pub struct OperationContext<'a> {
    jail: &'a Jail,
    env: HashMap<String, String>,
}

impl<'a> OperationContext<'a> {
    /// A context over `jail` with an empty environment.
    #[must_use]
    pub fn new(jail: &'a Jail) -> Self {
        Self {
            jail,
            env: HashMap::new(),
        }
    }

    /// Replace the workload environment handed to child processes.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// The workload's jail.
    #[must_use]
    pub fn jail(&self) -> &Jail {
        self.jail
    }

    /// The workload environment variables.
    #[must_use]
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }
}

/// A single step in a workload's install or maintenance sequence.
#[allow(async_fn_in_trait)]
pub trait Operation {
    /// Run the operation to completion against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the first [`OperationError`] encountered; operations make no
    /// partial-progress guarantees beyond what they document.
    async fn run(&self, ctx: &OperationContext<'_>) -> Result<(), OperationError>;
}

#[cfg(test)]
mod tests {
    use burrow_core::JailSpec;

    use super::*;

    #[test]
    fn context_carries_the_jail_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let jail = Jail::new(&JailSpec::new(dir.path())).unwrap();

        let mut env = HashMap::new();
        env.insert("PORT".to_string(), "25565".to_string());
        let ctx = OperationContext::new(&jail).with_env(env);

        assert_eq!(ctx.jail().root_path(), dir.path());
        assert_eq!(ctx.env().get("PORT").map(String::as_str), Some("25565"));
    }
}
