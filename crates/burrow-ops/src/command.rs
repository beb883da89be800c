//! The command-runner operation: shell out inside the workload root.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{Operation, OperationContext, OperationError};

/// Runs a sequence of command lines with the jail root as working
/// directory.
///
/// Commands run in order; the first failure (spawn error, non-zero exit,
/// or timeout) aborts the sequence. The child inherits the workload
/// environment from the context, with this operation's own `env` entries
/// layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandRun {
    /// Command lines to execute, in order.
    pub commands: Vec<String>,

    /// Extra environment variables for these commands only.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,

    /// Per-command time budget in seconds; absent means unlimited.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Operation for CommandRun {
    async fn run(&self, ctx: &OperationContext<'_>) -> Result<(), OperationError> {
        for line in &self.commands {
            info!(command = %line, "executing command");
            self.run_one(ctx, line).await?;
        }
        Ok(())
    }
}

impl CommandRun {
    async fn run_one(&self, ctx: &OperationContext<'_>, line: &str) -> Result<(), OperationError> {
        let argv = split_arguments(line)?;
        let (program, args) = argv.split_first().ok_or_else(|| OperationError::Malformed {
            reason: "empty command line".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(ctx.jail().root_path())
            .stdin(Stdio::null())
            // A timed-out child must not linger after its future is
            // dropped.
            .kill_on_drop(true);
        for (key, value) in ctx.env() {
            cmd.env(key, value);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let status = match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), cmd.status())
                .await
                .map_err(|_| {
                    warn!(command = %line, timeout_secs = secs, "command timed out");
                    OperationError::TimedOut {
                        command: line.to_string(),
                        timeout_secs: secs,
                    }
                })?,
            None => cmd.status().await,
        }
        .map_err(|e| OperationError::SpawnFailed {
            command: line.to_string(),
            source: e,
        })?;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            warn!(command = %line, status = code, "command failed");
            return Err(OperationError::CommandFailed {
                command: line.to_string(),
                status: code,
            });
        }
        Ok(())
    }
}

/// Split a command line into arguments on whitespace, honouring single and
/// double quotes.
///
/// Quoting groups words (`say "hello world"` is two arguments); there is
/// no escape processing beyond that.
///
/// # Errors
///
/// [`OperationError::Malformed`] for an unterminated quote or an empty
/// line.
pub fn split_arguments(line: &str) -> Result<Vec<String>, OperationError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                in_word = true;
            }
            None if ch.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(OperationError::Malformed {
            reason: format!("unterminated quote in `{line}`"),
        });
    }
    if in_word {
        args.push(current);
    }
    if args.is_empty() {
        return Err(OperationError::Malformed {
            reason: "empty command line".to_string(),
        });
    }
    Ok(args)
}
