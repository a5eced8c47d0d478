//! Subprocess invocation for backends driven by command line tools

use std::io::ErrorKind;
use std::process::Stdio;

use storage_core::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished tool invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Render a command line for messages
pub(crate) fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a tool to completion and capture its output
///
/// Only a failure to launch the tool is an error here. A missing tool
/// reports the backend as unavailable.
pub async fn execute(program: &str, args: &[String]) -> Result<CommandOutput> {
    debug!(command = %command_line(program, args), "Executing");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => Error::StorageUnavailable {
                backend: format!("{} not available: {}", program, e),
            },
            _ => Error::Io(e),
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a tool and return its standard output
///
/// A nonzero exit status is an error carrying stderr and stdout, unless
/// `safe` is set, in which case the failure is ignored.
pub async fn execute_checked(program: &str, args: &[String], safe: bool) -> Result<String> {
    let output = execute(program, args).await?;
    if !output.success && !safe {
        return Err(Error::CommandFailed {
            command: command_line(program, args),
            output: format!("{}\n{}", output.stderr, output.stdout),
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let stdout = execute_checked("sh", &args(&["-c", "echo one; echo two"]), false)
            .await
            .unwrap();
        assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_execute_failure_carries_output() {
        let result = execute_checked(
            "sh",
            &args(&["-c", "echo partial; echo broken >&2; exit 3"]),
            false,
        )
        .await;

        match result {
            Err(Error::CommandFailed { command, output }) => {
                assert!(command.starts_with("sh -c"));
                assert!(output.contains("broken"));
                assert!(output.contains("partial"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_safe_ignores_failure() {
        let stdout = execute_checked("sh", &args(&["-c", "exit 1"]), true)
            .await
            .unwrap();
        assert!(stdout.is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let result = execute("definitely-not-a-grid-tool", &[]).await;
        assert!(matches!(result, Err(Error::StorageUnavailable { .. })));
    }
}
