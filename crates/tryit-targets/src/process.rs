use std::{io, path::Path, process::Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, TargetError};

/// Captured result of a finished tool invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn require_success(self, tool: &str) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(TargetError::ToolFailed {
            tool: tool.to_string(),
            status: self.status,
            detail: format_tool_output(&self.stdout, &self.stderr),
        })
    }
}

pub fn format_tool_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let mut out = String::new();

    if !stdout.is_empty() {
        out.push_str("stdout:\n");
        out.push_str(stdout);
        out.push('\n');
    }
    if !stderr.is_empty() {
        out.push_str("stderr:\n");
        out.push_str(stderr);
        out.push('\n');
    }

    out
}

pub(crate) fn tool_name(tool: &Path) -> String {
    tool.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| tool.display().to_string())
}

/// Checks that an SDK tool exists and repairs its execute bit.
pub fn prepare_tool(tool: &Path) -> Result<()> {
    if !tool.exists() {
        return Err(TargetError::ToolNotFound {
            tool: tool.to_path_buf(),
        });
    }
    tryit_util::ensure_executable(tool).map_err(|source| TargetError::NotExecutable {
        path: tool.to_path_buf(),
        source,
    })
}

pub(crate) fn spawn_error(tool: &Path, source: io::Error) -> TargetError {
    if source.kind() == io::ErrorKind::NotFound {
        TargetError::ToolNotFound {
            tool: tool.to_path_buf(),
        }
    } else {
        TargetError::Spawn {
            tool: tool_name(tool),
            source,
        }
    }
}

/// Runs `tool` with captured output and waits for it to exit.
pub async fn capture(tool: &Path, args: &[&str]) -> Result<ToolOutput> {
    debug!("running {} {}", tool.display(), args.join(" "));
    let child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(tool, e))?;
    let output = child
        .wait_with_output()
        .await
        .map_err(|source| TargetError::Wait {
            tool: tool_name(tool),
            source,
        })?;
    Ok(ToolOutput {
        status: output.status.code().unwrap_or(-1),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Runs `tool` attached to the controlling terminal and returns its exit code.
pub async fn run_inherited(tool: &Path, args: &[String], cwd: Option<&Path>) -> Result<i32> {
    debug!("running {} {} (interactive)", tool.display(), args.join(" "));
    let mut cmd = Command::new(tool);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;
    let status = child.wait().await.map_err(|source| TargetError::Wait {
        tool: tool_name(tool),
        source,
    })?;
    Ok(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_detail_includes_both_streams() {
        let out = ToolOutput {
            status: 1,
            success: false,
            stdout: "partial\n".into(),
            stderr: " error: device offline ".into(),
        };
        match out.require_success("adb") {
            Err(TargetError::ToolFailed {
                tool,
                status,
                detail,
            }) => {
                assert_eq!(tool, "adb");
                assert_eq!(status, 1);
                assert_eq!(detail, "stdout:\npartial\nstderr:\nerror: device offline\n");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(format_tool_output("  ", ""), "");
    }

    #[test]
    fn missing_tool_is_reported_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_tool(&dir.path().join("adb")).unwrap_err();
        assert!(matches!(err, TargetError::ToolNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_collects_exit_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(&script, "#!/bin/sh\necho out\necho err >&2\nexit 3\n").unwrap();
        prepare_tool(&script).unwrap();
        assert!(tryit_util::is_executable(&script));

        let out = capture(&script, &[]).await.unwrap();
        assert_eq!(out.status, 3);
        assert!(!out.success);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }
}
