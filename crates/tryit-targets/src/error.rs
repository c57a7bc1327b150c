use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;
use tryit_toolchain::ToolchainError;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("{} not found", tool.display())]
    ToolNotFound { tool: PathBuf },

    #[error("unable to set the execute permission of {}: {source}", path.display())]
    NotExecutable { path: PathBuf, source: io::Error },

    #[error("failed to start {tool}: {source}")]
    Spawn { tool: String, source: io::Error },

    #[error("interrupted while waiting for {tool}: {source}")]
    Wait { tool: String, source: io::Error },

    #[error("{tool} failed with exit {status}{}", detail_suffix(detail))]
    ToolFailed {
        tool: String,
        status: i32,
        detail: String,
    },

    #[error("device template {} is missing", path.display())]
    MissingTemplate { path: PathBuf },

    #[error("agent package {} is missing", path.display())]
    MissingAgent { path: PathBuf },

    #[error("gave up on {what} after {attempts} attempts")]
    TooManyAttempts { what: &'static str, attempts: u32 },

    #[error("device did not finish {stage} within {}s", waited.as_secs())]
    BootTimedOut { stage: &'static str, waited: Duration },

    #[error("emulator exited before the device was ready")]
    EmulatorExited,

    #[error("hardware acceleration was installed; restart the machine and run again")]
    RebootRequired,

    #[error("failed to read operator input: {0}")]
    Prompt(#[source] io::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

fn detail_suffix(detail: &str) -> String {
    if detail.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", detail.trim())
    }
}

impl TargetError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = TargetError> = std::result::Result<T, E>;
