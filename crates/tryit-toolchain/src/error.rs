use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("malformed download url {url}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("download of {url} failed: {detail}")]
    Download { url: String, detail: String },

    #[error("failed to expand {}: {detail}", archive.display())]
    Archive { archive: PathBuf, detail: String },

    #[error("{component} archive did not contain {}", expected.display())]
    UnexpectedLayout {
        component: &'static str,
        expected: PathBuf,
    },

    #[error(
        "unable to make a directory named {} (make sure it does not already exist and can be created): {source}",
        path.display()
    )]
    SdkDirUnavailable { path: PathBuf, source: io::Error },

    #[error("unable to record the SDK location in {}: {source}", path.display())]
    Persist { path: PathBuf, source: io::Error },

    #[error("no usable SDK location after {attempts} attempts")]
    TooManyAttempts { attempts: u32 },

    #[error("failed to read operator input: {0}")]
    Prompt(#[source] io::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ToolchainError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = ToolchainError> = std::result::Result<T, E>;
