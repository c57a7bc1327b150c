use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::error::{Result, ToolchainError};

pub const SDK_LOCATION_FILE: &str = "sdkLocation";

/// The `sdkLocation` sentinel in the working directory.
///
/// A present, non-empty record is trusted as the SDK root without
/// re-validation. It is only ever written by a successful resolution.
#[derive(Clone, Debug)]
pub struct SdkLocationRecord {
    path: PathBuf,
}

impl SdkLocationRecord {
    pub fn in_dir(working_dir: &Path) -> Self {
        Self {
            path: working_dir.join(SDK_LOCATION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the recorded root, or `None` when the record is missing or blank.
    pub fn load(&self) -> Option<PathBuf> {
        if self.path.is_dir() {
            warn!("{} is a directory, ignoring it", self.path.display());
            return None;
        }
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn store(&self, sdk_root: &Path) -> Result<()> {
        let contents = sdk_root.to_string_lossy();
        tryit_util::write_atomic(&self.path, contents.as_bytes()).map_err(|source| {
            ToolchainError::Persist {
                path: self.path.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_record_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let record = SdkLocationRecord::in_dir(dir.path());
        assert_eq!(record.load(), None);

        fs::write(record.path(), "  \n").unwrap();
        assert_eq!(record.load(), None);
    }

    #[test]
    fn stored_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let record = SdkLocationRecord::in_dir(dir.path());
        let root = dir.path().join("android-sdk");
        record.store(&root).unwrap();
        assert_eq!(record.load(), Some(root));
    }

    #[test]
    fn store_into_missing_dir_fails_as_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let record = SdkLocationRecord::in_dir(&blocker);
        assert!(matches!(
            record.store(Path::new("/sdk")),
            Err(ToolchainError::Persist { .. })
        ));
    }
}
