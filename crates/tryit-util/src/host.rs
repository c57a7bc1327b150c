use std::{
    io,
    path::{Path, PathBuf},
};

use crate::env_var;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    MacOs,
    /// Linux and anything else that is not Windows or macOS.
    Linux,
}

/// Maps a raw OS name onto a family and the suffix used in SDK download names.
///
/// Names containing `windows` map to Windows, names containing `mac` map to
/// macOS (`macosx`). Everything else keeps its lower-cased name as the suffix
/// and is treated as Linux-like.
pub fn classify_os(name: &str) -> (OsFamily, String) {
    let lower = name.trim().to_ascii_lowercase();
    if lower.contains("windows") {
        (OsFamily::Windows, "windows".into())
    } else if lower.contains("mac") {
        (OsFamily::MacOs, "macosx".into())
    } else {
        (OsFamily::Linux, lower)
    }
}

/// Host facts resolved once at startup.
#[derive(Clone, Debug)]
pub struct HostProfile {
    os: OsFamily,
    os_suffix: String,
    home: PathBuf,
    working_dir: PathBuf,
}

impl HostProfile {
    pub fn new(os_name: &str, home: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        let (os, os_suffix) = classify_os(os_name);
        Self {
            os,
            os_suffix,
            home: home.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn detect(working_dir: Option<&Path>) -> io::Result<Self> {
        let home = env_var("HOME")
            .or_else(|| env_var("USERPROFILE"))
            .map(PathBuf::from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME is not set"))?;
        let working_dir = match working_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };
        Ok(Self::new(std::env::consts::OS, home, working_dir))
    }

    pub fn os(&self) -> OsFamily {
        self.os
    }

    pub fn os_suffix(&self) -> &str {
        &self.os_suffix
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn is_windows(&self) -> bool {
        self.os == OsFamily::Windows
    }

    /// Hosts where the emulator relies on a separately installed accelerator.
    pub fn needs_acceleration(&self) -> bool {
        matches!(self.os, OsFamily::Windows | OsFamily::MacOs)
    }

    pub fn exe_name(&self, base: &str) -> String {
        if self.is_windows() {
            format!("{base}.exe")
        } else {
            base.to_string()
        }
    }

    pub fn script_name(&self, base: &str) -> String {
        if self.is_windows() {
            format!("{base}.bat")
        } else {
            base.to_string()
        }
    }

    pub fn avd_home(&self) -> PathBuf {
        self.home.join(".android").join("avd")
    }
}
