//! In-memory stand-ins for the SDK tools, for tests that drive the
//! provisioning flow without a real SDK or device.

use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tryit_toolchain::{Fetcher, ToolchainError};

use crate::accel::SilentInstaller;
use crate::adb::DeviceBridge;
use crate::agent::ApkInspector;
use crate::avd::AvdTool;
use crate::boot::EmulatorProcess;
use crate::error::{Result, TargetError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct BridgeState {
    getprop: VecDeque<Result<String>>,
    packages: String,
    installs: Vec<PathBuf>,
    calls: Vec<String>,
    fail_install: bool,
    fail_shell: bool,
}

/// Scripted adb. `getprop` answers come from a queue and default to empty.
#[derive(Clone, Default)]
pub struct FakeBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl FakeBridge {
    pub fn with_packages(self, listing: &str) -> Self {
        lock(&self.state).packages = listing.to_string();
        self
    }

    pub fn failing_install(self) -> Self {
        lock(&self.state).fail_install = true;
        self
    }

    pub fn failing_shell(self) -> Self {
        lock(&self.state).fail_shell = true;
        self
    }

    pub fn push_getprop(&self, answer: Result<String>) {
        lock(&self.state).getprop.push_back(answer);
    }

    pub fn installs(&self) -> Vec<PathBuf> {
        lock(&self.state).installs.clone()
    }

    /// `start <component>` and `shell` entries, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn getprop(&self, _prop: &str) -> Result<String> {
        lock(&self.state)
            .getprop
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    async fn list_packages(&self) -> Result<String> {
        Ok(lock(&self.state).packages.clone())
    }

    async fn install(&self, apk: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        state.installs.push(apk.to_path_buf());
        if state.fail_install {
            return Err(TargetError::ToolFailed {
                tool: "adb".into(),
                status: 1,
                detail: "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]".into(),
            });
        }
        Ok(())
    }

    async fn start_activity(&self, component: &str) -> Result<()> {
        lock(&self.state).calls.push(format!("start {component}"));
        Ok(())
    }

    async fn interactive_shell(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push("shell".into());
        if state.fail_shell {
            return Err(TargetError::Wait {
                tool: "adb".into(),
                source: io::Error::new(io::ErrorKind::Interrupted, "interrupted"),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct AvdState {
    devices: Vec<String>,
    created: Vec<String>,
    launched: Vec<String>,
    avd_home: Option<PathBuf>,
}

/// Virtual device tooling backed by a list. Launched emulators print nothing
/// and run until their session is shut down.
#[derive(Clone, Default)]
pub struct FakeAvdTool {
    state: Arc<Mutex<AvdState>>,
}

impl FakeAvdTool {
    pub fn new(devices: Vec<String>) -> Self {
        let tool = Self::default();
        lock(&tool.state).devices = devices;
        tool
    }

    /// Makes `create_avd` lay out `<name>.avd` under `avd_home`.
    pub fn creating_in(self, avd_home: PathBuf) -> Self {
        lock(&self.state).avd_home = Some(avd_home);
        self
    }

    pub fn created(&self) -> Vec<String> {
        lock(&self.state).created.clone()
    }

    pub fn launched(&self) -> Vec<String> {
        lock(&self.state).launched.clone()
    }
}

#[async_trait]
impl AvdTool for FakeAvdTool {
    async fn list_avds(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).devices.clone())
    }

    async fn create_avd(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.created.push(name.to_string());
        if let Some(home) = &state.avd_home {
            let dir = home.join(format!("{name}.avd"));
            fs::create_dir_all(&dir).map_err(|e| TargetError::io("fake avd", e))?;
            fs::write(dir.join("config.ini"), "generated\n")
                .map_err(|e| TargetError::io("fake avd", e))?;
        }
        if !state.devices.iter().any(|d| d == name) {
            state.devices.push(name.to_string());
        }
        Ok(())
    }

    async fn launch_emulator(&self, name: &str) -> Result<EmulatorProcess> {
        lock(&self.state).launched.push(name.to_string());
        Ok(EmulatorProcess::from_reader(tokio::io::empty()))
    }
}

/// Writes each archive as a placeholder and expands it into the directory
/// layout the real archive would produce.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    downloads: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn download_count(&self) -> usize {
        lock(&self.downloads).len()
    }

    pub fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }
}

fn fake_io(archive: &Path, e: io::Error) -> ToolchainError {
    ToolchainError::Archive {
        archive: archive.to_path_buf(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn download(&self, url: &str, archive: &Path) -> tryit_toolchain::error::Result<()> {
        tryit_toolchain::parse_download_url(url)?;
        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent).map_err(|e| fake_io(archive, e))?;
        }
        fs::write(archive, url).map_err(|e| fake_io(archive, e))?;
        lock(&self.downloads).push(url.to_string());
        Ok(())
    }

    async fn expand(&self, archive: &Path, dest: &Path) -> tryit_toolchain::error::Result<()> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut files: Vec<PathBuf> = Vec::new();
        if name.starts_with("tools_") {
            files.push(dest.join("tools").join("emulator"));
            files.push(dest.join("tools").join("bin").join("avdmanager"));
        } else if name.starts_with("platform-tools") {
            files.push(dest.join("platform-tools").join("adb"));
        } else if name.starts_with("build-tools") {
            files.push(dest.join("android-7.1.1").join("aapt"));
        } else if name.starts_with("platform-") {
            files.push(dest.join("android-6.0").join("android.jar"));
        } else if name.starts_with("sys-img") {
            files.push(dest.join("x86").join("system.img"));
        } else {
            files.push(dest.join("silent_install.sh"));
        }
        for file in files {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).map_err(|e| fake_io(archive, e))?;
            }
            fs::write(&file, "").map_err(|e| fake_io(archive, e))?;
        }
        fs::remove_file(archive).map_err(|e| fake_io(archive, e))?;
        Ok(())
    }
}

/// Records installer runs as `(installer, cwd, log)`.
#[derive(Clone, Default)]
pub struct FakeSilentInstaller {
    runs: Arc<Mutex<Vec<(PathBuf, PathBuf, PathBuf)>>>,
    failures: Arc<Mutex<u32>>,
}

impl FakeSilentInstaller {
    /// The first `times` runs exit with status 1.
    pub fn failing_times(self, times: u32) -> Self {
        *lock(&self.failures) = times;
        self
    }

    pub fn runs(&self) -> Vec<(PathBuf, PathBuf, PathBuf)> {
        lock(&self.runs).clone()
    }
}

#[async_trait]
impl SilentInstaller for FakeSilentInstaller {
    async fn run(&self, installer: &Path, cwd: &Path, log: &Path) -> Result<()> {
        lock(&self.runs).push((installer.to_path_buf(), cwd.to_path_buf(), log.to_path_buf()));
        let mut failures = lock(&self.failures);
        if *failures > 0 {
            *failures -= 1;
            return Err(TargetError::ToolFailed {
                tool: "silent_install.sh".into(),
                status: 1,
                detail: format!("see {}", log.display()),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeInspector {
    output: String,
}

impl FakeInspector {
    pub fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
        }
    }
}

#[async_trait]
impl ApkInspector for FakeInspector {
    async fn badging(&self, _apk: &Path) -> Result<String> {
        Ok(self.output.clone())
    }
}
