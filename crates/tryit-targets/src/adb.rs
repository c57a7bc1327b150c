use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tryit_toolchain::SdkLayout;

use crate::error::Result;
use crate::process::{capture, prepare_tool, run_inherited, ToolOutput};

pub const BOOT_COMPLETED_PROP: &str = "sys.boot_completed";

/// The device-side operations the provisioning flow needs from adb.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Raw output of `shell getprop <prop>`.
    async fn getprop(&self, prop: &str) -> Result<String>;

    /// Raw output of `shell pm list packages`.
    async fn list_packages(&self) -> Result<String>;

    async fn install(&self, apk: &Path) -> Result<()>;

    /// Runs `shell am start -n <component>`.
    async fn start_activity(&self, component: &str) -> Result<()>;

    /// Opens `shell` on the controlling terminal and blocks until it exits.
    async fn interactive_shell(&self) -> Result<()>;
}

pub struct Adb {
    path: PathBuf,
}

impl Adb {
    pub fn new(layout: &SdkLayout) -> Self {
        Self { path: layout.adb() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn output(&self, args: &[&str]) -> Result<ToolOutput> {
        prepare_tool(&self.path)?;
        capture(&self.path, args).await?.require_success("adb")
    }
}

#[async_trait]
impl DeviceBridge for Adb {
    async fn getprop(&self, prop: &str) -> Result<String> {
        Ok(self.output(&["shell", "getprop", prop]).await?.stdout)
    }

    async fn list_packages(&self) -> Result<String> {
        Ok(self.output(&["shell", "pm", "list", "packages"]).await?.stdout)
    }

    async fn install(&self, apk: &Path) -> Result<()> {
        let apk = apk.to_string_lossy();
        self.output(&["install", apk.as_ref()]).await?;
        Ok(())
    }

    async fn start_activity(&self, component: &str) -> Result<()> {
        self.output(&["shell", "am", "start", "-n", component])
            .await?;
        Ok(())
    }

    async fn interactive_shell(&self) -> Result<()> {
        prepare_tool(&self.path)?;
        // The operator's last command decides the shell's exit code.
        let status = run_inherited(&self.path, &["shell".to_string()], None).await?;
        tracing::debug!("adb shell exited with {status}");
        Ok(())
    }
}

/// True when any line of a `getprop sys.boot_completed` answer carries the marker.
pub fn boot_marker_present(output: &str) -> bool {
    output.lines().any(|line| line.contains('1'))
}

/// True when `pm list packages` output mentions `package`. An empty package
/// id never matches.
pub fn package_listed(output: &str, package: &str) -> bool {
    if package.trim().is_empty() {
        return false;
    }
    let needle = format!("package:{package}");
    output.lines().any(|line| line.contains(&needle))
}
