use std::path::Path;

use async_trait::async_trait;
use tracing::info;
use tryit_toolchain::{ComponentKind, SdkLayout, ToolchainResolver};
use tryit_util::{Console, HostProfile};

use crate::error::{Result, TargetError};
use crate::process::{prepare_tool, run_inherited, tool_name};

pub const HAXM_MEMORY_MB: &str = "2048";
pub const HAXM_LOG: &str = "haxm_silent_run.log";

/// Runs the vendor's unattended acceleration installer.
#[async_trait]
pub trait SilentInstaller: Send + Sync {
    async fn run(&self, installer: &Path, cwd: &Path, log: &Path) -> Result<()>;
}

pub struct HaxmInstaller;

#[async_trait]
impl SilentInstaller for HaxmInstaller {
    async fn run(&self, installer: &Path, cwd: &Path, log: &Path) -> Result<()> {
        prepare_tool(installer)?;
        let args = vec![
            "-m".to_string(),
            HAXM_MEMORY_MB.to_string(),
            "-log".to_string(),
            log.display().to_string(),
        ];
        let status = run_inherited(installer, &args, Some(cwd)).await?;
        if status != 0 {
            return Err(TargetError::ToolFailed {
                tool: tool_name(installer),
                status,
                detail: format!("see {}", log.display()),
            });
        }
        Ok(())
    }
}

/// Installs hardware acceleration on hosts whose emulator needs it.
pub struct AccelerationInstaller<'a> {
    host: &'a HostProfile,
    console: &'a dyn Console,
    installer: &'a dyn SilentInstaller,
}

impl<'a> AccelerationInstaller<'a> {
    pub fn new(
        host: &'a HostProfile,
        console: &'a dyn Console,
        installer: &'a dyn SilentInstaller,
    ) -> Self {
        Self {
            host,
            console,
            installer,
        }
    }

    /// A fresh install ends the run with `RebootRequired`.
    pub async fn ensure(&self, resolver: &ToolchainResolver<'_>, layout: &SdkLayout) -> Result<()> {
        if !self.host.needs_acceleration() {
            return Ok(());
        }
        if !resolver
            .ensure_component(layout, ComponentKind::Acceleration)
            .await?
        {
            return Ok(());
        }

        let dir = layout.acceleration_dir();
        let log = self.host.working_dir().join(HAXM_LOG);
        let installed = self
            .installer
            .run(&layout.acceleration_installer(), &dir, &log)
            .await;
        if let Err(err) = installed {
            resolver.discard_component(layout, ComponentKind::Acceleration);
            return Err(err);
        }
        info!("acceleration installed from {}", dir.display());
        self.console.say("Please restart your machine and run again.");
        Err(TargetError::RebootRequired)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tryit_util::{ScriptedConsole, Settings};

    use super::*;
    use crate::testing::{FakeFetcher, FakeSilentInstaller};

    #[tokio::test]
    async fn linux_never_installs_acceleration() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostProfile::new("Linux", dir.path().join("home"), dir.path());
        let settings = Settings::default();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let fetcher = FakeFetcher::default();
        let resolver = ToolchainResolver::new(&host, &settings, &console, &fetcher);
        let installer = FakeSilentInstaller::default();
        let layout = SdkLayout::new(dir.path().join("sdk"), &host);

        AccelerationInstaller::new(&host, &console, &installer)
            .ensure(&resolver, &layout)
            .await
            .unwrap();
        assert_eq!(fetcher.download_count(), 0);
        assert!(installer.runs().is_empty());
    }

    #[tokio::test]
    async fn fresh_install_on_mac_requires_reboot() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostProfile::new("Mac OS X", dir.path().join("home"), dir.path());
        let settings = Settings::default();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let fetcher = FakeFetcher::default();
        let resolver = ToolchainResolver::new(&host, &settings, &console, &fetcher);
        let installer = FakeSilentInstaller::default();
        let layout = SdkLayout::new(dir.path().join("sdk"), &host);

        let err = AccelerationInstaller::new(&host, &console, &installer)
            .ensure(&resolver, &layout)
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::RebootRequired));
        assert_eq!(fetcher.download_count(), 1);
        let runs = installer.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, layout.acceleration_installer());
        assert_eq!(runs[0].1, layout.acceleration_dir());
        assert_eq!(runs[0].2, dir.path().join(HAXM_LOG));
        assert!(console
            .transcript()
            .contains(&"Please restart your machine and run again.".to_string()));
    }

    #[tokio::test]
    async fn failed_install_is_retried_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostProfile::new("Mac OS X", dir.path().join("home"), dir.path());
        let settings = Settings::default();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let fetcher = FakeFetcher::default();
        let resolver = ToolchainResolver::new(&host, &settings, &console, &fetcher);
        let installer = FakeSilentInstaller::default().failing_times(1);
        let layout = SdkLayout::new(dir.path().join("sdk"), &host);
        let accel = AccelerationInstaller::new(&host, &console, &installer);

        let first = accel.ensure(&resolver, &layout).await.unwrap_err();
        assert!(matches!(first, TargetError::ToolFailed { status: 1, .. }));
        assert!(!layout.acceleration_dir().exists());

        let second = accel.ensure(&resolver, &layout).await.unwrap_err();
        assert!(matches!(second, TargetError::RebootRequired));
        assert_eq!(installer.runs().len(), 2);
        assert_eq!(fetcher.download_count(), 2);
    }

    #[tokio::test]
    async fn installed_acceleration_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let host = HostProfile::new("Windows 10", dir.path().join("home"), dir.path());
        let settings = Settings::default();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let fetcher = FakeFetcher::default();
        let resolver = ToolchainResolver::new(&host, &settings, &console, &fetcher);
        let installer = FakeSilentInstaller::default();
        let layout = SdkLayout::new(dir.path().join("sdk"), &host);
        fs::create_dir_all(layout.acceleration_dir()).unwrap();

        AccelerationInstaller::new(&host, &console, &installer)
            .ensure(&resolver, &layout)
            .await
            .unwrap();
        assert_eq!(fetcher.download_count(), 0);
        assert!(installer.runs().is_empty());
    }
}
