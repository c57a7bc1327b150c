//! The provisioning pipeline: toolchain, device, boot, agent, shell.

use std::{future::Future, path::PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use tryit_targets::{
    Aapt, Adb, AgentIdentity, AgentInstaller, ApkInspector, AvdTool, BootOrchestrator, BootPolicy,
    DeviceBridge, DeviceProvisioner, DeviceReadiness, HaxmInstaller, ReadinessProbe, SdkAvdTool,
    SessionLauncher, SilentInstaller, TargetError, EMULATOR_LOG,
};
use tryit_telemetry::StageTimer;
use tryit_toolchain::{Fetcher, HttpFetcher, SdkLayout, ToolchainError, ToolchainResolver};
use tryit_util::{Console, HostProfile, Settings};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error(transparent)]
    Target(#[from] TargetError),
}

impl WorkflowError {
    /// The run stopped so the operator can reboot after installing
    /// hardware acceleration.
    pub fn is_reboot_required(&self) -> bool {
        matches!(self, WorkflowError::Target(TargetError::RebootRequired))
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

/// Builds the collaborators that talk to the SDK. Most of them need the
/// resolved SDK layout, so they are made on demand.
pub trait Toolkit: Send + Sync {
    fn fetcher(&self) -> &dyn Fetcher;
    fn silent_installer(&self) -> Box<dyn SilentInstaller>;
    fn avd_tool(&self, layout: &SdkLayout) -> Box<dyn AvdTool>;
    fn device_bridge(&self, layout: &SdkLayout) -> Box<dyn DeviceBridge>;
    fn apk_inspector(&self, layout: &SdkLayout) -> Box<dyn ApkInspector>;
    fn readiness_probe(&self, layout: &SdkLayout, cache_image: PathBuf) -> Box<dyn ReadinessProbe>;
}

/// The real SDK tools plus an HTTP fetcher.
pub struct SdkToolkit {
    fetcher: HttpFetcher,
}

impl SdkToolkit {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new()?,
        })
    }
}

impl Toolkit for SdkToolkit {
    fn fetcher(&self) -> &dyn Fetcher {
        &self.fetcher
    }

    fn silent_installer(&self) -> Box<dyn SilentInstaller> {
        Box::new(HaxmInstaller)
    }

    fn avd_tool(&self, layout: &SdkLayout) -> Box<dyn AvdTool> {
        Box::new(SdkAvdTool::new(layout.clone()))
    }

    fn device_bridge(&self, layout: &SdkLayout) -> Box<dyn DeviceBridge> {
        Box::new(Adb::new(layout))
    }

    fn apk_inspector(&self, layout: &SdkLayout) -> Box<dyn ApkInspector> {
        Box::new(Aapt::new(layout))
    }

    fn readiness_probe(&self, layout: &SdkLayout, cache_image: PathBuf) -> Box<dyn ReadinessProbe> {
        Box::new(DeviceReadiness::new(Box::new(Adb::new(layout)), cache_image))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub sdk_root: PathBuf,
    pub device: String,
    pub agent: AgentIdentity,
    /// The emulator was left running for the agent.
    pub emulator_running: bool,
}

async fn stage<T, E, F>(name: &'static str, work: F) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: Future<Output = std::result::Result<T, E>>,
{
    let timer = StageTimer::start(name);
    let result = work.await;
    timer.finish(&result);
    result
}

pub struct Pipeline<'a> {
    host: &'a HostProfile,
    settings: &'a Settings,
    console: &'a dyn Console,
    toolkit: &'a dyn Toolkit,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        host: &'a HostProfile,
        settings: &'a Settings,
        console: &'a dyn Console,
        toolkit: &'a dyn Toolkit,
    ) -> Self {
        Self {
            host,
            settings,
            console,
            toolkit,
        }
    }

    fn resolver(&self) -> ToolchainResolver<'_> {
        ToolchainResolver::new(self.host, self.settings, self.console, self.toolkit.fetcher())
    }

    pub async fn resolve_toolchain(&self) -> Result<SdkLayout> {
        let resolver = self.resolver();
        Ok(stage("toolchain", resolver.resolve()).await?)
    }

    /// Virtual devices the emulator knows about.
    pub async fn list_devices(&self) -> Result<Vec<String>> {
        let layout = self.resolve_toolchain().await?;
        Ok(self.toolkit.avd_tool(&layout).list_avds().await?)
    }

    /// Package and entry point of the bundled agent.
    pub async fn agent_identity(&self) -> Result<AgentIdentity> {
        let layout = self.resolve_toolchain().await?;
        let inspector = self.toolkit.apk_inspector(&layout);
        let bridge = self.toolkit.device_bridge(&layout);
        let installer = AgentInstaller::new(
            self.console,
            inspector.as_ref(),
            bridge.as_ref(),
            self.settings.agent_apk_path(self.host.working_dir()),
        );
        Ok(installer.identify().await?)
    }

    /// Runs every stage in order and returns once the operator leaves the
    /// device shell. The emulator keeps running after a successful session
    /// when `keep_emulator` is set and is stopped otherwise.
    pub async fn run(&self) -> Result<PipelineOutcome> {
        let resolver = self.resolver();
        let layout = stage("toolchain", resolver.resolve()).await?;
        info!("SDK root {}", layout.root().display());

        let avd = self.toolkit.avd_tool(&layout);
        let accel = self.toolkit.silent_installer();
        let provisioner = DeviceProvisioner::new(
            self.host,
            self.settings,
            self.console,
            &resolver,
            avd.as_ref(),
            accel.as_ref(),
        );
        let device = stage("device", provisioner.ensure_device(&layout)).await?;

        let probe = self
            .toolkit
            .readiness_probe(&layout, provisioner.cache_image(&device));
        let boot = BootOrchestrator::new(self.console, BootPolicy::from_settings(self.settings));
        let log_path = self.host.working_dir().join(EMULATOR_LOG);
        let session = stage(
            "boot",
            boot.boot(avd.as_ref(), probe.as_ref(), &device, &log_path),
        )
        .await?;

        let attached = self.attach(&layout).await;
        let emulator_running = attached.is_ok() && self.settings.keep_emulator;
        let released = if emulator_running {
            session.detach().await
        } else {
            session.shutdown().await
        };
        match released {
            Ok(lines) => info!("emulator log has {lines} lines"),
            Err(err) if attached.is_ok() => return Err(err.into()),
            Err(err) => warn!("failed to stop emulator: {err}"),
        }
        let agent = attached?;

        Ok(PipelineOutcome {
            sdk_root: layout.root().to_path_buf(),
            device,
            agent,
            emulator_running,
        })
    }

    async fn attach(&self, layout: &SdkLayout) -> Result<AgentIdentity> {
        let inspector = self.toolkit.apk_inspector(layout);
        let bridge = self.toolkit.device_bridge(layout);
        let installer = AgentInstaller::new(
            self.console,
            inspector.as_ref(),
            bridge.as_ref(),
            self.settings.agent_apk_path(self.host.working_dir()),
        );
        let agent = stage("agent", installer.ensure_agent()).await?;

        let launcher = SessionLauncher::new(self.console, bridge.as_ref());
        stage("session", launcher.run(&agent)).await?;
        Ok(agent)
    }
}
