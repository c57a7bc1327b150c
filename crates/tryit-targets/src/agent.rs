use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};
use tryit_toolchain::SdkLayout;
use tryit_util::Console;

use crate::adb::{package_listed, DeviceBridge};
use crate::error::{Result, TargetError};
use crate::process::{capture, prepare_tool};

const NAME_MARKER: &str = "name='";

/// Reads package metadata out of an APK.
#[async_trait]
pub trait ApkInspector: Send + Sync {
    /// Raw `aapt dump badging` output.
    async fn badging(&self, apk: &Path) -> Result<String>;
}

pub struct Aapt {
    path: PathBuf,
}

impl Aapt {
    pub fn new(layout: &SdkLayout) -> Self {
        Self {
            path: layout.aapt(),
        }
    }
}

#[async_trait]
impl ApkInspector for Aapt {
    async fn badging(&self, apk: &Path) -> Result<String> {
        prepare_tool(&self.path)?;
        let apk = apk.to_string_lossy();
        let output = capture(&self.path, &["d", "badging", apk.as_ref()])
            .await?
            .require_success("aapt")?;
        Ok(output.stdout)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentIdentity {
    pub package: String,
    pub activity: String,
}

impl AgentIdentity {
    /// `package/activity`, as `am start -n` expects it.
    pub fn component(&self) -> String {
        format!("{}/{}", self.package, self.activity)
    }
}

/// Pulls the package name and launchable activity out of badging output.
/// Missing declarations come back as empty strings.
pub fn parse_badging(output: &str) -> AgentIdentity {
    let mut package = None;
    let mut activity = None;
    for line in output.lines() {
        if package.is_none() && is_declaration(line, "package") {
            package = Some(quoted_name(line));
        }
        if activity.is_none() && is_declaration(line, "launchable-activity") {
            activity = Some(quoted_name(line));
        }
    }
    AgentIdentity {
        package: package.unwrap_or_default(),
        activity: activity.unwrap_or_default(),
    }
}

fn is_declaration(line: &str, key: &str) -> bool {
    line.trim_start()
        .strip_prefix(key)
        .is_some_and(|rest| rest.starts_with(':') || rest.starts_with(' '))
}

fn quoted_name(line: &str) -> String {
    let Some(start) = line.find(NAME_MARKER) else {
        return String::new();
    };
    let rest = &line[start + NAME_MARKER.len()..];
    match rest.find('\'') {
        Some(end) => rest[..end].to_string(),
        None => rest.to_string(),
    }
}

/// Makes sure the bundled agent is on the device.
pub struct AgentInstaller<'a> {
    console: &'a dyn Console,
    inspector: &'a dyn ApkInspector,
    bridge: &'a dyn DeviceBridge,
    apk: PathBuf,
}

impl<'a> AgentInstaller<'a> {
    pub fn new(
        console: &'a dyn Console,
        inspector: &'a dyn ApkInspector,
        bridge: &'a dyn DeviceBridge,
        apk: PathBuf,
    ) -> Self {
        Self {
            console,
            inspector,
            bridge,
            apk,
        }
    }

    pub async fn identify(&self) -> Result<AgentIdentity> {
        if !self.apk.is_file() {
            return Err(TargetError::MissingAgent {
                path: self.apk.clone(),
            });
        }
        let identity = parse_badging(&self.inspector.badging(&self.apk).await?);
        if identity.package.is_empty() || identity.activity.is_empty() {
            warn!(
                "incomplete badging for {}: package '{}', activity '{}'",
                self.apk.display(),
                identity.package,
                identity.activity
            );
        }
        Ok(identity)
    }

    pub async fn is_installed(&self, identity: &AgentIdentity) -> Result<bool> {
        let listing = self.bridge.list_packages().await?;
        Ok(package_listed(&listing, &identity.package))
    }

    /// Identifies the agent and installs it unless the device already has it.
    /// A failed install is reported and the run carries on.
    pub async fn ensure_agent(&self) -> Result<AgentIdentity> {
        let identity = self.identify().await?;
        if self.is_installed(&identity).await? {
            info!("{} already installed", identity.package);
            return Ok(identity);
        }

        self.console.say("Installing agent ...");
        match self.bridge.install(&self.apk).await {
            Ok(()) => info!("installed {}", identity.package),
            Err(TargetError::ToolFailed { status, detail, .. }) => {
                warn!("agent install exited with {status}: {}", detail.trim());
                self.console
                    .say(&format!("Agent installation failed (exit {status})"));
            }
            Err(err) => return Err(err),
        }
        Ok(identity)
    }
}
