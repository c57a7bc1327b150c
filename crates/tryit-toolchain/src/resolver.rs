use std::{fs, path::PathBuf};

use tracing::{debug, info, warn};
use tryit_util::{ask_yes, expand_user, Console, HostProfile, Settings};

use crate::artifacts::Fetcher;
use crate::catalog::{emulator_marker, ComponentKind, SdkLayout};
use crate::error::{Result, ToolchainError};
use crate::state::SdkLocationRecord;

/// Makes sure a usable SDK exists locally. Safe to call on every run.
pub struct ToolchainResolver<'a> {
    host: &'a HostProfile,
    settings: &'a Settings,
    console: &'a dyn Console,
    fetcher: &'a dyn Fetcher,
    record: SdkLocationRecord,
}

impl<'a> ToolchainResolver<'a> {
    pub fn new(
        host: &'a HostProfile,
        settings: &'a Settings,
        console: &'a dyn Console,
        fetcher: &'a dyn Fetcher,
    ) -> Self {
        Self {
            host,
            settings,
            console,
            fetcher,
            record: SdkLocationRecord::in_dir(host.working_dir()),
        }
    }

    pub fn host(&self) -> &HostProfile {
        self.host
    }

    /// Locates or installs the SDK root, then fills in build tools, the
    /// platform and the system image.
    pub async fn resolve(&self) -> Result<SdkLayout> {
        let layout = self.locate_root().await?;
        self.ensure_component(&layout, ComponentKind::BuildTools)
            .await?;
        self.ensure_device_prerequisites(&layout).await?;
        Ok(layout)
    }

    /// Platform and system image needed to create and boot a virtual device.
    pub async fn ensure_device_prerequisites(&self, layout: &SdkLayout) -> Result<()> {
        self.ensure_component(layout, ComponentKind::Platform).await?;
        self.ensure_component(layout, ComponentKind::SystemImage)
            .await?;
        Ok(())
    }

    /// Returns the recorded SDK root, asking the operator when there is none.
    pub async fn locate_root(&self) -> Result<SdkLayout> {
        if let Some(root) = self.record.load() {
            debug!("using recorded SDK root {}", root.display());
            return Ok(SdkLayout::new(root, self.host));
        }

        let has_sdk = ask_yes(
            self.console,
            "Do you have an Android SDK installed on your computer (y/N)?: ",
        )
        .map_err(ToolchainError::Prompt)?;
        let root = if has_sdk {
            self.prompt_for_existing_sdk()?
        } else {
            self.install_fresh_sdk().await?
        };
        self.record.store(&root)?;
        info!("recorded SDK root {}", root.display());
        Ok(SdkLayout::new(root, self.host))
    }

    fn prompt_for_existing_sdk(&self) -> Result<PathBuf> {
        let attempts = self.settings.prompt_attempts();
        for _ in 0..attempts {
            let answer = self
                .console
                .prompt("Please provide android SDK location")
                .map_err(ToolchainError::Prompt)?;
            let candidate = expand_user(&answer);
            if emulator_marker(&candidate, self.host.os()).exists() {
                return Ok(candidate);
            }
            self.console.say("Invalid SDK location");
        }
        Err(ToolchainError::TooManyAttempts { attempts })
    }

    async fn install_fresh_sdk(&self) -> Result<PathBuf> {
        let root = self.host.working_dir().join(&self.settings.sdk_dir_name);
        fs::create_dir(&root).map_err(|source| ToolchainError::SdkDirUnavailable {
            path: root.clone(),
            source,
        })?;

        let layout = SdkLayout::new(&root, self.host);
        let fetched = match self.fetch_component(&layout, ComponentKind::SdkTools).await {
            Ok(()) => self.fetch_component(&layout, ComponentKind::PlatformTools).await,
            Err(err) => Err(err),
        };
        if let Err(err) = fetched {
            if let Err(cleanup) = fs::remove_dir_all(&root) {
                warn!("failed to remove {}: {cleanup}", root.display());
            }
            return Err(err);
        }
        Ok(root)
    }

    /// Fetches `kind` unless its directory already exists. Returns whether a
    /// download happened. A failed fetch leaves no directory behind, so the
    /// next run tries again.
    pub async fn ensure_component(&self, layout: &SdkLayout, kind: ComponentKind) -> Result<bool> {
        let component = layout.component(kind, self.host, &self.settings.urls);
        if component.marker.is_dir() {
            debug!("{} present at {}", kind.label(), component.marker.display());
            return Ok(false);
        }
        if let Err(err) = self.fetch_component(layout, kind).await {
            self.discard_component(layout, kind);
            return Err(err);
        }
        Ok(true)
    }

    /// Removes whatever is on disk for `kind`. Used when a component was
    /// fetched but could not be set up.
    pub fn discard_component(&self, layout: &SdkLayout, kind: ComponentKind) {
        let component = layout.component(kind, self.host, &self.settings.urls);
        if !component.marker.exists() {
            return;
        }
        match fs::remove_dir_all(&component.marker) {
            Ok(()) => info!("removed incomplete {} at {}", kind.label(), component.marker.display()),
            Err(err) => warn!("failed to remove {}: {err}", component.marker.display()),
        }
    }

    async fn fetch_component(&self, layout: &SdkLayout, kind: ComponentKind) -> Result<()> {
        let component = layout.component(kind, self.host, &self.settings.urls);
        let archive = component.expand_into.join(&component.archive_name);

        self.console.say(&format!("Downloading {}...", kind.label()));
        self.fetcher.download(&component.url, &archive).await?;

        self.console.say(&format!("Configuring {}...", kind.label()));
        self.fetcher
            .expand(&archive, &component.expand_into)
            .await?;

        if let Some((from, to)) = &component.rename {
            if !from.is_dir() {
                return Err(ToolchainError::UnexpectedLayout {
                    component: kind.label(),
                    expected: from.clone(),
                });
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    ToolchainError::io(format!("failed to create {}", parent.display()), e)
                })?;
            }
            fs::rename(from, to).map_err(|e| {
                ToolchainError::io(
                    format!("failed to move {} to {}", from.display(), to.display()),
                    e,
                )
            })?;
        }
        info!("{} installed under {}", kind.label(), component.marker.display());
        Ok(())
    }
}
