use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use tryit_toolchain::{SdkLayout, ToolchainResolver, SYSTEM_IMAGE_PACKAGE};
use tryit_util::{ask_yes, Console, HostProfile, Settings};

use crate::accel::{AccelerationInstaller, SilentInstaller};
use crate::boot::EmulatorProcess;
use crate::error::{Result, TargetError};
use crate::process::{capture, prepare_tool, run_inherited, spawn_error};

pub const BANNER: [&str; 3] = [
    "+----------------------------------------------------------------+",
    "|                        WSO2 Android Tryit                      |",
    "+----------------------------------------------------------------+",
];

/// SDK tools that manage virtual devices.
#[async_trait]
pub trait AvdTool: Send + Sync {
    /// Names of the virtual devices known to the emulator, in listing order.
    async fn list_avds(&self) -> Result<Vec<String>>;

    /// Creates `name` with the default system image. The tool talks to the
    /// operator directly.
    async fn create_avd(&self, name: &str) -> Result<()>;

    async fn launch_emulator(&self, name: &str) -> Result<EmulatorProcess>;
}

pub struct SdkAvdTool {
    layout: SdkLayout,
}

impl SdkAvdTool {
    pub fn new(layout: SdkLayout) -> Self {
        Self { layout }
    }

    fn creation_command(&self, name: &str) -> (PathBuf, Vec<String>) {
        let avdmanager = self.layout.avdmanager();
        if avdmanager.exists() {
            let args = ["create", "avd", "-k", SYSTEM_IMAGE_PACKAGE, "-n", name];
            (avdmanager, args.iter().map(|s| s.to_string()).collect())
        } else {
            let args = ["create", "avd", "-n", name, "-t", tryit_toolchain::catalog::PLATFORM_ID];
            (
                self.layout.legacy_android_tool(),
                args.iter().map(|s| s.to_string()).collect(),
            )
        }
    }
}

#[async_trait]
impl AvdTool for SdkAvdTool {
    async fn list_avds(&self) -> Result<Vec<String>> {
        let emulator = self.layout.emulator();
        prepare_tool(&emulator)?;
        let output = capture(&emulator, &["-list-avds"])
            .await?
            .require_success("emulator")?;
        Ok(parse_avd_list(&output.stdout))
    }

    async fn create_avd(&self, name: &str) -> Result<()> {
        let (tool, args) = self.creation_command(name);
        prepare_tool(&tool)?;
        let status = run_inherited(&tool, &args, None).await?;
        if status != 0 {
            return Err(TargetError::ToolFailed {
                tool: crate::process::tool_name(&tool),
                status,
                detail: String::new(),
            });
        }
        Ok(())
    }

    async fn launch_emulator(&self, name: &str) -> Result<EmulatorProcess> {
        let emulator = self.layout.emulator();
        prepare_tool(&emulator)?;
        let qemu = self.layout.qemu();
        if qemu.exists() {
            prepare_tool(&qemu)?;
        } else {
            debug!("no bundled qemu at {}", qemu.display());
        }

        let child = Command::new(&emulator)
            .args(["-avd", name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&emulator, e))?;
        info!("emulator started for {name} (pid {:?})", child.id());
        Ok(EmulatorProcess::from_child(child))
    }
}

pub fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Makes sure there is a device to boot and picks it.
pub struct DeviceProvisioner<'a> {
    host: &'a HostProfile,
    settings: &'a Settings,
    console: &'a dyn Console,
    resolver: &'a ToolchainResolver<'a>,
    avd: &'a dyn AvdTool,
    accel: &'a dyn SilentInstaller,
}

impl<'a> DeviceProvisioner<'a> {
    pub fn new(
        host: &'a HostProfile,
        settings: &'a Settings,
        console: &'a dyn Console,
        resolver: &'a ToolchainResolver<'a>,
        avd: &'a dyn AvdTool,
        accel: &'a dyn SilentInstaller,
    ) -> Self {
        Self {
            host,
            settings,
            console,
            resolver,
            avd,
            accel,
        }
    }

    pub fn device_dir(&self, name: &str) -> PathBuf {
        self.host.avd_home().join(format!("{name}.avd"))
    }

    pub fn cache_image(&self, name: &str) -> PathBuf {
        self.device_dir(name).join("cache.img")
    }

    /// Returns the device to boot, creating the default one when the operator
    /// agrees. Hosts that need hardware acceleration get it installed first.
    pub async fn ensure_device(&self, layout: &SdkLayout) -> Result<String> {
        let name = &self.settings.device_name;
        let attempts = self.settings.prompt_attempts();
        let mut empty_listings = 0u32;
        let mut creations = 0u32;

        loop {
            self.resolver.ensure_device_prerequisites(layout).await?;

            if !self.device_dir(name).is_dir() && creations < attempts {
                let question = format!("Do you want to create {name} with default configs (Y/n)?: ");
                if ask_yes(self.console, &question).map_err(TargetError::Prompt)? {
                    creations += 1;
                    self.create_device(name).await?;
                    continue;
                }
            }

            for line in BANNER {
                self.console.say(line);
            }
            let devices = self.avd.list_avds().await?;
            debug!("emulator lists {} devices", devices.len());
            if devices.is_empty() {
                self.console.say("No AVDs available in the system ");
                empty_listings += 1;
                if empty_listings >= attempts {
                    return Err(TargetError::TooManyAttempts {
                        what: "finding a virtual device",
                        attempts,
                    });
                }
                continue;
            }

            let device = self.select_device(&devices)?;
            AccelerationInstaller::new(self.host, self.console, self.accel)
                .ensure(self.resolver, layout)
                .await?;
            return Ok(device);
        }
    }

    /// Picks from a non-empty listing: a lone device directly, otherwise by
    /// 1-based number.
    pub fn select_device(&self, devices: &[String]) -> Result<String> {
        if let [only] = devices {
            return Ok(only.clone());
        }

        self.console.say("");
        self.console.say("Available AVDs in the system");
        self.console.say("");
        for (index, device) in devices.iter().enumerate() {
            self.console.say(&format!("{}) {device}", index + 1));
        }

        let attempts = self.settings.prompt_attempts();
        for _ in 0..attempts {
            let answer = self
                .console
                .prompt("Enter AVD number to start (eg: 1) :")
                .map_err(TargetError::Prompt)?;
            match answer.trim().parse::<usize>() {
                Ok(number) if (1..=devices.len()).contains(&number) => {
                    return Ok(devices[number - 1].clone());
                }
                _ => self.console.say(&format!(
                    "Please enter a number between 1 and {}",
                    devices.len()
                )),
            }
        }
        Err(TargetError::TooManyAttempts {
            what: "selecting a virtual device",
            attempts,
        })
    }

    /// Runs the device creation tool, then overwrites the generated
    /// configuration with the bundled template.
    pub async fn create_device(&self, name: &str) -> Result<()> {
        let template = self.settings.device_template(self.host.working_dir());
        if !template.is_file() {
            return Err(TargetError::MissingTemplate { path: template });
        }

        self.console.say("Creating a new AVD device");
        self.avd.create_avd(name).await?;

        let dir = self.device_dir(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TargetError::io(format!("failed to create {}", dir.display()), e))?;
        let config = dir.join("config.ini");
        tokio::fs::copy(&template, &config).await.map_err(|e| {
            TargetError::io(
                format!("failed to copy {} to {}", template.display(), config.display()),
                e,
            )
        })?;
        info!("created {name} from {}", template.display());
        Ok(())
    }
}
