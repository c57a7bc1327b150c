//! Everything that touches the virtual device: creation and selection,
//! hardware acceleration, boot supervision, agent install and the shell.

pub mod accel;
pub mod adb;
pub mod agent;
pub mod avd;
pub mod boot;
pub mod error;
pub mod process;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use accel::{AccelerationInstaller, HaxmInstaller, SilentInstaller};
pub use adb::{Adb, DeviceBridge};
pub use agent::{parse_badging, Aapt, AgentIdentity, AgentInstaller, ApkInspector};
pub use avd::{AvdTool, DeviceProvisioner, SdkAvdTool};
pub use boot::{
    BootOrchestrator, BootPolicy, BootReport, DeviceReadiness, EmulatorProcess, EmulatorSession,
    ReadinessProbe, EMULATOR_LOG,
};
pub use error::TargetError;
pub use session::SessionLauncher;
