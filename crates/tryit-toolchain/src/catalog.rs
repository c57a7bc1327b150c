use std::path::{Path, PathBuf};

use tryit_util::{DownloadUrls, HostProfile, OsFamily};

pub const BUILD_TOOLS_VERSION: &str = "25.0.2";
pub const PLATFORM_ID: &str = "android-23";
pub const SYSTEM_IMAGE_TAG: &str = "default";
pub const SYSTEM_IMAGE_ABI: &str = "x86";
pub const SYSTEM_IMAGE_PACKAGE: &str = "system-images;android-23;default;x86";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    SdkTools,
    PlatformTools,
    BuildTools,
    Platform,
    SystemImage,
    Acceleration,
}

impl ComponentKind {
    pub fn label(self) -> &'static str {
        match self {
            ComponentKind::SdkTools => "Android SDK tools",
            ComponentKind::PlatformTools => "Android platform tools",
            ComponentKind::BuildTools => "Android build tools",
            ComponentKind::Platform => "Android platform",
            ComponentKind::SystemImage => "Android system image",
            ComponentKind::Acceleration => "Intel HAXM",
        }
    }
}

/// Where a toolchain component lives under the SDK root and how to get it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    pub kind: ComponentKind,
    /// Directory whose presence is the only installed check.
    pub marker: PathBuf,
    /// Directory the archive is stored in and expanded into.
    pub expand_into: PathBuf,
    pub archive_name: String,
    pub url: String,
    /// Top-level directory inside the archive and its canonical destination.
    pub rename: Option<(PathBuf, PathBuf)>,
}

/// Paths into one SDK root, resolved for a particular host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdkLayout {
    root: PathBuf,
    os: OsFamily,
}

impl SdkLayout {
    pub fn new(root: impl Into<PathBuf>, host: &HostProfile) -> Self {
        Self {
            root: root.into(),
            os: host.os(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn exe(&self, path: PathBuf) -> PathBuf {
        suffixed(path, self.os, ".exe")
    }

    fn script(&self, path: PathBuf) -> PathBuf {
        suffixed(path, self.os, ".bat")
    }

    pub fn emulator(&self) -> PathBuf {
        self.exe(self.root.join("tools").join("emulator"))
    }

    /// File that identifies a directory as an SDK root.
    pub fn emulator_marker(&self) -> PathBuf {
        emulator_marker(&self.root, self.os)
    }

    pub fn qemu(&self) -> PathBuf {
        let platform = match self.os {
            OsFamily::MacOs => "darwin-x86_64",
            OsFamily::Windows => "windows-x86_64",
            OsFamily::Linux => "linux-x86_64",
        };
        self.exe(
            self.root
                .join("tools")
                .join("qemu")
                .join(platform)
                .join("qemu-system-i386"),
        )
    }

    pub fn avdmanager(&self) -> PathBuf {
        self.script(self.root.join("tools").join("bin").join("avdmanager"))
    }

    pub fn legacy_android_tool(&self) -> PathBuf {
        self.script(self.root.join("tools").join("android"))
    }

    pub fn adb(&self) -> PathBuf {
        self.exe(self.root.join("platform-tools").join("adb"))
    }

    pub fn build_tools_dir(&self) -> PathBuf {
        self.root.join("build-tools").join(BUILD_TOOLS_VERSION)
    }

    pub fn aapt(&self) -> PathBuf {
        self.exe(self.build_tools_dir().join("aapt"))
    }

    pub fn platform_dir(&self) -> PathBuf {
        self.root.join("platforms").join(PLATFORM_ID)
    }

    pub fn system_image_dir(&self) -> PathBuf {
        self.root
            .join("system-images")
            .join(PLATFORM_ID)
            .join(SYSTEM_IMAGE_TAG)
    }

    pub fn acceleration_dir(&self) -> PathBuf {
        self.root
            .join("extras")
            .join("intel")
            .join("Hardware_Accelerated_Execution_Manager")
    }

    pub fn acceleration_installer(&self) -> PathBuf {
        let name = if self.os == OsFamily::Windows {
            "silent_install.bat"
        } else {
            "silent_install.sh"
        };
        self.acceleration_dir().join(name)
    }

    pub fn component(&self, kind: ComponentKind, host: &HostProfile, urls: &DownloadUrls) -> Component {
        let os = host.os_suffix();
        let root = self.root.clone();
        match kind {
            ComponentKind::SdkTools => Component {
                kind,
                marker: root.join("tools"),
                expand_into: root,
                archive_name: format!("tools_r25.2.5-{os}.zip"),
                url: expand_url(&urls.sdk_tools, os),
                rename: None,
            },
            ComponentKind::PlatformTools => Component {
                kind,
                marker: root.join("platform-tools"),
                expand_into: root,
                archive_name: format!("platform-tools_r25.0.3-{os}.zip"),
                url: expand_url(&urls.platform_tools, os),
                rename: None,
            },
            ComponentKind::BuildTools => Component {
                kind,
                marker: self.build_tools_dir(),
                rename: Some((root.join("android-7.1.1"), self.build_tools_dir())),
                expand_into: root,
                archive_name: format!("build-tools_r{BUILD_TOOLS_VERSION}-{os}.zip"),
                url: expand_url(&urls.build_tools, os),
            },
            ComponentKind::Platform => Component {
                kind,
                marker: self.platform_dir(),
                rename: Some((root.join("android-6.0"), self.platform_dir())),
                expand_into: root,
                archive_name: format!("platform-23_r03-{os}.zip"),
                url: expand_url(&urls.platform, os),
            },
            ComponentKind::SystemImage => Component {
                kind,
                marker: self.system_image_dir(),
                rename: Some((
                    root.join(SYSTEM_IMAGE_ABI),
                    self.system_image_dir().join(SYSTEM_IMAGE_ABI),
                )),
                expand_into: root,
                archive_name: "sys-img.zip".into(),
                url: expand_url(&urls.system_image, os),
            },
            ComponentKind::Acceleration => Component {
                kind,
                marker: self.acceleration_dir(),
                expand_into: self.acceleration_dir(),
                archive_name: format!("haxm-{os}.zip"),
                url: expand_url(&urls.acceleration, os),
                rename: None,
            },
        }
    }
}

pub fn emulator_marker(root: &Path, os: OsFamily) -> PathBuf {
    suffixed(root.join("tools").join("emulator"), os, ".bat")
}

pub fn expand_url(template: &str, os_suffix: &str) -> String {
    template.replace("{os}", os_suffix)
}

fn suffixed(path: PathBuf, os: OsFamily, suffix: &str) -> PathBuf {
    if os != OsFamily::Windows {
        return path;
    }
    let mut raw = path.into_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
