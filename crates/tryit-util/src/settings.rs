use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::env_var;

pub const SETTINGS_FILE: &str = "tryit.json";

/// Download locations; `{os}` is replaced by the host OS suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadUrls {
    pub sdk_tools: String,
    pub platform_tools: String,
    pub build_tools: String,
    pub platform: String,
    pub system_image: String,
    pub acceleration: String,
}

impl Default for DownloadUrls {
    fn default() -> Self {
        Self {
            sdk_tools: "https://dl.google.com/android/repository/tools_r25.2.5-{os}.zip".into(),
            platform_tools:
                "https://dl.google.com/android/repository/platform-tools_r25.0.3-{os}.zip".into(),
            build_tools: "https://dl.google.com/android/repository/build-tools_r25.0.2-{os}.zip"
                .into(),
            platform: "https://dl.google.com/android/repository/platform-23_r03.zip".into(),
            system_image: "https://dl.google.com/android/repository/sys-img/android/x86-23_r09.zip"
                .into(),
            acceleration:
                "https://dl.google.com/android/repository/extras/intel/haxm-{os}_r6_0_5.zip".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device_name: String,
    pub sdk_dir_name: String,
    pub resources_dir: PathBuf,
    pub agent_apk: String,
    pub poll_interval_ms: u64,
    pub settle_ms: u64,
    /// Zero disables the deadline and polls forever.
    pub boot_timeout_secs: u64,
    pub max_prompt_attempts: u32,
    /// Leave the emulator running once the operator leaves the shell.
    pub keep_emulator: bool,
    pub urls: DownloadUrls,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: "WSO2_AVD".into(),
            sdk_dir_name: "android-sdk".into(),
            resources_dir: PathBuf::from("resources"),
            agent_apk: "android-agent.apk".into(),
            poll_interval_ms: 1000,
            settle_ms: 5000,
            boot_timeout_secs: 600,
            max_prompt_attempts: 5,
            keep_emulator: true,
            urls: DownloadUrls::default(),
        }
    }
}

impl Settings {
    /// Defaults, then `tryit.json` in `working_dir`, then `TRYIT_*` variables.
    pub fn load(working_dir: &Path) -> Self {
        Self::load_with(working_dir, &env_var)
    }

    /// Like [`Settings::load`], reading overrides through `lookup`.
    pub fn load_with(working_dir: &Path, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let path = working_dir.join(SETTINGS_FILE);
        let mut settings = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Settings>(&data) {
                Ok(file_settings) => file_settings,
                Err(err) => {
                    eprintln!("Failed to parse {}: {err}", path.display());
                    Settings::default()
                }
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    eprintln!("Failed to read {}: {err}", path.display());
                }
                Settings::default()
            }
        };
        settings.apply_overrides(lookup);
        settings
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(&env_var);
    }

    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        for (key, slot) in [
            ("TRYIT_DEVICE_NAME", &mut self.device_name),
            ("TRYIT_SDK_DIR_NAME", &mut self.sdk_dir_name),
            ("TRYIT_AGENT_APK", &mut self.agent_apk),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }
        if let Some(value) = lookup("TRYIT_RESOURCES_DIR") {
            self.resources_dir = PathBuf::from(value);
        }
        override_parsed(lookup, "TRYIT_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        override_parsed(lookup, "TRYIT_SETTLE_MS", &mut self.settle_ms);
        override_parsed(lookup, "TRYIT_BOOT_TIMEOUT_SECS", &mut self.boot_timeout_secs);
        override_parsed(lookup, "TRYIT_MAX_PROMPT_ATTEMPTS", &mut self.max_prompt_attempts);
        if let Some(raw) = lookup("TRYIT_KEEP_EMULATOR") {
            match parse_switch(&raw) {
                Some(value) => self.keep_emulator = value,
                None => eprintln!("Ignoring TRYIT_KEEP_EMULATOR={raw}: not on/off"),
            }
        }

        let urls = &mut self.urls;
        for (key, slot) in [
            ("TRYIT_URL_SDK_TOOLS", &mut urls.sdk_tools),
            ("TRYIT_URL_PLATFORM_TOOLS", &mut urls.platform_tools),
            ("TRYIT_URL_BUILD_TOOLS", &mut urls.build_tools),
            ("TRYIT_URL_PLATFORM", &mut urls.platform),
            ("TRYIT_URL_SYSTEM_IMAGE", &mut urls.system_image),
            ("TRYIT_URL_ACCELERATION", &mut urls.acceleration),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn boot_timeout(&self) -> Option<Duration> {
        (self.boot_timeout_secs > 0).then(|| Duration::from_secs(self.boot_timeout_secs))
    }

    /// Never below one, so every prompt gets at least a single try.
    pub fn prompt_attempts(&self) -> u32 {
        self.max_prompt_attempts.max(1)
    }

    pub fn resources_path(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.resources_dir)
    }

    pub fn device_template(&self, working_dir: &Path) -> PathBuf {
        self.resources_path(working_dir).join("config.ini")
    }

    pub fn agent_apk_path(&self, working_dir: &Path) -> PathBuf {
        self.resources_path(working_dir).join(&self.agent_apk)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => eprintln!("Ignoring {key}={raw}: not a number"),
        }
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
