use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tryit_targets::{
    error::Result as TargetResult,
    testing::{FakeAvdTool, FakeBridge, FakeFetcher, FakeInspector, FakeSilentInstaller},
    ApkInspector, AvdTool, DeviceBridge, ReadinessProbe, SilentInstaller, EMULATOR_LOG,
};
use tryit_toolchain::{Fetcher, SdkLayout, SdkLocationRecord};
use tryit_util::{HostProfile, ScriptedConsole, Settings};
use tryit_workflow::{Pipeline, Toolkit};

const BADGING: &str = "\
package: name='com.example.agent' versionCode='1' versionName='1.0'
launchable-activity: name='com.example.agent.Main'  label='' icon=''
";

/// Boot completes on the given poll, then the cache image on its own count.
#[derive(Clone)]
struct ScriptedProbe {
    boot_after: u32,
    cache_after: u32,
    boot_polls: Arc<AtomicU32>,
    cache_polls: Arc<AtomicU32>,
}

impl ScriptedProbe {
    fn new(boot_after: u32, cache_after: u32) -> Self {
        Self {
            boot_after,
            cache_after,
            boot_polls: Arc::default(),
            cache_polls: Arc::default(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn boot_completed(&self) -> TargetResult<bool> {
        Ok(self.boot_polls.fetch_add(1, Ordering::SeqCst) + 1 >= self.boot_after)
    }

    async fn cache_materialized(&self) -> TargetResult<bool> {
        Ok(self.cache_polls.fetch_add(1, Ordering::SeqCst) + 1 >= self.cache_after)
    }
}

struct FakeToolkit {
    fetcher: FakeFetcher,
    installer: FakeSilentInstaller,
    avd: FakeAvdTool,
    bridge: FakeBridge,
    probe: ScriptedProbe,
    probed_cache: Arc<std::sync::Mutex<Option<PathBuf>>>,
}

impl FakeToolkit {
    fn new(host: &HostProfile, devices: Vec<String>, packages: &str) -> Self {
        Self {
            fetcher: FakeFetcher::default(),
            installer: FakeSilentInstaller::default(),
            avd: FakeAvdTool::new(devices).creating_in(host.avd_home()),
            bridge: FakeBridge::default().with_packages(packages),
            probe: ScriptedProbe::new(3, 2),
            probed_cache: Arc::default(),
        }
    }
}

impl Toolkit for FakeToolkit {
    fn fetcher(&self) -> &dyn Fetcher {
        &self.fetcher
    }

    fn silent_installer(&self) -> Box<dyn SilentInstaller> {
        Box::new(self.installer.clone())
    }

    fn avd_tool(&self, _layout: &SdkLayout) -> Box<dyn AvdTool> {
        Box::new(self.avd.clone())
    }

    fn device_bridge(&self, _layout: &SdkLayout) -> Box<dyn DeviceBridge> {
        Box::new(self.bridge.clone())
    }

    fn apk_inspector(&self, _layout: &SdkLayout) -> Box<dyn ApkInspector> {
        Box::new(FakeInspector::new(BADGING))
    }

    fn readiness_probe(&self, _layout: &SdkLayout, cache_image: PathBuf) -> Box<dyn ReadinessProbe> {
        *self.probed_cache.lock().unwrap() = Some(cache_image);
        Box::new(self.probe.clone())
    }
}

fn workspace(root: &Path, os: &str) -> HostProfile {
    let host = HostProfile::new(os, root.join("home"), root.join("work"));
    let resources = host.working_dir().join("resources");
    fs::create_dir_all(&resources).unwrap();
    fs::write(resources.join("config.ini"), "hw.ramSize=2048\n").unwrap();
    fs::write(resources.join("android-agent.apk"), b"PK").unwrap();
    host
}

fn fast_settings() -> Settings {
    Settings {
        poll_interval_ms: 1,
        settle_ms: 1,
        ..Settings::default()
    }
}

#[tokio::test]
async fn fresh_environment_runs_through_to_the_shell() {
    let dir = tempfile::tempdir().unwrap();
    let host = workspace(dir.path(), "Linux");
    let settings = fast_settings();
    let console = ScriptedConsole::new(["n", "y"]);
    let toolkit = FakeToolkit::new(&host, vec![], "package:com.android.phone\n");

    let outcome = Pipeline::new(&host, &settings, &console, &toolkit)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.device, "WSO2_AVD");
    assert!(outcome.emulator_running);
    assert_eq!(outcome.sdk_root, host.working_dir().join("android-sdk"));
    assert_eq!(outcome.agent.component(), "com.example.agent/com.example.agent.Main");

    assert_eq!(console.prompts_seen(), 2);
    assert_eq!(console.remaining_answers(), 0);
    assert_eq!(toolkit.fetcher.download_count(), 5);
    assert_eq!(toolkit.avd.created(), vec!["WSO2_AVD".to_string()]);
    assert_eq!(toolkit.avd.launched(), vec!["WSO2_AVD".to_string()]);
    assert_eq!(toolkit.probe.boot_polls.load(Ordering::SeqCst), 3);
    assert_eq!(toolkit.probe.cache_polls.load(Ordering::SeqCst), 2);
    assert_eq!(
        toolkit.probed_cache.lock().unwrap().clone(),
        Some(host.avd_home().join("WSO2_AVD.avd").join("cache.img"))
    );
    assert_eq!(
        toolkit.bridge.installs(),
        vec![host.working_dir().join("resources").join("android-agent.apk")]
    );
    assert_eq!(
        toolkit.bridge.calls(),
        vec![
            "start com.example.agent/com.example.agent.Main".to_string(),
            "shell".to_string()
        ]
    );

    assert_eq!(
        SdkLocationRecord::in_dir(host.working_dir()).load(),
        Some(outcome.sdk_root.clone())
    );
    assert_eq!(
        fs::read_to_string(host.avd_home().join("WSO2_AVD.avd").join("config.ini")).unwrap(),
        "hw.ramSize=2048\n"
    );
    assert!(host.working_dir().join(EMULATOR_LOG).is_file());

    let transcript = console.transcript();
    assert_eq!(transcript.last().map(String::as_str), Some("Good Bye!"));
    assert_eq!(console.progress_dots(), 5);
    for expected in [
        "Creating a new AVD device",
        "Starting : WSO2_AVD",
        "Installing agent ...",
        "Starting Agent ...",
        "Connected to device shell",
    ] {
        assert!(
            transcript.iter().any(|line| line == expected),
            "missing {expected:?} in {transcript:#?}"
        );
    }
}

#[tokio::test]
async fn second_run_reuses_everything() {
    let dir = tempfile::tempdir().unwrap();
    let host = workspace(dir.path(), "Linux");
    let settings = fast_settings();

    let first = FakeToolkit::new(&host, vec![], "");
    Pipeline::new(&host, &settings, &ScriptedConsole::new(["n", "y"]), &first)
        .run()
        .await
        .unwrap();

    let console = ScriptedConsole::new(Vec::<String>::new());
    let second = FakeToolkit::new(
        &host,
        vec!["WSO2_AVD".into()],
        "package:com.example.agent\n",
    );
    let outcome = Pipeline::new(&host, &settings, &console, &second)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.device, "WSO2_AVD");
    assert_eq!(console.prompts_seen(), 0);
    assert_eq!(second.fetcher.download_count(), 0);
    assert!(second.avd.created().is_empty());
    assert!(second.bridge.installs().is_empty());
}

#[tokio::test]
async fn emulator_is_stopped_when_not_kept() {
    let dir = tempfile::tempdir().unwrap();
    let host = workspace(dir.path(), "Linux");
    let settings = Settings {
        keep_emulator: false,
        ..fast_settings()
    };
    let toolkit = FakeToolkit::new(&host, vec![], "");

    let outcome = Pipeline::new(&host, &settings, &ScriptedConsole::new(["n", "y"]), &toolkit)
        .run()
        .await
        .unwrap();

    assert!(!outcome.emulator_running);
}

#[tokio::test]
async fn acceleration_install_stops_before_boot() {
    let dir = tempfile::tempdir().unwrap();
    let host = workspace(dir.path(), "Mac OS X");
    let settings = fast_settings();
    let console = ScriptedConsole::new(["n", "y"]);
    let toolkit = FakeToolkit::new(&host, vec![], "");

    let err = Pipeline::new(&host, &settings, &console, &toolkit)
        .run()
        .await
        .unwrap_err();

    assert!(err.is_reboot_required());
    assert_eq!(toolkit.installer.runs().len(), 1);
    assert!(toolkit.avd.launched().is_empty());
    assert!(toolkit
        .fetcher
        .downloads()
        .iter()
        .any(|url| url.contains("haxm-macosx")));
}
