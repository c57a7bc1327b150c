use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::Child,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};
use tryit_util::{Console, Settings};

use crate::adb::{boot_marker_present, DeviceBridge, BOOT_COMPLETED_PROP};
use crate::avd::AvdTool;
use crate::error::{Result, TargetError};

pub const EMULATOR_LOG: &str = "emulator.log";
const LOG_CHANNEL_CAPACITY: usize = 256;

type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A started emulator: the child (when there is one) plus its output streams.
pub struct EmulatorProcess {
    child: Option<Child>,
    streams: Vec<OutputStream>,
}

impl EmulatorProcess {
    pub fn from_child(mut child: Child) -> Self {
        let mut streams: Vec<OutputStream> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            streams.push(Box::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            streams.push(Box::new(stderr));
        }
        Self {
            child: Some(child),
            streams,
        }
    }

    /// A process with no child behind it. It runs until the session is shut down.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            child: None,
            streams: vec![Box::new(reader)],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stop {
    Kill,
    Release,
}

/// The emulator together with the task draining its output into the log.
pub struct EmulatorSession {
    device: String,
    log_path: PathBuf,
    cancel_tx: watch::Sender<Option<Stop>>,
    task: JoinHandle<Result<u64>>,
}

impl EmulatorSession {
    /// Truncates `log_path` and starts draining `process` into it.
    pub async fn start(device: &str, process: EmulatorProcess, log_path: &Path) -> Result<Self> {
        let log = File::create(log_path).await.map_err(|e| {
            TargetError::io(format!("failed to open {}", log_path.display()), e)
        })?;
        let (cancel_tx, cancel_rx) = watch::channel(None);
        let task = tokio::spawn(drain_emulator(process, log, cancel_rx));
        Ok(Self {
            device: device.to_string(),
            log_path: log_path.to_path_buf(),
            cancel_tx,
            task,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// True once the emulator has exited and its output is fully drained.
    pub fn has_exited(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the emulator, flushes the log and joins the drain task. Returns
    /// the number of log lines written.
    pub async fn shutdown(self) -> Result<u64> {
        let device = self.device.clone();
        let lines = self.stop(Stop::Kill).await?;
        info!("emulator {device} stopped, {lines} log lines");
        Ok(lines)
    }

    /// Stops logging but leaves the emulator running for the agent. Output
    /// after this point is not captured.
    pub async fn detach(self) -> Result<u64> {
        let device = self.device.clone();
        let lines = self.stop(Stop::Release).await?;
        info!("emulator {device} left running, {lines} log lines");
        Ok(lines)
    }

    async fn stop(self, how: Stop) -> Result<u64> {
        let _ = self.cancel_tx.send(Some(how));
        self.task
            .await
            .map_err(|e| TargetError::io("emulator log task failed", std::io::Error::other(e)))?
    }
}

async fn read_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

async fn wait_child(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child.as_mut() {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn drain_emulator(
    process: EmulatorProcess,
    mut log: File,
    mut cancel_rx: watch::Receiver<Option<Stop>>,
) -> Result<u64> {
    let EmulatorProcess { mut child, streams } = process;
    let (line_tx, mut line_rx) = mpsc::channel::<String>(LOG_CHANNEL_CAPACITY);
    for stream in streams {
        tokio::spawn(read_lines(stream, line_tx.clone()));
    }
    drop(line_tx);

    let log_err = |e: std::io::Error| TargetError::io("failed to write emulator log", e);
    let mut written = 0u64;
    let mut streams_open = true;
    let mut exited = false;

    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                let stop = match changed {
                    Ok(()) => *cancel_rx.borrow(),
                    Err(_) => Some(Stop::Kill),
                };
                match stop {
                    Some(Stop::Kill) if !exited => {
                        if let Some(child) = child.as_mut() {
                            let _ = child.kill().await;
                        }
                        break;
                    }
                    Some(Stop::Release) if !exited => {
                        // Dropping the handle does not kill the process.
                        if let Some(child) = child.take() {
                            debug!("releasing emulator pid {:?}", child.id());
                        }
                        break;
                    }
                    Some(_) => break,
                    None => {}
                }
            }
            line = line_rx.recv(), if streams_open => {
                match line {
                    Some(line) => {
                        log.write_all(line.as_bytes()).await.map_err(log_err)?;
                        log.write_all(b"\n").await.map_err(log_err)?;
                        written += 1;
                    }
                    None => {
                        streams_open = false;
                        if exited {
                            break;
                        }
                    }
                }
            }
            status = wait_child(&mut child), if !exited => {
                let status = status.map_err(|source| TargetError::Wait {
                    tool: "emulator".into(),
                    source,
                })?;
                exited = true;
                warn!("emulator exited with {status}");
                if !streams_open {
                    break;
                }
            }
        }
    }

    while let Ok(line) = line_rx.try_recv() {
        log.write_all(line.as_bytes()).await.map_err(log_err)?;
        log.write_all(b"\n").await.map_err(log_err)?;
        written += 1;
    }
    log.flush().await.map_err(log_err)?;
    Ok(written)
}

/// The two readiness signals of a booting device.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn boot_completed(&self) -> Result<bool>;
    async fn cache_materialized(&self) -> Result<bool>;
}

/// Boot flag via adb, cache image via the host filesystem.
pub struct DeviceReadiness {
    bridge: Box<dyn DeviceBridge>,
    cache_path: PathBuf,
}

impl DeviceReadiness {
    pub fn new(bridge: Box<dyn DeviceBridge>, cache_path: PathBuf) -> Self {
        Self { bridge, cache_path }
    }
}

#[async_trait]
impl ReadinessProbe for DeviceReadiness {
    async fn boot_completed(&self) -> Result<bool> {
        match self.bridge.getprop(BOOT_COMPLETED_PROP).await {
            Ok(output) => Ok(boot_marker_present(&output)),
            // adb answers non-zero until the emulator is attached.
            Err(TargetError::ToolFailed { status, .. }) => {
                debug!("getprop exited with {status}, device not up yet");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn cache_materialized(&self) -> Result<bool> {
        Ok(tokio::fs::metadata(&self.cache_path).await.is_ok())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootPolicy {
    pub interval: Duration,
    pub settle: Duration,
    /// `None` polls forever.
    pub timeout: Option<Duration>,
}

impl BootPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.poll_interval(),
            settle: settings.settle(),
            timeout: settings.boot_timeout(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootReport {
    pub boot_polls: u32,
    pub cache_polls: u32,
}

#[derive(Clone, Copy)]
enum Signal {
    Boot,
    Cache,
}

impl Signal {
    fn stage(self) -> &'static str {
        match self {
            Signal::Boot => "booting",
            Signal::Cache => "materializing its cache",
        }
    }
}

pub struct BootOrchestrator<'a> {
    console: &'a dyn Console,
    policy: BootPolicy,
}

impl<'a> BootOrchestrator<'a> {
    pub fn new(console: &'a dyn Console, policy: BootPolicy) -> Self {
        Self { console, policy }
    }

    pub async fn launch(
        &self,
        tool: &dyn AvdTool,
        device: &str,
        log_path: &Path,
    ) -> Result<EmulatorSession> {
        self.console.say(&format!("Starting : {device}"));
        let process = tool.launch_emulator(device).await?;
        EmulatorSession::start(device, process, log_path).await
    }

    /// Launches `device` and returns once it is ready. On failure the
    /// emulator is stopped before the error is returned.
    pub async fn boot(
        &self,
        tool: &dyn AvdTool,
        probe: &dyn ReadinessProbe,
        device: &str,
        log_path: &Path,
    ) -> Result<EmulatorSession> {
        let session = self.launch(tool, device, log_path).await?;
        match self.wait_until_ready(probe, &session).await {
            Ok(report) => {
                info!(
                    "{device} ready after {} boot polls and {} cache polls",
                    report.boot_polls, report.cache_polls
                );
                Ok(session)
            }
            Err(err) => {
                if let Err(stop_err) = session.shutdown().await {
                    warn!("failed to stop emulator: {stop_err}");
                }
                Err(err)
            }
        }
    }

    /// Polls boot completion, then the cache image, then settles.
    pub async fn wait_until_ready(
        &self,
        probe: &dyn ReadinessProbe,
        session: &EmulatorSession,
    ) -> Result<BootReport> {
        let started = Instant::now();
        let boot_polls = self
            .poll(Signal::Boot, probe, session, started)
            .await?;
        let cache_polls = self
            .poll(Signal::Cache, probe, session, started)
            .await?;
        sleep(self.policy.settle).await;
        Ok(BootReport {
            boot_polls,
            cache_polls,
        })
    }

    async fn poll(
        &self,
        signal: Signal,
        probe: &dyn ReadinessProbe,
        session: &EmulatorSession,
        started: Instant,
    ) -> Result<u32> {
        let mut polls = 0u32;
        loop {
            polls += 1;
            let ready = match signal {
                Signal::Boot => probe.boot_completed().await?,
                Signal::Cache => probe.cache_materialized().await?,
            };
            self.console.progress();
            if ready {
                self.console.end_progress();
                return Ok(polls);
            }
            if session.has_exited() {
                self.console.end_progress();
                return Err(TargetError::EmulatorExited);
            }
            if let Some(limit) = self.policy.timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    self.console.end_progress();
                    return Err(TargetError::BootTimedOut {
                        stage: signal.stage(),
                        waited,
                    });
                }
            }
            sleep(self.policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tryit_util::ScriptedConsole;

    use super::*;
    use crate::testing::{FakeAvdTool, FakeBridge};

    /// Flips each signal to true after a fixed number of polls.
    struct CountingProbe {
        boot_after: Option<u32>,
        cache_after: Option<u32>,
        boot_calls: AtomicU32,
        cache_calls: AtomicU32,
    }

    impl CountingProbe {
        fn new(boot_after: Option<u32>, cache_after: Option<u32>) -> Self {
            Self {
                boot_after,
                cache_after,
                boot_calls: AtomicU32::new(0),
                cache_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ReadinessProbe for CountingProbe {
        async fn boot_completed(&self) -> Result<bool> {
            let n = self.boot_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.boot_after.is_some_and(|after| n >= after))
        }

        async fn cache_materialized(&self) -> Result<bool> {
            let n = self.cache_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.cache_after.is_some_and(|after| n >= after))
        }
    }

    fn policy(timeout_ms: u64) -> BootPolicy {
        BootPolicy {
            interval: Duration::from_millis(1),
            settle: Duration::from_millis(1),
            timeout: Some(Duration::from_millis(timeout_ms)),
        }
    }

    async fn idle_session(dir: &Path) -> EmulatorSession {
        let process = EmulatorProcess::from_reader(tokio::io::empty());
        EmulatorSession::start("dev", process, &dir.join(EMULATOR_LOG))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ready_only_after_boot_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let probe = CountingProbe::new(Some(3), Some(2));
        let session = idle_session(dir.path()).await;

        let report = BootOrchestrator::new(&console, policy(5_000))
            .wait_until_ready(&probe, &session)
            .await
            .unwrap();

        assert_eq!(report, BootReport { boot_polls: 3, cache_polls: 2 });
        assert_eq!(probe.cache_calls.load(Ordering::SeqCst), 2);
        assert_eq!(console.progress_dots(), 5);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cache_alone_is_not_enough() {
        let dir = tempfile::tempdir().unwrap();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let probe = CountingProbe::new(None, Some(1));
        let session = idle_session(dir.path()).await;

        let err = BootOrchestrator::new(&console, policy(30))
            .wait_until_ready(&probe, &session)
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::BootTimedOut { stage: "booting", .. }));
        assert_eq!(probe.cache_calls.load(Ordering::SeqCst), 0);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn boot_alone_is_not_enough() {
        let dir = tempfile::tempdir().unwrap();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let probe = CountingProbe::new(Some(1), None);
        let session = idle_session(dir.path()).await;

        let err = BootOrchestrator::new(&console, policy(30))
            .wait_until_ready(&probe, &session)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TargetError::BootTimedOut { stage: "materializing its cache", .. }
        ));
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn emulator_output_is_logged_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(EMULATOR_LOG);
        std::fs::write(&log_path, "stale output from last run\n").unwrap();

        let process = EmulatorProcess::from_reader(&b"emulator: booting\nhax is working\nlast"[..]);
        let session = EmulatorSession::start("dev", process, &log_path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let lines = session.shutdown().await.unwrap();

        assert_eq!(lines, 3);
        assert_eq!(
            std::fs::read_to_string(&log_path).unwrap(),
            "emulator: booting\nhax is working\nlast\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detach_leaves_the_emulator_running() {
        use std::process::Stdio;

        let spawn = || {
            tokio::process::Command::new("sh")
                .args(["-c", "echo up; exec sleep 30"])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .unwrap()
        };
        let alive = |pid: u32| {
            std::process::Command::new("kill")
                .args(["-0", &pid.to_string()])
                .stderr(Stdio::null())
                .status()
                .unwrap()
                .success()
        };
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(EMULATOR_LOG);

        let kept = spawn();
        let kept_pid = kept.id().unwrap();
        let session = EmulatorSession::start("dev", EmulatorProcess::from_child(kept), &log_path)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.detach().await.unwrap();
        assert!(alive(kept_pid));
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "up\n");
        std::process::Command::new("kill")
            .arg(kept_pid.to_string())
            .status()
            .unwrap();

        let stopped = spawn();
        let stopped_pid = stopped.id().unwrap();
        let session =
            EmulatorSession::start("dev", EmulatorProcess::from_child(stopped), &log_path)
                .await
                .unwrap();
        session.shutdown().await.unwrap();
        assert!(!alive(stopped_pid));
    }

    #[tokio::test]
    async fn readiness_treats_adb_failure_as_not_booted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache.img");
        let bridge = FakeBridge::default();
        bridge.push_getprop(Err(TargetError::ToolFailed {
            tool: "adb".into(),
            status: 1,
            detail: "error: no devices/emulators found".into(),
        }));
        bridge.push_getprop(Ok("0\n".into()));
        bridge.push_getprop(Ok("1\n".into()));
        let probe = DeviceReadiness::new(Box::new(bridge.clone()), cache.clone());

        assert!(!probe.boot_completed().await.unwrap());
        assert!(!probe.boot_completed().await.unwrap());
        assert!(probe.boot_completed().await.unwrap());

        assert!(!probe.cache_materialized().await.unwrap());
        std::fs::write(&cache, "").unwrap();
        assert!(probe.cache_materialized().await.unwrap());
    }

    #[tokio::test]
    async fn failed_boot_stops_the_emulator() {
        let dir = tempfile::tempdir().unwrap();
        let console = ScriptedConsole::new(Vec::<String>::new());
        let tool = FakeAvdTool::new(vec!["dev".into()]);
        let probe = CountingProbe::new(None, None);

        let err = BootOrchestrator::new(&console, policy(10))
            .boot(&tool, &probe, "dev", &dir.path().join(EMULATOR_LOG))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, TargetError::BootTimedOut { .. }));
        assert_eq!(tool.launched(), vec!["dev".to_string()]);
        assert!(console.transcript().contains(&"Starting : dev".to_string()));
    }
}
