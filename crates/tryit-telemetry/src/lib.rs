//! Opt-in local telemetry. Stage timings go to `telemetry/events.jsonl`
//! under the data directory, panics to `telemetry/crashes/`. Nothing is
//! uploaded.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};
use tryit_util::{env_flag, now_millis};

const QUEUE_DEPTH: usize = 64;
const ROTATE_AT_BYTES: u64 = 512 * 1024;

#[derive(Clone)]
pub struct TelemetryOptions {
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub usage_enabled: bool,
    pub crash_enabled: bool,
    pub root: PathBuf,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    Usage {
        name: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        fields: BTreeMap<String, String>,
    },
    Crash {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
}

#[derive(Serialize)]
struct Envelope<'a> {
    ts: i64,
    app: &'a str,
    version: &'a str,
    run: &'a str,
    #[serde(flatten)]
    record: Record,
}

/// Process-wide recorder. Usage events are queued to a writer thread and
/// dropped when the queue is full; crash reports are written inline.
pub struct Recorder {
    app: &'static str,
    version: &'static str,
    run: String,
    dir: PathBuf,
    usage: AtomicBool,
    crashes: AtomicBool,
    queue: SyncSender<String>,
}

static RECORDER: OnceLock<Arc<Recorder>> = OnceLock::new();

pub fn init(options: TelemetryOptions) -> Arc<Recorder> {
    if let Some(recorder) = RECORDER.get() {
        recorder.usage.store(options.usage_enabled, Ordering::Relaxed);
        recorder.crashes.store(options.crash_enabled, Ordering::Relaxed);
        return Arc::clone(recorder);
    }

    let dir = options.root.join("telemetry");
    let (queue, pending) = mpsc::sync_channel(QUEUE_DEPTH);
    let recorder = Arc::new(Recorder {
        app: options.app_name,
        version: options.app_version,
        run: uuid::Uuid::new_v4().to_string(),
        dir: dir.clone(),
        usage: AtomicBool::new(options.usage_enabled),
        crashes: AtomicBool::new(options.crash_enabled),
        queue,
    });

    let sink = EventSink::new(dir.join("events.jsonl"), ROTATE_AT_BYTES);
    let spawned = std::thread::Builder::new()
        .name("telemetry".into())
        .spawn(move || sink.drain(pending));
    if let Err(err) = spawned {
        warn!("telemetry writer not started: {err}");
    }
    chain_panic_hook(Arc::clone(&recorder));

    Arc::clone(RECORDER.get_or_init(|| recorder))
}

/// `TRYIT_TELEMETRY` enables usage events, `TRYIT_TELEMETRY_CRASH` crash reports.
pub fn init_with_env(app_name: &'static str, app_version: &'static str, root: PathBuf) {
    init(TelemetryOptions {
        app_name,
        app_version,
        usage_enabled: env_flag("TRYIT_TELEMETRY"),
        crash_enabled: env_flag("TRYIT_TELEMETRY_CRASH"),
        root,
    });
}

/// Records a usage event if telemetry was initialised and is enabled.
pub fn event(name: &str, fields: &[(&str, &str)]) {
    if let Some(recorder) = RECORDER.get() {
        recorder.usage(name, fields);
    }
}

impl Recorder {
    fn envelope(&self, record: Record) -> Option<String> {
        let envelope = Envelope {
            ts: now_millis(),
            app: self.app,
            version: self.version,
            run: &self.run,
            record,
        };
        serde_json::to_string(&envelope).ok()
    }

    fn usage(&self, name: &str, fields: &[(&str, &str)]) {
        if !self.usage.load(Ordering::Relaxed) {
            return;
        }
        let fields = fields
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let Some(line) = self.envelope(Record::Usage {
            name: name.to_string(),
            fields,
        }) else {
            return;
        };
        if let Err(TrySendError::Full(_)) = self.queue.try_send(line) {
            debug!("telemetry queue full, dropping {name}");
        }
    }

    fn crash(&self, message: String, location: Option<String>) {
        if !self.crashes.load(Ordering::Relaxed) {
            return;
        }
        let Some(body) = self.envelope(Record::Crash { message, location }) else {
            return;
        };
        let dir = self.dir.join("crashes");
        let path = dir.join(format!("{}.json", self.run));
        let written = fs::create_dir_all(&dir).and_then(|_| fs::write(&path, body));
        if let Err(err) = written {
            warn!("crash report {} not written: {err}", path.display());
        }
    }
}

fn chain_panic_hook(recorder: Arc<Recorder>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".into());
        let location = info.location().map(|l| l.to_string());
        recorder.crash(message, location);
        previous(info);
    }));
}

/// Append-only JSON-lines file that moves itself to `<name>.old` once it
/// reaches `limit` bytes.
struct EventSink {
    path: PathBuf,
    limit: u64,
}

impl EventSink {
    fn new(path: PathBuf, limit: u64) -> Self {
        Self { path, limit }
    }

    fn drain(self, pending: Receiver<String>) {
        for line in pending {
            if let Err(err) = self.append(&line) {
                warn!("telemetry event not written to {}: {err}", self.path.display());
            }
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        self.rotate()?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut out = BufWriter::new(file);
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()
    }

    fn rotate(&self) -> io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        if size < self.limit {
            return Ok(());
        }
        fs::rename(&self.path, old_path(&self.path))
    }
}

fn old_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".old");
    path.with_file_name(name)
}

/// Measures one pipeline stage and reports `stage.done` or `stage.failed`.
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        event("stage.start", &[("stage", stage)]);
        Self {
            stage,
            started: Instant::now(),
        }
    }

    pub fn finish<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        let elapsed = self.started.elapsed().as_millis().to_string();
        let error = result.as_ref().err().map(|err| err.to_string());
        let mut fields = vec![("stage", self.stage), ("elapsed_ms", elapsed.as_str())];
        match &error {
            Some(error) => {
                fields.push(("error", error.as_str()));
                event("stage.failed", &fields);
            }
            None => event("stage.done", &fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_line() -> String {
        let envelope = Envelope {
            ts: 1,
            app: "tryit",
            version: "0.1.0",
            run: "r",
            record: Record::Usage {
                name: "stage.done".into(),
                fields: BTreeMap::from([("stage".to_string(), "boot".to_string())]),
            },
        };
        serde_json::to_string(&envelope).unwrap()
    }

    #[test]
    fn usage_records_are_flat_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = EventSink::new(dir.path().join("telemetry").join("events.jsonl"), 1 << 20);
        sink.append(&usage_line()).unwrap();
        sink.append(&usage_line()).unwrap();

        let contents = fs::read_to_string(&sink.path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["kind"], "usage");
        assert_eq!(parsed["name"], "stage.done");
        assert_eq!(parsed["fields"]["stage"], "boot");
    }

    #[test]
    fn full_log_moves_aside_before_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(&path, vec![b'x'; 16]).unwrap();
        let sink = EventSink::new(path.clone(), 16);

        sink.append("{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}\n");
        assert_eq!(fs::read(dir.path().join("events.jsonl.old")).unwrap().len(), 16);
    }

    #[test]
    fn crash_records_omit_missing_location() {
        let record = Record::Crash {
            message: "boom".into(),
            location: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "crash");
        assert!(value.get("location").is_none());
    }
}
