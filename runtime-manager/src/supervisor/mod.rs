//! Engine process supervision.
//!
//! [`ProcessSupervisor`] owns at most one engine process at a time. Starting
//! a new process first stops the old one and waits for its exit. Output is
//! drained for the whole life of the process, and a monitor task records the
//! exit and moves the state to `Idle` or `Crashed`.

mod config_file;
mod paths;

pub use config_file::{apply_patch, CustomConfigPatch};
pub use paths::binary_path;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Output lines kept for startup error reports.
const OUTPUT_TAIL_LINES: usize = 40;

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubprocessState {
    Idle,
    Starting,
    Running,
    Stopping,
    Crashed,
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Whether the supervisor asked for the exit.
    pub requested: bool,
}

impl ExitInfo {
    pub fn is_clean(&self) -> bool {
        self.requested || self.code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Engine name, used in logs.
    pub name: String,
    pub binary: PathBuf,
    /// JSON config rewritten with the model path before every spawn.
    pub config_path: PathBuf,
    /// Flag used to pass `config_path` to the binary. `None` = not passed.
    pub config_arg: Option<String>,
    /// Arguments placed before the per-model arguments.
    pub leading_args: Vec<String>,
    /// Output substrings (case-insensitive) that mark the process ready.
    /// Empty = ready as soon as it is spawned.
    pub readiness_markers: Vec<String>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Forward process output at info level instead of debug.
    pub log_output: bool,
}

impl SupervisorConfig {
    pub fn new(name: impl Into<String>, binary: PathBuf, config_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            binary,
            config_path,
            config_arg: None,
            leading_args: Vec::new(),
            readiness_markers: Vec::new(),
            startup_timeout: Duration::from_secs(180),
            shutdown_timeout: Duration::from_secs(5),
            log_output: false,
        }
    }
}

/// What to run.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_id: String,
    pub model_path: PathBuf,
    /// Arguments appended after the leading arguments.
    pub args: Vec<String>,
    /// Where the process will serve, if it serves at all.
    pub endpoint: Option<String>,
}

/// Caller's view of a started process.
#[derive(Debug, Clone)]
pub struct SubprocessHandle {
    pub model_id: String,
    pub model_path: PathBuf,
    pub pid: Option<u32>,
    pub endpoint: Option<String>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl SubprocessHandle {
    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    /// Wait until the process has exited.
    pub async fn wait(&self) -> ExitInfo {
        let mut exit = self.exit.clone();
        let lost = ExitInfo {
            code: None,
            requested: false,
        };
        let info = match exit.wait_for(Option::is_some).await {
            Ok(info) => info.unwrap_or(lost),
            // Monitor dropped without publishing; the child went with it.
            Err(_) => lost,
        };
        info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(ExitInfo),
    NothingToStop,
}

struct RunningProcess {
    handle: SubprocessHandle,
    stop_tx: Option<oneshot::Sender<()>>,
}

enum Readiness {
    Ready,
    Exited(ExitInfo),
    TimedOut,
    ShutDown,
}

/// Owner of the single engine process.
///
/// Construct one per engine binary and share it by `Arc`. Call
/// [`ProcessSupervisor::shutdown`] on application exit.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    current: Mutex<Option<RunningProcess>>,
    /// Mirror of `current`, only written while `current` is locked.
    serving: watch::Sender<Option<SubprocessHandle>>,
    state: Arc<watch::Sender<SubprocessState>>,
    shutdown: CancellationToken,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SubprocessState::Idle);
        Self {
            config,
            current: Mutex::new(None),
            serving: watch::channel(None).0,
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SubprocessState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubprocessState> {
        self.state.subscribe()
    }

    /// Handle of the live process, if any.
    pub async fn current(&self) -> Option<SubprocessHandle> {
        let current = self.current.lock().await;
        current
            .as_ref()
            .filter(|running| running.handle.is_alive())
            .map(|running| running.handle.clone())
    }

    /// Same as [`ProcessSupervisor::current`], without waiting for a start
    /// or stop in progress.
    pub fn serving(&self) -> Option<SubprocessHandle> {
        self.serving
            .borrow()
            .as_ref()
            .filter(|handle| handle.is_alive())
            .cloned()
    }

    /// Start the engine for `model`, replacing any live process.
    ///
    /// Returns once the process reports readiness. Spawn failures leave the
    /// supervisor `Idle`.
    pub async fn start(&self, model: ModelConfig) -> Result<SubprocessHandle> {
        if self.shutdown.is_cancelled() {
            return Err(Error::EngineNotAvailable(format!(
                "{} supervisor is shut down",
                self.config.name
            )));
        }

        let mut current = self.current.lock().await;
        self.serving.send_replace(None);

        if let Some(previous) = current.take() {
            if previous.handle.is_alive() {
                tracing::warn!(
                    engine = %self.config.name,
                    "Engine process for {} (pid {:?}) still running, stopping it before starting {}",
                    previous.handle.model_id,
                    previous.handle.pid,
                    model.model_id
                );
                let exit = self.terminate(previous).await;
                tracing::debug!(engine = %self.config.name, "Previous engine process exited: {:?}", exit);
            }
        }

        apply_patch(
            &self.config.config_path,
            &CustomConfigPatch::model_path(&model.model_path),
        )?;

        let mut child = self.spawn(&model)?;
        let pid = child.id();

        let sink = OutputSink {
            engine: self.config.name.clone(),
            markers: self
                .config
                .readiness_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            ready: Arc::new(Notify::new()),
            tail: Arc::new(OutputTail::default()),
            verbose: self.config.log_output,
        };
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stdout, "stdout", sink.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stderr, "stderr", sink.clone()));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(monitor(
            child,
            stop_rx,
            exit_tx,
            self.state.clone(),
            self.config.name.clone(),
            model.model_id.clone(),
            self.config.shutdown_timeout,
        ));

        let handle = SubprocessHandle {
            model_id: model.model_id.clone(),
            model_path: model.model_path.clone(),
            pid,
            endpoint: model.endpoint.clone(),
            exit: exit_rx,
        };
        let running = RunningProcess {
            handle: handle.clone(),
            stop_tx: Some(stop_tx),
        };

        tracing::info!(
            engine = %self.config.name,
            "Spawned engine process for {} (pid: {:?})",
            model.model_id,
            pid
        );

        if sink.markers.is_empty() {
            self.mark_running();
        } else {
            match self.await_readiness(&handle, &sink.ready).await {
                Readiness::Ready => self.mark_running(),
                Readiness::Exited(exit) => {
                    return Err(Error::LoadFailed(format!(
                        "{} exited during startup of {} (code {:?})\n{}",
                        self.config.name,
                        model.model_id,
                        exit.code,
                        sink.tail.snapshot()
                    )));
                }
                Readiness::TimedOut => {
                    self.terminate(running).await;
                    return Err(Error::LoadFailed(format!(
                        "{} did not become ready for {} within {:?}\n{}",
                        self.config.name,
                        model.model_id,
                        self.config.startup_timeout,
                        sink.tail.snapshot()
                    )));
                }
                Readiness::ShutDown => {
                    self.terminate(running).await;
                    return Err(Error::EngineNotAvailable(format!(
                        "{} supervisor shut down during startup",
                        self.config.name
                    )));
                }
            }
        }

        tracing::info!(engine = %self.config.name, "Engine ready for {}", model.model_id);
        *current = Some(running);
        self.serving.send_replace(Some(handle.clone()));
        Ok(handle)
    }

    /// Stop the live process. Calling this with nothing running is a no-op.
    pub async fn stop(&self) -> StopOutcome {
        let mut current = self.current.lock().await;
        self.serving.send_replace(None);
        match current.take() {
            Some(running) if running.handle.is_alive() => {
                tracing::info!(
                    engine = %self.config.name,
                    "Stopping engine process for {}",
                    running.handle.model_id
                );
                StopOutcome::Stopped(self.terminate(running).await)
            }
            _ => {
                tracing::debug!(engine = %self.config.name, "No engine process to stop");
                StopOutcome::NothingToStop
            }
        }
    }

    /// Process-exit cleanup hook. Aborts a pending startup, kills any live
    /// process and refuses later starts. Never fails.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        match self.stop().await {
            StopOutcome::Stopped(exit) => {
                tracing::info!(engine = %self.config.name, "Engine process stopped on shutdown: {:?}", exit)
            }
            StopOutcome::NothingToStop => {}
        }
    }

    fn spawn(&self, model: &ModelConfig) -> Result<Child> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.leading_args);
        if let Some(ref flag) = self.config.config_arg {
            cmd.arg(flag).arg(&self.config.config_path);
        }
        cmd.args(&model.args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.state.send_replace(SubprocessState::Starting);
        cmd.spawn().map_err(|e| {
            self.state.send_replace(SubprocessState::Idle);
            Error::Spawn(format!(
                "{} for {}: {}",
                self.config.binary.display(),
                model.model_id,
                e
            ))
        })
    }

    async fn await_readiness(&self, handle: &SubprocessHandle, ready: &Notify) -> Readiness {
        tokio::select! {
            _ = ready.notified() => Readiness::Ready,
            exit = handle.wait() => Readiness::Exited(exit),
            _ = tokio::time::sleep(self.config.startup_timeout) => Readiness::TimedOut,
            _ = self.shutdown.cancelled() => Readiness::ShutDown,
        }
    }

    fn mark_running(&self) {
        self.state.send_if_modified(|state| {
            if *state == SubprocessState::Starting {
                *state = SubprocessState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Ask the monitor to stop the process and wait for the exit.
    async fn terminate(&self, mut running: RunningProcess) -> ExitInfo {
        self.state.send_if_modified(|state| {
            if matches!(*state, SubprocessState::Starting | SubprocessState::Running) {
                *state = SubprocessState::Stopping;
                true
            } else {
                false
            }
        });
        if let Some(stop_tx) = running.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        running.handle.wait().await
    }
}

/// Owns the child until it exits, then publishes the exit.
///
/// The state is updated before the exit is published, so anyone who has
/// observed the exit also sees the final state.
async fn monitor(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    state: Arc<watch::Sender<SubprocessState>>,
    engine: String,
    model_id: String,
    shutdown_timeout: Duration,
) {
    // A dropped stop sender also stops the process.
    let (status, requested) = tokio::select! {
        status = child.wait() => (status, false),
        _ = stop_rx => (terminate_child(&mut child, shutdown_timeout, &engine).await, true),
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(engine = %engine, "Error waiting for engine process: {}", e);
            None
        }
    };
    let exit = ExitInfo { code, requested };

    if exit.is_clean() {
        tracing::info!(engine = %engine, "Engine process for {} exited ({:?})", model_id, code);
        state.send_replace(SubprocessState::Idle);
    } else {
        tracing::error!(
            engine = %engine,
            "Engine process for {} crashed with exit code {:?}",
            model_id,
            code
        );
        state.send_replace(SubprocessState::Crashed);
    }
    exit_tx.send_replace(Some(exit));
}

/// SIGTERM, then SIGKILL after `timeout`.
async fn terminate_child(
    child: &mut Child,
    timeout: Duration,
    engine: &str,
) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            tracing::debug!(engine = %engine, "Sending SIGTERM to pid {}", pid);
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status,
        Err(_timeout) => {
            tracing::warn!(engine = %engine, "Engine process didn't stop gracefully, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[derive(Clone)]
struct OutputSink {
    engine: String,
    markers: Vec<String>,
    ready: Arc<Notify>,
    tail: Arc<OutputTail>,
    verbose: bool,
}

#[derive(Default)]
struct OutputTail(StdMutex<VecDeque<String>>);

impl OutputTail {
    fn push(&self, line: &str) {
        let mut lines = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == OUTPUT_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    fn snapshot(&self) -> String {
        let lines = self.0.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Forward every output line to tracing until EOF. Runs for the life of the
/// process so the child never blocks on a full pipe.
async fn drain_output<R: AsyncRead + Unpin>(reader: R, stream: &'static str, sink: OutputSink) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if sink.verbose {
                    tracing::info!(engine = %sink.engine, stream, "{}", line);
                } else {
                    tracing::debug!(engine = %sink.engine, stream, "{}", line);
                }
                sink.tail.push(line);

                if !sink.markers.is_empty() {
                    let lower = line.to_lowercase();
                    if sink.markers.iter().any(|m| lower.contains(m.as_str())) {
                        sink.ready.notify_one();
                    }
                }
            }
            Err(e) => {
                tracing::warn!(engine = %sink.engine, stream, "Error reading engine output: {}", e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::path::Path;

    fn sh_config(dir: &Path, script: &str) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(
            "test-engine",
            PathBuf::from("/bin/sh"),
            dir.join("engine.json"),
        );
        config.leading_args = vec!["-c".to_string(), script.to_string()];
        config.shutdown_timeout = Duration::from_secs(2);
        config
    }

    fn model(id: &str) -> ModelConfig {
        ModelConfig {
            model_id: id.to_string(),
            model_path: PathBuf::from(format!("/models/{}.gguf", id)),
            args: vec![],
            endpoint: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_idle() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::new(
            "test-engine",
            PathBuf::from("/nonexistent/engine-binary"),
            dir.path().join("engine.json"),
        );
        let supervisor = ProcessSupervisor::new(config);

        let result = supervisor.start(model("a")).await;

        assert!(matches!(result, Err(Error::Spawn(_))));
        assert_eq!(supervisor.state(), SubprocessState::Idle);
        assert!(supervisor.current().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_process_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "exec sleep 30"));

        assert_eq!(supervisor.stop().await, StopOutcome::NothingToStop);
        assert_eq!(supervisor.stop().await, StopOutcome::NothingToStop);
        assert_eq!(supervisor.state(), SubprocessState::Idle);
    }

    #[tokio::test]
    async fn test_start_merges_model_path_into_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("engine.json");
        std::fs::write(&config_path, r#"{"other_setting": "x"}"#).unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "exec sleep 30"));

        supervisor.start(model("a")).await.unwrap();

        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(value["other_setting"], "x");
        assert_eq!(value["custom_config"]["model_path"], "/models/a.gguf");

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_start_replaces_running_process_after_its_exit() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "exec sleep 30"));

        let first = supervisor.start(model("a")).await.unwrap();
        assert_eq!(supervisor.state(), SubprocessState::Running);
        assert!(first.is_alive());

        let second = supervisor.start(model("b")).await.unwrap();

        let first_exit = first.exit_info().expect("old process exit observed");
        assert!(first_exit.requested);
        assert!(second.is_alive());
        assert_ne!(first.pid, second.pid);
        assert_eq!(supervisor.current().await.unwrap().model_id, "b");
        assert_eq!(supervisor.state(), SubprocessState::Running);

        let outcome = supervisor.stop().await;
        assert!(matches!(outcome, StopOutcome::Stopped(exit) if exit.requested));
        assert_eq!(supervisor.state(), SubprocessState::Idle);
        assert!(!second.is_alive());
    }

    #[tokio::test]
    async fn test_serving_endpoint_follows_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "exec sleep 30"));
        assert!(supervisor.serving().is_none());

        let mut a = model("a");
        a.endpoint = Some("http://127.0.0.1:9001".to_string());
        supervisor.start(a).await.unwrap();
        assert_eq!(
            supervisor.serving().unwrap().endpoint.as_deref(),
            Some("http://127.0.0.1:9001")
        );

        let mut b = model("b");
        b.endpoint = Some("http://127.0.0.1:9002".to_string());
        let second = supervisor.start(b).await.unwrap();
        let serving = supervisor.serving().unwrap();
        assert_eq!(serving.model_id, "b");
        assert_eq!(serving.pid, second.pid);
        assert_eq!(serving.endpoint.as_deref(), Some("http://127.0.0.1:9002"));

        supervisor.stop().await;
        assert!(supervisor.serving().is_none());
    }

    #[tokio::test]
    async fn test_failed_start_clears_serving() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh_config(dir.path(), "exec sleep 30");
        config.readiness_markers = vec!["never printed".to_string()];
        config.startup_timeout = Duration::from_millis(200);
        let supervisor = ProcessSupervisor::new(config);

        let result = supervisor.start(model("a")).await;

        assert!(result.is_err());
        assert!(supervisor.serving().is_none());
    }

    #[tokio::test]
    async fn test_readiness_marker_moves_to_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh_config(
            dir.path(),
            "echo 'main: server is listening on http://127.0.0.1:3930' >&2; exec sleep 30",
        );
        config.readiness_markers = crate::config::default_readiness_markers();
        let supervisor = ProcessSupervisor::new(config);

        supervisor.start(model("a")).await.unwrap();
        assert_eq!(supervisor.state(), SubprocessState::Running);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_exit_before_ready_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh_config(dir.path(), "echo 'failed to load model' >&2; exit 3");
        config.readiness_markers = crate::config::default_readiness_markers();
        let supervisor = ProcessSupervisor::new(config);

        let result = supervisor.start(model("a")).await;

        assert!(matches!(result, Err(Error::LoadFailed(_))));
        assert_eq!(supervisor.state(), SubprocessState::Crashed);
        assert!(supervisor.current().await.is_none());
    }

    #[tokio::test]
    async fn test_startup_timeout_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh_config(dir.path(), "exec sleep 30");
        config.readiness_markers = vec!["never printed".to_string()];
        config.startup_timeout = Duration::from_millis(200);
        let supervisor = ProcessSupervisor::new(config);

        let result = supervisor.start(model("a")).await;

        match result {
            Err(Error::LoadFailed(msg)) => assert!(msg.contains("did not become ready")),
            other => panic!("Expected LoadFailed, got {:?}", other.map(|h| h.model_id)),
        }
        assert_eq!(supervisor.state(), SubprocessState::Idle);
    }

    #[tokio::test]
    async fn test_unexpected_nonzero_exit_is_crash() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "sleep 0.2; exit 7"));

        let handle = supervisor.start(model("a")).await.unwrap();
        let exit = handle.wait().await;

        assert_eq!(exit.code, Some(7));
        assert!(!exit.requested);
        assert_eq!(supervisor.state(), SubprocessState::Crashed);
        assert_eq!(supervisor.stop().await, StopOutcome::NothingToStop);
    }

    #[tokio::test]
    async fn test_clean_exit_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "exit 0"));

        let handle = supervisor.start(model("a")).await.unwrap();
        let exit = handle.wait().await;

        assert_eq!(exit.code, Some(0));
        assert_eq!(supervisor.state(), SubprocessState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_kills_process_and_refuses_new_starts() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(sh_config(dir.path(), "exec sleep 30"));

        let handle = supervisor.start(model("a")).await.unwrap();
        supervisor.shutdown().await;

        assert!(!handle.is_alive());
        assert_eq!(supervisor.state(), SubprocessState::Idle);
        assert!(matches!(
            supervisor.start(model("b")).await,
            Err(Error::EngineNotAvailable(_))
        ));
    }
}
