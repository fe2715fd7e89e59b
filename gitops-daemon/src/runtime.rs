use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinError;

use gitops_compose::{ComposeExecutor, Deployer};
use gitops_core::{DaemonConfig, LogFormat};
use gitops_sync::{OpenRefStore, TrackerSettings};

use crate::cycle::{CycleRunner, TriggerSource};
use crate::error::{io_err, DaemonError};
use crate::paths::resolve_socket;
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_RECONCILE, CMD_STATUS, CMD_STOP};
use crate::reconcile::{CycleReport, Reconciler};
use crate::schedule::CycleSchedule;

/// Static facts about a running daemon, reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub schedule: String,
    pub repository: PathBuf,
    pub remote: String,
    pub socket: PathBuf,
}

type ProductionRunner = CycleRunner<TrackerSettings, ComposeExecutor>;

fn build_runner(config: &DaemonConfig) -> ProductionRunner {
    CycleRunner::new(Reconciler::new(
        TrackerSettings::from_config(config),
        ComposeExecutor::from_config(config),
    ))
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon runtime: scheduler, control socket and signal handling.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    let schedule = CycleSchedule::parse(&config.schedule)?;
    let first_run = schedule.upcoming(&Utc::now())?;
    let socket = resolve_socket(&config)?;
    ensure_socket_dir(&socket)?;

    let runner = Arc::new(build_runner(&config));
    let info = DaemonInfo {
        pid: std::process::id(),
        started_at: Utc::now(),
        schedule: schedule.expression().to_string(),
        repository: config.repository_path.clone(),
        remote: config.remote.clone(),
        socket: socket.clone(),
    };

    tracing::info!(
        schedule = %info.schedule,
        repository = %info.repository.display(),
        remote = %info.remote,
        workdir = %config.deploy_dir().display(),
        compose = %config.compose_command,
        socket = %socket.display(),
        first_run = %first_run,
        "gitops daemon started",
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            let result = scheduler_task(schedule, runner, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let runner = Arc::clone(&runner);
        let info = info.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(socket, runner, info, shutdown.clone(), shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = shutdown_signal() => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("signal handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, socket_result, signal_result) =
        tokio::join!(scheduler_handle, socket_handle, signal_handle);

    if runner.lock().is_busy() {
        tracing::info!(phase = %runner.phase(), "waiting for the running cycle to finish");
    }
    let _drained = runner.lock().acquire().await;

    task_outcome("scheduler", scheduler_result)?;
    task_outcome("control socket", socket_result)?;
    task_outcome("signal handler", signal_result)?;
    tracing::info!("gitops daemon stopped");
    Ok(())
}

/// `run_once` on a fresh runtime, for callers without one.
pub fn run_once_blocking(config: &DaemonConfig) -> Result<CycleReport, DaemonError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run_once(config))
}

/// Run a single cycle in the foreground and return its outcome.
pub async fn run_once(config: &DaemonConfig) -> Result<CycleReport, DaemonError> {
    let runner = build_runner(config);
    let guard = runner
        .begin(TriggerSource::Once)
        .await
        .ok_or_else(|| DaemonError::Protocol("run lock unexpectedly held".to_string()))?;
    let run = runner.run(guard, TriggerSource::Once).await;
    run.result.map_err(DaemonError::from)
}

/// Next fire time, never earlier than one already fired.
fn next_fire(
    schedule: &CycleSchedule,
    now: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let base = match last_fired {
        Some(fired) if fired > now => fired,
        _ => now,
    };
    schedule.next_after(&base)
}

async fn scheduler_task<O, D>(
    schedule: CycleSchedule,
    runner: Arc<CycleRunner<O, D>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    O: OpenRefStore,
    D: Deployer + 'static,
{
    let mut last_fired = None;

    loop {
        let now = Utc::now();
        let Some(next) = next_fire(&schedule, now, last_fired) else {
            tracing::warn!(
                schedule = %schedule.expression(),
                "schedule has no further fire times; only manual triggers remain",
            );
            runner.set_next_run(None).await;
            let _ = shutdown_rx.recv().await;
            return Ok(());
        };
        runner.set_next_run(Some(next)).await;
        tracing::debug!(next_run_at = %next, "next cycle scheduled");

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(CycleSchedule::delay_until(now, next)) => {}
        }
        last_fired = Some(next);

        if let Some(guard) = runner.begin(TriggerSource::Schedule).await {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner.run(guard, TriggerSource::Schedule).await;
            });
        }
    }

    runner.set_next_run(None).await;
    Ok(())
}

async fn socket_server_task<O, D>(
    socket: PathBuf,
    runner: Arc<CycleRunner<O, D>>,
    info: DaemonInfo,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    O: OpenRefStore,
    D: Deployer + 'static,
{
    clear_stale_socket(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    restrict_to_owner(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let runner = Arc::clone(&runner);
                let info = info.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, runner, info, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client<O, D>(
    stream: UnixStream,
    runner: Arc<CycleRunner<O, D>>,
    info: DaemonInfo,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError>
where
    O: OpenRefStore,
    D: Deployer + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                send_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            CMD_STATUS => DaemonResponse::ok(build_status_payload(&runner, &info).await),
            CMD_RECONCILE => match trigger_cycle(&runner).await {
                Ok(Some(record)) => DaemonResponse::ok(record),
                Ok(None) => DaemonResponse::error(
                    "a reconciliation cycle is already running; trigger skipped",
                ),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_STOP => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        send_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }

    Ok(())
}

/// Run a manual cycle in its own task so a disconnecting client cannot cancel it.
async fn trigger_cycle<O, D>(runner: &Arc<CycleRunner<O, D>>) -> Result<Option<Value>, DaemonError>
where
    O: OpenRefStore,
    D: Deployer + 'static,
{
    let Some(guard) = runner.begin(TriggerSource::Manual).await else {
        return Ok(None);
    };

    let (tx, rx) = oneshot::channel();
    let runner = Arc::clone(runner);
    tokio::spawn(async move {
        let run = runner.run(guard, TriggerSource::Manual).await;
        let _ = tx.send(run.record);
    });

    let record = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle result"))?;
    Ok(Some(serde_json::to_value(record)?))
}

async fn build_status_payload<O, D>(runner: &CycleRunner<O, D>, info: &DaemonInfo) -> Value
where
    O: OpenRefStore,
    D: Deployer,
{
    let stats = runner.stats().await;
    json!({
        "running": true,
        "pid": info.pid,
        "started_at": info.started_at,
        "schedule": info.schedule,
        "repository": info.repository.display().to_string(),
        "remote": info.remote,
        "socket": info.socket.display().to_string(),
        "phase": runner.phase(),
        "busy": runner.lock().is_busy(),
        "cycles_started": stats.cycles_started,
        "ticks_skipped": stats.ticks_skipped,
        "next_run_at": stats.next_run_at,
        "last_cycle": stats.last_cycle,
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}

/// Clear the way for `bind`. A socket file that still accepts connections
/// belongs to a live daemon; one that refuses them was left by a daemon that
/// died without cleaning up.
fn clear_stale_socket(socket: &Path) -> Result<(), DaemonError> {
    match StdUnixStream::connect(socket) {
        Ok(_) => Err(DaemonError::AlreadyRunning {
            socket: socket.to_path_buf(),
        }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "control socket left behind by a previous daemon; replacing it",
            );
            fs::remove_file(socket).or_else(|err| match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(io_err(socket, err)),
            })
        }
    }
}

fn ensure_socket_dir(socket: &Path) -> Result<(), DaemonError> {
    match socket.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
        }
        _ => Ok(()),
    }
}

/// Replies are a single JSON line written in one call.
async fn send_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|e| io_err("control socket reply", e))
}

/// Surface a daemon task's own error, or why it never produced one.
fn task_outcome(
    task: &'static str,
    joined: Result<Result<(), DaemonError>, JoinError>,
) -> Result<(), DaemonError> {
    joined.unwrap_or_else(|err| {
        let reason = if err.is_panic() {
            "panicked".to_string()
        } else {
            err.to_string()
        };
        Err(DaemonError::TaskFailed { task, reason })
    })
}

/// Install the global subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
    };
}

/// Anyone who can connect can trigger a deployment, so only the daemon's
/// own user may.
fn restrict_to_owner(socket: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(socket, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::os::unix::net::UnixListener as StdUnixListener;
    use tempfile::TempDir;

    use crate::protocol::{request_reconcile, request_status, request_stop};
    use crate::testing::{c1, c2, FakeDeployer, FakeRepo};

    fn info(socket: &Path) -> DaemonInfo {
        DaemonInfo {
            pid: 42,
            started_at: Utc::now(),
            schedule: "* * * * *".to_string(),
            repository: PathBuf::from("/srv/app"),
            remote: "origin".to_string(),
            socket: socket.to_path_buf(),
        }
    }

    async fn wait_for_socket(socket: &Path) {
        for _ in 0..100 {
            if socket.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("socket never appeared at {}", socket.display());
    }

    #[test]
    fn next_fire_never_repeats_a_fired_slot() {
        let schedule = CycleSchedule::parse("* * * * *").unwrap();
        let fired = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        // Clock reads slightly before the slot that just fired.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 59, 59).unwrap();

        let next = next_fire(&schedule, now, Some(fired)).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn next_fire_without_history_uses_now() {
        let schedule = CycleSchedule::parse("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 2, 30).unwrap();

        let next = next_fire(&schedule, now, None).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn stale_socket_file_is_removed() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").expect("stale file");

        clear_stale_socket(&socket).expect("clear");

        assert!(!socket.exists());
    }

    #[test]
    fn live_daemon_socket_is_not_taken_over() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        let _live = StdUnixListener::bind(&socket).expect("bind");

        let err = clear_stale_socket(&socket).unwrap_err();

        assert!(matches!(err, DaemonError::AlreadyRunning { .. }), "got: {err}");
        assert!(socket.exists());
    }

    #[tokio::test]
    async fn panicked_task_is_reported_by_name() {
        let task: tokio::task::JoinHandle<Result<(), DaemonError>> =
            tokio::spawn(async { panic!("listener vanished") });

        match task_outcome("control socket", task.await).unwrap_err() {
            DaemonError::TaskFailed { task, reason } => {
                assert_eq!(task, "control socket");
                assert_eq!(reason, "panicked");
            }
            other => panic!("expected TaskFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn schedule_without_future_fires_fails_before_binding() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        let config = DaemonConfig {
            schedule: "0 0 0 1 1 * 2020".to_string(),
            socket_path: Some(socket.clone()),
            ..DaemonConfig::default()
        };

        let err = run(config).await.unwrap_err();

        assert!(matches!(err, DaemonError::ScheduleExhausted { .. }), "got: {err}");
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn exhausted_schedule_waits_for_shutdown() {
        let runner = Arc::new(CycleRunner::new(Reconciler::new(
            FakeRepo::new(c1(), c1()),
            FakeDeployer::succeeding(),
        )));
        let schedule = CycleSchedule::parse("0 0 0 1 1 * 2020").unwrap();
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let task = tokio::spawn(scheduler_task(
            schedule,
            Arc::clone(&runner),
            shutdown_tx.subscribe(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!task.is_finished(), "daemon keeps serving manual triggers");

        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("scheduler result");
        assert_eq!(runner.stats().await.cycles_started, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_serves_status_reconcile_and_stop() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        let repo = FakeRepo::new(c1(), c2());
        let deployer = FakeDeployer::succeeding();
        let runner = Arc::new(CycleRunner::new(Reconciler::new(repo.clone(), deployer.clone())));
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let server = tokio::spawn(socket_server_task(
            socket.clone(),
            Arc::clone(&runner),
            info(&socket),
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));
        wait_for_socket(&socket).await;

        let client_socket = socket.clone();
        let status = tokio::task::spawn_blocking(move || request_status(&client_socket))
            .await
            .expect("join")
            .expect("status");
        assert_eq!(status["running"], json!(true));
        assert_eq!(status["phase"], json!("idle"));
        assert_eq!(status["cycles_started"], json!(0));

        let client_socket = socket.clone();
        let record = tokio::task::spawn_blocking(move || request_reconcile(&client_socket))
            .await
            .expect("join")
            .expect("reconcile");
        assert_eq!(record["status"], json!("deployed"));
        assert_eq!(record["source"], json!("manual"));
        assert_eq!(repo.head(), c2());
        assert_eq!(deployer.calls(), vec![true]);

        let client_socket = socket.clone();
        tokio::task::spawn_blocking(move || request_stop(&client_socket))
            .await
            .expect("join")
            .expect("stop");

        server.await.expect("join").expect("server result");
        assert!(!socket.exists(), "socket removed on shutdown");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_trigger_while_busy_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("daemon.sock");
        let runner = Arc::new(CycleRunner::new(Reconciler::new(
            FakeRepo::new(c1(), c1()),
            FakeDeployer::succeeding(),
        )));
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let server = tokio::spawn(socket_server_task(
            socket.clone(),
            Arc::clone(&runner),
            info(&socket),
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));
        wait_for_socket(&socket).await;

        let held = runner.lock().try_acquire().expect("hold the lock");
        let client_socket = socket.clone();
        let err = tokio::task::spawn_blocking(move || request_reconcile(&client_socket))
            .await
            .expect("join")
            .unwrap_err();
        assert!(err.to_string().contains("already running"), "got: {err}");
        drop(held);

        assert_eq!(runner.stats().await.ticks_skipped, 1);

        let _ = shutdown_tx.send(());
        server.await.expect("join").expect("server result");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn ticks_during_a_slow_cycle_are_skipped() {
        let deployer = FakeDeployer::gated();
        let runner = Arc::new(CycleRunner::new(Reconciler::new(
            FakeRepo::new(c1(), c1()),
            deployer.clone(),
        )));
        let schedule = CycleSchedule::parse("* * * * * *").unwrap();
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let task = tokio::spawn(scheduler_task(
            schedule,
            Arc::clone(&runner),
            shutdown_tx.subscribe(),
        ));
        while runner.stats().await.ticks_skipped < 3 {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }

        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("scheduler result");
        deployer.release();
        let _idle = runner.lock().acquire().await;

        let stats = runner.stats().await;
        assert_eq!(stats.cycles_started, 1, "skipped ticks are not queued");
        assert_eq!(deployer.calls(), vec![true]);
        assert_eq!(stats.last_cycle.map(|r| r.source), Some(TriggerSource::Schedule));
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let runner = Arc::new(CycleRunner::new(Reconciler::new(
            FakeRepo::new(c1(), c1()),
            FakeDeployer::succeeding(),
        )));
        let schedule = CycleSchedule::parse("0 0 1 1 *").unwrap();
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let task = tokio::spawn(scheduler_task(
            schedule,
            Arc::clone(&runner),
            shutdown_tx.subscribe(),
        ));
        for _ in 0..100 {
            if runner.stats().await.next_run_at.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(runner.stats().await.next_run_at.is_some());

        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("scheduler result");

        let stats = runner.stats().await;
        assert_eq!(stats.cycles_started, 0);
        assert!(stats.next_run_at.is_none());
    }
}
