//! Daemon runtime: socket server, notification processor, signal handling.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use accord_core::catalog;
use accord_engine::{ChangeNotice, DispatchOutcome, Dispatcher, Outcome, SourceFailure};
use accord_store::{SqliteStore, Store};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path, store_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

struct NotifyJob {
    notice: ChangeNotice,
    respond_to: oneshot::Sender<Result<Value, String>>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Run the daemon runtime.
///
/// The catalog and store are opened once; notifications are funnelled into a
/// single processor so engine runs never interleave.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let catalog = catalog::load_at(&home)?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&store_path(&home))?);
    let dispatcher = Arc::new(Dispatcher::new(&catalog, store.clone())?);
    let started_at = Instant::now();

    let (notify_tx, notify_rx) = mpsc::channel::<NotifyJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = notify_processor_task(dispatcher, notify_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                store,
                notify_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at,
            )
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
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (processor_result, socket_result, signal_result) =
        tokio::join!(processor_handle, socket_handle, signal_handle);

    handle_join("notify_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

fn handle_join(
    name: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!("{name} task died: {err}"))),
    }
}

async fn notify_processor_task(
    dispatcher: Arc<Dispatcher>,
    mut notify_rx: mpsc::Receiver<NotifyJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = notify_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let dispatcher = dispatcher.clone();
                let notice = job.notice.clone();
                let dispatched = tokio::task::spawn_blocking(move || dispatcher.dispatch(&notice))
                    .await
                    .map_err(|err| {
                        DaemonError::Protocol(format!("notify task join error: {err}"))
                    })?;

                let outcome = match dispatched {
                    Ok(outcome) => {
                        tracing::info!(
                            entity = %job.notice.entity,
                            source = %job.notice.source,
                            key = %job.notice.key,
                            "notification processed",
                        );
                        Ok(summarize(&outcome))
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "notification failed");
                        Err(err.to_string())
                    }
                };
                let _ = job.respond_to.send(outcome);
            }
        }
    }
    Ok(())
}

fn summarize(outcome: &DispatchOutcome) -> Value {
    match outcome {
        DispatchOutcome::Ignored { reason } => json!({"op": "ignored", "reason": reason}),
        DispatchOutcome::Handled(outcome) => match outcome {
            Outcome::Created { key, failures } => json!({
                "op": "created",
                "key": key.to_string(),
                "failures": failure_list(failures),
            }),
            Outcome::Updated {
                key,
                diff_id,
                conflicts,
                failures,
            } => json!({
                "op": "updated",
                "key": key.to_string(),
                "diff_id": diff_id.0,
                "conflicts": conflicts,
                "failures": failure_list(failures),
            }),
            Outcome::Deleted {
                key,
                removed_rows,
                failures,
            } => json!({
                "op": "deleted",
                "key": key.to_string(),
                "removed_rows": removed_rows,
                "failures": failure_list(failures),
            }),
            Outcome::Problem { fk, reason } => json!({
                "op": "problem",
                "key": fk.to_string(),
                "reason": reason,
            }),
        },
    }
}

fn failure_list(failures: &[SourceFailure]) -> Value {
    Value::Array(
        failures
            .iter()
            .map(|f| json!({"source": f.source.to_string(), "error": f.error.to_string()}))
            .collect(),
    )
}

async fn socket_server_task(
    home: PathBuf,
    store: Arc<dyn Store>,
    notify_tx: mpsc::Sender<NotifyJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: Instant,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    if socket.exists() {
        fs::remove_file(&socket).map_err(|e| io_err(&socket, e))?;
    }

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let store = store.clone();
                let notify_tx = notify_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_client(stream, store, notify_tx, shutdown_tx, started_at).await
                    {
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

async fn handle_client(
    stream: UnixStream,
    store: Arc<dyn Store>,
    notify_tx: mpsc::Sender<NotifyJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
) -> Result<(), DaemonError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| io_err("daemon-client", e))?;
    if read == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<DaemonRequest>(line.trim_end()) {
        Err(err) => DaemonResponse::error(format!("bad request: {err}")),
        Ok(request) => match request.cmd.as_str() {
            "notify" => match (request.entity, request.source, request.key) {
                (Some(entity), Some(source), Some(key)) => {
                    let (tx, rx) = oneshot::channel();
                    let job = NotifyJob {
                        notice: ChangeNotice {
                            entity,
                            source,
                            key,
                        },
                        respond_to: tx,
                    };
                    if notify_tx.send(job).await.is_err() {
                        DaemonResponse::error("daemon is shutting down")
                    } else {
                        match rx.await {
                            Ok(Ok(summary)) => DaemonResponse::ok(summary),
                            Ok(Err(message)) => DaemonResponse::error(message),
                            Err(_) => DaemonResponse::error("notification was dropped"),
                        }
                    }
                }
                _ => DaemonResponse::error("notify requires entity, source, and key"),
            },
            "status" => {
                let store = store.clone();
                let pending = tokio::task::spawn_blocking(move || store.notifications()).await;
                match pending {
                    Ok(Ok(notifications)) => DaemonResponse::ok(json!({
                        "pending_conflicts": notifications.len(),
                        "uptime_s": started_at.elapsed().as_secs(),
                    })),
                    Ok(Err(err)) => DaemonResponse::error(err.to_string()),
                    Err(err) => DaemonResponse::error(format!("status task died: {err}")),
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({"stopping": true}))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        },
    };

    let payload = serde_json::to_string(&response)?;
    write_half
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon-client", e))?;
    write_half
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon-client", e))?;
    write_half
        .flush()
        .await
        .map_err(|e| io_err("daemon-client", e))?;
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
