//! Workers: spawn children, capture output, classify, cache.
//!
//! Each worker owns a signal channel and a sidecar task that delivers
//! escalation signals to whatever child the worker is currently
//! running. The child is not tied to the engine cancellation: a first
//! Ctrl-C stops new work from being dispatched, but a running child
//! dies only when its own deadline fires or the escalation controller
//! says so.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use volley_types::{friendly_duration, JobOutcome, OutcomeKind, RenderedCommand};

use crate::cache::Cache;
use crate::engine::EngineOpts;
use crate::error::EngineError;
use crate::shutdown::Shutdown;
use crate::stats::Stats;

/// Escalation requests a worker's sidecar can deliver to its child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildSignal {
    /// Ask politely (SIGTERM).
    Term,
    /// Stop asking (SIGKILL).
    Kill,
    /// SIGKILL the child's whole process group.
    KillGroup,
}

/// What actually happened to a child, before classification.
struct ChildExit {
    exit_ok: bool,
    deadline_fired: bool,
    output: Vec<u8>,
    /// Spawn/wait error text, for the failure log line.
    error: Option<String>,
}

pub(crate) async fn run_worker(
    opts: Arc<EngineOpts>,
    cache: Arc<dyn Cache>,
    stats: Arc<Stats>,
    shutdown: Shutdown,
    commands: Arc<tokio::sync::Mutex<mpsc::Receiver<RenderedCommand>>>,
    signals: mpsc::Receiver<ChildSignal>,
) {
    // cleared whenever no child is in flight, so escalation signals
    // during idle periods are no-ops
    let current_pid: Arc<Mutex<Option<i32>>> = Arc::new(Mutex::new(None));
    let sidecar = tokio::spawn(signal_sidecar(signals, current_pid.clone()));

    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => None,
            command = async { commands.lock().await.recv().await } => command,
        };
        let Some(command) = command else {
            break;
        };
        execute_one(&opts, &cache, &stats, &shutdown, &current_pid, command).await;
    }
    sidecar.abort();
}

async fn execute_one(
    opts: &EngineOpts,
    cache: &Arc<dyn Cache>,
    stats: &Stats,
    shutdown: &Shutdown,
    current_pid: &Arc<Mutex<Option<i32>>>,
    command: RenderedCommand,
) {
    debug!(command = %command, "about to execute");
    let marker = command.marker();
    stats.start_job();
    let started = Instant::now();

    let exit = if opts.dry_run {
        run_dry(shutdown).await
    } else {
        run_child(opts, current_pid, &command).await
    };
    let outcome = JobOutcome {
        kind: OutcomeKind::classify(
            exit.exit_ok,
            exit.deadline_fired,
            shutdown.is_user_initiated(),
        ),
        elapsed: started.elapsed(),
        output: exit.output,
    };
    match outcome.kind {
        OutcomeKind::Succeeded => {
            stats.add_succeeded(outcome.elapsed);
            if !opts.hide_successes {
                if opts.show_stdout || opts.show_stderr {
                    // output already went to the console; point at the
                    // cached copy instead of repeating it
                    tracing::info!(
                        elapsed = %friendly_duration(outcome.elapsed),
                        command = %command,
                        output_id = %marker,
                        "Success"
                    );
                } else {
                    tracing::info!(
                        elapsed = %friendly_duration(outcome.elapsed),
                        command = %command,
                        combined_output = %String::from_utf8_lossy(&outcome.output),
                        "Success"
                    );
                }
            }
            if !opts.dry_run {
                if let Err(e) = cache.write_success(&marker, &outcome.output).await {
                    tracing::error!(%marker, error = %e, "could not record the success");
                    shutdown.cancel(EngineError::CacheWrite(format!(
                        "could not mark command as successful: {e}"
                    )));
                }
            }
        }
        OutcomeKind::Failed => {
            stats.add_failed(outcome.elapsed);
            if !opts.hide_failures {
                warn!(
                    elapsed = %friendly_duration(outcome.elapsed),
                    command = %command,
                    combined_output = %String::from_utf8_lossy(&outcome.output),
                    error = exit.error.as_deref().unwrap_or("nonzero exit"),
                    "Failure"
                );
            }
            if !opts.dry_run {
                if let Err(e) = cache.write_failure(&marker, &outcome.output).await {
                    tracing::error!(%marker, error = %e, "could not record the failure");
                    shutdown.cancel(EngineError::CacheWrite(format!(
                        "could not mark command as failed: {e}"
                    )));
                }
            }
            if opts.abort_on_error {
                shutdown.cancel(EngineError::AbortOnError);
            }
        }
        OutcomeKind::Aborted => {
            stats.add_aborted(outcome.elapsed);
            warn!(command = %command, "job was aborted before completion");
        }
    }
}

/// Dry run: pretend the job took a second and succeeded. Interruptible,
/// unlike a real child, since there is nothing to wind down.
async fn run_dry(shutdown: &Shutdown) -> ChildExit {
    tokio::select! {
        _ = shutdown.cancelled() => ChildExit {
            exit_ok: false,
            deadline_fired: false,
            output: Vec::new(),
            error: Some("interrupted".to_string()),
        },
        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => ChildExit {
            exit_ok: true,
            deadline_fired: false,
            output: b"(dry run)".to_vec(),
            error: None,
        },
    }
}

async fn run_child(
    opts: &EngineOpts,
    current_pid: &Arc<Mutex<Option<i32>>>,
    command: &RenderedCommand,
) -> ChildExit {
    let mut cmd = Command::new(&command.argv[0]);
    cmd.args(&command.argv[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    // its own process group, so terminal signals reach volley alone and
    // group kills reach the child's whole subtree
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ChildExit {
                exit_ok: false,
                deadline_fired: false,
                output: Vec::new(),
                error: Some(format!("could not spawn: {e}")),
            }
        }
    };
    *current_pid.lock().unwrap() = child.id().map(|pid| pid as i32);

    // supply the stdin payload over and over, like `yes`, until the
    // child stops reading
    let feeder = command.stdin.clone().and_then(|payload| {
        child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let line = format!("{payload}\n");
                while stdin.write_all(line.as_bytes()).await.is_ok() {}
            })
        })
    });

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = child.stdout.take().map(|stream| {
        tokio::spawn(capture(
            stream,
            buffer.clone(),
            opts.show_stdout.then(tokio::io::stdout),
        ))
    });
    let stderr_task = child.stderr.take().map(|stream| {
        tokio::spawn(capture(
            stream,
            buffer.clone(),
            opts.show_stderr.then(tokio::io::stderr),
        ))
    });

    let mut deadline_fired = false;
    let status = match opts.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                deadline_fired = true;
                let _ = child.start_kill();
                child.wait().await
            }
        },
        None => child.wait().await,
    };
    *current_pid.lock().unwrap() = None;

    if let Some(feeder) = feeder {
        feeder.abort();
    }
    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let _ = task.await;
    }
    let output = std::mem::take(&mut *buffer.lock().unwrap());

    match status {
        Ok(status) => ChildExit {
            exit_ok: status.success(),
            deadline_fired,
            output,
            error: (!status.success()).then(|| status.to_string()),
        },
        Err(e) => ChildExit {
            exit_ok: false,
            deadline_fired,
            output,
            error: Some(format!("could not wait for child: {e}")),
        },
    }
}

/// Drain a child stream into the shared combined buffer, optionally
/// mirroring chunks to the parent's console.
async fn capture<R, W>(mut stream: R, buffer: Arc<Mutex<Vec<u8>>>, mut mirror: Option<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buffer.lock().unwrap().extend_from_slice(&chunk[..n]);
                if let Some(writer) = mirror.as_mut() {
                    let _ = writer.write_all(&chunk[..n]).await;
                }
            }
        }
    }
}

/// Deliver escalation signals to the worker's current child. A worker
/// with no child in flight swallows them.
async fn signal_sidecar(
    mut signals: mpsc::Receiver<ChildSignal>,
    current_pid: Arc<Mutex<Option<i32>>>,
) {
    while let Some(request) = signals.recv().await {
        let pid = *current_pid.lock().unwrap();
        let Some(pid) = pid else {
            continue;
        };
        deliver(request, pid);
    }
}

#[cfg(unix)]
fn deliver(request: ChildSignal, pid: i32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let delivered = match request {
        ChildSignal::Term => kill(Pid::from_raw(pid), Signal::SIGTERM),
        ChildSignal::Kill => kill(Pid::from_raw(pid), Signal::SIGKILL),
        // the child is its own process group leader
        ChildSignal::KillGroup => killpg(Pid::from_raw(pid), Signal::SIGKILL),
    };
    debug!(?request, pid, ?delivered, "sent signal to child");
}

#[cfg(not(unix))]
fn deliver(request: ChildSignal, pid: i32) {
    debug!(?request, pid, "signal delivery is not supported on this platform");
}
