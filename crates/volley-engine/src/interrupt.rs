//! Four-stage interrupt escalation.
//!
//! Repeated interrupts tighten the screws, one stage per interrupt:
//!
//! 1. stop dispatching; running jobs continue
//! 2. SIGTERM every running job
//! 3. SIGKILL every running job
//! 4. SIGKILL every job's whole process group
//!
//! Stages are strictly sequential. The broadcast sends are
//! non-blocking: a worker whose signal channel is full (it already has
//! two pending signals) simply misses one, and the next stage will
//! reach it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::shutdown::Shutdown;
use crate::stats::Stats;
use crate::worker::ChildSignal;

pub(crate) async fn run_controller(
    mut interrupts: mpsc::Receiver<()>,
    signallers: Vec<mpsc::Sender<ChildSignal>>,
    stats: Arc<Stats>,
    shutdown: Shutdown,
) {
    tokio::select! {
        _ = shutdown.cancelled() => {
            debug!("engine finished before any interrupt; nothing to escalate");
            return;
        }
        first = interrupts.recv() => {
            if first.is_none() {
                return;
            }
        }
    }

    // stage 1: discard the queue, stop dispatching, let running jobs be
    let discarded = stats.zero_queued();
    stats.sub_total(discarded);
    warn!(
        "received cancellation signal. Waiting for current jobs to finish before exiting. \
         Hit CTRL-C again to exit sooner"
    );
    if stats.clear_dirty() {
        info!("{}", stats.render());
    }
    shutdown.cancel(EngineError::UserShutdown);

    // stage 2
    if interrupts.recv().await.is_none() {
        return;
    }
    broadcast(&signallers, ChildSignal::Term);
    warn!(
        "second CTRL-C received. Sending SIGTERM to running jobs. \
         Hit CTRL-C again to use SIGKILL instead"
    );

    // stage 3
    if interrupts.recv().await.is_none() {
        return;
    }
    broadcast(&signallers, ChildSignal::Kill);
    warn!(
        "third CTRL-C received. Sending SIGKILL to running jobs. \
         Hit CTRL-C again to kill all subprocesses too"
    );

    // stage 4
    if interrupts.recv().await.is_none() {
        return;
    }
    broadcast(&signallers, ChildSignal::KillGroup);
    drop(signallers); // closes every worker's signal channel
    warn!("fourth CTRL-C received. Sending SIGKILL to running jobs and their subprocesses");
}

fn broadcast(signallers: &[mpsc::Sender<ChildSignal>], signal: ChildSignal) {
    for signaller in signallers {
        // full channel: the worker is behind; drop rather than block
        let _ = signaller.try_send(signal);
    }
}
