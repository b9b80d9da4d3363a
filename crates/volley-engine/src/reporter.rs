//! Periodic status reporting.
//!
//! Aligned to the wall clock so that concurrent runs in adjacent
//! terminals tick together, and deduplicated so that an idle run stays
//! quiet: a line is emitted only when the stats changed, or every ten
//! minutes as a keep-alive. Once the engine starts winding down the
//! cadence tightens to a second, which is when the operator is
//! actually watching.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::info;

use crate::shutdown::Shutdown;
use crate::stats::Stats;

const CADENCE: Duration = Duration::from_secs(10);
const TAIL_CADENCE: Duration = Duration::from_secs(1);
const KEEP_ALIVE: Duration = Duration::from_secs(10 * 60 - 1);

pub(crate) async fn run_reporter(stats: Arc<Stats>, shutdown: Shutdown) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = sleep_in_lockstep(CADENCE) => {}
    }
    let mut last_shown: Option<Instant> = None;
    let mut ticker = tokio::time::interval_at(Instant::now() + CADENCE, CADENCE);
    while !shutdown.is_cancelled() {
        emit_if_due(&stats, &mut last_shown);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
    }

    // the tail: in-flight jobs are draining and the operator wants to
    // see them land. Runs until the engine aborts this task.
    sleep_in_lockstep(TAIL_CADENCE).await;
    let mut ticker = tokio::time::interval_at(Instant::now() + TAIL_CADENCE, TAIL_CADENCE);
    loop {
        emit_if_due(&stats, &mut last_shown);
        ticker.tick().await;
    }
}

fn emit_if_due(stats: &Stats, last_shown: &mut Option<Instant>) {
    let keep_alive_due = last_shown.map_or(true, |at| at.elapsed() >= KEEP_ALIVE);
    if stats.clear_dirty() || keep_alive_due {
        info!("{}", stats.render());
        *last_shown = Some(Instant::now());
    }
}

/// Sleep until the next wall-clock multiple of `period`.
async fn sleep_in_lockstep(period: Duration) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let remainder = since_epoch.as_nanos() % period.as_nanos();
    if remainder > 0 {
        let wait = period.as_nanos() - remainder;
        tokio::time::sleep(Duration::from_nanos(wait as u64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emission_is_unconditional() {
        let stats = Arc::new(Stats::new(1, Duration::ZERO));
        let mut last_shown = None;
        emit_if_due(&stats, &mut last_shown);
        assert!(last_shown.is_some());
    }

    #[test]
    fn clean_stats_are_not_re_emitted() {
        let stats = Arc::new(Stats::new(1, Duration::ZERO));
        let mut last_shown = None;
        emit_if_due(&stats, &mut last_shown);
        let first = last_shown;
        emit_if_due(&stats, &mut last_shown);
        assert_eq!(first, last_shown, "nothing changed, nothing shown");
        stats.add_queued();
        std::thread::sleep(Duration::from_millis(2));
        emit_if_due(&stats, &mut last_shown);
        assert_ne!(first, last_shown, "dirty stats are shown");
    }
}
