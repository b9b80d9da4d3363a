//! The ingestor: records in, prioritized queue items out.
//!
//! For every parsed record: render the command, fingerprint it, consult
//! the cache, and either skip it or push it toward the sorter with its
//! last-run time attached. The cache consultation is what makes reruns
//! cheap: a command that already succeeded is dropped here, before it
//! costs anything.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::engine::EngineOpts;
use crate::shutdown::Shutdown;
use crate::sorter::QueueItem;
use crate::source::SourceItem;
use crate::stats::Stats;
use crate::template::{CommandTemplate, Template};

pub(crate) async fn run_ingestor(
    opts: Arc<EngineOpts>,
    template: CommandTemplate,
    stdin_template: Option<Template>,
    cache: Arc<dyn Cache>,
    stats: Arc<Stats>,
    shutdown: Shutdown,
    mut records: mpsc::Receiver<SourceItem>,
    queue: mpsc::Sender<QueueItem>,
) {
    let mut index: u64 = 0;
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => return,
            item = records.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };
        let record = match item {
            SourceItem::Record(record) => record,
            SourceItem::Malformed(error) => {
                warn!(%error, "could not parse an input row");
                stats.add_failed_undispatched();
                continue;
            }
        };
        let command = match template.render(stdin_template.as_ref(), &record) {
            Ok(command) => command,
            Err(error) => {
                info!(%error, "could not render");
                stats.add_failed_undispatched();
                continue;
            }
        };
        let marker = command.marker();

        let mut last_run: Option<SystemTime> = None;
        if let Ok(mtime) = cache.success_mod_time(&marker).await {
            last_run = max_time(last_run, mtime);
            if opts.skip_successes {
                if outside_debounce(mtime, opts.debounce_successes) {
                    debug!(command = %command, "already succeeded, but outside the debounce period");
                } else {
                    debug!(command = %command, %marker, "already succeeded; skipping");
                    stats.add_skipped();
                    continue;
                }
            }
        }
        if let Ok(mtime) = cache.failure_mod_time(&marker).await {
            last_run = max_time(last_run, mtime);
            if opts.skip_failures {
                if outside_debounce(mtime, opts.debounce_failures) {
                    debug!(command = %command, "already failed, but outside the debounce period");
                } else {
                    debug!(command = %command, %marker, "already failed; skipping");
                    stats.add_skipped();
                    continue;
                }
            }
        }
        if !opts.defer_reruns {
            // original sequence is preserved by the index tiebreaker
            last_run = None;
        }

        index += 1;
        let item = QueueItem {
            command,
            timestamp: last_run,
            index,
        };
        tokio::select! {
            _ = shutdown.cancelled() => return,
            sent = queue.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        stats.add_queued();
    }
}

fn max_time(current: Option<SystemTime>, candidate: SystemTime) -> Option<SystemTime> {
    match current {
        Some(t) if t >= candidate => Some(t),
        _ => Some(candidate),
    }
}

/// A debounce period makes old cache entries eligible to run again.
fn outside_debounce(mtime: SystemTime, debounce: Option<std::time::Duration>) -> bool {
    match debounce {
        Some(period) => mtime.elapsed().map(|age| age > period).unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn later_time_wins() {
        let early = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let late = SystemTime::UNIX_EPOCH + Duration::from_secs(200);
        assert_eq!(max_time(None, early), Some(early));
        assert_eq!(max_time(Some(early), late), Some(late));
        assert_eq!(max_time(Some(late), early), Some(late));
    }

    #[test]
    fn debounce_only_releases_old_entries() {
        let fresh = SystemTime::now();
        let stale = SystemTime::now() - Duration::from_secs(60);
        let period = Some(Duration::from_secs(10));
        assert!(!outside_debounce(fresh, period));
        assert!(outside_debounce(stale, period));
        assert!(!outside_debounce(stale, None), "no debounce means always skip");
    }
}
