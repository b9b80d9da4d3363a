//! The streaming priority queue between the ingestor and the workers.
//!
//! An inserter task files incoming items into an ordered tree keyed by
//! `(timestamp, index)`; a consumer task repeatedly hands the minimum to
//! the next free worker. Items flow through while input is still being
//! read; the tree is a reorder buffer, not a batch.
//!
//! Never-run items carry no timestamp. They are stamped with a
//! synthetic near-zero time, each one nanosecond later than the last,
//! which keeps them strictly ahead of anything that has really run
//! while preserving their insertion order among themselves.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::debug;

use volley_types::RenderedCommand;

use crate::limit::RateLimiter;
use crate::shutdown::Shutdown;

/// Default settle time before the first hand-off when deferring reruns.
pub(crate) const DEFAULT_DEFER_DELAY: Duration = Duration::from_millis(100);

/// A command annotated with its scheduling key.
#[derive(Debug)]
pub(crate) struct QueueItem {
    pub command: RenderedCommand,
    /// Most recent prior run, if any. `None` sorts before every real
    /// timestamp.
    pub timestamp: Option<SystemTime>,
    /// Monotonic insertion counter; the tiebreaker.
    pub index: u64,
}

pub(crate) type Tree = Arc<RwLock<BTreeMap<(SystemTime, u64), RenderedCommand>>>;

pub(crate) fn new_tree() -> Tree {
    Arc::new(RwLock::new(BTreeMap::new()))
}

/// Pull from the unsorted channel into the tree, waking the consumer
/// through the single-slot mail channel. Dropping `mail` on return is
/// what tells the consumer no more items are coming.
pub(crate) async fn run_inserter(
    tree: Tree,
    mail: mpsc::Sender<()>,
    mut unsorted: mpsc::Receiver<QueueItem>,
    shutdown: Shutdown,
) {
    let mut synthetic = Duration::ZERO;
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => return,
            item = unsorted.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };
        let timestamp = match item.timestamp {
            Some(t) => t,
            None => {
                // near-zero but strictly increasing
                synthetic += Duration::from_nanos(1);
                UNIX_EPOCH + synthetic
            }
        };
        let replaced = tree
            .write()
            .unwrap()
            .insert((timestamp, item.index), item.command);
        assert!(
            replaced.is_none(),
            "duplicate (timestamp, index) key in the priority queue"
        );
        debug!(index = item.index, "inserted into the priority queue");
        let _ = mail.try_send(());
    }
}

/// Hand the minimum item to the next free worker, acquiring the rate
/// token immediately before each hand-off so dequeue order and token
/// order agree. Closes the sorted channel when the tree is drained and
/// the inserter is gone.
pub(crate) async fn run_consumer(
    tree: Tree,
    mut mail: mpsc::Receiver<()>,
    sorted: mpsc::Sender<RenderedCommand>,
    mut limiter: Option<RateLimiter>,
    defer_delay: Option<Duration>,
    shutdown: Shutdown,
) {
    if let Some(delay) = defer_delay {
        // give the tree a moment to accumulate higher-priority items;
        // without this the first insertion would be handed straight to
        // a waiting worker even if a never-run item is right behind it
        debug!(?delay, "delaying to improve effectiveness of deferring reruns");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let mut final_iteration = false;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            post = mail.recv() => {
                if post.is_none() {
                    final_iteration = true;
                }
            }
        }
        loop {
            let entry = tree.write().unwrap().pop_first();
            let Some((_, command)) = entry else {
                if final_iteration {
                    return;
                }
                break;
            };
            if shutdown.is_cancelled() {
                return;
            }
            if let Some(limiter) = limiter.as_mut() {
                if !limiter.acquire(&shutdown).await {
                    return;
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                sent = sorted.send(command) => {
                    if sent.is_err() {
                        return;
                    }
                    debug!("handed off to a worker");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &str) -> RenderedCommand {
        RenderedCommand::new(vec!["echo".to_string(), name.to_string()])
    }

    async fn sort_through(items: Vec<QueueItem>, defer: bool) -> Vec<String> {
        let shutdown = Shutdown::new();
        let tree = new_tree();
        let (unsorted_tx, unsorted_rx) = mpsc::channel(10);
        let (sorted_tx, mut sorted_rx) = mpsc::channel(1);
        let (mail_tx, mail_rx) = mpsc::channel(1);
        let inserter = tokio::spawn(run_inserter(
            tree.clone(),
            mail_tx,
            unsorted_rx,
            shutdown.clone(),
        ));
        let defer_delay = defer.then_some(DEFAULT_DEFER_DELAY);
        let consumer = tokio::spawn(run_consumer(
            tree,
            mail_rx,
            sorted_tx,
            None,
            defer_delay,
            shutdown.clone(),
        ));
        for item in items {
            unsorted_tx.send(item).await.unwrap();
        }
        drop(unsorted_tx);
        let mut delivered = Vec::new();
        while let Some(command) = sorted_rx.recv().await {
            delivered.push(command.argv[1].clone());
        }
        inserter.await.unwrap();
        consumer.await.unwrap();
        delivered
    }

    fn item(name: &str, timestamp: Option<SystemTime>, index: u64) -> QueueItem {
        QueueItem {
            command: cmd(name),
            timestamp,
            index,
        }
    }

    #[tokio::test]
    async fn never_run_items_keep_insertion_order() {
        let delivered = sort_through(
            vec![item("a", None, 1), item("b", None, 2), item("c", None, 3)],
            false,
        )
        .await;
        assert_eq!(delivered, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn never_run_beats_previously_run() {
        let old = SystemTime::now() - Duration::from_secs(3600);
        let older = SystemTime::now() - Duration::from_secs(7200);
        let delivered = sort_through(
            vec![
                item("rerun-new", Some(old), 1),
                item("rerun-old", Some(older), 2),
                item("fresh", None, 3),
            ],
            true,
        )
        .await;
        assert_eq!(delivered, ["fresh", "rerun-old", "rerun-new"]);
    }

    #[tokio::test]
    async fn equal_timestamps_fall_back_to_index() {
        let t = SystemTime::now() - Duration::from_secs(60);
        let delivered = sort_through(
            vec![item("first", Some(t), 1), item("second", Some(t), 2)],
            true,
        )
        .await;
        assert_eq!(delivered, ["first", "second"]);
    }

    #[tokio::test]
    async fn cancellation_stops_delivery() {
        let shutdown = Shutdown::new();
        let tree = new_tree();
        let (unsorted_tx, unsorted_rx) = mpsc::channel(10);
        let (sorted_tx, mut sorted_rx) = mpsc::channel(1);
        let (mail_tx, mail_rx) = mpsc::channel(1);
        tokio::spawn(run_inserter(
            tree.clone(),
            mail_tx,
            unsorted_rx,
            shutdown.clone(),
        ));
        let consumer = tokio::spawn(run_consumer(
            tree,
            mail_rx,
            sorted_tx,
            None,
            None,
            shutdown.clone(),
        ));
        unsorted_tx.send(item("a", None, 1)).await.unwrap();
        assert!(sorted_rx.recv().await.is_some());
        shutdown.cancel(crate::error::EngineError::UserShutdown);
        consumer.await.unwrap();
        assert!(sorted_rx.recv().await.is_none(), "channel closes on cancel");
    }
}
