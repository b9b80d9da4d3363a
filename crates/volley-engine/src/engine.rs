//! Engine assembly.
//!
//! Wires the pipeline together and runs it to completion:
//!
//! ```text
//! records ──▶ ingestor ──▶ (unsorted, cap 10) ──▶ sorter ──▶ (sorted, cap 1) ──▶ workers
//!                                                                                │
//! interrupts ──▶ controller ──▶ per-worker signal channels ─────────────────────┘
//! ```
//!
//! The engine cancellation token stops dispatch everywhere. Running
//! children are out of its reach: the escalation controller owns their
//! lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::info;

use crate::cache::Cache;
use crate::error::{EngineError, EngineResult};
use crate::ingest;
use crate::interrupt;
use crate::limit::RateLimiter;
use crate::reporter;
use crate::shutdown::Shutdown;
use crate::sorter;
use crate::source::SourceItem;
use crate::stats::Stats;
use crate::template::{CommandTemplate, Template};
use crate::worker;

/// Everything that shapes a run.
#[derive(Debug, Clone)]
pub struct EngineOpts {
    /// How many jobs run at once.
    pub concurrency: usize,
    /// Per-job deadline. A timed-out job is a failed job.
    pub timeout: Option<Duration>,
    /// Stop the whole run at the first failure.
    pub abort_on_error: bool,
    /// Pretend: sleep a second per job instead of spawning it.
    pub dry_run: bool,
    /// Minimum spacing between job starts.
    pub rate_limit: Option<Duration>,
    /// Burst allowance for the rate limiter.
    pub rate_limit_bucket_size: usize,
    /// Skip records whose marker already has a success entry.
    pub skip_successes: bool,
    /// Skip records whose marker already has a failure entry.
    pub skip_failures: bool,
    /// Run an already-succeeded record anyway once its entry is older
    /// than this.
    pub debounce_successes: Option<Duration>,
    /// Run an already-failed record anyway once its entry is older than
    /// this.
    pub debounce_failures: Option<Duration>,
    /// Dispatch never-run records before previously-run ones.
    pub defer_reruns: bool,
    /// Settle time before the first hand-off when deferring.
    pub defer_delay: Option<Duration>,
    pub hide_successes: bool,
    pub hide_failures: bool,
    /// Mirror each child's stdout to the console.
    pub show_stdout: bool,
    /// Mirror each child's stderr to the console.
    pub show_stderr: bool,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: None,
            abort_on_error: false,
            dry_run: false,
            rate_limit: None,
            rate_limit_bucket_size: 1,
            skip_successes: false,
            skip_failures: false,
            debounce_successes: None,
            debounce_failures: None,
            defer_reruns: false,
            defer_delay: None,
            hide_successes: false,
            hide_failures: false,
            show_stdout: false,
            show_stderr: false,
        }
    }
}

/// The dispatch engine. Construct once per run.
pub struct Engine {
    opts: Arc<EngineOpts>,
    cache: Arc<dyn Cache>,
    stats: Arc<Stats>,
    shutdown: Shutdown,
}

impl Engine {
    pub fn new(opts: EngineOpts, cache: Arc<dyn Cache>) -> EngineResult<Self> {
        if matches!(opts.rate_limit, Some(period) if period < Duration::from_millis(1)) {
            return Err(EngineError::RateLimitTooSmall);
        }
        let stats = Arc::new(Stats::new(
            opts.concurrency,
            opts.rate_limit.unwrap_or(Duration::ZERO),
        ));
        Ok(Self {
            opts: Arc::new(opts),
            cache,
            stats,
            shutdown: Shutdown::new(),
        })
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// A handle the host can use to wind the run down (deadline tasks,
    /// embedders).
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the engine until the input drains or a cancellation cause
    /// says otherwise. Benign causes are success.
    pub async fn run(
        &self,
        template: CommandTemplate,
        stdin_template: Option<Template>,
        records: mpsc::Receiver<SourceItem>,
        interrupts: mpsc::Receiver<()>,
    ) -> EngineResult<()> {
        let limiter = match self.opts.rate_limit {
            Some(period) => Some(RateLimiter::new(
                period,
                self.opts.rate_limit_bucket_size,
            )?),
            None => None,
        };
        let defer_delay = self
            .opts
            .defer_reruns
            .then(|| self.opts.defer_delay.unwrap_or(sorter::DEFAULT_DEFER_DELAY));

        let (unsorted_tx, unsorted_rx) = mpsc::channel(10);
        // workers pull at most one job ahead of what they are running
        let (sorted_tx, sorted_rx) = mpsc::channel(1);
        let (mail_tx, mail_rx) = mpsc::channel(1);
        let tree = sorter::new_tree();

        let ingestor = tokio::spawn(ingest::run_ingestor(
            self.opts.clone(),
            template,
            stdin_template,
            self.cache.clone(),
            self.stats.clone(),
            self.shutdown.clone(),
            records,
            unsorted_tx,
        ));
        let inserter = tokio::spawn(sorter::run_inserter(
            tree.clone(),
            mail_tx,
            unsorted_rx,
            self.shutdown.clone(),
        ));
        let consumer = tokio::spawn(sorter::run_consumer(
            tree,
            mail_rx,
            sorted_tx,
            limiter,
            defer_delay,
            self.shutdown.clone(),
        ));

        let shared_rx = Arc::new(tokio::sync::Mutex::new(sorted_rx));
        let mut signallers = Vec::with_capacity(self.opts.concurrency);
        let mut workers = JoinSet::new();
        for _ in 0..self.opts.concurrency.max(1) {
            let (signal_tx, signal_rx) = mpsc::channel(2);
            signallers.push(signal_tx);
            workers.spawn(worker::run_worker(
                self.opts.clone(),
                self.cache.clone(),
                self.stats.clone(),
                self.shutdown.clone(),
                shared_rx.clone(),
                signal_rx,
            ));
        }

        let controller = tokio::spawn(interrupt::run_controller(
            interrupts,
            signallers,
            self.stats.clone(),
            self.shutdown.clone(),
        ));
        let reporter = tokio::spawn(reporter::run_reporter(
            self.stats.clone(),
            self.shutdown.clone(),
        ));

        while workers.join_next().await.is_some() {}

        // everything upstream of the workers has drained or been cut off
        self.shutdown.cancel(EngineError::NoMoreJobs);
        for aux in [ingestor, inserter, consumer, controller, reporter] {
            aux.abort();
        }

        info!("{}", self.stats.render());
        match self.shutdown.cause() {
            Some(cause) if !cause.is_benign() => Err(cause),
            _ => Ok(()),
        }
    }
}
