//! Command-line flags.
//!
//! Grouped the way an operator thinks about a run: preparing the job
//! list, executing it, and watching it. The command template itself
//! comes after `--`:
//!
//! ```text
//! seq 100 | volley --concurrency=20 --skip-successes -- process.sh {{.value}}
//! ```

use std::time::Duration;

use clap::Parser;
use volley_types::parse_duration;

fn duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "volley",
    version,
    about = "Run many variations of a command, concurrently and carefully",
    after_help = "A trailing `--` separates the command template; each argument may \
                  reference record fields as {{.name}}. Without a template, records \
                  are echoed back."
)]
pub struct Args {
    #[command(flatten)]
    pub preparation: PreparationArgs,
    #[command(flatten)]
    pub execution: ExecutionArgs,
    #[command(flatten)]
    pub output: OutputArgs,

    /// The command template (after `--`).
    #[arg(last = true)]
    pub command: Vec<String>,
}

#[derive(Debug, clap::Args)]
#[command(next_help_heading = "Preparation")]
pub struct PreparationArgs {
    /// Interpret STDIN as a CSV.
    #[arg(long, conflicts_with = "json_line")]
    pub csv: bool,

    /// Interpret STDIN as JSON objects, one per line.
    #[arg(long)]
    pub json_line: bool,

    /// Skip jobs which have already been run successfully.
    #[arg(long)]
    pub skip_successes: bool,

    /// Skip jobs which have already been run unsuccessfully.
    #[arg(long)]
    pub skip_failures: bool,

    /// Re-run successful jobs outside the debounce period, even if they
    /// would normally be skipped.
    #[arg(long, value_name = "DUR", value_parser = duration_arg)]
    pub debounce_successes: Option<Duration>,

    /// Re-run failed jobs outside the debounce period, even if they
    /// would normally be skipped.
    #[arg(long, value_name = "DUR", value_parser = duration_arg)]
    pub debounce_failures: Option<Duration>,

    /// Give priority to jobs which have not previously been run.
    #[arg(long)]
    pub defer_reruns: bool,

    /// When deferring reruns, wait this long before beginning
    /// processing.
    #[arg(long, value_name = "DUR", value_parser = duration_arg)]
    pub defer_delay: Option<Duration>,
}

#[derive(Debug, clap::Args)]
#[command(next_help_heading = "Execution")]
pub struct ExecutionArgs {
    /// Run this many jobs in parallel.
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub concurrency: usize,

    /// Cancel each job after this much time.
    #[arg(long, value_name = "DUR", value_parser = duration_arg)]
    pub timeout: Option<Duration>,

    /// Send this string (plus newline), repeated forever, as STDIN to
    /// each job. May reference record fields.
    #[arg(long, value_name = "TMPL")]
    pub input: Option<String>,

    /// Stop running (as though CTRL-C were pressed) if a job fails.
    #[arg(long)]
    pub abort_on_error: bool,

    /// Simulate what would be run.
    #[arg(long)]
    pub dry_run: bool,

    /// Prevent jobs starting more often than this.
    #[arg(long, value_name = "DUR", value_parser = duration_arg)]
    pub rate_limit: Option<Duration>,

    /// Allow a burst of up to this many jobs before enforcing the rate
    /// limit.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub rate_limit_bucket_size: usize,

    /// Path (or s3:// URI) recording successes and failures.
    #[arg(long, value_name = "PATH_OR_URI")]
    pub cache_location: Option<String>,
}

#[derive(Debug, clap::Args)]
#[command(next_help_heading = "Output")]
pub struct OutputArgs {
    /// Show more detailed log messages.
    #[arg(long)]
    pub debug: bool,

    /// Do not display a message each time a job succeeds.
    #[arg(long)]
    pub hide_successes: bool,

    /// Do not display a message each time a job fails.
    #[arg(long)]
    pub hide_failures: bool,

    /// Send a copy of each job's STDOUT to the console.
    #[arg(long)]
    pub show_stdout: bool,

    /// Send a copy of each job's STDERR to the console.
    #[arg(long)]
    pub show_stderr: bool,
}
