//! volley CLI entry point.
//!
//! Usage:
//!   seq 100 | volley -- process.sh {{.value}}
//!   cat hosts.csv | volley --csv --skip-successes -- ssh {{.host}} uptime
//!
//! Interrupts escalate: the first Ctrl-C stops dispatching and lets
//! running jobs finish; the second SIGTERMs them; the third SIGKILLs
//! them; the fourth SIGKILLs their whole process groups.

mod args;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volley_engine::{
    aws_expiry_time, spawn_reader, Cache, CommandTemplate, DirCache, Engine, EngineError,
    EngineOpts, InputFormat, S3Cache, Shutdown, Template,
};
use volley_types::friendly_duration;

use args::Args;

/// Startup aborts when the AWS credentials expire within this margin;
/// mid-run, the engine winds down when the margin is reached.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing (RUST_LOG overrides the --debug default)
    let default_level = if args.output.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let format = input_format(&args);

    // provide a stub command if required
    let mut command_line = args.command.clone();
    if command_line.is_empty() {
        command_line = default_command_line(format);
        info!(command = %command_line.join(" "), "no command was provided, so just echoing the input");
    }
    let template =
        CommandTemplate::parse(&command_line).context("cannot parse the command template")?;
    let stdin_template = args
        .execution
        .input
        .as_deref()
        .map(Template::parse)
        .transpose()
        .context("cannot parse the input template")?;

    let opts = EngineOpts {
        concurrency: args.execution.concurrency,
        timeout: args.execution.timeout,
        abort_on_error: args.execution.abort_on_error,
        dry_run: args.execution.dry_run,
        rate_limit: args.execution.rate_limit,
        rate_limit_bucket_size: args.execution.rate_limit_bucket_size,
        skip_successes: args.preparation.skip_successes,
        skip_failures: args.preparation.skip_failures,
        debounce_successes: args.preparation.debounce_successes,
        debounce_failures: args.preparation.debounce_failures,
        defer_reruns: args.preparation.defer_reruns,
        defer_delay: args.preparation.defer_delay,
        hide_successes: args.output.hide_successes,
        hide_failures: args.output.hide_failures,
        show_stdout: args.output.show_stdout,
        show_stderr: args.output.show_stderr,
    };

    let (cache, expiry) = open_cache(args.execution.cache_location.as_deref()).await?;
    let engine = Engine::new(opts, cache)?;

    if let Some(expiry) = expiry {
        spawn_expiry_watch(expiry, engine.shutdown_handle())?;
    }

    // Interrupt escalation needs the raw signal stream, not a one-shot
    // cancellation: each repeat is its own stage.
    let interrupts = forward_interrupts()?;
    let records = spawn_reader(
        format,
        Box::new(std::io::stdin()),
        engine.shutdown_handle(),
    );

    match engine.run(template, stdin_template, records, interrupts).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // not an error of the tool; the operator asked
        Err(EngineError::UserShutdown) => Ok(ExitCode::FAILURE),
        Err(e) => {
            error!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn input_format(args: &Args) -> InputFormat {
    if args.preparation.json_line {
        InputFormat::JsonLines
    } else if args.preparation.csv {
        InputFormat::Csv
    } else {
        InputFormat::Lines
    }
}

fn default_command_line(format: InputFormat) -> Vec<String> {
    let echo = match format {
        InputFormat::Lines => "value is {{.value}}",
        InputFormat::Csv | InputFormat::JsonLines => "foo is {{.foo}}, bar is {{.bar}}",
    };
    vec!["echo".to_string(), echo.to_string()]
}

async fn open_cache(
    location: Option<&str>,
) -> Result<(Arc<dyn Cache>, Option<SystemTime>)> {
    match location {
        Some(uri) if uri.starts_with("s3://") => {
            let cache = S3Cache::connect(uri)
                .await
                .context("cannot initialise the S3 cache")?;
            Ok((Arc::new(cache), aws_expiry_time()))
        }
        Some(path) => Ok((Arc::new(DirCache::open(path).await?), None)),
        None => {
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .context("cannot determine the home directory for the default cache")?;
            let root = home.join(".cache").join("volley");
            Ok((Arc::new(DirCache::open(root).await?), None))
        }
    }
}

/// Wind the run down before the AWS credentials expire. Refuses to
/// start inside the safety margin.
fn spawn_expiry_watch(expiry: SystemTime, shutdown: Shutdown) -> Result<()> {
    let margin = expiry - EXPIRY_SAFETY_MARGIN;
    let remaining = margin
        .duration_since(SystemTime::now())
        .ok()
        .filter(|d| !d.is_zero())
        .context("too close to AWS token expiration")?;
    info!(
        shutting_down_in = %friendly_duration(remaining),
        "shutting down before the AWS token expires"
    );
    tokio::spawn(async move {
        tokio::time::sleep(remaining).await;
        shutdown.cancel(EngineError::Fatal(
            "AWS token will expire soon".to_string(),
        ));
    });
    Ok(())
}

/// Forward SIGINT / SIGTERM / SIGHUP into a channel the escalation
/// controller counts. Sends are non-blocking: a flood of interrupts
/// beyond the buffered couple is collapsed, exactly like a pending
/// signal.
fn forward_interrupts() -> Result<mpsc::Receiver<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let (tx, rx) = mpsc::channel(2);
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
                _ = hangup.recv() => {}
            }
            if tx.try_send(()).is_err() && tx.is_closed() {
                return;
            }
        }
    });
    Ok(rx)
}
