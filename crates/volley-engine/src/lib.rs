//! volley-engine: the job dispatch engine behind the `volley` binary.
//!
//! This crate provides:
//!
//! - **Sources**: line / CSV / JSON-line record streams off a blocking reader
//! - **Templates**: `{{.field}}` command and stdin rendering
//! - **Cache**: success/failure persistence (local directory or S3)
//! - **Ingestor**: render, fingerprint, dedupe/debounce, prioritize
//! - **Sorter**: streaming priority queue over `(last run, index)`
//! - **Workers**: concurrent child processes with combined capture
//! - **Interrupts**: four-stage escalation from "stop dispatching" to
//!   "SIGKILL the process groups"
//! - **Reporting**: deduplicated status lines with live ETA

pub mod cache;
pub mod engine;
pub mod error;
pub mod etc;
pub mod limit;
pub mod rate;
pub mod shutdown;
pub mod source;
pub mod stats;
pub mod template;

mod ingest;
mod interrupt;
mod reporter;
mod sorter;
mod worker;

// Data types re-exported from volley-types.
pub use volley_types::{JobOutcome, OutcomeKind, Record, RenderedCommand};

pub use cache::{aws_expiry_time, Cache, CacheError, CacheResult, DirCache, S3Cache};
pub use engine::{Engine, EngineOpts};
pub use error::{EngineError, EngineResult};
pub use shutdown::Shutdown;
pub use source::{spawn_reader, InputFormat, SourceItem};
pub use stats::Stats;
pub use template::{CommandTemplate, Template, TemplateError};
