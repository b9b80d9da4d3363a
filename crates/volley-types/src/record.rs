//! Records and rendered commands.
//!
//! A [`Record`] is one parsed input row: field name → value. A
//! [`RenderedCommand`] is a record materialized into a concrete argv
//! (plus an optional stdin payload) by the template renderer. The
//! rendered command's [`marker`](RenderedCommand::marker) is the
//! deterministic fingerprint used as its cache key.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One parsed input row, keyed by field name. Insertion order is
/// irrelevant.
pub type Record = HashMap<String, String>;

/// A record materialized into a shell-level command.
///
/// Exclusively owned by whichever channel or queue currently holds it;
/// the engine never shares a rendered command between tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedCommand {
    /// The argument vector. Always at least one element (the program).
    pub argv: Vec<String>,
    /// Optional stdin payload, supplied to the child repeatedly,
    /// newline-terminated, for as long as it keeps reading.
    pub stdin: Option<String>,
}

impl RenderedCommand {
    /// Create a command with no stdin payload.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, stdin: None }
    }

    /// The deterministic fingerprint of this command, safe to use as a
    /// filesystem or object-store key.
    ///
    /// Computed as the hex encoding of SHA-256 over each argument
    /// followed by a tab separator, then the stdin payload when
    /// nonempty. Two commands with identical argv and stdin always
    /// produce identical markers, across processes and platforms.
    pub fn marker(&self) -> String {
        let mut hasher = Sha256::new();
        for arg in &self.argv {
            hasher.update(arg.as_bytes());
            hasher.update(b"\t");
        }
        if let Some(stdin) = &self.stdin {
            if !stdin.is_empty() {
                hasher.update(stdin.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RenderedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}
