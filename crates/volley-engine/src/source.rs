//! Record sources.
//!
//! Input arrives as a byte stream on a blocking reader (usually the
//! process's stdin) and leaves as a bounded channel of parsed records.
//! The reader runs on its own blocking thread so a slow or interactive
//! input never stalls the runtime.
//!
//! Per-record problems (a malformed CSV row) are delivered as
//! [`SourceItem::Malformed`] so the ingestor can count them; problems
//! that make the rest of the stream meaningless (an unparseable CSV
//! header, a bad JSON line) cancel the engine with a fatal cause.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use tokio::sync::mpsc;
use tracing::warn;

use volley_types::Record;

use crate::error::EngineError;
use crate::shutdown::Shutdown;

/// How to interpret the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    /// One whitespace-trimmed record per line, under the field `value`.
    #[default]
    Lines,
    /// CSV with a header row; cells and header names are trimmed.
    Csv,
    /// One JSON object per line, string fields only.
    JsonLines,
}

/// One item off the input stream.
#[derive(Debug)]
pub enum SourceItem {
    Record(Record),
    /// A row that could not be parsed. Logged and counted as failed.
    Malformed(String),
}

/// Start a blocking reader thread that parses `reader` as `format` and
/// feeds records into the returned channel. The thread stops at EOF, on
/// engine cancellation, or when the receiver is dropped.
pub fn spawn_reader(
    format: InputFormat,
    reader: Box<dyn Read + Send>,
    shutdown: Shutdown,
) -> mpsc::Receiver<SourceItem> {
    let (tx, rx) = mpsc::channel(10);
    tokio::task::spawn_blocking(move || match format {
        InputFormat::Lines => read_lines(reader, tx, shutdown),
        InputFormat::Csv => read_csv(reader, tx, shutdown),
        InputFormat::JsonLines => read_json_lines(reader, tx, shutdown),
    });
    rx
}

fn deliver(tx: &mpsc::Sender<SourceItem>, shutdown: &Shutdown, item: SourceItem) -> bool {
    if shutdown.is_cancelled() {
        return false;
    }
    tx.blocking_send(item).is_ok()
}

fn read_lines(reader: Box<dyn Read + Send>, tx: mpsc::Sender<SourceItem>, shutdown: Shutdown) {
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                shutdown.cancel(EngineError::InputFatal(e.to_string()));
                return;
            }
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let record = Record::from([("value".to_string(), text.to_string())]);
        if !deliver(&tx, &shutdown, SourceItem::Record(record)) {
            return;
        }
    }
}

fn read_csv(reader: Box<dyn Read + Send>, tx: mpsc::Sender<SourceItem>, shutdown: Shutdown) {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let header: Vec<String> = match csv_reader.headers() {
        Ok(header) => header.iter().map(str::to_string).collect(),
        Err(e) => {
            shutdown.cancel(EngineError::InputFatal(format!(
                "could not parse the header line of what should be a CSV file: {e}"
            )));
            return;
        }
    };
    for row in csv_reader.into_records() {
        let item = match row {
            Ok(row) => {
                let record: Record = header
                    .iter()
                    .cloned()
                    .zip(row.iter().map(str::to_string))
                    .collect();
                SourceItem::Record(record)
            }
            Err(e) => SourceItem::Malformed(e.to_string()),
        };
        if !deliver(&tx, &shutdown, item) {
            return;
        }
    }
}

fn read_json_lines(reader: Box<dyn Read + Send>, tx: mpsc::Sender<SourceItem>, shutdown: Shutdown) {
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                shutdown.cancel(EngineError::InputFatal(e.to_string()));
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let record: HashMap<String, String> = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "input line is not a JSON object of strings");
                shutdown.cancel(EngineError::InputFatal(e.to_string()));
                return;
            }
        };
        if !deliver(&tx, &shutdown, SourceItem::Record(record)) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(format: InputFormat, input: &'static str) -> Vec<SourceItem> {
        let shutdown = Shutdown::new();
        let mut rx = spawn_reader(format, Box::new(input.as_bytes()), shutdown);
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    fn field<'a>(item: &'a SourceItem, name: &str) -> &'a str {
        match item {
            SourceItem::Record(r) => r.get(name).map(String::as_str).unwrap_or("<absent>"),
            SourceItem::Malformed(e) => panic!("malformed: {e}"),
        }
    }

    #[tokio::test]
    async fn lines_trim_and_skip_blanks() {
        let items = collect(InputFormat::Lines, "  one \n\n two\nthree\n").await;
        assert_eq!(items.len(), 3);
        assert_eq!(field(&items[0], "value"), "one");
        assert_eq!(field(&items[1], "value"), "two");
    }

    #[tokio::test]
    async fn csv_names_fields_from_the_header() {
        let items = collect(InputFormat::Csv, " foo , bar\n1, a \n2,b\n").await;
        assert_eq!(items.len(), 2);
        assert_eq!(field(&items[0], "foo"), "1");
        assert_eq!(field(&items[0], "bar"), "a");
        assert_eq!(field(&items[1], "bar"), "b");
    }

    #[tokio::test]
    async fn csv_arity_mismatch_is_malformed_not_fatal() {
        let items = collect(InputFormat::Csv, "foo,bar\n1,a\nonly-one\n2,b\n").await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], SourceItem::Malformed(_)));
        assert_eq!(field(&items[2], "foo"), "2");
    }

    #[tokio::test]
    async fn json_lines_parse_objects() {
        let items = collect(
            InputFormat::JsonLines,
            "{\"foo\": \"1\", \"bar\": \"x\"}\n{\"foo\": \"2\", \"bar\": \"y\"}\n",
        )
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(field(&items[1], "bar"), "y");
    }

    #[tokio::test]
    async fn bad_json_cancels_the_engine() {
        let shutdown = Shutdown::new();
        let mut rx = spawn_reader(
            InputFormat::JsonLines,
            Box::new("{\"ok\": \"1\"}\nnot json\n{\"ok\": \"2\"}\n".as_bytes()),
            shutdown.clone(),
        );
        let mut delivered = 0;
        while rx.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 1, "ingestion stops at the malformed line");
        assert!(shutdown.is_cancelled());
        assert!(matches!(
            shutdown.cause(),
            Some(EngineError::InputFatal(_))
        ));
    }

    #[tokio::test]
    async fn bad_csv_header_cancels_the_engine() {
        let shutdown = Shutdown::new();
        // invalid UTF-8 in the header is unrecoverable
        let mut rx = spawn_reader(
            InputFormat::Csv,
            Box::new(b"foo,b\xffar\n1,2\n".as_slice()),
            shutdown.clone(),
        );
        while rx.recv().await.is_some() {}
        assert!(shutdown.is_cancelled());
    }
}
