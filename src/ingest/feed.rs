//! Newline-delimited JSON feed reader.
//!
//! Stands in for the upstream detection/tracking producer: each line of the
//! input is one [`InboundEvent`]. Lines are parsed on a reader thread and
//! handed to the engine loop over a bounded channel.

use crate::ingest::types::InboundEvent;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Capacity of the event channel between the reader thread and the engine.
const CHANNEL_CAPACITY: usize = 10_000;

/// Where feed lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Stdin,
    File(PathBuf),
}

impl FeedSource {
    /// `-` selects stdin, anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            FeedSource::Stdin
        } else {
            FeedSource::File(PathBuf::from(arg))
        }
    }
}

impl std::fmt::Display for FeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedSource::Stdin => write!(f, "stdin"),
            FeedSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur while reading a feed.
#[derive(Debug)]
pub enum FeedError {
    AlreadyRunning,
    Io(std::io::Error),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::AlreadyRunning => write!(f, "Feed reader is already running"),
            FeedError::Io(e) => write!(f, "Feed IO error: {e}"),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeedError::Io(e) => Some(e),
            FeedError::AlreadyRunning => None,
        }
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::Io(err)
    }
}

/// Reads inbound events on a background thread.
pub struct FeedReader {
    source: FeedSource,
    sender: Option<Sender<InboundEvent>>,
    receiver: Receiver<InboundEvent>,
    running: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl FeedReader {
    /// Create a new reader for the given source.
    pub fn new(source: FeedSource) -> Self {
        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        Self {
            source,
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            skipped: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Start reading.
    ///
    /// The channel disconnects once the input is exhausted and the reader
    /// thread exits. A reader can only be started once.
    pub fn start(&mut self) -> Result<(), FeedError> {
        if self.running.load(Ordering::SeqCst) || self.sender.is_none() {
            return Err(FeedError::AlreadyRunning);
        }

        let input: Box<dyn Read + Send> = match &self.source {
            FeedSource::Stdin => Box::new(std::io::stdin()),
            FeedSource::File(path) => Box::new(std::fs::File::open(path)?),
        };

        self.running.store(true, Ordering::SeqCst);

        // The thread owns the only sender so that the receiver observes a
        // disconnect at end of input.
        let Some(sender) = self.sender.take() else {
            return Err(FeedError::AlreadyRunning);
        };
        let running = self.running.clone();
        let skipped = self.skipped.clone();

        self.handle = Some(std::thread::spawn(move || {
            read_lines(input, &sender, &running, &skipped);
            running.store(false, Ordering::SeqCst);
        }));

        Ok(())
    }

    /// Ask the reader thread to stop after its current line.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the reader is still producing events.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of lines discarded because they did not parse.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Get the receiver for inbound events.
    pub fn receiver(&self) -> &Receiver<InboundEvent> {
        &self.receiver
    }
}

impl Drop for FeedReader {
    fn drop(&mut self) {
        self.stop();
        // Reader may be blocked on stdin; don't join.
        self.handle.take();
    }
}

fn read_lines(
    input: Box<dyn Read + Send>,
    sender: &Sender<InboundEvent>,
    running: &AtomicBool,
    skipped: &AtomicU64,
) {
    let reader = BufReader::new(input);

    for (line_no, line) in reader.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Feed read failed at line {}: {}", line_no + 1, e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line) {
            Some(event) => {
                if sender.send(event).is_err() {
                    break;
                }
            }
            None => {
                skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Skipping malformed feed line {}", line_no + 1);
            }
        }
    }
}

/// Parse one feed line into an event.
pub fn parse_line(line: &str) -> Option<InboundEvent> {
    serde_json::from_str(line.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn temp_feed(lines: &[&str]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("herdsense-feed-{}.jsonl", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn test_source_from_arg() {
        assert_eq!(FeedSource::from_arg("-"), FeedSource::Stdin);
        assert_eq!(
            FeedSource::from_arg("events.jsonl"),
            FeedSource::File(PathBuf::from("events.jsonl"))
        );
    }

    #[test]
    fn test_reader_delivers_events_and_skips_garbage() {
        let path = temp_feed(&[
            r#"{"type":"tracking","tracks":[],"timestamp":"2024-05-01T12:00:00Z"}"#,
            "not json",
            "",
            r#"{"type":"detection","camera_id":"c","count":0,"positions":[],"timestamp":"2024-05-01T12:00:01Z"}"#,
        ]);

        let mut reader = FeedReader::new(FeedSource::File(path.clone()));
        reader.start().unwrap();

        let mut events = Vec::new();
        while let Ok(event) = reader.receiver().recv_timeout(Duration::from_secs(2)) {
            events.push(event);
        }

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InboundEvent::Tracking(_)));
        assert!(matches!(events[1], InboundEvent::Detection(_)));
        assert_eq!(reader.skipped_lines(), 1);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut reader = FeedReader::new(FeedSource::File(PathBuf::from(
            "/nonexistent/herdsense/feed.jsonl",
        )));
        assert!(matches!(reader.start(), Err(FeedError::Io(_))));
        assert!(!reader.is_running());
    }
}
