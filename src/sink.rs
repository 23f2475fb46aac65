//! Event sinks.
//!
//! A sink receives every emitted event keyed by `(stream_id, timestamp)`.
//! Storage, deduplication and schema are the sink's business; the pipeline
//! only guarantees per-stream timestamp order.

use crate::core::KeyedGazeEvent;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receiver of classified events.
pub trait EventSink: Send + 'static {
    fn accept(&mut self, event: KeyedGazeEvent) -> Result<(), SinkError>;

    /// Flush anything buffered. Called once when the stream ends.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl EventSink for UnboundedSender<KeyedGazeEvent> {
    fn accept(&mut self, event: KeyedGazeEvent) -> Result<(), SinkError> {
        self.send(event).map_err(|_| SinkError::Closed)
    }
}

impl EventSink for Box<dyn EventSink> {
    fn accept(&mut self, event: KeyedGazeEvent) -> Result<(), SinkError> {
        (**self).accept(event)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Collects events in memory behind a shared handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<KeyedGazeEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    pub fn events(&self) -> Vec<KeyedGazeEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn accept(&mut self, event: KeyedGazeEvent) -> Result<(), SinkError> {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.push(event);
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonlSink<W: Write + Send + 'static> {
    writer: W,
    written: usize,
}

impl JsonlSink<BufWriter<File>> {
    /// Create (or truncate) a JSON Lines file.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send + 'static> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of events written.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + 'static> EventSink for JsonlSink<W> {
    fn accept(&mut self, event: KeyedGazeEvent) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GazeEvent, StreamId};
    use chrono::{DateTime, Utc};

    fn keyed(ms: i64) -> KeyedGazeEvent {
        KeyedGazeEvent {
            stream_id: StreamId::new(),
            event: GazeEvent::unclassified(DateTime::<Utc>::from_timestamp_millis(ms).unwrap(), false),
        }
    }

    #[test]
    fn test_memory_sink_shares_events() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.accept(keyed(1)).unwrap();
        writer.accept(keyed(2)).unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.accept(keyed(1)).unwrap();
        sink.accept(keyed(2)).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.written(), 2);

        let bytes = sink.into_inner();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: KeyedGazeEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.event.timestamp.timestamp_millis(), 2);
    }

    #[test]
    fn test_jsonl_sink_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("events.jsonl");
        let mut sink = JsonlSink::create(&path).unwrap();
        sink.accept(keyed(5)).unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_closed_channel_sink_reports_closed() {
        let (mut tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        assert!(matches!(tx.accept(keyed(1)), Err(SinkError::Closed)));
    }
}
