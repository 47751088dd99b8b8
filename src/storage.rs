//! File-backed event log: one `eventfold` log directory per aggregate stream.
//!
//! Records are stored as `eventfold::Event`s. The `event_name` becomes the
//! eventfold `event_type`, the payload is the eventfold `data`, and the
//! record identity (`event_id`, `aggregate_id`, `aggregate_name`) rides in
//! `meta`.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use eventfold::{EventReader, EventWriter};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::LogError;
use crate::event::StoredEvent;
use crate::log::{EventLog, ExpectedVersion, events_after};

/// On-disk layout of a [`JsonlEventLog`].
///
/// ```text
/// <base_dir>/
///     streams/
///         <aggregate_name>/
///             <aggregate_id>/     -- eventfold log directory
///     meta/
///         streams.jsonl           -- one line per stream, written on first append
/// ```
///
/// Both path components are checked: an aggregate name or id that is empty,
/// `.`/`..`, absolute, or contains a separator is rejected instead of being
/// joined onto the base directory.
#[derive(Debug, Clone)]
pub struct StreamLayout {
    base_dir: PathBuf,
}

/// One line of `meta/streams.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
struct StreamEntry {
    aggregate_name: String,
    aggregate_id: String,
}

impl StreamLayout {
    /// The directory does not need to exist yet.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base_dir>/streams/<aggregate_name>/<aggregate_id>`
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Backend`] if either part is not a single plain
    /// path component.
    pub fn stream_dir(&self, aggregate_name: &str, aggregate_id: &str) -> Result<PathBuf, LogError> {
        plain_component("aggregate name", aggregate_name)?;
        plain_component("aggregate id", aggregate_id)?;
        Ok(self
            .base_dir
            .join("streams")
            .join(aggregate_name)
            .join(aggregate_id))
    }

    fn registry_path(&self) -> PathBuf {
        self.base_dir.join("meta").join("streams.jsonl")
    }

    /// Ids of every `aggregate_name` stream that has received an append,
    /// sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the registry exists but cannot be read.
    pub fn list_streams(&self, aggregate_name: &str) -> io::Result<Vec<String>> {
        let file = match fs::File::open(self.registry_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = BTreeSet::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            // A torn trailing line from a crashed writer is not fatal.
            let Ok(entry) = serde_json::from_str::<StreamEntry>(&line) else {
                continue;
            };
            if entry.aggregate_name == aggregate_name {
                ids.insert(entry.aggregate_id);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Record a newly created stream in the registry.
    fn register(&self, aggregate_name: &str, aggregate_id: &str) -> Result<(), LogError> {
        let path = self.registry_path();
        if let Some(meta) = path.parent() {
            fs::create_dir_all(meta)?;
        }
        let line = serde_json::to_string(&StreamEntry {
            aggregate_name: aggregate_name.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
        })?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Every readable record of one stream, in append order.
    fn read_stream(&self, aggregate_name: &str, aggregate_id: &str) -> Result<Vec<StoredEvent>, LogError> {
        let dir = self.stream_dir(aggregate_name, aggregate_id)?;
        let reader = EventReader::new(&dir);
        let iter = match reader.read_from(0) {
            Ok(iter) => iter,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for result in iter {
            match result {
                Ok((event, _next_offset, line_hash)) => {
                    events.push(from_eventfold(
                        event,
                        aggregate_name,
                        aggregate_id,
                        line_hash.to_string(),
                    )?);
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!(
                        stream = %dir.display(),
                        error = %e,
                        "skipping unreadable event record"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(events)
    }

    /// Append one record, checking the stream length first when `expected`
    /// asks for it. Callers hold the log's write lock.
    fn append(
        &self,
        aggregate_name: &str,
        aggregate_id: &str,
        event: &eventfold::Event,
        expected: ExpectedVersion,
    ) -> Result<(), LogError> {
        let dir = self.stream_dir(aggregate_name, aggregate_id)?;

        if let ExpectedVersion::Exact(_) = expected {
            let current = self.read_stream(aggregate_name, aggregate_id)?;
            expected.check(current.len() as u64)?;
        }

        let is_new = !dir.exists();
        fs::create_dir_all(&dir)?;
        // The writer holds eventfold's flock until it is dropped.
        let mut writer = EventWriter::open(&dir)?;
        writer.append(event)?;
        drop(writer);

        if is_new {
            self.register(aggregate_name, aggregate_id)?;
        }
        Ok(())
    }
}

/// Accept only a single normal path component.
fn plain_component(what: &str, value: &str) -> Result<(), LogError> {
    let mut parts = Path::new(value).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(part)), None) if part.to_str() == Some(value) => Ok(()),
        _ => Err(LogError::Backend(format!(
            "{what} {value:?} is not usable as a stream directory name"
        ))),
    }
}

fn to_eventfold(record: &StoredEvent, data: serde_json::Value) -> eventfold::Event {
    eventfold::Event::new(&record.event_name, data).with_meta(serde_json::json!({
        "event_id": record.event_id,
        "aggregate_id": record.aggregate_id,
        "aggregate_name": record.aggregate_name,
    }))
}

/// Records written without our `meta` fall back to the stream they were
/// read from, and to the line hash as their id.
fn from_eventfold(
    event: eventfold::Event,
    aggregate_name: &str,
    aggregate_id: &str,
    line_hash: String,
) -> Result<StoredEvent, LogError> {
    let meta_str = |key: &str| {
        event
            .meta
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    };

    Ok(StoredEvent {
        event_id: meta_str("event_id").unwrap_or(line_hash),
        aggregate_id: meta_str("aggregate_id").unwrap_or_else(|| aggregate_id.to_owned()),
        aggregate_name: meta_str("aggregate_name").unwrap_or_else(|| aggregate_name.to_owned()),
        data: serde_json::to_string(&event.data)?,
        event_name: event.event_type,
    })
}

/// An [`EventLog`] persisted with `eventfold`, one log directory per stream
/// under a [`StreamLayout`].
///
/// Appends within one process are serialized by an internal lock that the
/// blocking append task owns until it finishes, so the expected-version
/// check and the write are atomic even if the caller's future is dropped.
/// Across processes, eventfold's writer lock keeps appends to one stream
/// exclusive.
#[derive(Debug)]
pub struct JsonlEventLog {
    layout: StreamLayout,
    write_lock: Arc<Mutex<()>>,
}

impl JsonlEventLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: StreamLayout::new(base_dir),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn store_event(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        event_name: &str,
        data: serde_json::Value,
        expected: ExpectedVersion,
    ) -> Result<(), LogError> {
        let record = StoredEvent::new(aggregate_id, aggregate_name, event_name, &data)?;
        let event = to_eventfold(&record, data);
        let layout = self.layout.clone();

        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            layout.append(&record.aggregate_name, &record.aggregate_id, &event, expected)
        })
        .await
        .map_err(|e| LogError::Backend(format!("append task failed: {e}")))?
    }

    async fn fetch_aggregate_events(
        &self,
        aggregate_id: &str,
        aggregate_name: &str,
        from_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let layout = self.layout.clone();
        let (name, id) = (aggregate_name.to_owned(), aggregate_id.to_owned());

        let events = tokio::task::spawn_blocking(move || layout.read_stream(&name, &id))
            .await
            .map_err(|e| LogError::Backend(format!("fetch task failed: {e}")))??;
        Ok(events_after(&events, from_id))
    }
}
