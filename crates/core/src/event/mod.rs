//! Events emitted by detectors and the listeners that receive them.

use std::{
    fmt,
    io::Write,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde::{Deserialize, Serialize};

use crate::sync::lock_recover;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    /// The event is still open; more updates with the same glue id follow.
    Continued,
    Completed,
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventState::Continued => f.write_str("CONTINUED"),
            EventState::Completed => f.write_str("COMPLETED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventPayload {
    #[default]
    Empty,
    String(String),
    /// Named values, in dimension order.
    Map(Vec<(String, f32)>),
    Tuple(Vec<f32>),
}

/// One update of a detected event. Times are in milliseconds of stream time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sender: String,
    pub name: String,
    pub time: u64,
    pub dur: u64,
    pub state: EventState,
    pub payload: EventPayload,
    /// Correlates the CONTINUED updates and the final COMPLETED update of one
    /// logical event.
    pub glue_id: Option<u64>,
}

impl Event {
    pub fn new(sender: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            name: name.into(),
            time: 0,
            dur: 0,
            state: EventState::Completed,
            payload: EventPayload::Empty,
            glue_id: None,
        }
    }

    /// `name@sender`, the address listeners filter on.
    pub fn address(&self) -> String {
        format!("{}@{}", self.name, self.sender)
    }
}

/// Receives events from a sender. Called on the thread that drives the
/// sender.
pub trait EventListener: Send {
    fn update(&mut self, event: &Event);
}

/// Source of glue ids. Shared between senders that must not hand out the
/// same id twice.
#[derive(Debug)]
pub struct UniqueIds {
    next: AtomicU64,
}

impl UniqueIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for UniqueIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps every event it receives. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        lock_recover(&self.events).clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *lock_recover(&self.events))
    }

    pub fn len(&self) -> usize {
        lock_recover(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventListener for EventCollector {
    fn update(&mut self, event: &Event) {
        lock_recover(&self.events).push(event.clone());
    }
}

/// Writes each event as one line of JSON.
pub struct JsonLinesListener<W: Write + Send> {
    writer: W,
    written: usize,
}

impl<W: Write + Send> JsonLinesListener<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventListener for JsonLinesListener<W> {
    fn update(&mut self, event: &Event) {
        let result = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(self.writer))
            .and_then(|()| self.writer.flush());
        match result {
            Ok(()) => self.written += 1,
            Err(err) => {
                tracing::warn!(event = %event.address(), error = %err, "failed to write event")
            }
        }
    }
}

impl<W: Write + Send> fmt::Debug for JsonLinesListener<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesListener")
            .field("written", &self.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_start_at_one() {
        let ids = UniqueIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn collector_clones_share_events() {
        let collector = EventCollector::new();
        let mut listener = collector.clone();

        listener.update(&Event::new("trigger", "event"));
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.take().len(), 1);
        assert!(collector.is_empty());
    }

    #[test]
    fn json_lines_are_parseable() {
        let mut listener = JsonLinesListener::new(Vec::new());
        let mut event = Event::new("trigger", "onset");
        event.time = 100;
        event.dur = 700;
        event.glue_id = Some(3);
        event.payload = EventPayload::Map(vec![("rms".to_string(), 0.5)]);

        listener.update(&event);
        listener.update(&Event::new("trigger", "offset"));
        assert_eq!(listener.written(), 2);

        let text = String::from_utf8(listener.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Event = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, event);
        assert!(lines[0].contains("\"state\":\"COMPLETED\""));
    }

    #[test]
    fn address_joins_name_and_sender() {
        assert_eq!(Event::new("audio", "onset").address(), "onset@audio");
    }
}
