use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Assistant,
    System,
    Error,
    CommandResult,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::User => "user",
            EntryKind::Assistant => "assistant",
            EntryKind::System => "system",
            EntryKind::Error => "error",
            EntryKind::CommandResult => "command_result",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub kind: EntryKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(kind: EntryKind, text: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            text: text.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Append-only conversation log.
///
/// Streaming assistant output never lands in `entries` piecemeal: fragments are
/// held in a side buffer and committed as one entry when the turn finishes.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    streaming: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EntryKind, text: impl Into<String>) -> &TranscriptEntry {
        self.push_with_payload(kind, text, None)
    }

    pub fn push_with_payload(
        &mut self,
        kind: EntryKind,
        text: impl Into<String>,
        payload: Option<Value>,
    ) -> &TranscriptEntry {
        let index = self.entries.len();
        self.entries.push(TranscriptEntry::new(kind, text, payload));
        &self.entries[index]
    }

    pub fn append_delta(&mut self, fragment: &str) {
        self.streaming.get_or_insert_with(String::new).push_str(fragment);
    }

    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    /// Commits the streamed turn. Explicit content wins over the buffer;
    /// nothing is appended when both are empty.
    pub fn finish_stream(&mut self, content: &str) -> Option<&TranscriptEntry> {
        let buffered = self.streaming.take().unwrap_or_default();
        let text = if content.is_empty() {
            buffered
        } else {
            content.to_string()
        };
        if text.is_empty() {
            return None;
        }
        Some(self.push(EntryKind::Assistant, text))
    }

    /// A completed `response` supersedes any partial stream for the turn.
    pub fn push_response(&mut self, content: &str) -> &TranscriptEntry {
        self.streaming = None;
        self.push(EntryKind::Assistant, content)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn entries_since(&self, cursor: usize) -> &[TranscriptEntry] {
        self.entries.get(cursor..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.streaming = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_fragments_commit_as_single_entry() {
        let mut transcript = Transcript::new();
        transcript.push(EntryKind::User, "hello");
        transcript.append_delta("Hel");
        transcript.append_delta("lo ");
        transcript.append_delta("there");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.streaming_text(), Some("Hello there"));

        let entry = transcript.finish_stream("").expect("entry").clone();
        assert_eq!(entry.kind, EntryKind::Assistant);
        assert_eq!(entry.text, "Hello there");
        assert_eq!(transcript.len(), 2);
        assert!(transcript.streaming_text().is_none());
    }

    #[test]
    fn response_discards_partial_stream() {
        let mut transcript = Transcript::new();
        transcript.append_delta("partial");
        transcript.push_response("full answer");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].text, "full answer");
        assert!(transcript.streaming_text().is_none());
    }

    #[test]
    fn empty_stream_finish_appends_nothing() {
        let mut transcript = Transcript::new();
        assert!(transcript.finish_stream("").is_none());
        assert!(transcript.is_empty());
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut transcript = Transcript::new();
        transcript.push(EntryKind::System, "Connected to /repo");
        transcript.push(EntryKind::User, "status?");
        transcript.push(EntryKind::Error, "boom");
        let kinds: Vec<_> = transcript.entries().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EntryKind::System, EntryKind::User, EntryKind::Error]);
        assert_eq!(transcript.entries_since(2).len(), 1);
        assert!(transcript.entries_since(10).is_empty());
    }
}
