//! Output records and the sink that writes them to the matched-event stream.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::conversation_state::ConversationState;
use crate::event_interpreter::FollowEvent;
use crate::follow_error::FollowError;
use crate::snapshot_builder::ConversationSnapshot;

pub const RECORD_TYPE_EVENT: &str = "event";
pub const RECORD_TYPE_SNAPSHOT: &str = "snapshot";
pub const RECORD_TYPE_SNAPSHOT_ERROR: &str = "snapshot_error";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    /// One compact JSON object per line.
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" | "jsonl" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn event_record(event: &FollowEvent, state: Option<&ConversationState>) -> Value {
    json!({
        "type": RECORD_TYPE_EVENT,
        "event": event.event_type(),
        "conversation_id": event.conversation_id(),
        "summary": event.summary_line(),
        "data": event,
        "state": state,
    })
}

pub fn snapshot_record(snapshot: &ConversationSnapshot) -> Value {
    json!({
        "type": RECORD_TYPE_SNAPSHOT,
        "event": RECORD_TYPE_SNAPSHOT,
        "conversation_id": snapshot.conversation.id,
        "summary": snapshot.summary,
        "conversation": snapshot.conversation,
        "contact": snapshot.contact,
        "messages": snapshot.messages,
    })
}

pub fn snapshot_error_record(
    conversation_id: u64,
    trigger_event: &str,
    error: &FollowError,
) -> Value {
    json!({
        "type": RECORD_TYPE_SNAPSHOT_ERROR,
        "event": trigger_event,
        "conversation_id": conversation_id,
        "reason_code": error.reason_code(),
        "error": error.to_string(),
    })
}

/// Renders a record, including the trailing newline.
pub fn render_record(record: &Value, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return format!("{record}\n");
    }
    let kind = record["type"].as_str().unwrap_or(RECORD_TYPE_EVENT);
    let mut rendered = match kind {
        RECORD_TYPE_SNAPSHOT => {
            let mut lines = vec![format!(
                "[snapshot] {}",
                record["summary"].as_str().unwrap_or_default()
            )];
            for message in record["messages"].as_array().into_iter().flatten() {
                lines.push(format!(
                    "  #{} {} {}: {}",
                    message["id"],
                    message["message_type"].as_str().unwrap_or("unknown"),
                    message["sender_name"].as_str().unwrap_or("-"),
                    message["content"]
                        .as_str()
                        .unwrap_or_default()
                        .replace('\n', " ")
                ));
            }
            lines.join("\n")
        }
        RECORD_TYPE_SNAPSHOT_ERROR => format!(
            "[snapshot_error] conv={} {}",
            record["conversation_id"],
            record["error"].as_str().unwrap_or_default()
        ),
        _ => format!(
            "[{}] {}",
            record["event"].as_str().unwrap_or("event"),
            record["summary"].as_str().unwrap_or_default()
        ),
    };
    rendered.push('\n');
    rendered
}

/// Mutex-guarded writer shared between the follow loop and the emitter consumer.
#[derive(Clone)]
pub struct RecordSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    format: OutputFormat,
}

impl RecordSink {
    pub fn new(writer: Box<dyn Write + Send>, format: OutputFormat) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            format,
        }
    }

    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(Box::new(std::io::stdout()), format)
    }

    /// Sink backed by a shared in-memory buffer, returned alongside it.
    pub fn in_memory(format: OutputFormat) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Self::new(
            Box::new(SharedBufferWriter {
                buffer: Arc::clone(&buffer),
            }),
            format,
        );
        (sink, buffer)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn write_record(&self, record: &Value) -> Result<(), FollowError> {
        let rendered = render_record(record, self.format);
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| FollowError::Emit("record sink mutex is poisoned".to_string()))?;
        let write_error = |error: std::io::Error| {
            FollowError::Emit(format!("failed to write record: {error}"))
        };
        writer.write_all(rendered.as_bytes()).map_err(write_error)?;
        writer.flush().map_err(write_error)
    }
}

struct SharedBufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for SharedBufferWriter {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.buffer
            .lock()
            .map_err(|_| std::io::Error::other("buffer mutex is poisoned"))?
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::conversation_api::{ApiError, Conversation, ConversationStatus, Message};

    fn message_event() -> FollowEvent {
        FollowEvent::interpret(
            "message.created",
            &json!({"id": 40, "conversation_id": 12, "content": "hi", "message_type": 0, "sender": {"name": "Jane"}}),
        )
    }

    #[test]
    fn unit_output_format_parse_accepts_aliases() {
        assert_eq!(OutputFormat::parse("TEXT"), Some(OutputFormat::Text));
        assert_eq!(OutputFormat::parse("jsonl"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }

    #[test]
    fn unit_event_record_renders_text_and_json_lines() {
        let state = ConversationState::new(12);
        let record = event_record(&message_event(), Some(&state));
        assert_eq!(record["type"], "event");
        assert_eq!(record["event"], "message.created");
        assert_eq!(record["conversation_id"], 12);
        assert_eq!(record["data"]["kind"], "message_created");
        assert_eq!(record["state"]["id"], 12);

        assert_eq!(
            render_record(&record, OutputFormat::Text),
            "[message.created] conv=12 msg=40 incoming from=Jane: hi\n"
        );
        let json_line = render_record(&record, OutputFormat::Json);
        assert!(json_line.ends_with('\n'));
        assert_eq!(json_line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(json_line.trim()).expect("json");
        assert_eq!(parsed, record);
    }

    #[test]
    fn unit_snapshot_record_lists_messages_in_text_form() {
        let snapshot = ConversationSnapshot {
            conversation: Conversation {
                id: 7,
                status: ConversationStatus::Open,
                ..Conversation::default()
            },
            contact: None,
            messages: vec![Message {
                id: 1,
                conversation_id: 7,
                content: "first\nline".to_string(),
                message_type: "incoming".to_string(),
                created_at: 10,
                sender_name: Some("Jane".to_string()),
                private: false,
            }],
            summary: "conversation #7 [open] inbox=0 unassigned messages=1".to_string(),
        };
        let rendered = render_record(&snapshot_record(&snapshot), OutputFormat::Text);
        assert_eq!(
            rendered,
            "[snapshot] conversation #7 [open] inbox=0 unassigned messages=1\n  #1 incoming Jane: first line\n"
        );
    }

    #[test]
    fn unit_snapshot_error_record_carries_reason_code() {
        let error = FollowError::Snapshot {
            conversation_id: 5,
            source: ApiError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            },
        };
        let record = snapshot_error_record(5, "label.added", &error);
        assert_eq!(record["type"], "snapshot_error");
        assert_eq!(record["reason_code"], "snapshot_error");
        assert!(render_record(&record, OutputFormat::Text).starts_with("[snapshot_error] conv=5 "));
    }

    #[test]
    fn functional_in_memory_sink_collects_rendered_records() {
        let (sink, buffer) = RecordSink::in_memory(OutputFormat::Text);
        sink.write_record(&event_record(&message_event(), None))
            .expect("write");
        let output = String::from_utf8(buffer.lock().expect("buffer").clone()).expect("utf8");
        assert_eq!(output, "[message.created] conv=12 msg=40 incoming from=Jane: hi\n");
    }
}
