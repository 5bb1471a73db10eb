//! Turns raw push-channel envelopes into typed, render-ready event summaries.
//! Interpretation never mutates state and never fails: absent or malformed
//! fields degrade to empty values.

use inbox_core::{json_bool, json_field, json_path, json_string, json_u64, value_as_u64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation_api::message_type_label;
use crate::conversation_state::{assignee_from_payload, assignee_name_from_payload};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Parses `{"event", "data"}`, also accepting the same envelope nested under a
/// channel frame's `message` field. Returns `None` for anything else.
pub fn parse_event_envelope(raw: &str) -> Option<EventEnvelope> {
    let value = serde_json::from_str::<Value>(raw).ok()?;
    let candidate = match json_field(&value, "message") {
        Some(inner) if inner.is_object() => inner,
        _ => &value,
    };
    let envelope = serde_json::from_value::<EventEnvelope>(candidate.clone()).ok()?;
    (!envelope.event.trim().is_empty()).then_some(envelope)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowEvent {
    ConversationCreated {
        conversation_id: u64,
        contact_name: String,
        inbox_id: u64,
        status: String,
    },
    ConversationStatusChanged {
        conversation_id: u64,
        status: String,
    },
    ConversationUpdated {
        conversation_id: u64,
        status: String,
        labels: Vec<String>,
    },
    AssigneeChanged {
        conversation_id: u64,
        assignee_name: String,
        assigned: bool,
    },
    LabelAdded {
        conversation_id: u64,
        label: String,
    },
    LabelRemoved {
        conversation_id: u64,
        label: String,
    },
    TypingOn {
        conversation_id: u64,
        user_name: String,
    },
    TypingOff {
        conversation_id: u64,
        user_name: String,
    },
    MessageCreated {
        message_id: u64,
        conversation_id: u64,
        content: String,
        message_type: String,
        sender_name: String,
        private: bool,
    },
    Unknown {
        event_type: String,
    },
}

impl FollowEvent {
    pub fn interpret(event_type: &str, payload: &Value) -> Self {
        match event_type {
            "conversation.created" => Self::ConversationCreated {
                conversation_id: conversation_id_of(payload),
                contact_name: json_path(payload, &["meta", "sender", "name"])
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                inbox_id: json_u64(payload, "inbox_id").unwrap_or(0),
                status: json_string(payload, "status").unwrap_or_default(),
            },
            "conversation.status_changed" => Self::ConversationStatusChanged {
                conversation_id: conversation_id_of(payload),
                status: json_string(payload, "status").unwrap_or_default(),
            },
            "conversation.updated" => Self::ConversationUpdated {
                conversation_id: conversation_id_of(payload),
                status: json_string(payload, "status").unwrap_or_default(),
                labels: json_field(payload, "labels")
                    .and_then(Value::as_array)
                    .map(|labels| {
                        labels
                            .iter()
                            .filter_map(Value::as_str)
                            .map(ToOwned::to_owned)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "assignee.changed" => Self::AssigneeChanged {
                conversation_id: conversation_id_of(payload),
                assignee_name: assignee_name_from_payload(payload),
                assigned: matches!(assignee_from_payload(payload), Some(Some(_))),
            },
            "label.added" => Self::LabelAdded {
                conversation_id: label_conversation_id(payload),
                label: label_of(payload),
            },
            "label.removed" => Self::LabelRemoved {
                conversation_id: label_conversation_id(payload),
                label: label_of(payload),
            },
            "conversation.typing_on" => Self::TypingOn {
                conversation_id: typing_conversation_id(payload),
                user_name: typing_user_name(payload),
            },
            "conversation.typing_off" => Self::TypingOff {
                conversation_id: typing_conversation_id(payload),
                user_name: typing_user_name(payload),
            },
            "message.created" => Self::MessageCreated {
                message_id: json_u64(payload, "id").unwrap_or(0),
                conversation_id: json_u64(payload, "conversation_id").unwrap_or(0),
                content: json_string(payload, "content").unwrap_or_default(),
                message_type: json_field(payload, "message_type")
                    .map(message_type_label)
                    .unwrap_or_else(|| "unknown".to_string()),
                sender_name: json_path(payload, &["sender", "name"])
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                private: json_bool(payload, "private").unwrap_or(false),
            },
            other => Self::Unknown {
                event_type: other.to_string(),
            },
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::ConversationCreated { .. } => "conversation.created",
            Self::ConversationStatusChanged { .. } => "conversation.status_changed",
            Self::ConversationUpdated { .. } => "conversation.updated",
            Self::AssigneeChanged { .. } => "assignee.changed",
            Self::LabelAdded { .. } => "label.added",
            Self::LabelRemoved { .. } => "label.removed",
            Self::TypingOn { .. } => "conversation.typing_on",
            Self::TypingOff { .. } => "conversation.typing_off",
            Self::MessageCreated { .. } => "message.created",
            Self::Unknown { event_type } => event_type.as_str(),
        }
    }

    /// Referenced conversation, if the payload carried a usable one.
    pub fn conversation_id(&self) -> Option<u64> {
        let id = match self {
            Self::ConversationCreated {
                conversation_id, ..
            }
            | Self::ConversationStatusChanged {
                conversation_id, ..
            }
            | Self::ConversationUpdated {
                conversation_id, ..
            }
            | Self::AssigneeChanged {
                conversation_id, ..
            }
            | Self::LabelAdded {
                conversation_id, ..
            }
            | Self::LabelRemoved {
                conversation_id, ..
            }
            | Self::TypingOn {
                conversation_id, ..
            }
            | Self::TypingOff {
                conversation_id, ..
            }
            | Self::MessageCreated {
                conversation_id, ..
            } => *conversation_id,
            Self::Unknown { .. } => 0,
        };
        (id != 0).then_some(id)
    }

    pub fn message_id(&self) -> Option<u64> {
        match self {
            Self::MessageCreated { message_id, .. } if *message_id != 0 => Some(*message_id),
            _ => None,
        }
    }

    pub fn summary_line(&self) -> String {
        match self {
            Self::ConversationCreated {
                conversation_id,
                contact_name,
                inbox_id,
                status,
            } => format!(
                "conv={conversation_id} created inbox={inbox_id} contact={} status={}",
                or_placeholder(contact_name),
                or_placeholder(status)
            ),
            Self::ConversationStatusChanged {
                conversation_id,
                status,
            } => format!("conv={conversation_id} status={}", or_placeholder(status)),
            Self::ConversationUpdated {
                conversation_id,
                status,
                labels,
            } => format!(
                "conv={conversation_id} updated status={} labels={}",
                or_placeholder(status),
                if labels.is_empty() {
                    "-".to_string()
                } else {
                    labels.join(",")
                }
            ),
            Self::AssigneeChanged {
                conversation_id,
                assignee_name,
                assigned,
            } => {
                if *assigned {
                    format!(
                        "conv={conversation_id} assigned to {}",
                        or_placeholder(assignee_name)
                    )
                } else {
                    format!("conv={conversation_id} unassigned")
                }
            }
            Self::LabelAdded {
                conversation_id,
                label,
            } => format!("conv={conversation_id} label +{}", or_placeholder(label)),
            Self::LabelRemoved {
                conversation_id,
                label,
            } => format!("conv={conversation_id} label -{}", or_placeholder(label)),
            Self::TypingOn {
                conversation_id,
                user_name,
            } => format!(
                "conv={conversation_id} {} is typing",
                or_placeholder(user_name)
            ),
            Self::TypingOff {
                conversation_id,
                user_name,
            } => format!(
                "conv={conversation_id} {} stopped typing",
                or_placeholder(user_name)
            ),
            Self::MessageCreated {
                message_id,
                conversation_id,
                content,
                message_type,
                sender_name,
                private,
            } => format!(
                "conv={conversation_id} msg={message_id} {message_type}{} from={}: {}",
                if *private { " (private)" } else { "" },
                or_placeholder(sender_name),
                content.replace('\n', " ")
            ),
            Self::Unknown { event_type } => format!("unrecognized event {event_type}"),
        }
    }
}

fn or_placeholder(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

fn conversation_id_of(payload: &Value) -> u64 {
    json_u64(payload, "id")
        .or_else(|| json_u64(payload, "conversation_id"))
        .unwrap_or(0)
}

fn label_conversation_id(payload: &Value) -> u64 {
    json_u64(payload, "conversation_id")
        .or_else(|| json_u64(payload, "id"))
        .unwrap_or(0)
}

fn label_of(payload: &Value) -> String {
    ["label", "title", "name"]
        .iter()
        .find_map(|key| json_string(payload, key))
        .unwrap_or_default()
}

fn typing_conversation_id(payload: &Value) -> u64 {
    json_path(payload, &["conversation", "id"])
        .and_then(value_as_u64)
        .or_else(|| json_u64(payload, "conversation_id"))
        .unwrap_or(0)
}

fn typing_user_name(payload: &Value) -> String {
    json_path(payload, &["user", "name"])
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}
