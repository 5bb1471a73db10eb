//! Read-only API contract the follow engine hydrates conversations through,
//! plus the tolerant domain records it exchanges.

use async_trait::async_trait;
use inbox_core::{json_bool, json_field, json_path, json_string, json_u64, value_as_u64};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Resolved,
    Pending,
    Snoozed,
    #[default]
    Unknown,
}

impl ConversationStatus {
    /// Parses a filter or payload token; returns `None` for unrecognized input.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            "pending" => Some(Self::Pending),
            "snoozed" => Some(Self::Snoozed),
            _ => None,
        }
    }

    /// Lenient payload decoding: anything unrecognized becomes `Unknown`.
    pub fn from_payload(value: &Value) -> Self {
        value
            .as_str()
            .and_then(Self::parse)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Pending => "pending",
            Self::Snoozed => "snoozed",
            Self::Unknown => "unknown",
        }
    }
}

/// Authoritative conversation record as returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: u64,
    pub inbox_id: u64,
    pub status: ConversationStatus,
    pub priority: Option<String>,
    pub assignee_id: Option<u64>,
    pub contact_id: u64,
    /// `None` when the record did not carry labels at all.
    pub labels: Option<Vec<String>>,
}

impl Conversation {
    /// Decodes a conversation payload; returns `None` when no usable id is present.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = json_u64(value, "id")?;
        let labels = json_field(value, "labels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.as_str().map(ToOwned::to_owned))
                    .collect::<Vec<_>>()
            });
        Some(Self {
            id,
            inbox_id: json_u64(value, "inbox_id").unwrap_or(0),
            status: json_field(value, "status")
                .map(ConversationStatus::from_payload)
                .unwrap_or_default(),
            priority: json_string(value, "priority"),
            assignee_id: json_path(value, &["meta", "assignee", "id"])
                .and_then(value_as_u64)
                .or_else(|| json_u64(value, "assignee_id")),
            contact_id: json_path(value, &["meta", "sender", "id"])
                .and_then(value_as_u64)
                .or_else(|| json_u64(value, "contact_id"))
                .unwrap_or(0),
            labels,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: u64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl Contact {
    pub fn from_value(value: &Value) -> Option<Self> {
        let value = json_field(value, "payload").unwrap_or(value);
        Some(Self {
            id: json_u64(value, "id")?,
            name: json_string(value, "name"),
            email: json_string(value, "email"),
            phone_number: json_string(value, "phone_number"),
        })
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("contact #{}", self.id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: u64,
    pub conversation_id: u64,
    pub content: String,
    pub message_type: String,
    /// Unix seconds; zero when the payload carried no usable timestamp.
    pub created_at: u64,
    pub sender_name: Option<String>,
    pub private: bool,
}

impl Message {
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            id: json_u64(value, "id")?,
            conversation_id: json_u64(value, "conversation_id").unwrap_or(0),
            content: json_string(value, "content").unwrap_or_default(),
            message_type: json_field(value, "message_type")
                .map(message_type_label)
                .unwrap_or_else(|| "unknown".to_string()),
            created_at: json_u64(value, "created_at").unwrap_or(0),
            sender_name: json_path(value, &["sender", "name"])
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToOwned::to_owned),
            private: json_bool(value, "private").unwrap_or(false),
        })
    }
}

/// Maps the numeric message type codes onto their names; strings pass through.
pub fn message_type_label(value: &Value) -> String {
    if let Some(code) = value_as_u64(value) {
        return match code {
            0 => "incoming",
            1 => "outgoing",
            2 => "activity",
            3 => "template",
            _ => "unknown",
        }
        .to_string();
    }
    value
        .as_str()
        .map(|raw| raw.trim().to_ascii_lowercase())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, Error)]
/// Failures reported by a [`ConversationApi`] implementation.
pub enum ApiError {
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("api returned non-success status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[async_trait]
/// Read-only collaborator used to hydrate conversation snapshots.
pub trait ConversationApi: Send + Sync {
    async fn get_conversation(&self, conversation_id: u64) -> Result<Conversation, ApiError>;

    async fn get_contact(&self, contact_id: u64) -> Result<Contact, ApiError>;

    /// Returns one page of messages older than `before_id` (newest page when `None`).
    async fn list_messages(
        &self,
        conversation_id: u64,
        before_id: Option<u64>,
        page_size: usize,
    ) -> Result<Vec<Message>, ApiError>;

    async fn list_labels(&self, conversation_id: u64) -> Result<Vec<String>, ApiError>;
}
