//! Filter configuration and the pure predicate evaluated against cached state.

use std::collections::BTreeSet;

use crate::conversation_api::ConversationStatus;
use crate::conversation_state::{normalize_labels, ConversationState};
use crate::follow_error::FollowError;

/// Zero ids, `None` status and empty strings/sets are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowFilters {
    pub inbox_id: u64,
    pub status: Option<ConversationStatus>,
    pub assignee_id: u64,
    pub priority: String,
    pub contact_id: u64,
    /// Conjunctive: a conversation must carry every listed label.
    pub labels: BTreeSet<String>,
}

impl FollowFilters {
    /// Builds filters from raw flag values, rejecting unknown status tokens.
    pub fn from_raw(
        inbox_id: u64,
        status: Option<&str>,
        assignee_id: u64,
        priority: Option<&str>,
        contact_id: u64,
        labels: &[String],
    ) -> Result<Self, FollowError> {
        let status = match status.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(ConversationStatus::parse(raw).ok_or_else(|| {
                FollowError::Config(format!(
                    "unsupported status filter '{raw}': expected open, resolved, pending or snoozed"
                ))
            })?),
            None => None,
        };
        Ok(Self {
            inbox_id,
            status,
            assignee_id,
            priority: priority.map(str::trim).unwrap_or_default().to_string(),
            contact_id,
            labels: normalize_labels(labels),
        })
    }

    pub fn is_wildcard(&self) -> bool {
        self.inbox_id == 0
            && self.status.is_none()
            && self.assignee_id == 0
            && self.priority.is_empty()
            && self.contact_id == 0
            && self.labels.is_empty()
    }

    pub fn matches(&self, state: &ConversationState) -> bool {
        if self.inbox_id != 0 && state.inbox_id != self.inbox_id {
            return false;
        }
        if self.status.is_some_and(|status| state.status != status) {
            return false;
        }
        if self.assignee_id != 0 && state.assignee_id != Some(self.assignee_id) {
            return false;
        }
        if !self.priority.is_empty() && state.priority.as_deref() != Some(self.priority.as_str())
        {
            return false;
        }
        if self.contact_id != 0 && state.contact_id != self.contact_id {
            return false;
        }
        self.labels.iter().all(|label| state.has_label(label))
    }
}
