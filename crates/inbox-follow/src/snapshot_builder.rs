//! Hydrates a conversation from the API: record, contact and paginated history.

use std::collections::BTreeSet;

use crate::conversation_api::{Contact, Conversation, ConversationApi, Message};
use crate::conversation_state::normalize_labels;
use crate::follow_error::FollowError;

pub const DEFAULT_MESSAGE_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation: Conversation,
    pub contact: Option<Contact>,
    /// Oldest first.
    pub messages: Vec<Message>,
    pub summary: String,
}

pub struct SnapshotBuilder<'a> {
    api: &'a dyn ConversationApi,
    page_size: usize,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(api: &'a dyn ConversationApi, page_size: usize) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
        }
    }

    pub async fn build(&self, conversation_id: u64) -> Result<ConversationSnapshot, FollowError> {
        let snapshot_error = |source| FollowError::Snapshot {
            conversation_id,
            source,
        };

        let mut conversation = self
            .api
            .get_conversation(conversation_id)
            .await
            .map_err(snapshot_error)?;
        if conversation.labels.is_none() {
            let labels = self
                .api
                .list_labels(conversation_id)
                .await
                .map_err(snapshot_error)?;
            conversation.labels = Some(labels);
        }

        let contact = if conversation.contact_id == 0 {
            None
        } else {
            match self.api.get_contact(conversation.contact_id).await {
                Ok(contact) => Some(contact),
                Err(error) if error.is_not_found() => {
                    tracing::debug!(
                        conversation_id,
                        contact_id = conversation.contact_id,
                        "contact not found; continuing without contact"
                    );
                    None
                }
                Err(error) => return Err(snapshot_error(error)),
            }
        };

        let messages = self.fetch_history(conversation_id).await?;
        let summary = render_snapshot_summary(&conversation, contact.as_ref(), messages.len());
        Ok(ConversationSnapshot {
            conversation,
            contact,
            messages,
            summary,
        })
    }

    /// Walks pages backwards with a "before" cursor until an empty page, then
    /// returns the history in chronological order.
    async fn fetch_history(&self, conversation_id: u64) -> Result<Vec<Message>, FollowError> {
        let mut collected = Vec::new();
        let mut before_id: Option<u64> = None;
        loop {
            let page = self
                .api
                .list_messages(conversation_id, before_id, self.page_size)
                .await
                .map_err(|source| FollowError::Snapshot {
                    conversation_id,
                    source,
                })?;
            let Some(oldest_id) = page.iter().map(|message| message.id).min() else {
                break;
            };
            collected.extend(page);
            if before_id.is_some_and(|previous| oldest_id >= previous) {
                tracing::warn!(
                    conversation_id,
                    oldest_id,
                    "message pagination did not advance; stopping"
                );
                break;
            }
            before_id = Some(oldest_id);
        }

        collected.reverse();
        collected.sort_by_key(|message| (message.created_at, message.id));
        let mut seen = BTreeSet::new();
        collected.retain(|message| seen.insert(message.id));
        Ok(collected)
    }
}

pub fn render_snapshot_summary(
    conversation: &Conversation,
    contact: Option<&Contact>,
    message_count: usize,
) -> String {
    let labels = normalize_labels(conversation.labels.iter().flatten());
    let mut summary = format!(
        "conversation #{} [{}] inbox={}",
        conversation.id,
        conversation.status.as_str(),
        conversation.inbox_id
    );
    if let Some(priority) = conversation.priority.as_deref() {
        summary.push_str(&format!(" priority={priority}"));
    }
    match conversation.assignee_id {
        Some(assignee_id) => summary.push_str(&format!(" assignee={assignee_id}")),
        None => summary.push_str(" unassigned"),
    }
    if let Some(contact) = contact {
        summary.push_str(&format!(" contact={}", contact.display_name()));
    } else if conversation.contact_id != 0 {
        summary.push_str(&format!(" contact=#{}", conversation.contact_id));
    }
    if !labels.is_empty() {
        summary.push_str(&format!(
            " labels={}",
            labels.into_iter().collect::<Vec<_>>().join(",")
        ));
    }
    summary.push_str(&format!(" messages={message_count}"));
    summary
}
