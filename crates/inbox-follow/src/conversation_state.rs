//! Per-conversation cache of filterable attributes, materialized from an
//! authoritative snapshot and evolved in place by delta events.

use std::collections::{BTreeSet, HashMap};

use inbox_core::{json_field, json_path, json_string, json_u64, value_as_u64};
use serde::Serialize;
use serde_json::Value;

use crate::conversation_api::{Conversation, ConversationStatus};

/// Trims, drops empty entries and deduplicates; the result is sorted.
pub fn normalize_labels<I, S>(labels: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .map(|label| label.as_ref().trim().to_string())
        .filter(|label| !label.is_empty())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationState {
    pub id: u64,
    pub inbox_id: u64,
    pub status: ConversationStatus,
    pub priority: Option<String>,
    pub assignee_id: Option<u64>,
    pub contact_id: u64,
    pub labels: BTreeSet<String>,
    /// False until a full snapshot has been applied.
    pub hydrated: bool,
}

impl ConversationState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Overwrites every field from an authoritative snapshot.
    pub fn apply_conversation(&mut self, conversation: &Conversation) {
        self.id = conversation.id;
        self.inbox_id = conversation.inbox_id;
        self.status = conversation.status;
        self.priority = conversation.priority.clone();
        self.assignee_id = conversation.assignee_id;
        self.contact_id = conversation.contact_id;
        self.labels = normalize_labels(conversation.labels.iter().flatten());
        self.hydrated = true;
    }

    /// Applies a named delta. Returns false for unrecognized event types,
    /// which leave the state untouched.
    pub fn apply_event(&mut self, event_type: &str, payload: &Value) -> bool {
        match event_type {
            "conversation.status_changed" | "status_changed" => {
                if let Some(status) = json_field(payload, "status") {
                    self.status = ConversationStatus::from_payload(status);
                }
                true
            }
            "assignee.changed" => {
                if let Some(assignee_id) = assignee_from_payload(payload) {
                    self.assignee_id = assignee_id;
                }
                true
            }
            "label.added" => {
                if let Some(label) = label_from_payload(payload) {
                    self.labels.insert(label);
                }
                true
            }
            "label.removed" => {
                if let Some(label) = label_from_payload(payload) {
                    self.labels.remove(&label);
                }
                true
            }
            "conversation.updated" => {
                self.apply_partial_update(payload);
                true
            }
            _ => false,
        }
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains(name)
    }

    fn apply_partial_update(&mut self, payload: &Value) {
        if let Some(inbox_id) = json_u64(payload, "inbox_id") {
            self.inbox_id = inbox_id;
        }
        if let Some(status) = json_field(payload, "status") {
            self.status = ConversationStatus::from_payload(status);
        }
        if payload.get("priority").is_some() {
            self.priority = json_string(payload, "priority");
        }
        if let Some(contact_id) = json_path(payload, &["meta", "sender", "id"])
            .and_then(value_as_u64)
            .or_else(|| json_u64(payload, "contact_id"))
        {
            self.contact_id = contact_id;
        }
        if let Some(labels) = json_field(payload, "labels").and_then(Value::as_array) {
            self.labels = normalize_labels(labels.iter().filter_map(Value::as_str));
        }
    }
}

fn explicit_assignee(payload: &Value) -> Option<&Value> {
    payload
        .get("assignee")
        .or_else(|| payload.get("meta").and_then(|meta| meta.get("assignee")))
}

/// `Some(None)` means the payload explicitly cleared the assignee; `None`
/// means the payload said nothing about it.
pub(crate) fn assignee_from_payload(payload: &Value) -> Option<Option<u64>> {
    if let Some(assignee) = explicit_assignee(payload) {
        return Some(match assignee {
            Value::Null => None,
            Value::Object(_) => json_u64(assignee, "id"),
            other => value_as_u64(other),
        });
    }
    payload.get("assignee_id").map(value_as_u64)
}

pub(crate) fn assignee_name_from_payload(payload: &Value) -> String {
    explicit_assignee(payload)
        .and_then(|assignee| json_string(assignee, "name"))
        .unwrap_or_default()
}

fn label_from_payload(payload: &Value) -> Option<String> {
    ["label", "title", "name"]
        .iter()
        .find_map(|key| json_string(payload, key))
}

#[derive(Debug)]
struct CacheEntry {
    state: ConversationState,
    last_touched: u64,
}

/// Single-owner map of conversation state keyed by conversation id.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: HashMap<u64, CacheEntry>,
    max_entries: Option<usize>,
    tick: u64,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the cache; the least recently referenced entry is evicted first.
    pub fn with_max_entries(max_entries: Option<usize>) -> Self {
        Self {
            max_entries: max_entries.filter(|max| *max > 0),
            ..Self::default()
        }
    }

    /// Returns the entry for `conversation_id`, creating an empty unhydrated
    /// one on first reference.
    pub fn entry(&mut self, conversation_id: u64) -> &mut ConversationState {
        self.tick = self.tick.saturating_add(1);
        if !self.entries.contains_key(&conversation_id) {
            self.evict_for_insert();
        }
        let tick = self.tick;
        let entry = self
            .entries
            .entry(conversation_id)
            .or_insert_with(|| CacheEntry {
                state: ConversationState::new(conversation_id),
                last_touched: tick,
            });
        entry.last_touched = tick;
        &mut entry.state
    }

    pub fn get(&self, conversation_id: u64) -> Option<&ConversationState> {
        self.entries.get(&conversation_id).map(|entry| &entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_for_insert(&mut self) {
        let Some(max_entries) = self.max_entries else {
            return;
        };
        while self.entries.len() >= max_entries {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_touched)
                .map(|(id, _)| *id)
            else {
                return;
            };
            self.entries.remove(&oldest);
            tracing::debug!(conversation_id = oldest, "evicted conversation state");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot() -> Conversation {
        Conversation {
            id: 11,
            inbox_id: 2,
            status: ConversationStatus::Open,
            priority: Some("urgent".to_string()),
            assignee_id: Some(3),
            contact_id: 40,
            labels: Some(vec![" vip".into(), "vip".into(), "".into(), "billing".into()]),
        }
    }

    #[test]
    fn unit_normalize_labels_trims_drops_empty_and_dedupes_sorted() {
        let labels = normalize_labels([" a", "a", "", "b", "b"]);
        assert_eq!(labels.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn unit_apply_conversation_hydrates_and_copies_fields() {
        let mut state = ConversationState::new(11);
        assert!(!state.hydrated);
        state.apply_conversation(&snapshot());
        assert!(state.hydrated);
        assert_eq!(state.inbox_id, 2);
        assert_eq!(state.status, ConversationStatus::Open);
        assert_eq!(state.priority.as_deref(), Some("urgent"));
        assert_eq!(state.assignee_id, Some(3));
        assert_eq!(state.contact_id, 40);
        assert_eq!(
            state.labels.iter().cloned().collect::<Vec<_>>(),
            vec!["billing", "vip"]
        );
    }

    #[test]
    fn unit_assignee_changed_with_explicit_null_clears_assignee() {
        let mut state = ConversationState::new(11);
        state.assignee_id = Some(3);
        assert!(state.apply_event("assignee.changed", &json!({"id": 11, "assignee": null})));
        assert_eq!(state.assignee_id, None);

        state.apply_event("assignee.changed", &json!({"assignee": {"id": 7}}));
        assert_eq!(state.assignee_id, Some(7));

        state.apply_event("assignee.changed", &json!({"id": 11}));
        assert_eq!(state.assignee_id, Some(7));

        state.apply_event(
            "assignee.changed",
            &json!({"meta": {"assignee": {"id": "8"}}}),
        );
        assert_eq!(state.assignee_id, Some(8));
    }

    #[test]
    fn unit_label_deltas_mutate_single_labels() {
        let mut state = ConversationState::new(1);
        state.apply_event("label.added", &json!({"conversation_id": 1, "label": " vip "}));
        state.apply_event("label.added", &json!({"conversation_id": 1, "title": "billing"}));
        state.apply_event("label.added", &json!({"conversation_id": 1, "label": "  "}));
        assert!(state.has_label("vip"));
        assert!(state.has_label("billing"));
        assert!(!state.has_label("VIP"));
        state.apply_event("label.removed", &json!({"label": "vip"}));
        assert!(!state.has_label("vip"));
        assert_eq!(state.labels.len(), 1);
    }

    #[test]
    fn unit_has_label_on_empty_state_is_false() {
        let state = ConversationState::default();
        assert!(!state.has_label("vip"));
        assert!(!state.has_label(""));
    }

    #[test]
    fn unit_status_changed_accepts_both_event_names() {
        let mut state = ConversationState::new(1);
        state.apply_event("status_changed", &json!({"status": "resolved"}));
        assert_eq!(state.status, ConversationStatus::Resolved);
        state.apply_event("conversation.status_changed", &json!({"status": "snoozed"}));
        assert_eq!(state.status, ConversationStatus::Snoozed);
    }

    #[test]
    fn unit_conversation_updated_overwrites_only_present_fields() {
        let mut state = ConversationState::new(11);
        state.apply_conversation(&snapshot());
        state.apply_event(
            "conversation.updated",
            &json!({"id": 11, "inbox_id": "9", "labels": ["new", " new", ""]}),
        );
        assert_eq!(state.inbox_id, 9);
        assert_eq!(state.status, ConversationStatus::Open);
        assert_eq!(state.priority.as_deref(), Some("urgent"));
        assert_eq!(state.contact_id, 40);
        assert_eq!(state.labels.iter().cloned().collect::<Vec<_>>(), vec!["new"]);

        state.apply_event(
            "conversation.updated",
            &json!({"priority": null, "meta": {"sender": {"id": 41.0}}}),
        );
        assert_eq!(state.priority, None);
        assert_eq!(state.contact_id, 41);
    }

    #[test]
    fn unit_unrecognized_event_is_noop() {
        let mut state = ConversationState::new(11);
        state.apply_conversation(&snapshot());
        let before = state.clone();
        assert!(!state.apply_event("conversation.typing_on", &json!({"status": "resolved"})));
        assert_eq!(state, before);
    }

    #[test]
    fn unit_state_cache_creates_unhydrated_entries_lazily() {
        let mut cache = StateCache::new();
        assert!(cache.is_empty());
        let state = cache.entry(5);
        assert_eq!(state.id, 5);
        assert!(!state.hydrated);
        state.apply_conversation(&Conversation {
            id: 5,
            ..Conversation::default()
        });
        assert!(cache.get(5).is_some_and(|state| state.hydrated));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unit_state_cache_bound_evicts_least_recently_referenced() {
        let mut cache = StateCache::with_max_entries(Some(2));
        cache.entry(1);
        cache.entry(2);
        cache.entry(1);
        cache.entry(3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }
}
