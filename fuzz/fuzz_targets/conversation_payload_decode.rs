#![no_main]

use inbox_follow::{Contact, Conversation, ConversationState, Message};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    if let Some(conversation) = Conversation::from_value(&value) {
        let mut state = ConversationState::new(conversation.id);
        state.apply_conversation(&conversation);
        assert!(state.hydrated);
        assert!(state.labels.iter().all(|label| !label.trim().is_empty()));
    }
    if let Some(contact) = Contact::from_value(&value) {
        assert!(!contact.display_name().is_empty());
    }
    let _ = Message::from_value(&value);
});
