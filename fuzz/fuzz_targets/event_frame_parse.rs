#![no_main]

use inbox_follow::{
    event_record, parse_event_envelope, render_record, ConversationState, FollowEvent,
    FollowFilters, OutputFormat,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Some(envelope) = parse_event_envelope(&raw) else {
        return;
    };
    assert!(!envelope.event.trim().is_empty());

    let event = FollowEvent::interpret(&envelope.event, &envelope.data);
    assert_ne!(event.conversation_id(), Some(0));

    let mut state = ConversationState::new(event.conversation_id().unwrap_or(1));
    state.apply_event(&envelope.event, &envelope.data);
    let _ = FollowFilters::default().matches(&state);

    let record = event_record(&event, Some(&state));
    assert!(render_record(&record, OutputFormat::Text).ends_with('\n'));
    assert_eq!(render_record(&record, OutputFormat::Json).lines().count(), 1);
});
