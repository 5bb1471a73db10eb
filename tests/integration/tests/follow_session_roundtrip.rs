use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use inbox_follow::{
    load_follow_cursor, run_follow_session, ApiError, Contact, Conversation, ConversationApi,
    ConversationStatus, EmitterConfig, EventSource, FollowError, FollowFilters,
    FollowRuntimeConfig, Message, OutputFormat, OverflowPolicy, RecordSink,
};
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex as AsyncMutex};

const BASE_URL: &str = "https://support.example.test";

struct ScriptedApi {
    conversations: HashMap<u64, Conversation>,
    contacts: HashMap<u64, Contact>,
    history: HashMap<u64, Vec<Message>>,
    requests: AsyncMutex<Vec<String>>,
}

impl ScriptedApi {
    fn new() -> Self {
        let mut conversations = HashMap::new();
        conversations.insert(
            12,
            Conversation {
                id: 12,
                inbox_id: 4,
                status: ConversationStatus::Open,
                priority: Some("high".to_string()),
                assignee_id: None,
                contact_id: 55,
                labels: Some(vec!["vip".to_string()]),
            },
        );
        conversations.insert(
            13,
            Conversation {
                id: 13,
                inbox_id: 9,
                status: ConversationStatus::Open,
                labels: Some(Vec::new()),
                ..Conversation::default()
            },
        );
        let mut contacts = HashMap::new();
        contacts.insert(
            55,
            Contact {
                id: 55,
                name: Some("Jane Doe".to_string()),
                ..Contact::default()
            },
        );
        let mut history = HashMap::new();
        history.insert(
            12,
            vec![Message {
                id: 39,
                conversation_id: 12,
                content: "earlier question".to_string(),
                message_type: "incoming".to_string(),
                created_at: 1_700_000_000,
                sender_name: Some("Jane Doe".to_string()),
                private: false,
            }],
        );
        Self {
            conversations,
            contacts,
            history,
            requests: AsyncMutex::new(Vec::new()),
        }
    }

    async fn request_count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl ConversationApi for ScriptedApi {
    async fn get_conversation(&self, conversation_id: u64) -> Result<Conversation, ApiError> {
        self.requests
            .lock()
            .await
            .push(format!("conversation:{conversation_id}"));
        self.conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(ApiError::NotFound {
                resource: format!("conversation {conversation_id}"),
            })
    }

    async fn get_contact(&self, contact_id: u64) -> Result<Contact, ApiError> {
        self.requests.lock().await.push(format!("contact:{contact_id}"));
        self.contacts
            .get(&contact_id)
            .cloned()
            .ok_or(ApiError::NotFound {
                resource: format!("contact {contact_id}"),
            })
    }

    async fn list_messages(
        &self,
        conversation_id: u64,
        before_id: Option<u64>,
        _page_size: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.requests
            .lock()
            .await
            .push(format!("messages:{conversation_id}:{before_id:?}"));
        if before_id.is_some() {
            return Ok(Vec::new());
        }
        Ok(self
            .history
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_labels(&self, _conversation_id: u64) -> Result<Vec<String>, ApiError> {
        Ok(Vec::new())
    }
}

struct ScriptedSource {
    frames: VecDeque<String>,
}

impl ScriptedSource {
    fn new(frames: &[Value]) -> Self {
        Self {
            frames: frames.iter().map(Value::to_string).collect(),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<Result<String, FollowError>> {
        self.frames.pop_front().map(Ok)
    }
}

fn channel_frame(event: &str, data: Value) -> Value {
    json!({
        "identifier": "{\"channel\":\"RoomChannel\"}",
        "message": {"event": event, "data": data}
    })
}

fn message_frame(message_id: u64, conversation_id: u64, content: &str) -> Value {
    channel_frame(
        "message.created",
        json!({
            "id": message_id,
            "conversation_id": conversation_id,
            "content": content,
            "message_type": 0,
            "sender": {"name": "Jane Doe"}
        }),
    )
}

fn records(buffer: &Arc<std::sync::Mutex<Vec<u8>>>) -> Vec<Value> {
    let bytes = buffer.lock().expect("buffer lock").clone();
    String::from_utf8(bytes)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("record json"))
        .collect()
}

fn session_config(cursor_path: &Path) -> FollowRuntimeConfig {
    let mut config = FollowRuntimeConfig::new(BASE_URL, 8);
    config.filters = FollowFilters {
        inbox_id: 4,
        ..FollowFilters::default()
    };
    config.cursor_path = Some(cursor_path.to_path_buf());
    config.emitter = EmitterConfig {
        queue_capacity: 16,
        overflow: OverflowPolicy::Block,
    };
    config
}

#[tokio::test]
async fn integration_follow_session_filters_hydrates_and_resumes_from_cursor() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cursor_path = temp.path().join("cursor.json");
    let api = Arc::new(ScriptedApi::new());

    let first_frames = vec![
        json!({"type": "welcome"}),
        message_frame(40, 12, "hello, is anyone there?"),
        channel_frame("assignee.changed", json!({"id": 12, "assignee": {"id": 3, "name": "Sam"}})),
        message_frame(41, 13, "other inbox"),
        channel_frame("label.added", json!({"conversation_id": 12, "label": "billing"})),
        message_frame(42, 12, "thanks"),
    ];
    let (sink, buffer) = RecordSink::in_memory(OutputFormat::Json);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut source = ScriptedSource::new(&first_frames);

    let summary = run_follow_session(
        session_config(&cursor_path),
        api.clone(),
        sink,
        &mut source,
        cancel_rx,
    )
    .await
    .expect("first session");

    assert_eq!(summary.received_events, 6);
    assert_eq!(summary.malformed_events, 1);
    assert_eq!(summary.snapshots, 2);
    assert_eq!(summary.matched_events, 4);
    assert_eq!(summary.emitted_records, 5);
    assert_eq!(summary.last_seen_message_id, 42);
    assert_eq!(api.request_count("conversation:").await, 2);
    assert_eq!(api.request_count("contact:55").await, 1);

    let first = records(&buffer);
    assert_eq!(first[0]["type"], "snapshot");
    assert_eq!(first[0]["contact"]["name"], "Jane Doe");
    assert_eq!(first[0]["messages"][0]["id"], json!(39));
    assert!(first
        .iter()
        .all(|record| record["conversation_id"] == json!(12)));
    let last = first.last().expect("last record");
    assert_eq!(last["state"]["assignee_id"], json!(3));
    assert_eq!(last["state"]["labels"], json!(["billing", "vip"]));
    assert_eq!(
        load_follow_cursor(&cursor_path)
            .expect("cursor")
            .last_seen_message_id,
        42
    );

    let second_frames = vec![
        message_frame(41, 12, "replayed"),
        message_frame(42, 12, "replayed"),
        message_frame(43, 12, "new after restart"),
    ];
    let (sink, buffer) = RecordSink::in_memory(OutputFormat::Json);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut source = ScriptedSource::new(&second_frames);

    let summary = run_follow_session(
        session_config(&cursor_path),
        api.clone(),
        sink,
        &mut source,
        cancel_rx,
    )
    .await
    .expect("resumed session");

    assert_eq!(summary.duplicate_events, 2);
    assert_eq!(summary.last_seen_message_id, 43);
    let resumed = records(&buffer);
    assert_eq!(resumed.len(), 2);
    assert_eq!(resumed[1]["data"]["message_id"], json!(43));
    assert_eq!(
        load_follow_cursor(&cursor_path)
            .expect("cursor")
            .last_seen_message_id,
        43
    );
}

#[cfg(unix)]
#[tokio::test]
async fn integration_exec_hook_receives_every_emitted_record() {
    use inbox_follow::{ExecHookConfig, ExecHookFailurePolicy};

    let temp = tempfile::tempdir().expect("tempdir");
    let hook_log = temp.path().join("hook.jsonl");
    let api = Arc::new(ScriptedApi::new());
    let mut config = session_config(&temp.path().join("cursor.json"));
    config.emit_snapshots = false;
    config.exec_hook = Some(ExecHookConfig {
        command: format!("cat >> '{}'", hook_log.display()),
        timeout: Some(Duration::from_secs(10)),
        failure_policy: ExecHookFailurePolicy::Fatal,
    });
    let (sink, buffer) = RecordSink::in_memory(OutputFormat::Json);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut source = ScriptedSource::new(&[
        message_frame(50, 12, "first"),
        message_frame(51, 12, "second"),
    ]);

    run_follow_session(config, api, sink, &mut source, cancel_rx)
        .await
        .expect("session");

    let emitted = records(&buffer);
    let hooked: Vec<Value> = std::fs::read_to_string(&hook_log)
        .expect("hook log")
        .lines()
        .map(|line| serde_json::from_str(line).expect("hook json"))
        .collect();
    assert_eq!(emitted.len(), 2);
    assert_eq!(hooked, emitted);
}

#[cfg(unix)]
#[tokio::test]
async fn integration_drop_policy_accounts_for_every_matched_record() {
    use inbox_follow::{ExecHookConfig, ExecHookFailurePolicy};

    let temp = tempfile::tempdir().expect("tempdir");
    let api = Arc::new(ScriptedApi::new());
    let mut config = session_config(&temp.path().join("cursor.json"));
    config.emit_snapshots = false;
    config.emitter = EmitterConfig {
        queue_capacity: 1,
        overflow: OverflowPolicy::DropNewest,
    };
    config.exec_hook = Some(ExecHookConfig {
        command: "sleep 0.2".to_string(),
        timeout: Some(Duration::from_secs(10)),
        failure_policy: ExecHookFailurePolicy::Warn,
    });
    let frames: Vec<Value> = (60..70)
        .map(|id| message_frame(id, 12, "burst"))
        .collect();
    let (sink, buffer) = RecordSink::in_memory(OutputFormat::Json);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut source = ScriptedSource::new(&frames);

    let summary = run_follow_session(config, api, sink, &mut source, cancel_rx)
        .await
        .expect("session");

    assert_eq!(summary.matched_events, 10);
    assert!(summary.dropped_records > 0);
    assert_eq!(
        summary.emitted_records + summary.dropped_records,
        summary.matched_events as u64
    );
    assert_eq!(records(&buffer).len() as u64, summary.emitted_records);
    assert_eq!(summary.last_seen_message_id, 69);
}
