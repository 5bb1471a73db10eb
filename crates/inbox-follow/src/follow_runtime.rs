//! Follow session loop: consumes push-channel frames, reconciles them against
//! cached conversation state, and emits matching records.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::watch;

use crate::conversation_api::ConversationApi;
use crate::conversation_state::StateCache;
use crate::cursor_store::{CursorWriter, DEFAULT_CURSOR_FLUSH_INTERVAL};
use crate::emitter::{Emitter, EmitterConfig};
use crate::event_interpreter::{parse_event_envelope, FollowEvent};
use crate::exec_hook::{ExecHook, ExecHookConfig};
use crate::follow_error::FollowError;
use crate::follow_filters::FollowFilters;
use crate::live_channel::EventSource;
use crate::record_render::{event_record, snapshot_error_record, snapshot_record, RecordSink};
use crate::snapshot_builder::{SnapshotBuilder, DEFAULT_MESSAGE_PAGE_SIZE};

#[derive(Debug, Clone)]
/// Runtime configuration for one follow session.
pub struct FollowRuntimeConfig {
    pub base_url: String,
    pub account_id: u64,
    pub filters: FollowFilters,
    pub message_page_size: usize,
    pub emitter: EmitterConfig,
    pub exec_hook: Option<ExecHookConfig>,
    pub cursor_path: Option<PathBuf>,
    pub cursor_flush_interval: Duration,
    pub emit_snapshots: bool,
    pub max_tracked_conversations: Option<usize>,
}

impl FollowRuntimeConfig {
    pub fn new(base_url: impl Into<String>, account_id: u64) -> Self {
        Self {
            base_url: base_url.into(),
            account_id,
            filters: FollowFilters::default(),
            message_page_size: DEFAULT_MESSAGE_PAGE_SIZE,
            emitter: EmitterConfig::default(),
            exec_hook: None,
            cursor_path: None,
            cursor_flush_interval: DEFAULT_CURSOR_FLUSH_INTERVAL,
            emit_snapshots: true,
            max_tracked_conversations: None,
        }
    }

    pub fn validate(&self) -> Result<(), FollowError> {
        if self.base_url.trim().is_empty() {
            return Err(FollowError::Config("base URL must not be empty".to_string()));
        }
        if self.account_id == 0 {
            return Err(FollowError::Config(
                "account id must be greater than 0".to_string(),
            ));
        }
        if self.message_page_size == 0 {
            return Err(FollowError::Config(
                "message page size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FollowSummary {
    pub received_events: usize,
    pub processed_events: usize,
    pub malformed_events: usize,
    pub ignored_events: usize,
    pub duplicate_events: usize,
    pub transport_errors: usize,
    pub matched_events: usize,
    pub snapshots: usize,
    pub snapshot_errors: usize,
    pub emitted_records: u64,
    pub dropped_records: u64,
    pub last_seen_message_id: u64,
    pub emission_error: Option<String>,
}

/// Runs a follow session until the source ends or `cancel` flips to true.
pub async fn run_follow_session(
    config: FollowRuntimeConfig,
    api: Arc<dyn ConversationApi>,
    sink: RecordSink,
    source: &mut dyn EventSource,
    cancel: watch::Receiver<bool>,
) -> Result<FollowSummary> {
    let mut runtime = FollowRuntime::new(config, api, sink)?;
    runtime.run(source, cancel).await
}

pub struct FollowRuntime {
    config: FollowRuntimeConfig,
    api: Arc<dyn ConversationApi>,
    sink: RecordSink,
    exec_hook: Option<Arc<ExecHook>>,
    cache: StateCache,
    emitter: Emitter,
    cursor: Option<Arc<Mutex<CursorWriter>>>,
    last_seen_message_id: u64,
    /// Highest message id seen on events that produced no record and are
    /// not yet reflected in the persisted cursor.
    pending_checkpoint: Option<u64>,
    summary: FollowSummary,
}

impl FollowRuntime {
    /// Must be called inside a tokio runtime when the emitter is queued.
    pub fn new(
        config: FollowRuntimeConfig,
        api: Arc<dyn ConversationApi>,
        sink: RecordSink,
    ) -> Result<Self> {
        config.validate()?;
        let exec_hook = config
            .exec_hook
            .clone()
            .map(ExecHook::new)
            .transpose()?
            .map(Arc::new);
        let cursor = match config.cursor_path.clone() {
            Some(path) => Some(
                CursorWriter::open(
                    path,
                    &config.base_url,
                    config.account_id,
                    config.cursor_flush_interval,
                )
                .context("failed to open follow cursor")?,
            ),
            None => None,
        };
        let last_seen_message_id = cursor.as_ref().map_or(0, CursorWriter::last_seen_id);
        let cursor = cursor.map(|cursor| Arc::new(Mutex::new(cursor)));
        Ok(Self {
            cache: StateCache::with_max_entries(config.max_tracked_conversations),
            emitter: Emitter::new(config.emitter),
            config,
            api,
            sink,
            exec_hook,
            cursor,
            last_seen_message_id,
            pending_checkpoint: None,
            summary: FollowSummary::default(),
        })
    }

    pub fn summary(&self) -> &FollowSummary {
        &self.summary
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub async fn run(
        &mut self,
        source: &mut dyn EventSource,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<FollowSummary> {
        let mut cancel_closed = false;
        let loop_result = loop {
            if *cancel.borrow() {
                tracing::info!("follow session cancellation requested");
                break Ok(());
            }
            let frame = tokio::select! {
                biased;
                changed = cancel.changed(), if !cancel_closed => {
                    if changed.is_err() {
                        cancel_closed = true;
                    }
                    continue;
                }
                frame = source.next_frame() => frame,
            };
            let Some(frame) = frame else {
                tracing::info!("push channel closed");
                break Ok(());
            };
            let raw = match frame {
                Ok(raw) => raw,
                Err(error) => {
                    self.summary.transport_errors = self.summary.transport_errors.saturating_add(1);
                    tracing::warn!(%error, "push channel frame error");
                    continue;
                }
            };
            if let Err(error) = self.handle_frame(&raw).await {
                break Err(error);
            }
            if self.emitter.is_halted() {
                tracing::warn!("emitter halted; stopping follow session");
                break Ok(());
            }
        };

        let finish_result = self.finish().await;
        if let Err(error) = loop_result {
            // Halted only mirrors a fatal error the drain reports in full.
            if matches!(error, FollowError::Halted) {
                finish_result?;
            }
            return Err(error.into());
        }
        finish_result?;
        Ok(self.summary.clone())
    }

    async fn handle_frame(&mut self, raw: &str) -> Result<(), FollowError> {
        self.summary.received_events = self.summary.received_events.saturating_add(1);
        let Some(envelope) = parse_event_envelope(raw) else {
            self.summary.malformed_events = self.summary.malformed_events.saturating_add(1);
            tracing::debug!(frame_bytes = raw.len(), "ignoring malformed push frame");
            return Ok(());
        };
        let event = FollowEvent::interpret(&envelope.event, &envelope.data);

        if let Some(message_id) = event.message_id() {
            if message_id <= self.last_seen_message_id {
                self.summary.duplicate_events = self.summary.duplicate_events.saturating_add(1);
                tracing::debug!(message_id, "skipping already processed message");
                return Ok(());
            }
        }
        let Some(conversation_id) = event.conversation_id() else {
            self.summary.ignored_events = self.summary.ignored_events.saturating_add(1);
            tracing::debug!(event = %envelope.event, "event references no conversation");
            return Ok(());
        };
        self.summary.processed_events = self.summary.processed_events.saturating_add(1);

        self.ensure_hydrated(conversation_id, &envelope.event).await?;
        let message_id = event.message_id();
        if let Some(message_id) = message_id {
            self.last_seen_message_id = self.last_seen_message_id.max(message_id);
        }
        let state = self.cache.entry(conversation_id);
        state.apply_event(&envelope.event, &envelope.data);
        if self.config.filters.matches(state) {
            let record = event_record(&event, Some(state));
            self.summary.matched_events = self.summary.matched_events.saturating_add(1);
            let checkpoint = self.take_checkpoint(message_id);
            self.submit(record, checkpoint).await?;
        } else if let Some(message_id) = message_id {
            self.defer_checkpoint(message_id);
        }
        Ok(())
    }

    async fn ensure_hydrated(
        &mut self,
        conversation_id: u64,
        trigger_event: &str,
    ) -> Result<(), FollowError> {
        if self.cache.entry(conversation_id).hydrated {
            return Ok(());
        }
        let built = SnapshotBuilder::new(self.api.as_ref(), self.config.message_page_size)
            .build(conversation_id)
            .await;
        match built {
            Ok(snapshot) => {
                let state = self.cache.entry(conversation_id);
                state.apply_conversation(&snapshot.conversation);
                self.summary.snapshots = self.summary.snapshots.saturating_add(1);
                if self.config.emit_snapshots && self.config.filters.matches(state) {
                    self.submit(snapshot_record(&snapshot), None).await?;
                }
            }
            Err(error) => {
                self.summary.snapshot_errors = self.summary.snapshot_errors.saturating_add(1);
                tracing::warn!(conversation_id, %error, "conversation hydration failed");
                self.submit(
                    snapshot_error_record(conversation_id, trigger_event, &error),
                    None,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Hands a record to the emitter: write, then exec hook, then cursor.
    /// The cursor only moves once the record has been written.
    async fn submit(&self, record: Value, checkpoint: Option<u64>) -> Result<(), FollowError> {
        let sink = self.sink.clone();
        let exec_hook = self.exec_hook.clone();
        let cursor = checkpoint.and(self.cursor.clone());
        let submitted = self
            .emitter
            .emit(async move {
                sink.write_record(&record)?;
                if let Some(exec_hook) = exec_hook {
                    exec_hook.run(&record).await?;
                }
                if let (Some(cursor), Some(message_id)) = (cursor, checkpoint) {
                    persist_checkpoint(&cursor, message_id);
                }
                Ok(())
            })
            .await;
        match submitted {
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                tracing::warn!(%error, "record emission failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Folds any deferred position into the checkpoint carried by the next record.
    fn take_checkpoint(&mut self, message_id: Option<u64>) -> Option<u64> {
        match (self.pending_checkpoint.take(), message_id) {
            (Some(pending), Some(message_id)) => Some(pending.max(message_id)),
            (pending, message_id) => pending.or(message_id),
        }
    }

    /// Records a position for an event that emitted nothing. Direct mode has
    /// no backlog, so it is persisted at once; queued mode waits for the next
    /// written record or the final drain.
    fn defer_checkpoint(&mut self, message_id: u64) {
        let pending = self.pending_checkpoint.map_or(message_id, |id| id.max(message_id));
        if !self.emitter.is_direct() {
            self.pending_checkpoint = Some(pending);
            return;
        }
        if let Some(cursor) = self.cursor.as_ref() {
            persist_checkpoint(cursor, pending);
        }
    }

    /// Drains the emitter, then forces a cursor flush.
    async fn finish(&mut self) -> Result<()> {
        let drained = self.emitter.close_and_drain().await;
        self.summary.emitted_records = self.emitter.completed_count();
        self.summary.dropped_records = self.emitter.dropped_count();
        self.emitter.maybe_report_drops();

        // A halted emitter skipped its backlog, so deferred positions may pass unwritten records.
        let pending = self
            .pending_checkpoint
            .take()
            .filter(|_| !self.emitter.is_halted());
        let flushed = match self.cursor.as_ref() {
            Some(cursor) => {
                let mut cursor = lock_cursor(cursor);
                if let Some(message_id) = pending {
                    if let Err(error) = cursor.update(message_id) {
                        tracing::warn!(message_id, error = %format!("{error:#}"), "failed to persist follow cursor");
                    }
                }
                let path = cursor.path().display().to_string();
                cursor
                    .flush()
                    .with_context(|| format!("failed to flush {path}"))
            }
            None => Ok(()),
        };
        self.summary.last_seen_message_id = self.last_seen_message_id;

        let drained = match drained {
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                tracing::warn!(%error, "record emission reported errors");
                self.summary.emission_error = Some(error.to_string());
                Ok(())
            }
            Ok(()) => Ok(()),
        };

        let summary = &self.summary;
        eprintln!(
            "follow summary: received={} processed={} matched={} emitted={} dropped={} snapshots={} snapshot_errors={} duplicates={} malformed={} last_seen_message_id={}",
            summary.received_events,
            summary.processed_events,
            summary.matched_events,
            summary.emitted_records,
            summary.dropped_records,
            summary.snapshots,
            summary.snapshot_errors,
            summary.duplicate_events,
            summary.malformed_events,
            summary.last_seen_message_id,
        );

        drained?;
        flushed
    }
}

fn lock_cursor(cursor: &Mutex<CursorWriter>) -> std::sync::MutexGuard<'_, CursorWriter> {
    cursor
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write failures are logged; the final flush writes the position again.
fn persist_checkpoint(cursor: &Mutex<CursorWriter>, message_id: u64) {
    if let Err(error) = lock_cursor(cursor).update(message_id) {
        tracing::warn!(message_id, error = %format!("{error:#}"), "failed to persist follow cursor");
    }
}
