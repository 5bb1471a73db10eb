//! Durable, throttled checkpoint of the highest processed message id.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use inbox_core::{current_rfc3339_timestamp, write_text_atomic};
use serde::{Deserialize, Serialize};

pub const FOLLOW_CURSOR_VERSION: u32 = 1;
pub const DEFAULT_CURSOR_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowCursor {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub account_id: u64,
    #[serde(default)]
    pub last_seen_message_id: u64,
    #[serde(default)]
    pub updated_at: String,
}

impl FollowCursor {
    /// Zero cursors and legacy records without a target bind to any session.
    fn is_untargeted(&self) -> bool {
        self.base_url.trim().is_empty() && self.account_id == 0
    }

    fn targets(&self, base_url: &str, account_id: u64) -> bool {
        normalize_base_url(&self.base_url) == normalize_base_url(base_url)
            && self.account_id == account_id
    }
}

fn normalize_base_url(raw: &str) -> &str {
    raw.trim().trim_end_matches('/')
}

/// Reads a cursor file. A missing file yields the zero cursor; an unknown or
/// missing version is read as version 0 and upgraded in memory.
pub fn load_follow_cursor(path: &Path) -> Result<FollowCursor> {
    if !path.exists() {
        return Ok(FollowCursor::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cursor file {}", path.display()))?;
    let mut cursor = serde_json::from_str::<FollowCursor>(&raw)
        .with_context(|| format!("failed to parse cursor file {}", path.display()))?;
    if cursor.version != FOLLOW_CURSOR_VERSION {
        tracing::info!(
            path = %path.display(),
            found_version = cursor.version,
            "migrating follow cursor to version {FOLLOW_CURSOR_VERSION}"
        );
        cursor.version = FOLLOW_CURSOR_VERSION;
    }
    Ok(cursor)
}

/// Whole-file atomic overwrite.
pub fn save_follow_cursor(path: &Path, cursor: &FollowCursor) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(cursor).context("failed to serialize follow cursor")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write cursor file {}", path.display()))
}

/// Live cursor tracker: monotonic updates, first update flushed immediately,
/// later ones at most once per flush interval.
#[derive(Debug)]
pub struct CursorWriter {
    path: PathBuf,
    cursor: FollowCursor,
    flush_interval: Duration,
    last_flush: Option<Instant>,
    dirty: bool,
}

impl CursorWriter {
    /// Loads the cursor at `path` and binds it to the running backend/account.
    pub fn open(
        path: PathBuf,
        base_url: &str,
        account_id: u64,
        flush_interval: Duration,
    ) -> Result<Self> {
        let loaded = load_follow_cursor(&path)?;
        Ok(Self::new(path, base_url, account_id, loaded, flush_interval))
    }

    pub fn new(
        path: PathBuf,
        base_url: &str,
        account_id: u64,
        loaded: FollowCursor,
        flush_interval: Duration,
    ) -> Self {
        let last_seen_message_id = if loaded.is_untargeted() || loaded.targets(base_url, account_id)
        {
            loaded.last_seen_message_id
        } else {
            tracing::warn!(
                path = %path.display(),
                cursor_base_url = %loaded.base_url,
                cursor_account_id = loaded.account_id,
                "cursor targets a different backend or account; starting from zero"
            );
            0
        };
        Self {
            path,
            cursor: FollowCursor {
                version: FOLLOW_CURSOR_VERSION,
                base_url: normalize_base_url(base_url).to_string(),
                account_id,
                last_seen_message_id,
                updated_at: loaded.updated_at,
            },
            flush_interval,
            last_flush: None,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_seen_id(&self) -> u64 {
        self.cursor.last_seen_message_id
    }

    pub fn cursor(&self) -> &FollowCursor {
        &self.cursor
    }

    /// Records `message_id` if it advances the cursor. Returns true when the
    /// update was written to disk.
    pub fn update(&mut self, message_id: u64) -> Result<bool> {
        if message_id <= self.cursor.last_seen_message_id {
            return Ok(false);
        }
        self.cursor.last_seen_message_id = message_id;
        self.dirty = true;
        let due = match self.last_flush {
            None => true,
            Some(last_flush) => last_flush.elapsed() >= self.flush_interval,
        };
        if !due {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    pub fn has_pending_update(&self) -> bool {
        self.dirty
    }

    /// Writes the current position regardless of the throttle timer.
    pub fn flush(&mut self) -> Result<()> {
        self.cursor.updated_at = current_rfc3339_timestamp();
        save_follow_cursor(&self.path, &self.cursor)?;
        self.last_flush = Some(Instant::now());
        self.dirty = false;
        tracing::debug!(
            path = %self.path.display(),
            last_seen_message_id = self.cursor.last_seen_message_id,
            "flushed follow cursor"
        );
        Ok(())
    }
}
