use thiserror::Error;

use crate::conversation_api::ApiError;

#[derive(Debug, Clone, Error)]
/// Failure taxonomy for a follow session.
pub enum FollowError {
    #[error("invalid follow configuration: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("snapshot for conversation {conversation_id} failed: {source}")]
    Snapshot {
        conversation_id: u64,
        #[source]
        source: ApiError,
    },
    #[error("failed to emit record: {0}")]
    Emit(String),
    #[error("exec hook failed: {message}")]
    ExecHook { message: String, fatal: bool },
    #[error("cursor store error: {0}")]
    Cursor(String),
    #[error("emitter halted after a fatal error")]
    Halted,
}

impl FollowError {
    /// Returns true when the failure must terminate the follow session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Halted => true,
            Self::ExecHook { fatal, .. } => *fatal,
            Self::Transport(_) | Self::Snapshot { .. } | Self::Emit(_) | Self::Cursor(_) => false,
        }
    }

    /// Stable reason code used in diagnostics and `snapshot_error` records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Transport(_) => "transport_error",
            Self::Snapshot { .. } => "snapshot_error",
            Self::Emit(_) => "emit_error",
            Self::ExecHook { .. } => "exec_hook_error",
            Self::Cursor(_) => "cursor_error",
            Self::Halted => "emitter_halted",
        }
    }
}
