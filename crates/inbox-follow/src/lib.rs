//! Real-time conversation follow engine for the support inbox CLI.
//!
//! Consumes push-channel events, hydrates per-conversation state from the
//! REST API on first reference, filters, and emits records through a bounded
//! emitter with an optional per-record exec hook and a resumable cursor.

pub mod conversation_api;
pub mod conversation_state;
pub mod cursor_store;
pub mod emitter;
pub mod event_interpreter;
pub mod exec_hook;
pub mod follow_error;
pub mod follow_filters;
pub mod follow_runtime;
pub mod live_channel;
pub mod record_render;
pub mod snapshot_builder;

pub use conversation_api::*;
pub use conversation_state::*;
pub use cursor_store::*;
pub use emitter::*;
pub use event_interpreter::*;
pub use exec_hook::*;
pub use follow_error::*;
pub use follow_filters::*;
pub use follow_runtime::*;
pub use live_channel::*;
pub use record_render::*;
pub use snapshot_builder::*;
