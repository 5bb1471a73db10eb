//! Foundational low-level utilities shared across inbox crates.
//!
//! Provides atomic file-write helpers, time utilities used by cursor
//! persistence, and tolerant JSON field decoding for loosely typed payloads.

pub mod atomic_io;
pub mod json_fields;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use json_fields::{json_bool, json_field, json_path, json_string, json_u64, value_as_u64};
pub use time_utils::{current_rfc3339_timestamp, current_unix_timestamp_ms};
