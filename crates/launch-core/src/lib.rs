//! Foundational low-level utilities shared across launch crates.
//!
//! Provides atomic file writes, time helpers, and the string key/value store
//! that backs persisted launch state.

pub mod atomic_io;
pub mod kv_store;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use kv_store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use time_utils::{current_unix_timestamp_ms, duration_to_millis};
