//! Shared utilities: timestamps and identifier generation.

mod timestamps;
mod uuid_utils;

pub use timestamps::{iso_timestamp, now, Timestamp};
pub use uuid_utils::{generate_correlation_id, generate_execution_id, generate_uuid};
