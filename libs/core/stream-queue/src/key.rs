//! Stream key naming.

/// Namespace prepended to every logical queue name.
pub const QUEUE_KEY_PREFIX: &str = "stream-queue";

/// Map a logical queue name to the Redis stream key that backs it.
pub fn format_queue_key(name: &str) -> String {
    format!("{}:{}", QUEUE_KEY_PREFIX, name)
}
