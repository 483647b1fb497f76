//! Record identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a new record id with the given prefix.
///
/// Ids are the first 16 hex digits of a BLAKE3 hash over the current time
/// and a process-wide sequence number, so two calls in the same nanosecond
/// still differ.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now();
    let seed = format!(
        "{prefix}:{}:{}:{seq}",
        now.timestamp(),
        now.timestamp_subsec_nanos()
    );
    let hash = blake3::hash(seed.as_bytes()).to_hex().to_string();
    format!("{prefix}_{}", &hash[..16])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_new_id_has_prefix() {
        let id = new_id("trail");
        assert!(id.starts_with("trail_"));
        assert_eq!(id.len(), "trail_".len() + 16);
    }

    #[test]
    fn test_new_id_unique() {
        let ids: HashSet<String> = (0..1_000).map(|_| new_id("bc")).collect();
        assert_eq!(ids.len(), 1_000);
    }
}
