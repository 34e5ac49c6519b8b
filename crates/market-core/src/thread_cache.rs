use crate::types::Message;

/// Per-thread ordered message cache with a monotonic fetch-sequence guard.
///
/// The cache is rebuilt wholesale from every applied fetch rather than
/// patched incrementally. Each fetch takes a sequence number before its
/// request goes out; a snapshot whose sequence is not newer than the last
/// applied one is discarded, so a slow fetch can never overwrite the result
/// of a newer one.
#[derive(Debug, Clone, Default)]
pub struct ThreadCache {
    messages: Vec<Message>,
    last_applied_seq: u64,
}

impl ThreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current messages in non-decreasing `created_at` order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Sequence number of the last applied snapshot, `0` before any fetch.
    pub fn last_applied_seq(&self) -> u64 {
        self.last_applied_seq
    }

    /// Replace the cache with a fetched snapshot.
    ///
    /// Returns `false` and leaves the cache untouched when `seq` is stale.
    /// Applied snapshots are sorted by `created_at` (ties broken by row ID).
    pub fn apply_snapshot(&mut self, seq: u64, mut messages: Vec<Message>) -> bool {
        if seq <= self.last_applied_seq {
            return false;
        }

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.messages = messages;
        self.last_applied_seq = seq;
        true
    }

    /// Clamp a configured page limit against safety and server caps.
    ///
    /// The result is always in `1..=500`.
    pub fn bounded_page_limit(requested: u32, server_cap: u32) -> u32 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, body: &str, minute: u32) -> Message {
        Message {
            id,
            ticket_id: "t-1".to_owned(),
            author_id: "u-1".to_owned(),
            body: body.to_owned(),
            is_privileged: false,
            created_at: Utc
                .with_ymd_and_hms(2026, 8, 1, 10, minute, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn applied_snapshot_is_sorted_by_creation_time() {
        let mut cache = ThreadCache::new();
        let applied = cache.apply_snapshot(
            1,
            vec![message(3, "three", 5), message(1, "one", 1), message(2, "two", 3)],
        );

        assert!(applied);
        let bodies: Vec<&str> = cache.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[test]
    fn equal_timestamps_are_ordered_by_row_id() {
        let mut cache = ThreadCache::new();
        cache.apply_snapshot(1, vec![message(9, "later", 2), message(4, "earlier", 2)]);

        let ids: Vec<i64> = cache.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![4, 9]);
    }

    #[test]
    fn stale_fetch_result_does_not_overwrite_newer_snapshot() {
        let mut cache = ThreadCache::new();

        // Fetch B (seq 2) resolves first, then the older fetch A (seq 1)
        // arrives late. A must be discarded.
        assert!(cache.apply_snapshot(2, vec![message(1, "one", 1), message(2, "two", 2)]));
        assert!(!cache.apply_snapshot(1, vec![message(1, "one", 1)]));

        assert_eq!(cache.messages().len(), 2);
        assert_eq!(cache.last_applied_seq(), 2);
    }

    #[test]
    fn replaying_the_same_sequence_is_rejected() {
        let mut cache = ThreadCache::new();
        assert!(cache.apply_snapshot(1, vec![message(1, "one", 1)]));
        assert!(!cache.apply_snapshot(1, Vec::new()));
        assert_eq!(cache.messages().len(), 1);
    }

    #[test]
    fn bounds_page_limit_for_safety() {
        assert_eq!(ThreadCache::bounded_page_limit(0, 200), 1);
        assert_eq!(ThreadCache::bounded_page_limit(50, 20), 20);
        assert_eq!(ThreadCache::bounded_page_limit(900, 1_000), 500);
    }
}
