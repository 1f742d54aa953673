//! Backing-store key namespace.

/// Keys for one queue name `Q`:
/// - `queues:Q` ready list
/// - `queues:Q:delayed` delay index scored by `available_at`
/// - `queues:Q:reserved` reservation index scored by reservation deadline
/// - `queues:failed` global dead-letter list (shared by every queue)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub ready: String,
    pub delayed: String,
    pub reserved: String,
    pub failed: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        let base = format!("{prefix}queues:{queue}");
        Self {
            delayed: format!("{base}:delayed"),
            reserved: format!("{base}:reserved"),
            failed: Self::failed_key(prefix),
            ready: base,
        }
    }

    /// The dead-letter list does not depend on the queue name.
    pub fn failed_key(prefix: &str) -> String {
        format!("{prefix}queues:failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprefixed_layout() {
        let keys = QueueKeys::new("", "emails");
        assert_eq!(keys.ready, "queues:emails");
        assert_eq!(keys.delayed, "queues:emails:delayed");
        assert_eq!(keys.reserved, "queues:emails:reserved");
        assert_eq!(keys.failed, "queues:failed");
    }

    #[test]
    fn prefix_applies_to_every_key() {
        let keys = QueueKeys::new("app:", "default");
        assert_eq!(keys.ready, "app:queues:default");
        assert_eq!(keys.delayed, "app:queues:default:delayed");
        assert_eq!(keys.failed, "app:queues:failed");
    }
}
