use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Opaque job identifier, e.g. `exec_1718000000000_42_5f1c9a0e`.
///
/// The process-wide sequence number makes ids unique even when two
/// submissions land in the same millisecond; the random suffix keeps ids from
/// different processes apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let salt = Uuid::new_v4().simple().to_string();
        JobId(format!("exec_{millis}_{seq}_{}", &salt[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl PartialEq<str> for JobId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_within_the_same_instant() {
        let ids: HashSet<JobId> = (0..10_000).map(|_| JobId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn id_has_exec_prefix() {
        let id = JobId::generate();
        assert!(id.as_str().starts_with("exec_"));
        assert_eq!(id.to_string(), id.as_str());
    }
}
