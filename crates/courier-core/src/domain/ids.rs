//! Job identity.
//!
//! # ULID ベースの ID
//! 新しく生成する ID は ULID を使います（時刻でソート可能・分散生成可能）。
//! ただしストアから復元した ID は任意の文字列でありうるため、
//! 型としては opaque な文字列として扱います。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Display / 生成時に付けるプレフィックス
const PREFIX: &str = "job-";

/// Identifier of a job (stable across retries of the same logical job).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// ストアや呼び出し側から受け取った任意の文字列を ID として扱う
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ULID から新しい ID を作成（`job-<ulid>` 形式）
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{PREFIX}{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The embedded ULID, when this id was generated by [`JobId::from_ulid`].
    pub fn ulid(&self) -> Option<Ulid> {
        self.0
            .strip_prefix(PREFIX)
            .and_then(|s| Ulid::from_string(s).ok())
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_ulid() {
        let ulid = Ulid::new();
        let id = JobId::from_ulid(ulid);

        assert!(id.as_str().starts_with("job-"));
        assert_eq!(id.ulid(), Some(ulid));
    }

    #[test]
    fn foreign_ids_are_kept_verbatim() {
        let id = JobId::new("8f2c-legacy");
        assert_eq!(id.to_string(), "8f2c-legacy");
        assert_eq!(id.ulid(), None);
    }

    #[test]
    fn ulid_ids_are_sortable() {
        // ULID は時刻ベースなので、生成順序でソート可能
        let id1 = JobId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = JobId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = JobId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");

        let back: JobId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
