//! Envelope - ストアに保存される job のレコード
//!
//! Wire format (JSON):
//! `{id, token, type, queue, payload, attempts, max_attempts, created_at, available_at}`
//!
//! delayed / reserved は envelope の JSON をそのまま member にする sorted set なので、
//! 同じ job を同じミリ秒に 2 回積んでも 1 つに潰れないよう、保存のたびに token を振り直します。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::JobId;

/// The record the store-backed queue actually moves between structures.
///
/// `job_type` is the registry name used to rebuild the job at pop time;
/// `payload` is the job's own opaque serialization of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: JobId,
    /// Unique per stored copy. Never shared between two enqueues.
    #[serde(default)]
    pub token: Ulid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub queue: String,
    pub payload: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

impl Envelope {
    /// Token for a copy stored at `at`.
    pub fn fresh_token(at: DateTime<Utc>) -> Ulid {
        let millis = u64::try_from(at.timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(millis, rand::random())
    }

    /// Score used by the delayed index (milliseconds since the epoch).
    pub fn available_score(&self) -> i64 {
        self.available_at.timestamp_millis()
    }
}

/// Terminal record appended to the global dead-letter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub queue: String,
    pub envelope: Envelope,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> Envelope {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        Envelope {
            id: JobId::new("job-1"),
            token: Envelope::fresh_token(created),
            job_type: "mail.send.v1".into(),
            queue: "emails".into(),
            payload: r#"{"to":"a@example.com"}"#.into(),
            attempts: 0,
            max_attempts: 3,
            created_at: created,
            available_at: created + Duration::seconds(5),
        }
    }

    #[test]
    fn wire_format_uses_type_key() {
        let v = serde_json::to_value(sample()).unwrap();
        assert_eq!(v["type"], "mail.send.v1");
        assert_eq!(v["queue"], "emails");
        assert_eq!(v["attempts"], 0);
        assert_eq!(v["max_attempts"], 3);
        assert!(v.get("job_type").is_none());
    }

    #[test]
    fn records_without_a_token_still_decode() {
        let mut v = serde_json::to_value(sample()).unwrap();
        v.as_object_mut().unwrap().remove("token");

        let env: Envelope = serde_json::from_value(v).unwrap();
        assert_eq!(env.token, Ulid::nil());
        assert_eq!(env.id, JobId::new("job-1"));
    }

    #[test]
    fn tokens_differ_within_one_millisecond() {
        let at = sample().created_at;
        let a = Envelope::fresh_token(at);
        let b = Envelope::fresh_token(at);
        assert_ne!(a, b);
        assert_eq!(a.timestamp_ms(), b.timestamp_ms());
    }

    #[test]
    fn available_score_is_epoch_millis() {
        let env = sample();
        assert_eq!(env.available_score(), env.available_at.timestamp_millis());
    }
}
