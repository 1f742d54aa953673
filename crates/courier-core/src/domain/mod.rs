//! Domain model (ids, envelope, state machine, keys, retry policy, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod keys;
pub mod retry;
pub mod state;

pub use self::envelope::{DeadLetter, Envelope};
pub use self::errors::{DecodeFailure, DecodeReason, JobError, QueueError, StoreError};
pub use self::ids::JobId;
pub use self::keys::QueueKeys;
pub use self::retry::RetryPolicy;
pub use self::state::EnvelopeState;
