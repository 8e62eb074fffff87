use chrono::SubsecRound;

/// Job identifiers are random UUIDs, opaque to clients.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current time truncated to microseconds, the precision the store keeps.
pub fn now() -> Timestamp {
    chrono::Utc::now().trunc_subsecs(6)
}
