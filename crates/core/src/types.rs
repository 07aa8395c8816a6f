/// Records are identified by the external record store's own id string.
pub type RecordId = String;

/// Job ids are UUID v7, so they sort in creation order.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
