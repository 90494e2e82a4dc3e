use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as unix seconds. A clock before 1970 reads as `0`.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Reads a JSON record from the store into `T`.
pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(
    record: serde_json::Value,
) -> crate::error::MiniPayResult<T> {
    serde_json::from_value(record).map_err(Into::into)
}
