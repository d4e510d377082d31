// Data models for the ledger API and the cross-window protocol

pub mod ledger;
pub mod messages;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// Accepts an expiry as an RFC 3339 string or an epoch-milliseconds number.
/// The remote system and parent containers have emitted both.
pub(crate) fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(serde_json::Value::Number(n)) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom("expiry out of range"))?;
            match Utc.timestamp_millis_opt(millis) {
                chrono::LocalResult::Single(dt) => Ok(Some(dt)),
                _ => Err(serde::de::Error::custom("expiry out of range")),
            }
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "unsupported expiry encoding: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "deserialize_expiry")]
        expires_at: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_expiry_from_rfc3339() {
        let probe: Probe =
            serde_json::from_str(r#"{"expires_at": "2026-01-02T03:04:05Z"}"#).unwrap();
        let dt = probe.expires_at.unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_expiry_from_epoch_millis() {
        let probe: Probe = serde_json::from_str(r#"{"expires_at": 1767322800000}"#).unwrap();
        assert!(probe.expires_at.is_some());
    }

    #[test]
    fn test_expiry_absent_and_null() {
        let probe: Probe = serde_json::from_str(r#"{}"#).unwrap();
        assert!(probe.expires_at.is_none());

        let probe: Probe = serde_json::from_str(r#"{"expires_at": null}"#).unwrap();
        assert!(probe.expires_at.is_none());
    }

    #[test]
    fn test_expiry_rejects_garbage() {
        assert!(serde_json::from_str::<Probe>(r#"{"expires_at": "not a date"}"#).is_err());
        assert!(serde_json::from_str::<Probe>(r#"{"expires_at": [1, 2]}"#).is_err());
    }
}
