//! Raw rows, normalized records, and lenient column decoding.
//!
//! Rows arrive from the backing store as loosely-typed JSON objects. Every
//! collection the data layer reads has a typed record implementing
//! [`NormalizedRecord`], whose `normalize` turns a raw row into the typed
//! record. Normalization is pure and idempotent: serializing a normalized
//! record back into a row and normalizing it again yields the same record,
//! which is what lets the offline cache store plain rows.

use crate::error::{LatsError, LatsResult, RemoteError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A backing-store row as received on the wire.
pub type RawRow = Map<String, Value>;

/// A typed record produced from a [`RawRow`].
pub trait NormalizedRecord: Clone + Serialize + Send + Sync + 'static {
    /// Backing-store collection the record is read from.
    const COLLECTION: &'static str;

    /// Select clause for this projection, including embedded sub-collections.
    fn columns() -> &'static str;

    /// Whether a successful bulk fetch should replace the offline cache
    /// snapshot for [`Self::COLLECTION`]. Narrow projections return false so
    /// they never overwrite a full snapshot.
    fn write_through() -> bool {
        true
    }

    /// Coerce a raw row into the typed record.
    fn normalize(row: RawRow) -> LatsResult<Self>;

    /// Serialize back into row form.
    fn to_row(&self) -> LatsResult<RawRow> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => Ok(row),
            Ok(other) => Err(malformed(
                Self::COLLECTION,
                format!("record serialized to non-object {other}"),
            )),
            Err(e) => Err(malformed(Self::COLLECTION, e.to_string())),
        }
    }
}

/// Deserialize a row into `T`, reporting failures as malformed records.
pub fn decode_row<T: DeserializeOwned>(collection: &str, row: RawRow) -> LatsResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| malformed(collection, e.to_string()))
}

pub(crate) fn malformed(collection: &str, reason: impl Into<String>) -> LatsError {
    LatsError::Remote(RemoteError::MalformedRecord {
        collection: collection.to_string(),
        reason: reason.into(),
    })
}

/// Column decoders that accept the shapes the store actually returns
/// (numbers as strings, JSON arrays stored as text, postgres timestamps).
///
/// Values that cannot be interpreted decode as `None`/empty rather than
/// failing the whole row.
pub mod lenient {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn opt_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        })
    }

    pub fn opt_i64<'de, D>(d: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
    }

    pub fn opt_bool<'de, D>(d: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::String(s)) => match s.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Some(Value::Number(n)) => n.as_i64().map(|i| i != 0),
            _ => None,
        })
    }

    pub fn opt_datetime<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::String(s)) => parse_timestamp(&s),
            _ => None,
        })
    }

    /// A list column that may be a JSON array or a JSON-encoded string.
    /// Elements that do not decode are dropped.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Option::<Value>::deserialize(d)?;
        let items = match value {
            Some(Value::Array(items)) => items,
            Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect())
    }

    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::lenient;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient::opt_f64")]
        amount: Option<f64>,
        #[serde(default, deserialize_with = "lenient::opt_i64")]
        points: Option<i64>,
        #[serde(default, deserialize_with = "lenient::opt_bool")]
        active: Option<bool>,
        #[serde(default, deserialize_with = "lenient::list")]
        tags: Vec<String>,
        #[serde(default, deserialize_with = "lenient::opt_datetime")]
        seen: Option<chrono::DateTime<chrono::Utc>>,
    }

    #[test]
    fn test_numbers_accept_strings() {
        let probe: Probe = serde_json::from_value(json!({
            "amount": "1500.5",
            "points": "42",
            "active": "1",
        }))
        .unwrap();
        assert_eq!(probe.amount, Some(1500.5));
        assert_eq!(probe.points, Some(42));
        assert_eq!(probe.active, Some(true));
    }

    #[test]
    fn test_garbage_decodes_as_missing() {
        let probe: Probe = serde_json::from_value(json!({
            "amount": "lots",
            "points": {"nested": true},
            "active": "maybe",
            "tags": "not json",
            "seen": "yesterday",
        }))
        .unwrap();
        assert_eq!(probe.amount, None);
        assert_eq!(probe.points, None);
        assert_eq!(probe.active, None);
        assert!(probe.tags.is_empty());
        assert!(probe.seen.is_none());
    }

    #[test]
    fn test_list_accepts_encoded_string() {
        let probe: Probe = serde_json::from_value(json!({
            "tags": "[\"a\", \"b\", 3]",
        }))
        .unwrap();
        assert_eq!(probe.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_postgres_timestamp_without_zone() {
        let ts = lenient::parse_timestamp("2025-09-11 14:19:18.123").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-09-11T14:19:18.123+00:00");
        assert!(lenient::parse_timestamp("2025-09-11T14:19:18Z").is_some());
    }
}
