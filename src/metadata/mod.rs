//! Metadata tail: the JSON object stored at the end of every container.

mod date;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Title given to containers created without one.
pub const DEFAULT_TITLE: &str = "N/A";

/// Length and type tag of one stored block. A descriptor's position in
/// [`Metadata::array`] is the block's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub length:    u64,
    pub data_type: String,
}

pub type PreviewDescriptor = BlockDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    #[serde(default)]
    pub tags:  Vec<String>,
    #[serde(with = "date")]
    pub date:  DateTime<Utc>,
    /// Block descriptors in physical order.
    #[serde(default)]
    pub array: Vec<BlockDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewDescriptor>,
    /// Fields written by other producers; carried through a re-save untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    pub fn new(title: impl Into<String>, tags: Vec<String>, date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            tags,
            date,
            array:   Vec::new(),
            preview: None,
            extra:   Map::new(),
        }
    }

    /// Sum of all block descriptor lengths; `None` if it overflows `u64`.
    pub fn array_length(&self) -> Option<u64> {
        self.array.iter().try_fold(0u64, |sum, d| sum.checked_add(d.length))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE, Vec::new(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reads_tail_with_iso_date() {
        let raw = br#"{"title":"Trip","tags":["sea","sun"],"date":"2017-03-01T10:20:30.123Z",
            "array":[{"length":3,"data_type":"image/png"},{"length":0,"data_type":"text/plain"}],
            "preview":{"length":2,"data_type":"image/jpeg"}}"#;
        let meta = Metadata::from_bytes(raw).unwrap();

        assert_eq!(meta.title, "Trip");
        assert_eq!(meta.tags, vec!["sea", "sun"]);
        assert_eq!(meta.date, Utc.timestamp_millis_opt(1_488_363_630_123).unwrap());
        assert_eq!(meta.array.len(), 2);
        assert_eq!(meta.array_length(), Some(3));
        assert_eq!(meta.preview.as_ref().map(|p| p.length), Some(2));
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn reads_epoch_millis_and_day_dates() {
        let meta = Metadata::from_bytes(br#"{"title":"a","date":1000,"array":[]}"#).unwrap();
        assert_eq!(meta.date, Utc.timestamp_millis_opt(1000).unwrap());
        assert!(meta.tags.is_empty());
        assert!(meta.preview.is_none());

        let meta = Metadata::from_bytes(br#"{"title":"a","date":"2020-02-29"}"#).unwrap();
        assert_eq!(meta.date, Utc.with_ymd_and_hms(2020, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn overflowing_descriptor_sum_is_none() {
        let raw = format!(
            r#"{{"title":"a","date":0,"array":[{{"length":{},"data_type":"x"}},{{"length":5,"data_type":"y"}}]}}"#,
            u64::MAX
        );
        let meta = Metadata::from_bytes(raw.as_bytes()).unwrap();
        assert_eq!(meta.array_length(), None);
    }

    #[test]
    fn rejects_unparsable_date() {
        assert!(Metadata::from_bytes(br#"{"title":"a","date":"yesterday"}"#).is_err());
    }

    #[test]
    fn writes_millisecond_date_and_skips_absent_preview() {
        let date = Utc.timestamp_millis_opt(1_488_363_630_123).unwrap();
        let meta = Metadata::new("t", vec![], date);
        let json: Value = serde_json::from_slice(&meta.to_bytes().unwrap()).unwrap();

        assert_eq!(json["date"], "2017-03-01T10:20:30.123Z");
        assert!(json.get("preview").is_none());
        assert_eq!(json["array"], Value::Array(vec![]));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let raw = br#"{"title":"a","date":0,"author":"me","rating":5}"#;
        let meta = Metadata::from_bytes(raw).unwrap();
        assert_eq!(meta.extra.get("author"), Some(&Value::from("me")));

        let again = Metadata::from_bytes(&meta.to_bytes().unwrap()).unwrap();
        assert_eq!(again, meta);
    }
}
