// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One inbound event, carried verbatim from ingestion to the downstream collector.
///
/// Only JSON objects are accepted; none of their fields are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Record(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Parses a request body into a record, rejecting anything that is not a JSON object.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Record(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_object() {
        let record = Record::from_slice(br#"{"level":"info","msg":"hello"}"#).unwrap();
        assert_eq!(record.fields().get("msg"), Some(&json!("hello")));
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(Record::from_slice(b"[1,2,3]").is_err());
        assert!(Record::from_slice(b"\"text\"").is_err());
        assert!(Record::from_slice(b"42").is_err());
        assert!(Record::from_slice(b"{not json").is_err());
        assert!(Record::from_slice(b"").is_err());
    }

    #[test]
    fn test_serializes_fields_verbatim() {
        let record = Record::from_slice(br#"{"nested":{"a":[1,2]},"n":null}"#).unwrap();
        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(encoded, json!({"nested": {"a": [1, 2]}, "n": null}));
    }
}
