//! Per-session record kept in the session store.

use crate::codec::WireBlob;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the bridge keeps about one session.
///
/// `endpoints` holds one serialized state blob per endpoint prefix. Entries are
/// created on first touch and never removed while the session lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Live push connection, last handshake wins.
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, WireBlob>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint_state(&self, prefix: &str) -> Option<&WireBlob> {
        self.endpoints.get(prefix)
    }

    /// State blob for `prefix`, seeding it with `seed` when absent.
    pub fn endpoint_state_or_seed(
        &mut self,
        prefix: &str,
        seed: impl FnOnce() -> Result<WireBlob>,
    ) -> Result<&WireBlob> {
        if !self.endpoints.contains_key(prefix) {
            let blob = seed()?;
            self.endpoints.insert(prefix.to_string(), blob);
        }
        Ok(&self.endpoints[prefix])
    }

    pub fn set_endpoint_state(&mut self, prefix: impl Into<String>, blob: WireBlob) {
        self.endpoints.insert(prefix.into(), blob);
    }

    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_runs_only_once() {
        let mut record = SessionRecord::new();
        let mut seeds = 0;
        record
            .endpoint_state_or_seed("users", || {
                seeds += 1;
                Ok(WireBlob::new("{}"))
            })
            .unwrap();
        let blob = record
            .endpoint_state_or_seed("users", || Ok(WireBlob::new("never")))
            .unwrap();
        assert_eq!(blob.as_str(), "{}");
        assert_eq!(seeds, 1);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let mut record = SessionRecord::new();
        record.connection_id = Some("c1".into());
        record.set_endpoint_state("users", WireBlob::new("{}"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["connectionId"], "c1");
        assert_eq!(json["endpoints"]["users"], "{}");
    }

    #[test]
    fn test_missing_fields_default() {
        let record: SessionRecord = serde_json::from_str("{}").unwrap();
        assert!(!record.is_connected());
        assert!(record.endpoints.is_empty());
    }
}
