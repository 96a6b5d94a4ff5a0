//! Speaker identity mapping from call metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-call metadata supplied by the host runtime at session start.
/// Caller fields describe channel 0 (A-leg), callee fields channel 1 (B-leg).
/// Unknown keys are kept so host-specific metadata round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallMetadata {
    #[serde(rename = "callerName", skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    #[serde(rename = "callerNumber", skip_serializing_if = "Option::is_none")]
    pub caller_number: Option<String>,
    #[serde(rename = "calleeName", skip_serializing_if = "Option::is_none")]
    pub callee_name: Option<String>,
    #[serde(rename = "calleeNumber", skip_serializing_if = "Option::is_none")]
    pub callee_number: Option<String>,
    #[serde(rename = "call-Id", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    pub name: String,
    pub number: String,
}

/// Static channel-id to speaker lookup, fixed for the session's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SpeakerMap {
    entries: HashMap<String, Speaker>,
}

impl SpeakerMap {
    pub fn from_metadata(meta: &CallMetadata) -> Self {
        let mut entries = HashMap::new();
        if meta.caller_name.is_some() || meta.caller_number.is_some() {
            entries.insert(
                "ch_0".to_string(),
                Speaker {
                    name: meta.caller_name.clone().unwrap_or_default(),
                    number: meta.caller_number.clone().unwrap_or_default(),
                },
            );
        }
        if meta.callee_name.is_some() || meta.callee_number.is_some() {
            entries.insert(
                "ch_1".to_string(),
                Speaker {
                    name: meta.callee_name.clone().unwrap_or_default(),
                    number: meta.callee_number.clone().unwrap_or_default(),
                },
            );
        }
        Self { entries }
    }

    pub fn resolve(&self, channel_id: &str) -> Option<&Speaker> {
        self.entries.get(channel_id)
    }

    /// "Name(Number)" identity string for outbound notifications. Results
    /// without a channel id are attributed to channel 0.
    pub fn display_identity(&self, channel_id: Option<&str>) -> String {
        match self.resolve(channel_id.unwrap_or("ch_0")) {
            Some(speaker) => format!(
                "{}({})",
                non_empty_or(&speaker.name, "Unknown"),
                non_empty_or(&speaker.number, "Unknown")
            ),
            None => "Unknown(Unknown)".to_string(),
        }
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}
