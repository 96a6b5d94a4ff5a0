//! Wire-level transcript event model.
//!
//! Mirrors the vendor's incremental result shape: an event carries results,
//! each result carries alternatives, each alternative optionally carries
//! word and punctuation items.

use serde::{Deserialize, Serialize};

/// One incremental transcript event from the vendor. Cumulative: a later
/// event supersedes an unconsumed earlier one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptEvent {
    #[serde(default)]
    pub results: Vec<TranscriptResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptResult {
    /// The vendor may still revise this result when true.
    pub is_partial: bool,
    /// Channel identifier ("ch_0", "ch_1") when channel identification is on.
    pub channel_id: Option<String>,
    pub result_id: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub alternatives: Vec<TranscriptAlternative>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptAlternative {
    pub transcript: String,
    pub items: Vec<TranscriptItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Pronunciation,
    Punctuation,
}

/// One word or punctuation mark inside an alternative. Timing and confidence
/// only apply to pronunciation items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptItem {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub confidence: Option<f64>,
    pub speaker_label: Option<String>,
}
