//! Enriched result-envelope assembly.
//!
//! Turns one vendor transcript event into the JSON array the host runtime
//! consumes: per-result final flags, channel/speaker attribution, and item
//! detail, in vendor order.

use serde::Serialize;

use super::model::{ItemKind, TranscriptEvent, TranscriptItem, TranscriptResult};
use super::speakers::SpeakerMap;

/// Speaker-field emission policy.
///
/// `Rich` omits speaker fields entirely when a channel has no mapping and
/// carries full item detail. `Legacy` always emits `speaker_name` and
/// `speaker_number` (possibly empty) and keeps alternatives transcript-only,
/// matching consumers built against the older output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseShape {
    #[default]
    Rich,
    Legacy,
}

impl ResponseShape {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rich" => Some(ResponseShape::Rich),
            "legacy" => Some(ResponseShape::Legacy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultEntry {
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    pub alternatives: Vec<AlternativeEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlternativeEntry {
    pub transcript: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemEntry {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,
}

/// An assembled envelope: ordered result entries plus the envelope-level
/// final flag (true if any contained result is final).
#[derive(Debug, Clone)]
pub struct TranscriptEnvelope {
    pub is_final: bool,
    pub results: Vec<ResultEntry>,
}

impl TranscriptEnvelope {
    /// Serialized form: a JSON array of result entries.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.results).unwrap_or_else(|_| "[]".to_string())
    }

    /// Primary transcript text, if any: first alternative of the first result.
    pub fn first_transcript(&self) -> Option<&str> {
        self.results
            .first()
            .and_then(|r| r.alternatives.first())
            .map(|a| a.transcript.as_str())
    }

    pub fn first_channel_id(&self) -> Option<&str> {
        self.results.first().and_then(|r| r.channel_id.as_deref())
    }
}

pub struct TranscriptAssembler {
    speakers: SpeakerMap,
    interim: bool,
    shape: ResponseShape,
}

impl TranscriptAssembler {
    pub fn new(speakers: SpeakerMap, interim: bool, shape: ResponseShape) -> Self {
        Self {
            speakers,
            interim,
            shape,
        }
    }

    /// Assemble an envelope, or None when there is nothing to emit: the event
    /// has no results, or it is all-interim on a final-only session.
    pub fn assemble(&self, event: &TranscriptEvent) -> Option<TranscriptEnvelope> {
        if event.results.is_empty() {
            return None;
        }
        let is_final = event.results.iter().any(|r| !r.is_partial);
        if !is_final && !self.interim {
            return None;
        }
        let results = event.results.iter().map(|r| self.entry_for(r)).collect();
        Some(TranscriptEnvelope { is_final, results })
    }

    fn entry_for(&self, result: &TranscriptResult) -> ResultEntry {
        let speaker = result
            .channel_id
            .as_deref()
            .and_then(|id| self.speakers.resolve(id));
        let (speaker_name, speaker_number) = match self.shape {
            ResponseShape::Rich => (
                speaker.map(|s| s.name.clone()).filter(|n| !n.is_empty()),
                speaker.map(|s| s.number.clone()).filter(|n| !n.is_empty()),
            ),
            ResponseShape::Legacy => (
                Some(speaker.map(|s| s.name.clone()).unwrap_or_default()),
                Some(speaker.map(|s| s.number.clone()).unwrap_or_default()),
            ),
        };
        let alternatives = result
            .alternatives
            .iter()
            .map(|alt| AlternativeEntry {
                transcript: alt.transcript.clone(),
                items: match self.shape {
                    ResponseShape::Rich => alt.items.iter().map(item_entry).collect(),
                    ResponseShape::Legacy => Vec::new(),
                },
            })
            .collect();
        ResultEntry {
            is_final: !result.is_partial,
            channel_id: result.channel_id.clone(),
            speaker_name,
            speaker_number,
            result_id: result.result_id.clone(),
            start_time: positive(result.start_time),
            end_time: positive(result.end_time),
            alternatives,
        }
    }
}

fn item_entry(item: &TranscriptItem) -> ItemEntry {
    let timed = item.kind == ItemKind::Pronunciation;
    ItemEntry {
        content: item.content.clone(),
        kind: item.kind,
        start_time: if timed { positive(item.start_time) } else { None },
        end_time: if timed { positive(item.end_time) } else { None },
        confidence: if timed { positive(item.confidence) } else { None },
        speaker_label: item.speaker_label.clone(),
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::model::TranscriptAlternative;
    use crate::transcript::speakers::CallMetadata;

    fn event(results: Vec<TranscriptResult>) -> TranscriptEvent {
        TranscriptEvent { results }
    }

    fn result(is_partial: bool, channel_id: Option<&str>, text: &str) -> TranscriptResult {
        TranscriptResult {
            is_partial,
            channel_id: channel_id.map(String::from),
            alternatives: vec![TranscriptAlternative {
                transcript: text.to_string(),
                items: Vec::new(),
            }],
            ..Default::default()
        }
    }

    fn two_party_map() -> SpeakerMap {
        let meta: CallMetadata = serde_json::from_str(
            r#"{"callerName": "Alice", "callerNumber": "100",
                "calleeName": "Bob", "calleeNumber": "200"}"#,
        )
        .unwrap();
        SpeakerMap::from_metadata(&meta)
    }

    #[test]
    fn test_final_only_session_suppresses_partials() {
        let asm = TranscriptAssembler::new(SpeakerMap::default(), false, ResponseShape::Rich);
        assert!(asm.assemble(&event(vec![result(true, None, "hel")])).is_none());

        let envelope = asm
            .assemble(&event(vec![result(false, None, "hello")]))
            .unwrap();
        assert!(envelope.is_final);
        assert_eq!(envelope.first_transcript(), Some("hello"));
    }

    #[test]
    fn test_empty_event_emits_nothing() {
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        assert!(asm.assemble(&event(Vec::new())).is_none());
    }

    #[test]
    fn test_any_final_result_marks_envelope_final() {
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        let envelope = asm
            .assemble(&event(vec![
                result(true, None, "still going"),
                result(false, None, "done"),
            ]))
            .unwrap();
        assert!(envelope.is_final);
        assert!(!envelope.results[0].is_final);
        assert!(envelope.results[1].is_final);
    }

    #[test]
    fn test_speaker_attribution_from_channel() {
        let asm = TranscriptAssembler::new(two_party_map(), true, ResponseShape::Rich);
        let envelope = asm
            .assemble(&event(vec![result(false, Some("ch_1"), "hi")]))
            .unwrap();
        let entry = &envelope.results[0];
        assert_eq!(entry.speaker_name.as_deref(), Some("Bob"));
        assert_eq!(entry.speaker_number.as_deref(), Some("200"));
        let json = envelope.to_json();
        assert!(json.contains(r#""speaker_name":"Bob""#));
        assert!(json.contains(r#""speaker_number":"200""#));
    }

    #[test]
    fn test_rich_shape_omits_unmapped_speaker_fields() {
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        let envelope = asm
            .assemble(&event(vec![result(false, Some("ch_0"), "hi")]))
            .unwrap();
        let json = envelope.to_json();
        assert!(!json.contains("speaker_name"));
        assert!(!json.contains("speaker_number"));
    }

    #[test]
    fn test_legacy_shape_always_emits_speaker_fields() {
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Legacy);
        let envelope = asm
            .assemble(&event(vec![result(false, Some("ch_0"), "hi")]))
            .unwrap();
        assert_eq!(envelope.results[0].speaker_name.as_deref(), Some(""));
        assert_eq!(envelope.results[0].speaker_number.as_deref(), Some(""));
        let json = envelope.to_json();
        assert!(json.contains(r#""speaker_name":"""#));
    }

    #[test]
    fn test_legacy_shape_drops_item_detail() {
        let mut r = result(false, None, "hi there");
        r.alternatives[0].items = vec![TranscriptItem {
            content: "hi".to_string(),
            kind: ItemKind::Pronunciation,
            start_time: Some(0.5),
            end_time: Some(0.8),
            confidence: Some(0.9),
            speaker_label: None,
        }];
        let legacy = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Legacy);
        let envelope = legacy.assemble(&event(vec![r.clone()])).unwrap();
        assert!(!envelope.to_json().contains("items"));

        let rich = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        let envelope = rich.assemble(&event(vec![r])).unwrap();
        assert!(envelope.to_json().contains(r#""confidence":0.9"#));
    }

    #[test]
    fn test_punctuation_items_carry_no_timing() {
        let mut r = result(false, None, "ok.");
        r.alternatives[0].items = vec![TranscriptItem {
            content: ".".to_string(),
            kind: ItemKind::Punctuation,
            start_time: Some(1.0),
            end_time: Some(1.1),
            confidence: Some(0.5),
            speaker_label: Some("spk_0".to_string()),
        }];
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        let envelope = asm.assemble(&event(vec![r])).unwrap();
        let item = &envelope.results[0].alternatives[0].items[0];
        assert!(item.start_time.is_none());
        assert!(item.confidence.is_none());
        assert_eq!(item.speaker_label.as_deref(), Some("spk_0"));
    }

    #[test]
    fn test_zero_times_omitted() {
        let mut r = result(false, None, "hi");
        r.start_time = Some(0.0);
        r.end_time = Some(2.5);
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        let envelope = asm.assemble(&event(vec![r])).unwrap();
        assert!(envelope.results[0].start_time.is_none());
        assert_eq!(envelope.results[0].end_time, Some(2.5));
    }

    #[test]
    fn test_envelope_serializes_as_array() {
        let asm = TranscriptAssembler::new(SpeakerMap::default(), true, ResponseShape::Rich);
        let envelope = asm
            .assemble(&event(vec![result(false, None, "hi")]))
            .unwrap();
        let json = envelope.to_json();
        assert!(json.starts_with('['));
        assert!(json.ends_with(']'));
    }
}
