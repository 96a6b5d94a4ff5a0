//! Supported transcription language codes.

use crate::error::TranscribeError;

/// Streaming language codes the vendor accepts.
const SUPPORTED_LANGUAGES: &[&str] = &[
    "en-US", "en-GB", "en-AU", "es-US", "fr-FR", "fr-CA", "de-DE", "it-IT",
    "pt-BR", "ja-JP", "ko-KR", "zh-CN", "hi-IN", "ar-SA", "th-TH", "nl-NL",
];

/// Validate a requested language code, returning its canonical form.
pub fn validate(code: &str) -> Result<String, TranscribeError> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.eq_ignore_ascii_case(code))
        .map(|l| (*l).to_string())
        .ok_or_else(|| TranscribeError::InvalidLanguage(code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_known_codes() {
        assert_eq!(validate("en-US").unwrap(), "en-US");
        assert_eq!(validate("pt-br").unwrap(), "pt-BR");
    }

    #[test]
    fn test_validate_rejects_unknown() {
        assert!(matches!(
            validate("xx-XX"),
            Err(TranscribeError::InvalidLanguage(code)) if code == "xx-XX"
        ));
    }
}
