use thiserror::Error;

/// Failures surfaced across the engine boundary. Everything that happens
/// after a session is running is reported as an event instead, never thrown.
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("unsupported language code: {0}")]
    InvalidLanguage(String),
    #[error("transcription already running on tap {0}")]
    SessionExists(String),
    #[error("no transcription running on tap {0}")]
    SessionNotFound(String),
}
