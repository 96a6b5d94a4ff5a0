//! Process configuration, loaded from the environment.

use std::env;
use std::time::Duration;

use crate::session::buffer::DEFAULT_CAPACITY_BYTES;
use crate::transcript::ResponseShape;
use crate::vendor::Credentials;
use crate::voice::VoiceGateConfig;
use crate::webhook::PusherConfig;

/// Engine-wide settings. Everything comes from environment variables so the
/// service is configured the same way in and out of containers.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Vendor websocket endpoint.
    pub vendor_endpoint: String,
    /// Explicit credentials from the process environment, if present.
    pub env_credentials: Option<Credentials>,
    /// Custom vocabulary requested from the vendor.
    pub vocabulary: Option<String>,
    pub response_shape: ResponseShape,
    pub pre_connect_capacity: usize,
    /// Bound on the post-finish wait for the vendor's final response.
    pub finish_timeout: Duration,
    /// Zero disables the no-audio watchdog.
    pub no_audio_window: Duration,
    /// Sessions running longer than this are stopped; None disables.
    pub max_duration: Option<Duration>,
    pub vad: VoiceGateConfig,
    /// Delay vendor connection until speech is detected.
    pub start_on_voice: bool,
    pub pusher: Option<PusherConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vendor_endpoint: "wss://localhost:8443/v1/listen".to_string(),
            env_credentials: None,
            vocabulary: None,
            response_shape: ResponseShape::Rich,
            pre_connect_capacity: DEFAULT_CAPACITY_BYTES,
            finish_timeout: Duration::from_secs(10),
            no_audio_window: Duration::from_secs(15),
            max_duration: None,
            vad: VoiceGateConfig::default(),
            start_on_voice: false,
            pusher: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(endpoint) = env::var("CALLSCRIBE_VENDOR_URL") {
            settings.vendor_endpoint = endpoint;
        }
        settings.env_credentials = explicit_env_credentials();
        settings.vocabulary = env::var("CALLSCRIBE_VOCABULARY_NAME").ok();
        if let Ok(shape) = env::var("CALLSCRIBE_RESPONSE_SHAPE") {
            if let Some(parsed) = ResponseShape::parse(&shape) {
                settings.response_shape = parsed;
            }
        }
        if let Some(secs) = env_u64("CALLSCRIBE_FINISH_TIMEOUT_SECS") {
            settings.finish_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CALLSCRIBE_NO_AUDIO_SECS") {
            settings.no_audio_window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CALLSCRIBE_MAX_DURATION_SECS") {
            settings.max_duration = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(mode) = env_u64("RECOGNIZER_VAD_MODE") {
            settings.vad.mode = mode.min(3) as u8;
        }
        if let Some(ms) = env_u64("RECOGNIZER_VAD_SILENCE_MS") {
            settings.vad.silence_ms = ms as u32;
        }
        if let Some(ms) = env_u64("RECOGNIZER_VAD_VOICE_MS") {
            settings.vad.voice_ms = ms as u32;
        }
        settings.vad.debug = env_flag("RECOGNIZER_VAD_DEBUG");
        settings.start_on_voice = env_flag("START_RECOGNIZING_ON_VAD");
        settings.pusher = PusherConfig::from_env();
        settings
    }
}

/// Explicit credentials require both the key id and the secret; the session
/// token alone is never enough.
fn explicit_env_credentials() -> Option<Credentials> {
    let access_key_id = env::var("AWS_ACCESS_KEY_ID")
        .ok()
        .filter(|v| !v.is_empty())?;
    let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .filter(|v| !v.is_empty())?;
    Some(Credentials::Explicit {
        access_key_id,
        secret_access_key,
        session_token: env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()),
    })
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.pre_connect_capacity, DEFAULT_CAPACITY_BYTES);
        assert_eq!(settings.finish_timeout, Duration::from_secs(10));
        assert_eq!(settings.response_shape, ResponseShape::Rich);
        assert!(settings.max_duration.is_none());
        assert!(!settings.start_on_voice);
    }
}
