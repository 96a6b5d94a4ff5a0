//! Host-runtime boundary: the engine owns every active session.
//!
//! The registry is keyed by call uuid plus tap name, so a call can carry
//! several independent transcription taps. The frame path applies the voice
//! gate and rate conversion before handing bytes to the session; everything a
//! session reports flows out through one event channel, with transcripts also
//! fanned out to the webhook when one is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{self, LinearConverter, RateConverter};
use crate::config::Settings;
use crate::error::TranscribeError;
use crate::language;
use crate::session::{ResponseHandler, SessionConfig, SessionEvent, StreamingSession};
use crate::transcript::{CallMetadata, SpeakerMap, TranscriptAssembler};
use crate::vendor::{Credentials, StreamRequest, VendorClient};
use crate::voice::{EnergyDetector, VoiceGate};
use crate::webhook::PusherNotifier;

/// Vendor-side sample rate. Audio at any other host rate is converted before
/// it reaches the session; transcription quality drops sharply below 16 kHz.
pub const VENDOR_SAMPLE_RATE: u32 = 16_000;

/// Default tap name when a command does not pick one.
pub const DEFAULT_TAP: &str = "transcribe";

/// Channel mix requested for a tap. Mixed taps receive both legs folded into
/// one channel by the host; stereo taps receive two channels for channel
/// identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixType {
    #[default]
    Mono,
    Mixed,
    Stereo,
}

impl MixType {
    pub fn channels(self) -> u16 {
        if self == MixType::Stereo { 2 } else { 1 }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mono" => Some(MixType::Mono),
            "mixed" => Some(MixType::Mixed),
            "stereo" => Some(MixType::Stereo),
            _ => None,
        }
    }
}

/// Options for starting one transcription tap on a call.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOptions {
    pub language: String,
    pub interim: bool,
    pub mix: MixType,
    /// Rate of the audio the host will deliver.
    pub sample_rate: u32,
    pub tap_name: String,
    pub metadata: CallMetadata,
    /// Per-call credentials; take priority over the environment.
    pub credentials: Option<Credentials>,
}

impl StartOptions {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            interim: false,
            mix: MixType::Mono,
            sample_rate: VENDOR_SAMPLE_RATE,
            tap_name: DEFAULT_TAP.to_string(),
            metadata: CallMetadata::default(),
            credentials: None,
        }
    }
}

/// Event delivered to the host runtime.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub session_id: String,
    pub tap_name: String,
    pub event: SessionEvent,
}

struct CallEntry {
    session: Arc<StreamingSession>,
    task: Mutex<Option<JoinHandle<()>>>,
    gate: Option<Mutex<VoiceGate>>,
    converter: Option<Mutex<Box<dyn RateConverter>>>,
    speakers: SpeakerMap,
    call_id: Option<String>,
    session_id: String,
    tap_name: String,
    events: mpsc::UnboundedSender<CallEvent>,
    saw_audio: AtomicBool,
}

/// Per-session response handler. Holds the registry entry weakly: events
/// arriving after teardown upgrade to nothing and are dropped, never
/// dereferenced into a dead session.
struct EngineHandler {
    entry: Mutex<Weak<CallEntry>>,
    events: mpsc::UnboundedSender<CallEvent>,
    webhook: Option<Arc<PusherNotifier>>,
    session_id: String,
    tap_name: String,
}

impl EngineHandler {
    fn bind(&self, entry: &Arc<CallEntry>) {
        *self.entry.lock().expect("handler lock poisoned") = Arc::downgrade(entry);
    }
}

impl ResponseHandler for EngineHandler {
    fn on_event(&self, event: SessionEvent) {
        let entry = self.entry.lock().expect("handler lock poisoned").upgrade();
        let Some(entry) = entry else {
            debug!(session = %self.session_id, "dropping event for departed session");
            return;
        };
        if let (Some(webhook), Some(call_id), SessionEvent::Transcript(envelope)) =
            (self.webhook.as_ref(), entry.call_id.as_deref(), &event)
        {
            if let Some(text) = envelope.first_transcript().filter(|t| !t.is_empty()) {
                let speaker_id = entry.speakers.display_identity(envelope.first_channel_id());
                let webhook = Arc::clone(webhook);
                let call_id = call_id.to_string();
                let text = text.to_string();
                let is_final = envelope.is_final;
                tokio::spawn(async move {
                    webhook
                        .publish_transcript(&call_id, &speaker_id, &text, is_final)
                        .await;
                });
            }
        }
        let _ = self.events.send(CallEvent {
            session_id: self.session_id.clone(),
            tap_name: self.tap_name.clone(),
            event,
        });
    }
}

pub struct TranscribeEngine {
    settings: Settings,
    client: Arc<dyn VendorClient>,
    sessions: DashMap<String, Arc<CallEntry>>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    webhook: Option<Arc<PusherNotifier>>,
}

impl TranscribeEngine {
    pub fn new(
        settings: Settings,
        client: Arc<dyn VendorClient>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CallEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let webhook = settings
            .pusher
            .clone()
            .map(|config| Arc::new(PusherNotifier::new(config)));
        let engine = Arc::new(Self {
            settings,
            client,
            sessions: DashMap::new(),
            events_tx,
            webhook,
        });
        (engine, events_rx)
    }

    fn key(session_id: &str, tap_name: &str) -> String {
        format!("{session_id}:{tap_name}")
    }

    /// Start a transcription tap. Validates the language up front; no state
    /// is left behind on failure.
    pub fn start_session(
        self: &Arc<Self>,
        session_id: &str,
        options: StartOptions,
    ) -> Result<(), TranscribeError> {
        let lang = language::validate(&options.language)?;
        let key = Self::key(session_id, &options.tap_name);
        if self.sessions.contains_key(&key) {
            return Err(TranscribeError::SessionExists(options.tap_name.clone()));
        }

        let channels = options.mix.channels();
        let request = StreamRequest {
            language: lang,
            sample_rate: VENDOR_SAMPLE_RATE,
            channels,
            interim: options.interim,
            enable_channel_identification: channels > 1,
            credentials: self.resolve_credentials(options.credentials.clone()),
            vocabulary: self.settings.vocabulary.clone(),
        };

        let speakers = SpeakerMap::from_metadata(&options.metadata);
        let assembler = TranscriptAssembler::new(
            speakers.clone(),
            options.interim,
            self.settings.response_shape,
        );

        let handler = Arc::new(EngineHandler {
            entry: Mutex::new(Weak::new()),
            events: self.events_tx.clone(),
            webhook: self.webhook.clone(),
            session_id: session_id.to_string(),
            tap_name: options.tap_name.clone(),
        });
        let dyn_handler: Arc<dyn ResponseHandler> = handler.clone();

        let session = Arc::new(StreamingSession::new(
            SessionConfig {
                session_id: session_id.to_string(),
                tap_name: options.tap_name.clone(),
                pre_connect_capacity: self.settings.pre_connect_capacity,
                finish_timeout: self.settings.finish_timeout,
            },
            request,
            Arc::clone(&self.client),
            assembler,
            dyn_handler,
        ));

        let gate = self.settings.start_on_voice.then(|| {
            let detector = EnergyDetector::new(self.settings.vad.clone(), options.sample_rate);
            Mutex::new(VoiceGate::new(Box::new(detector)))
        });
        let converter: Option<Mutex<Box<dyn RateConverter>>> = (options.sample_rate
            != VENDOR_SAMPLE_RATE)
            .then(|| {
                info!(
                    from = options.sample_rate,
                    to = VENDOR_SAMPLE_RATE,
                    "rate conversion enabled"
                );
                Mutex::new(Box::new(LinearConverter::new(
                    options.sample_rate,
                    VENDOR_SAMPLE_RATE,
                )) as Box<dyn RateConverter>)
            });

        let entry = Arc::new(CallEntry {
            session: Arc::clone(&session),
            task: Mutex::new(None),
            gate,
            converter,
            speakers,
            call_id: options.metadata.call_id.clone(),
            session_id: session_id.to_string(),
            tap_name: options.tap_name.clone(),
            events: self.events_tx.clone(),
            saw_audio: AtomicBool::new(false),
        });
        handler.bind(&entry);

        let run_session = Arc::clone(&session);
        let task = tokio::spawn(async move { run_session.run().await });
        *entry.task.lock().expect("entry lock poisoned") = Some(task);

        self.sessions.insert(key, Arc::clone(&entry));

        if entry.gate.is_none() {
            session.connect();
        } else {
            info!(session = %session_id, "deferring vendor connection until speech is detected");
        }

        if let (Some(webhook), Some(call_id)) = (self.webhook.as_ref(), entry.call_id.clone()) {
            let caller_id = entry.speakers.display_identity(Some("ch_0"));
            let callee_id = entry.speakers.display_identity(Some("ch_1"));
            let webhook = Arc::clone(webhook);
            tokio::spawn(async move {
                webhook
                    .publish_session_start(&call_id, &caller_id, &callee_id)
                    .await;
            });
        }

        self.spawn_watchdogs(&entry);
        info!(
            session = %session_id,
            tap = %options.tap_name,
            language = %options.language,
            interim = options.interim,
            channels,
            "transcription session started"
        );
        Ok(())
    }

    /// Feed one frame of host PCM. Returns false when no session accepts it.
    pub fn feed_frame(&self, session_id: &str, tap_name: &str, samples: &[i16]) -> bool {
        let key = Self::key(session_id, tap_name);
        let entry = match self.sessions.get(&key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return false,
        };
        entry.saw_audio.store(true, Ordering::Relaxed);

        if let Some(gate) = &entry.gate {
            if !entry.session.is_connecting()
                && gate.lock().expect("gate lock poisoned").observe(samples)
            {
                info!(session = %session_id, "speech detected, connecting vendor stream");
                entry.session.connect();
                let _ = entry.events.send(CallEvent {
                    session_id: entry.session_id.clone(),
                    tap_name: entry.tap_name.clone(),
                    event: SessionEvent::VoiceDetected,
                });
            }
        }

        let bytes = match &entry.converter {
            Some(converter) => audio::samples_to_bytes(
                &converter
                    .lock()
                    .expect("converter lock poisoned")
                    .convert(samples),
            ),
            None => audio::samples_to_bytes(samples),
        };
        entry.session.write(&bytes)
    }

    /// Stop a tap: request finish, wait for the consumer loop to wind down,
    /// then report end-of-transcript.
    pub async fn stop_session(
        &self,
        session_id: &str,
        tap_name: &str,
    ) -> Result<(), TranscribeError> {
        let key = Self::key(session_id, tap_name);
        let Some((_, entry)) = self.sessions.remove(&key) else {
            return Err(TranscribeError::SessionNotFound(tap_name.to_string()));
        };
        info!(session = %session_id, tap = %tap_name, "stopping transcription session");
        entry.session.finish();
        let task = entry.task.lock().expect("entry lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session = %session_id, error = %e, "session loop join failed");
            }
        }
        debug!(
            session = %session_id,
            packets = entry.session.packets(),
            "session wound down"
        );
        let _ = entry.events.send(CallEvent {
            session_id: session_id.to_string(),
            tap_name: tap_name.to_string(),
            event: SessionEvent::EndOfTranscript,
        });
        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Credential priority: per-call options, then the process environment,
    /// then the vendor's ambient chain.
    fn resolve_credentials(&self, per_call: Option<Credentials>) -> Credentials {
        if let Some(credentials) = per_call {
            return credentials;
        }
        if let Some(credentials) = self.settings.env_credentials.clone() {
            return credentials;
        }
        Credentials::Ambient
    }

    fn spawn_watchdogs(self: &Arc<Self>, entry: &Arc<CallEntry>) {
        let weak = Arc::downgrade(entry);
        if !self.settings.no_audio_window.is_zero() {
            let weak = weak.clone();
            let window = self.settings.no_audio_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let Some(entry) = weak.upgrade() else { return };
                if !entry.saw_audio.load(Ordering::Relaxed) {
                    warn!(session = %entry.session_id, "no audio within watch window");
                    let _ = entry.events.send(CallEvent {
                        session_id: entry.session_id.clone(),
                        tap_name: entry.tap_name.clone(),
                        event: SessionEvent::NoAudioDetected,
                    });
                }
            });
        }
        if let Some(max_duration) = self.settings.max_duration {
            let engine = Arc::downgrade(self);
            tokio::spawn(async move {
                tokio::time::sleep(max_duration).await;
                let Some(entry) = weak.upgrade() else { return };
                warn!(session = %entry.session_id, "maximum session duration exceeded");
                let _ = entry.events.send(CallEvent {
                    session_id: entry.session_id.clone(),
                    tap_name: entry.tap_name.clone(),
                    event: SessionEvent::MaxDurationExceeded,
                });
                if let Some(engine) = engine.upgrade() {
                    let _ = engine
                        .stop_session(&entry.session_id, &entry.tap_name)
                        .await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamEventSink;
    use crate::vendor::VendorError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Vendor that accepts the stream request but never signals readiness.
    struct NullClient {
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VendorClient for NullClient {
        async fn start_stream(
            &self,
            _request: StreamRequest,
            _sink: StreamEventSink,
        ) -> Result<(), VendorError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine_with(
        settings: Settings,
    ) -> (
        Arc<TranscribeEngine>,
        mpsc::UnboundedReceiver<CallEvent>,
        Arc<AtomicUsize>,
    ) {
        let starts = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(NullClient {
            starts: Arc::clone(&starts),
        });
        let (engine, events) = TranscribeEngine::new(settings, client);
        (engine, events, starts)
    }

    fn quiet_settings() -> Settings {
        Settings {
            no_audio_window: Duration::ZERO,
            finish_timeout: Duration::from_millis(100),
            ..Settings::default()
        }
    }

    async fn expect_event<F>(events: &mut mpsc::UnboundedReceiver<CallEvent>, matcher: F)
    where
        F: Fn(&SessionEvent) -> bool,
    {
        let deadline = Duration::from_millis(500);
        let event = tokio::time::timeout(deadline, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        assert!(matcher(&event.event), "unexpected event: {:?}", event.event);
    }

    #[tokio::test]
    async fn test_invalid_language_fails_without_state() {
        let (engine, _events, starts) = engine_with(quiet_settings());
        let result = engine.start_session("call-1", StartOptions::new("xx-XX"));
        assert!(matches!(result, Err(TranscribeError::InvalidLanguage(_))));
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_tap_rejected() {
        let (engine, _events, _) = engine_with(quiet_settings());
        engine
            .start_session("call-1", StartOptions::new("en-US"))
            .unwrap();
        assert!(matches!(
            engine.start_session("call-1", StartOptions::new("en-US")),
            Err(TranscribeError::SessionExists(_))
        ));
        // a second tap under a different name is fine
        let mut second = StartOptions::new("en-US");
        second.tap_name = "secondary".to_string();
        engine.start_session("call-1", second).unwrap();
        assert_eq!(engine.active_sessions(), 2);
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let (engine, _events, _) = engine_with(quiet_settings());
        assert!(matches!(
            engine.stop_session("missing", DEFAULT_TAP).await,
            Err(TranscribeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop_reports_end_of_transcript() {
        let (engine, mut events, starts) = engine_with(quiet_settings());
        engine
            .start_session("call-1", StartOptions::new("en-US"))
            .unwrap();
        // ungated sessions connect immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        engine.stop_session("call-1", DEFAULT_TAP).await.unwrap();
        assert_eq!(engine.active_sessions(), 0);
        expect_event(&mut events, |e| {
            matches!(e, SessionEvent::EndOfTranscript)
        })
        .await;
    }

    #[tokio::test]
    async fn test_voice_gate_defers_connection() {
        let mut settings = quiet_settings();
        settings.start_on_voice = true;
        settings.vad.voice_ms = 40;
        let (engine, mut events, starts) = engine_with(settings);
        engine
            .start_session("call-1", StartOptions::new("en-US"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        // silence keeps the gate closed
        let silence = vec![0i16; 320];
        assert!(engine.feed_frame("call-1", DEFAULT_TAP, &silence));
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        // 3 x 20 ms of speech passes voice_ms and triggers the connect
        let speech = vec![8000i16; 320];
        for _ in 0..3 {
            assert!(engine.feed_frame("call-1", DEFAULT_TAP, &speech));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        expect_event(&mut events, |e| matches!(e, SessionEvent::VoiceDetected)).await;

        engine.stop_session("call-1", DEFAULT_TAP).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_audio_watchdog_fires() {
        let mut settings = quiet_settings();
        settings.no_audio_window = Duration::from_millis(20);
        let (engine, mut events, _) = engine_with(settings);
        engine
            .start_session("call-1", StartOptions::new("en-US"))
            .unwrap();
        expect_event(&mut events, |e| {
            matches!(e, SessionEvent::NoAudioDetected)
        })
        .await;
        engine.stop_session("call-1", DEFAULT_TAP).await.unwrap();
    }

    #[tokio::test]
    async fn test_feed_frame_unknown_session() {
        let (engine, _events, _) = engine_with(quiet_settings());
        assert!(!engine.feed_frame("nope", DEFAULT_TAP, &[0i16; 160]));
    }
}
