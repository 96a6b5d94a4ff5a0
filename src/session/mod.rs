//! Streaming transcription sessions.
//!
//! A session owns the full lifecycle of one vendor stream. Audio written by
//! the frame-delivery context is buffered or queued depending on connection
//! state, the vendor's callbacks deposit events through [`StreamEventSink`],
//! and a single consumer loop forwards audio, assembles transcripts, and
//! performs shutdown. The vendor stream handle itself is only ever touched by
//! the consumer loop.

pub mod buffer;
pub mod state;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::transcript::{TranscriptAssembler, TranscriptEnvelope, TranscriptEvent};
use crate::vendor::{StreamRequest, VendorClient, VendorStream};
use buffer::PreConnectBuffer;
use state::ConnectionState;

/// Events a session reports back to its creator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Speech was detected on a gated session; connection is under way.
    VoiceDetected,
    /// An assembled transcript envelope.
    Transcript(TranscriptEnvelope),
    /// The session finished delivering results.
    EndOfTranscript,
    /// The configured maximum session duration elapsed.
    MaxDurationExceeded,
    /// No audio arrived within the initial watch window.
    NoAudioDetected,
    /// Terminal vendor failure; the session is finished.
    Error { message: String },
}

/// Receives session events. Implementations must not block; anything slow
/// belongs on a spawned task.
pub trait ResponseHandler: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub tap_name: String,
    pub pre_connect_capacity: usize,
    /// Bound on the wait for the vendor's final response after shutdown.
    pub finish_timeout: Duration,
}

struct Inner {
    conn: ConnectionState,
    /// True once the stream-ready signal has been observed. `Finishing` can
    /// be reached without it; the consumer loop uses this to tell the two
    /// shutdown paths apart.
    ever_connected: bool,
    pending: PreConnectBuffer,
    queue: VecDeque<Vec<u8>>,
    /// Newest-wins transcript register.
    transcript: Option<TranscriptEvent>,
    /// Stream handle deposited by the ready callback, picked up by the loop.
    stream: Option<Box<dyn VendorStream>>,
    packets: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Notify,
    handler: Arc<dyn ResponseHandler>,
}

impl Shared {
    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("session lock poisoned")
    }
}

/// Callback handle given to the vendor client. Callable from any task; every
/// method takes the session lock, updates shared state, and wakes the loop.
#[derive(Clone)]
pub struct StreamEventSink {
    shared: Arc<Shared>,
}

impl StreamEventSink {
    /// The vendor stream is open. Buffered pre-connect audio moves onto the
    /// forward queue here, under the same lock that flips the state, so no
    /// later write can land ahead of it.
    pub fn stream_ready(&self, stream: Box<dyn VendorStream>) {
        let mut inner = self.shared.locked();
        if inner.conn != ConnectionState::Connecting {
            debug!("vendor stream ready after session left connecting state, dropping");
            return;
        }
        inner.conn = ConnectionState::Connected;
        inner.ever_connected = true;
        if inner.pending.is_empty() {
            debug!("vendor stream ready");
        } else {
            info!(
                chunks = inner.pending.len(),
                bytes = inner.pending.buffered_bytes(),
                "vendor stream ready, forwarding buffered audio"
            );
        }
        let held = inner.pending.drain_all();
        inner.queue.extend(held);
        inner.stream = Some(stream);
        self.shared.wake.notify_one();
    }

    /// Deposit an incremental transcript event. An unconsumed earlier event
    /// is overwritten; the vendor's events are cumulative, so only the newest
    /// matters.
    pub fn transcript_event(&self, event: TranscriptEvent) {
        let mut inner = self.shared.locked();
        if inner.conn == ConnectionState::Finished {
            return;
        }
        inner.transcript = Some(event);
        self.shared.wake.notify_one();
    }

    /// Terminal outcome of the vendor stream. An error is reported through
    /// the response handler exactly once, then the session is finished.
    pub fn final_response(&self, outcome: Result<(), String>) {
        let first = {
            let mut inner = self.shared.locked();
            let first = inner.conn != ConnectionState::Finished;
            inner.conn = ConnectionState::Finished;
            self.shared.wake.notify_one();
            first
        };
        if first {
            if let Err(message) = outcome {
                warn!(error = %message, "vendor stream failed");
                self.shared.handler.on_event(SessionEvent::Error { message });
            }
        }
    }
}

enum Step {
    Exit,
    Emit(TranscriptEvent),
    /// First observation of the finish request: forward what is still queued,
    /// then flush and close the stream.
    Shutdown(Vec<Vec<u8>>),
    Forward(Vec<Vec<u8>>),
    Wait,
}

/// One streaming transcription session.
pub struct StreamingSession {
    shared: Arc<Shared>,
    client: Arc<dyn VendorClient>,
    request: StreamRequest,
    assembler: TranscriptAssembler,
    session_id: String,
    tap_name: String,
    finish_timeout: Duration,
}

impl StreamingSession {
    pub fn new(
        config: SessionConfig,
        request: StreamRequest,
        client: Arc<dyn VendorClient>,
        assembler: TranscriptAssembler,
        handler: Arc<dyn ResponseHandler>,
    ) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                conn: ConnectionState::Idle,
                ever_connected: false,
                pending: PreConnectBuffer::new(config.pre_connect_capacity),
                queue: VecDeque::new(),
                transcript: None,
                stream: None,
                packets: 0,
            }),
            wake: Notify::new(),
            handler,
        });
        Self {
            shared,
            client,
            request,
            assembler,
            session_id: config.session_id,
            tap_name: config.tap_name,
            finish_timeout: config.finish_timeout,
        }
    }

    /// Begin connecting to the vendor. Safe to call more than once; only the
    /// first call has any effect.
    pub fn connect(&self) {
        {
            let mut inner = self.shared.locked();
            if inner.conn != ConnectionState::Idle {
                return;
            }
            inner.conn = ConnectionState::Connecting;
        }
        info!(
            session = %self.session_id,
            tap = %self.tap_name,
            credentials = %self.request.credentials.describe(),
            "connecting to transcription vendor"
        );
        let client = Arc::clone(&self.client);
        let request = self.request.clone();
        let sink = StreamEventSink {
            shared: Arc::clone(&self.shared),
        };
        tokio::spawn(async move {
            if let Err(e) = client.start_stream(request, sink.clone()).await {
                sink.final_response(Err(e.to_string()));
            }
        });
    }

    /// Route one audio chunk according to connection state. Returns false
    /// once the session is finishing or finished; audio is never accepted
    /// after that point.
    pub fn write(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        let mut inner = self.shared.locked();
        if inner.conn.rejects_audio() {
            debug!(session = %self.session_id, "dropping audio written after finish");
            return false;
        }
        if inner.conn.buffers_audio() {
            inner.pending.push(data.to_vec());
            debug!(
                session = %self.session_id,
                bytes = data.len(),
                buffered_bytes = inner.pending.buffered_bytes(),
                buffered_chunks = inner.pending.len(),
                "queuing pre-connect audio"
            );
            return true;
        }
        inner.queue.push_back(data.to_vec());
        inner.packets += 1;
        self.shared.wake.notify_one();
        true
    }

    /// Request graceful shutdown. Idempotent.
    pub fn finish(&self) {
        let mut inner = self.shared.locked();
        if inner.conn.rejects_audio() {
            return;
        }
        debug!(session = %self.session_id, "finish requested");
        inner.conn = ConnectionState::Finishing;
        self.shared.wake.notify_one();
    }

    /// Whether connect() has been issued. The frame path uses this to stop
    /// running the voice gate once connection is in flight.
    pub fn is_connecting(&self) -> bool {
        self.shared.locked().conn != ConnectionState::Idle
    }

    /// Post-connect chunks accepted so far.
    pub fn packets(&self) -> u64 {
        self.shared.locked().packets
    }

    /// Consumer loop: forwards queued audio, emits assembled transcripts, and
    /// performs shutdown. Returns once the session reaches `Finished`, or as
    /// soon as it is known the connection will never complete.
    pub async fn run(&self) {
        let mut stream: Option<Box<dyn VendorStream>> = None;
        let mut shutdown_initiated = false;
        loop {
            let wake = self.shared.wake.notified();
            let step = {
                let mut inner = self.shared.locked();
                if let Some(delivered) = inner.stream.take() {
                    stream = Some(delivered);
                }
                next_step(&mut inner, shutdown_initiated)
            };
            match step {
                Step::Exit => break,
                Step::Emit(event) => {
                    if let Some(envelope) = self.assembler.assemble(&event) {
                        debug!(
                            session = %self.session_id,
                            is_final = envelope.is_final,
                            "emitting transcript"
                        );
                        self.shared
                            .handler
                            .on_event(SessionEvent::Transcript(envelope));
                    }
                }
                Step::Shutdown(chunks) => {
                    shutdown_initiated = true;
                    if let Some(stream) = stream.as_mut() {
                        forward(stream, chunks, &self.session_id).await;
                        if let Err(e) = stream.flush().await {
                            warn!(session = %self.session_id, error = %e, "stream flush failed");
                        }
                        if let Err(e) = stream.close().await {
                            warn!(session = %self.session_id, error = %e, "stream close failed");
                        }
                        debug!(session = %self.session_id, "vendor stream closed");
                    }
                }
                Step::Forward(chunks) => {
                    if let Some(stream) = stream.as_mut() {
                        forward(stream, chunks, &self.session_id).await;
                    }
                }
                Step::Wait => {
                    if shutdown_initiated {
                        if tokio::time::timeout(self.finish_timeout, wake).await.is_err() {
                            warn!(
                                session = %self.session_id,
                                timeout = ?self.finish_timeout,
                                "no final response from vendor, forcing shutdown"
                            );
                            self.shared.locked().conn = ConnectionState::Finished;
                        }
                    } else {
                        wake.await;
                    }
                }
            }
        }
        let packets = {
            let mut inner = self.shared.locked();
            inner.conn = ConnectionState::Finished;
            inner.packets
        };
        debug!(
            session = %self.session_id,
            tap = %self.tap_name,
            packets,
            "session loop finished"
        );
    }
}

fn next_step(inner: &mut Inner, shutdown_initiated: bool) -> Step {
    if inner.conn == ConnectionState::Finished {
        return Step::Exit;
    }
    if let Some(event) = inner.transcript.take() {
        return Step::Emit(event);
    }
    match inner.conn {
        ConnectionState::Finishing => {
            if !inner.ever_connected {
                // the connection never completed; nothing to flush
                return Step::Exit;
            }
            if !shutdown_initiated {
                return Step::Shutdown(inner.queue.drain(..).collect());
            }
            Step::Wait
        }
        ConnectionState::Connected if !inner.queue.is_empty() => {
            Step::Forward(inner.queue.drain(..).collect())
        }
        _ => Step::Wait,
    }
}

async fn forward(stream: &mut Box<dyn VendorStream>, chunks: Vec<Vec<u8>>, session_id: &str) {
    for chunk in chunks {
        if let Err(e) = stream.send_audio(chunk).await {
            warn!(session = %session_id, error = %e, "audio forward failed");
            break;
        }
    }
}
