//! Voice-activity gating for deferred vendor connection.

pub mod detector;
pub mod gate;

pub use detector::{EnergyDetector, VadState, VoiceDetector, VoiceGateConfig};
pub use gate::VoiceGate;
