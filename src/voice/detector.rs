//! Voice-activity detection.

use tracing::debug;

/// Detector tuning, passed straight through from session configuration.
#[derive(Debug, Clone)]
pub struct VoiceGateConfig {
    /// Aggressiveness 0..=3; higher modes require louder audio to count as
    /// speech.
    pub mode: u8,
    /// Silence run required before speech is considered ended, in ms.
    pub silence_ms: u32,
    /// Voiced run required before speech is considered started, in ms.
    pub voice_ms: u32,
    /// Log the per-frame classification.
    pub debug: bool,
}

impl Default for VoiceGateConfig {
    fn default() -> Self {
        Self {
            mode: 2,
            silence_ms: 150,
            voice_ms: 250,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    StartTalking,
    Talking,
    StopTalking,
}

/// Classifies mono PCM frames. Implementations keep their own history; frames
/// must arrive in order.
pub trait VoiceDetector: Send {
    fn process(&mut self, samples: &[i16]) -> VadState;
}

/// Mean-amplitude energy threshold per aggressiveness mode, normalized to
/// full scale.
const MODE_THRESHOLDS: [f32; 4] = [0.005, 0.01, 0.02, 0.04];

/// Mean-amplitude energy detector.
///
/// The mode selects the energy threshold; `voice_ms`/`silence_ms` control how
/// long a run must last before the talking state flips, so isolated clicks or
/// dropouts do not toggle it.
pub struct EnergyDetector {
    config: VoiceGateConfig,
    sample_rate: u32,
    threshold: f32,
    talking: bool,
    voiced_run_ms: f32,
    silent_run_ms: f32,
}

impl EnergyDetector {
    pub fn new(config: VoiceGateConfig, sample_rate: u32) -> Self {
        let threshold = MODE_THRESHOLDS[usize::from(config.mode.min(3))];
        Self {
            config,
            sample_rate,
            threshold,
            talking: false,
            voiced_run_ms: 0.0,
            silent_run_ms: 0.0,
        }
    }

    fn frame_energy(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|s| f64::from(s.unsigned_abs())).sum();
        (sum / samples.len() as f64 / f64::from(i16::MAX)) as f32
    }
}

impl VoiceDetector for EnergyDetector {
    fn process(&mut self, samples: &[i16]) -> VadState {
        let frame_ms = samples.len() as f32 * 1000.0 / self.sample_rate as f32;
        let energy = Self::frame_energy(samples);
        let voiced = energy >= self.threshold;
        if self.config.debug {
            debug!(energy, voiced, talking = self.talking, "vad frame");
        }

        if self.talking {
            if voiced {
                self.silent_run_ms = 0.0;
                return VadState::Talking;
            }
            self.silent_run_ms += frame_ms;
            if self.silent_run_ms >= self.config.silence_ms as f32 {
                self.talking = false;
                self.voiced_run_ms = 0.0;
                self.silent_run_ms = 0.0;
                return VadState::StopTalking;
            }
            VadState::Talking
        } else {
            if voiced {
                self.voiced_run_ms += frame_ms;
                if self.voiced_run_ms >= self.config.voice_ms as f32 {
                    self.talking = true;
                    self.voiced_run_ms = 0.0;
                    self.silent_run_ms = 0.0;
                    return VadState::StartTalking;
                }
            } else {
                self.voiced_run_ms = 0.0;
            }
            VadState::Silence
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    /// 20 ms of audio at a constant amplitude.
    fn frame(amplitude: i16) -> Vec<i16> {
        vec![amplitude; (RATE / 50) as usize]
    }

    fn detector(voice_ms: u32, silence_ms: u32) -> EnergyDetector {
        EnergyDetector::new(
            VoiceGateConfig {
                mode: 2,
                silence_ms,
                voice_ms,
                debug: false,
            },
            RATE,
        )
    }

    #[test]
    fn test_speech_starts_after_voice_run() {
        let mut vad = detector(60, 100);
        let loud = frame(8000);
        assert_eq!(vad.process(&loud), VadState::Silence); // 20 ms
        assert_eq!(vad.process(&loud), VadState::Silence); // 40 ms
        assert_eq!(vad.process(&loud), VadState::StartTalking); // 60 ms
        assert_eq!(vad.process(&loud), VadState::Talking);
    }

    #[test]
    fn test_short_burst_does_not_trigger() {
        let mut vad = detector(60, 100);
        assert_eq!(vad.process(&frame(8000)), VadState::Silence);
        assert_eq!(vad.process(&frame(0)), VadState::Silence); // run resets
        assert_eq!(vad.process(&frame(8000)), VadState::Silence);
        assert_eq!(vad.process(&frame(8000)), VadState::Silence);
    }

    #[test]
    fn test_speech_stops_after_silence_run() {
        let mut vad = detector(20, 40);
        assert_eq!(vad.process(&frame(8000)), VadState::StartTalking);
        assert_eq!(vad.process(&frame(0)), VadState::Talking); // 20 ms quiet
        assert_eq!(vad.process(&frame(0)), VadState::StopTalking); // 40 ms quiet
        assert_eq!(vad.process(&frame(0)), VadState::Silence);
    }

    #[test]
    fn test_quiet_audio_below_mode_threshold() {
        let mut vad = detector(20, 40);
        // mode 2 threshold is 0.02 full scale; an amplitude of 300 is ~0.009
        assert_eq!(vad.process(&frame(300)), VadState::Silence);
        assert_eq!(vad.process(&frame(300)), VadState::Silence);
    }
}
