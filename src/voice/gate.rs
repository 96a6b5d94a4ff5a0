//! Connection gating on detected speech.

use super::detector::{VadState, VoiceDetector};

/// Defers vendor connection until the detector reports speech.
///
/// Fires at most once per session. Audio observed before the trigger is still
/// buffered upstream, so leading words survive the connect latency.
pub struct VoiceGate {
    detector: Box<dyn VoiceDetector>,
    fired: bool,
}

impl VoiceGate {
    pub fn new(detector: Box<dyn VoiceDetector>) -> Self {
        Self {
            detector,
            fired: false,
        }
    }

    /// Run one frame through the detector. Returns true exactly once, on the
    /// silence-to-speech transition.
    pub fn observe(&mut self, samples: &[i16]) -> bool {
        if self.fired {
            return false;
        }
        if self.detector.process(samples) == VadState::StartTalking {
            self.fired = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Detector scripted with a fixed sequence of states.
    struct ScriptedDetector {
        states: Vec<VadState>,
        index: usize,
    }

    impl VoiceDetector for ScriptedDetector {
        fn process(&mut self, _samples: &[i16]) -> VadState {
            let state = self.states[self.index.min(self.states.len() - 1)];
            self.index += 1;
            state
        }
    }

    #[test]
    fn test_gate_fires_once_on_speech_start() {
        let detector = ScriptedDetector {
            states: vec![
                VadState::Silence,
                VadState::StartTalking,
                VadState::Talking,
                VadState::StopTalking,
                VadState::StartTalking,
            ],
            index: 0,
        };
        let mut gate = VoiceGate::new(Box::new(detector));
        assert!(!gate.observe(&[0]));
        assert!(gate.observe(&[0]));
        // further speech transitions never re-trigger
        assert!(!gate.observe(&[0]));
        assert!(!gate.observe(&[0]));
        assert!(!gate.observe(&[0]));
    }
}
