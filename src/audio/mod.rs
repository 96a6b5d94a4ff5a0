//! PCM helpers shared by the frame-delivery path.

use byteorder::{ByteOrder, LittleEndian};

/// Downmix interleaved stereo samples by averaging each pair.
pub fn stereo_to_mono(stereo: &[i16]) -> Vec<i16> {
    stereo
        .chunks(2)
        .map(|chunk| {
            if chunk.len() == 2 {
                ((chunk[0] as i32 + chunk[1] as i32) / 2) as i16
            } else {
                chunk[0]
            }
        })
        .collect()
}

/// Encode samples as little-endian s16le bytes, the vendor wire format.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut buf = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut buf);
    buf
}

/// Sample-rate conversion collaborator. The frame path treats this as an
/// opaque filter; implementations own whatever state the math needs.
pub trait RateConverter: Send {
    fn convert(&mut self, input: &[i16]) -> Vec<i16>;
}

/// Linear-interpolation converter. Good enough for the 8 kHz telephony to
/// 16 kHz vendor hop; swap in a polyphase implementation for anything fancier.
pub struct LinearConverter {
    from_rate: u32,
    to_rate: u32,
}

impl LinearConverter {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self { from_rate, to_rate }
    }
}

impl RateConverter for LinearConverter {
    fn convert(&mut self, input: &[i16]) -> Vec<i16> {
        if self.from_rate == self.to_rate || input.len() < 2 {
            return input.to_vec();
        }
        let out_len = (input.len() as u64 * self.to_rate as u64 / self.from_rate as u64) as usize;
        if out_len < 2 {
            return input.to_vec();
        }
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * (input.len() - 1) as f64 / (out_len - 1) as f64;
                let idx = pos as usize;
                let frac = pos - idx as f64;
                let a = input[idx] as f64;
                let b = input[(idx + 1).min(input.len() - 1)] as f64;
                (a + (b - a) * frac) as i16
            })
            .collect()
    }
}
