//! Deterministic PCM generators
//!
//! Every generator returns one channel of 16-bit samples. Noise comes from
//! a fixed-seed xorshift so test vectors are identical on every run.

use crate::error::{UtilError, UtilResult};
use std::path::Path;

/// `len` samples of digital silence
pub fn silence(len: usize) -> Vec<i16> {
    vec![0; len]
}

/// Sawtooth that climbs by `step` per sample and wraps at i16 bounds
pub fn ramp(len: usize, step: i16) -> Vec<i16> {
    let mut value: i16 = 0;
    (0..len)
        .map(|_| {
            let out = value;
            value = value.wrapping_add(step);
            out
        })
        .collect()
}

/// Sine at `freq` Hz, `amplitude` in 0.0..=1.0 of full scale
pub fn sine(len: usize, freq: f32, sample_rate: u32, amplitude: f32) -> UtilResult<Vec<i16>> {
    if sample_rate == 0 || freq <= 0.0 || freq >= sample_rate as f32 / 2.0 {
        return Err(UtilError::ValidationError(format!(
            "frequency {} Hz outside (0, {}) for {} Hz",
            freq,
            sample_rate / 2,
            sample_rate
        )));
    }
    if !(0.0..=1.0).contains(&amplitude) {
        return Err(UtilError::ValidationError(format!("amplitude {} outside 0..=1", amplitude)));
    }
    let scale = amplitude * i16::MAX as f32;
    let w = 2.0 * std::f64::consts::PI * freq as f64 / sample_rate as f64;
    Ok((0..len).map(|n| ((w * n as f64).sin() as f32 * scale) as i16).collect())
}

/// Uniform white noise with peak `amplitude` (0.0..=1.0 of full scale)
pub fn white_noise(len: usize, amplitude: f32, seed: u64) -> Vec<i16> {
    let mut state = seed | 1;
    let scale = amplitude.clamp(0.0, 1.0) * i16::MAX as f32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            ((unit * 2.0 - 1.0) as f32 * scale) as i16
        })
        .collect()
}

/// Interleave two equally long channels into L R L R ...
pub fn interleave(left: &[i16], right: &[i16]) -> UtilResult<Vec<i16>> {
    if left.len() != right.len() {
        return Err(UtilError::ValidationError(format!(
            "channel lengths differ: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    Ok(left.iter().zip(right).flat_map(|(&l, &r)| [l, r]).collect())
}

/// Write encoded bytes to `path`, creating parent directories
pub fn write_output<P: AsRef<Path>>(path: P, bytes: &[u8]) -> UtilResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_deterministic() {
        assert_eq!(white_noise(256, 0.5, 7), white_noise(256, 0.5, 7));
        assert_ne!(white_noise(256, 0.5, 7), white_noise(256, 0.5, 8));
        assert!(white_noise(4096, 0.5, 1).iter().all(|&s| s.abs() <= i16::MAX / 2 + 1));
    }

    #[test]
    fn test_ramp_wraps() {
        let r = ramp(4, i16::MAX);
        assert_eq!(r, vec![0, i16::MAX, -2, 32765]);
    }

    #[test]
    fn test_sine_rejects_nyquist() {
        assert!(sine(10, 22050.0, 44100, 0.5).is_err());
        assert!(sine(10, 440.0, 44100, 1.5).is_err());
        assert_eq!(sine(10, 440.0, 44100, 0.5).map(|s| s[0]).ok(), Some(0));
    }

    #[test]
    fn test_interleave() {
        assert_eq!(interleave(&[1, 2], &[3, 4]).ok(), Some(vec![1, 3, 2, 4]));
        assert!(interleave(&[1], &[]).is_err());
    }
}
