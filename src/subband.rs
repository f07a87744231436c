//! Polyphase analysis filterbank
//!
//! Splits PCM into 32 equal-width subbands using the 512 tap analysis
//! window of ISO 11172-3. Each call consumes 32 new samples of one
//! channel and produces one sample per subband.

use crate::tables::ENWINDOW;
use crate::types::{HAN_SIZE, SBLIMIT};
use lazy_static::lazy_static;
use std::f64::consts::PI;

lazy_static! {
    /// Analysis matrix `cos((2k + 1)(i - 16) pi / 64)`
    static ref FILTER: [[f32; 64]; SBLIMIT] = {
        let mut m = [[0.0f32; 64]; SBLIMIT];
        for (k, row) in m.iter_mut().enumerate() {
            for (i, v) in row.iter_mut().enumerate() {
                *v = ((2 * k + 1) as f64 * (i as f64 - 16.0) * PI / 64.0).cos() as f32;
            }
        }
        m
    };
}

/// Subband filter for decomposing PCM audio into frequency bands
#[derive(Debug, Clone)]
pub struct SubbandFilter {
    /// Newest sample first, per channel
    history: Vec<[f32; HAN_SIZE]>,
}

impl SubbandFilter {
    /// Create a new subband filter for the specified number of channels
    pub fn new(channels: usize) -> Self {
        Self {
            history: vec![[0.0; HAN_SIZE]; channels],
        }
    }

    /// Shift `input` (32 samples, oldest first) into the history of `ch`
    /// and write one output sample per subband
    pub fn filter(&mut self, ch: usize, input: &[f32], output: &mut [f32; SBLIMIT]) {
        debug_assert_eq!(input.len(), SBLIMIT);
        let x = &mut self.history[ch];
        x.copy_within(0..HAN_SIZE - SBLIMIT, SBLIMIT);
        for (i, &s) in input.iter().enumerate() {
            x[SBLIMIT - 1 - i] = s;
        }

        let mut y = [0.0f32; 64];
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = (0..8).map(|j| x[i + 64 * j] * ENWINDOW[i + 64 * j]).sum();
        }

        for (k, out) in output.iter_mut().enumerate() {
            *out = FILTER[k].iter().zip(y.iter()).map(|(&m, &v)| m * v).sum();
        }
    }

    /// Filter a whole granule (576 samples) of `ch` into 18 time slots of
    /// 32 subband samples
    pub fn filter_granule(&mut self, ch: usize, pcm: &[f32], sb: &mut [[f32; SBLIMIT]; 18]) {
        for (slot, chunk) in sb.iter_mut().zip(pcm.chunks_exact(SBLIMIT)) {
            self.filter(ch, chunk, slot);
        }
    }

    /// Reset the filter state
    pub fn reset(&mut self) {
        for channel_history in &mut self.history {
            channel_history.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut filter = SubbandFilter::new(1);
        let mut sb = [[1.0f32; SBLIMIT]; 18];
        filter.filter_granule(0, &[0.0; 576], &mut sb);
        assert!(sb.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_sine_lands_in_its_subband() {
        // 44.1 kHz subbands are 689 Hz wide; 3 kHz falls in band 4
        let pcm = sine(3000.0, 44100.0, 576 * 4);
        let mut filter = SubbandFilter::new(1);
        let mut energy = [0.0f32; SBLIMIT];
        let mut sb = [[0.0f32; SBLIMIT]; 18];
        for (n, granule) in pcm.chunks_exact(576).enumerate() {
            filter.filter_granule(0, granule, &mut sb);
            if n < 2 {
                continue;
            }
            for slot in sb.iter() {
                for (e, &v) in energy.iter_mut().zip(slot.iter()) {
                    *e += v * v;
                }
            }
        }
        let loudest = energy
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (k, &e)| if e > best.1 { (k, e) } else { best });
        assert_eq!(loudest.0, 4);
        let others: f32 = energy.iter().enumerate().filter(|(k, _)| k.abs_diff(4) > 1).map(|(_, e)| e).sum();
        assert!(others < loudest.1 * 1e-3);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = SubbandFilter::new(2);
        let mut out = [0.0f32; SBLIMIT];
        filter.filter(1, &[1.0; SBLIMIT], &mut out);
        filter.reset();
        filter.filter(1, &[0.0; SBLIMIT], &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
