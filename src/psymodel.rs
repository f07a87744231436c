//! Psychoacoustic model
//!
//! Works on the MDCT spectrum of each granule: band energies, masking
//! thresholds from a Bark-domain spreading function, perceptual entropy
//! and the mid/side decision for joint stereo. Block switching is driven
//! by an attack detector on the PCM of the look-ahead granule.

use crate::ath::Ath;
use crate::config::{SessionConfig, StereoMode};
use crate::types::{
    BandValues, BlockType, GranuleInfo, PsyRatio, ScalefacBands, SideInfo, GRANULE_SIZE,
    MAX_CHANNELS, MAX_GRANULES, SBMAX_L, SBMAX_S,
};
use log::trace;
use std::f32::consts::{FRAC_1_SQRT_2, LN_10, PI};

/// Signal-to-mask offsets applied after spreading
const MASK_OFFSET_LONG_DB: f32 = -15.5;
const MASK_OFFSET_SHORT_DB: f32 = -12.0;
/// Sub-blocks per granule for attack detection
const SUB_BLOCKS: usize = 6;
/// High-passed sub-block energy below which nothing counts as an attack
const ATTACK_FLOOR: f32 = 1e-3;
/// Temporal masking sustain between short windows, in seconds
const TEMPORAL_SUSTAIN_SEC: f32 = 0.01;

/// Decay of a short window's threshold into the next window
pub fn temporal_decay(sample_rate: u32) -> f32 {
    (-LN_10 / (TEMPORAL_SUSTAIN_SEC * sample_rate as f32 / 192.0)).exp()
}

/// Critical band rate in Bark at `freq` Hz
fn bark(freq: f32) -> f32 {
    13.0 * (0.00076 * freq).atan() + 3.5 * (freq * freq / (7500.0 * 7500.0)).atan()
}

/// Linear spreading from a masker to a maskee `dz` Bark above it
fn spreading(dz: f32) -> f32 {
    let t = dz + 0.474;
    let db = 15.81 + 7.5 * t - 17.5 * (1.0 + t * t).sqrt();
    if db < -60.0 {
        0.0
    } else {
        10f32.powf(db / 10.0)
    }
}

/// Masking level difference between M/S and L/R at `z` Bark
fn mld(z: f32) -> f32 {
    let x = if z < 15.5 { 1.25 * (1.0 - (PI * z / 15.5).cos()) - 2.5 } else { 0.0 };
    10f32.powf(x)
}

/// Psychoacoustic output of one frame, in the channel layout the
/// quantizer will code (L/R, or M/S when `mid_side` is set)
#[derive(Debug, Clone, Default)]
pub struct PsyFrame {
    pub pe: [[f32; MAX_CHANNELS]; MAX_GRANULES],
    pub ratio: [[PsyRatio; MAX_CHANNELS]; MAX_GRANULES],
    /// Side energy over mid plus side energy
    pub ms_ener_ratio: [f32; MAX_GRANULES],
    pub mid_side: bool,
    /// Equal-loudness weighted power of the L/R spectra
    pub loudness: [[f32; MAX_CHANNELS]; MAX_GRANULES],
}

#[derive(Debug, Clone, Copy, Default)]
struct AttackDetector {
    last_sample: f32,
    prev_energy: [f32; 2],
}

impl AttackDetector {
    /// Feed one granule; true when a high-passed sub-block jumps above
    /// `threshold` times the louder of the two before it
    fn feed(&mut self, pcm: &[f32], threshold: f32) -> bool {
        let len = pcm.len() / SUB_BLOCKS;
        let mut attack = false;
        for chunk in pcm.chunks_exact(len) {
            let mut energy = 0.0f32;
            for &x in chunk {
                let hp = x - self.last_sample;
                self.last_sample = x;
                energy += hp * hp;
            }
            let reference = self.prev_energy[0].max(self.prev_energy[1]);
            if energy > ATTACK_FLOOR && energy > threshold * reference {
                attack = true;
            }
            self.prev_energy = [self.prev_energy[1], energy];
        }
        attack
    }
}

#[derive(Debug, Clone)]
pub struct PsyModel {
    channels: usize,
    joint_stereo: bool,
    bands: ScalefacBands,
    spread_l: [[f32; SBMAX_L]; SBMAX_L],
    spread_s: [[f32; SBMAX_S]; SBMAX_S],
    mld_l: [f32; SBMAX_L],
    mld_s: [f32; SBMAX_S],
    offset_l: f32,
    offset_s: f32,
    attack_threshold: f32,
    attack_threshold_short: f32,
    inter_ch_ratio: f32,
    msfix: f32,
    /// L, R and (joint stereo) side signal detectors
    detectors: [AttackDetector; 3],
    prev_block: [BlockType; MAX_CHANNELS],
}

impl PsyModel {
    pub fn new(session: &SessionConfig) -> Self {
        let bands = session.bands.clone();
        let sr = session.sample_rate as f32;
        let long_line = sr / (2.0 * GRANULE_SIZE as f32);
        let short_line = sr / (2.0 * (GRANULE_SIZE / 3) as f32);

        let mut z_l = [0.0f32; SBMAX_L];
        for (sfb, z) in z_l.iter_mut().enumerate() {
            let center = (bands.l[sfb] + bands.l[sfb + 1]) as f32 * 0.5;
            *z = bark(center * long_line);
        }
        let mut z_s = [0.0f32; SBMAX_S];
        for (sfb, z) in z_s.iter_mut().enumerate() {
            let center = (bands.s[sfb] + bands.s[sfb + 1]) as f32 * 0.5;
            *z = bark(center * short_line);
        }

        let mut spread_l = [[0.0f32; SBMAX_L]; SBMAX_L];
        for (b, row) in spread_l.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = spreading(z_l[b] - z_l[j]);
            }
        }
        let mut spread_s = [[0.0f32; SBMAX_S]; SBMAX_S];
        for (b, row) in spread_s.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = spreading(z_s[b] - z_s[j]);
            }
        }

        let tuning = &session.tuning;
        Self {
            channels: session.channels,
            joint_stereo: session.mode == StereoMode::JointStereo,
            bands,
            spread_l,
            spread_s,
            mld_l: z_l.map(mld),
            mld_s: z_s.map(mld),
            offset_l: 10f32.powf(MASK_OFFSET_LONG_DB / 10.0),
            offset_s: 10f32.powf(MASK_OFFSET_SHORT_DB / 10.0),
            attack_threshold: tuning.attack_threshold,
            attack_threshold_short: tuning.attack_threshold_short,
            inter_ch_ratio: tuning.inter_ch_ratio,
            msfix: tuning.msfix,
            detectors: [AttackDetector::default(); 3],
            prev_block: [BlockType::Norm; MAX_CHANNELS],
        }
    }

    /// Look for attacks in the next granule of every channel.
    ///
    /// Joint stereo also watches the side signal, with the short block
    /// threshold, and reports its attacks on both channels.
    pub fn detect_attacks(&mut self, pcm: [&[f32]; MAX_CHANNELS]) -> [bool; MAX_CHANNELS] {
        let mut attack = [false; MAX_CHANNELS];
        for ch in 0..self.channels {
            attack[ch] = self.detectors[ch].feed(pcm[ch], self.attack_threshold);
        }
        if self.joint_stereo && self.channels == 2 {
            let side: Vec<f32> = pcm[0].iter().zip(pcm[1].iter()).map(|(&l, &r)| (l - r) * 0.5).collect();
            if self.detectors[2].feed(&side, self.attack_threshold_short) {
                attack = [true; MAX_CHANNELS];
            }
        }
        attack
    }

    /// Window shapes of the granule about to be transformed, given
    /// attacks in it (`now`) and in the one after it (`next`).
    ///
    /// Follows NORM -> START -> SHORT -> STOP -> NORM; joint stereo keeps
    /// both channels on the same shape.
    pub fn block_types(
        &mut self,
        now: [bool; MAX_CHANNELS],
        next: [bool; MAX_CHANNELS],
    ) -> [BlockType; MAX_CHANNELS] {
        let (now, next) = if self.joint_stereo && self.channels == 2 {
            ([now[0] || now[1]; 2], [next[0] || next[1]; 2])
        } else {
            (now, next)
        };
        let mut types = [BlockType::Norm; MAX_CHANNELS];
        for ch in 0..self.channels {
            let wants_short = now[ch] || next[ch];
            types[ch] = match self.prev_block[ch] {
                BlockType::Start => BlockType::Short,
                BlockType::Short if wants_short => BlockType::Short,
                BlockType::Short => BlockType::Stop,
                BlockType::Norm | BlockType::Stop if wants_short => BlockType::Start,
                BlockType::Norm | BlockType::Stop => BlockType::Norm,
            };
            self.prev_block[ch] = types[ch];
        }
        types
    }

    fn band_energies(&self, xr: &[f32; GRANULE_SIZE], block_type: BlockType) -> BandValues {
        let mut en = BandValues::default();
        if block_type == BlockType::Short {
            for sfb in 0..SBMAX_S {
                for (w, e) in en.s[sfb].iter_mut().enumerate() {
                    *e = (self.bands.s[sfb]..self.bands.s[sfb + 1])
                        .map(|l| xr[3 * l + w] * xr[3 * l + w])
                        .sum();
                }
            }
        } else {
            for (sfb, e) in en.l.iter_mut().enumerate() {
                *e = xr[self.bands.l[sfb]..self.bands.l[sfb + 1]].iter().map(|x| x * x).sum();
            }
        }
        en
    }

    fn thresholds(&self, en: &BandValues, block_type: BlockType) -> BandValues {
        let mut thm = BandValues::default();
        if block_type == BlockType::Short {
            for w in 0..3 {
                for (b, row) in self.spread_s.iter().enumerate() {
                    let spread: f32 = row.iter().enumerate().map(|(j, &s)| s * en.s[j][w]).sum();
                    thm.s[b][w] = spread * self.offset_s;
                }
            }
        } else {
            for (b, row) in self.spread_l.iter().enumerate() {
                let spread: f32 = row.iter().zip(en.l.iter()).map(|(&s, &e)| s * e).sum();
                thm.l[b] = spread * self.offset_l;
            }
        }
        thm
    }

    fn perceptual_entropy(&self, ratio: &PsyRatio, block_type: BlockType, ath: &Ath) -> f32 {
        let mut pe = 0.0f32;
        if block_type == BlockType::Short {
            for sfb in 0..SBMAX_S {
                let width = (self.bands.s[sfb + 1] - self.bands.s[sfb]) as f32;
                for w in 0..3 {
                    let thm = ratio.thm.s[sfb][w].max(ath.s[sfb]);
                    pe += width * (1.0 + ratio.en.s[sfb][w] / thm).log10();
                }
            }
        } else {
            for sfb in 0..SBMAX_L {
                let width = (self.bands.l[sfb + 1] - self.bands.l[sfb]) as f32;
                let thm = ratio.thm.l[sfb].max(ath.l[sfb]);
                pe += width * (1.0 + ratio.en.l[sfb] / thm).log10();
            }
        }
        pe
    }

    fn ratio_of(&self, xr: &[f32; GRANULE_SIZE], block_type: BlockType) -> PsyRatio {
        let en = self.band_energies(xr, block_type);
        let thm = self.thresholds(&en, block_type);
        PsyRatio { en, thm }
    }

    /// Each channel of a stereo pair also masks the other a little
    fn interchannel_masking(&self, ratio: &mut [PsyRatio; MAX_CHANNELS]) {
        if self.channels < 2 || self.inter_ch_ratio <= 0.0 {
            return;
        }
        let r = self.inter_ch_ratio;
        for sfb in 0..SBMAX_L {
            let m0 = ratio[0].thm.l[sfb];
            let m1 = ratio[1].thm.l[sfb];
            ratio[0].thm.l[sfb] += m1 * r;
            ratio[1].thm.l[sfb] += m0 * r;
        }
        for sfb in 0..SBMAX_S {
            for w in 0..3 {
                let m0 = ratio[0].thm.s[sfb][w];
                let m1 = ratio[1].thm.s[sfb][w];
                ratio[0].thm.s[sfb][w] += m1 * r;
                ratio[1].thm.s[sfb][w] += m0 * r;
            }
        }
    }

    /// Pull M/S thresholds towards the L/R ones so coding in M/S does not
    /// unmask noise that L/R would have hidden
    fn ms_thresholds(&self, lr: &[PsyRatio; 2], ms: &mut [PsyRatio; 2], ath: &Ath, short: bool) {
        let fix = |eb_m: f32, eb_s: f32, thm: [f32; 4], mld: f32, ath: f32| -> (f32, f32) {
            let [thm_l, thm_r, thm_m, thm_s] = thm;
            let (mut rmid, mut rside) = if thm_l <= 1.58 * thm_r && thm_r <= 1.58 * thm_l {
                (thm_m.max(thm_s.min(mld * eb_s)), thm_s.max(thm_m.min(mld * eb_m)))
            } else {
                (thm_m, thm_s)
            };
            if self.msfix > 0.0 {
                let thm_lr = thm_l.max(ath).min(thm_r.max(ath));
                let mut m = rmid.max(ath);
                let mut s = rside.max(ath);
                let sum = m + s;
                if sum > 0.0 && thm_lr * self.msfix * 2.0 < sum {
                    let f = thm_lr * self.msfix * 2.0 / sum;
                    m *= f;
                    s *= f;
                }
                rmid = rmid.min(m);
                rside = rside.min(s);
            }
            (rmid.min(eb_m), rside.min(eb_s))
        };

        if short {
            for sfb in 0..SBMAX_S {
                for w in 0..3 {
                    let (m, s) = fix(
                        ms[0].en.s[sfb][w],
                        ms[1].en.s[sfb][w],
                        [lr[0].thm.s[sfb][w], lr[1].thm.s[sfb][w], ms[0].thm.s[sfb][w], ms[1].thm.s[sfb][w]],
                        self.mld_s[sfb],
                        ath.s[sfb],
                    );
                    ms[0].thm.s[sfb][w] = m;
                    ms[1].thm.s[sfb][w] = s;
                }
            }
        } else {
            for sfb in 0..SBMAX_L {
                let (m, s) = fix(
                    ms[0].en.l[sfb],
                    ms[1].en.l[sfb],
                    [lr[0].thm.l[sfb], lr[1].thm.l[sfb], ms[0].thm.l[sfb], ms[1].thm.l[sfb]],
                    self.mld_l[sfb],
                    ath.l[sfb],
                );
                ms[0].thm.l[sfb] = m;
                ms[1].thm.l[sfb] = s;
            }
        }
    }

    /// Analyse the L/R spectra already stored in `side` for `mode_gr`
    /// granules and decide between L/R and M/S coding
    pub fn analyze(&self, side: &SideInfo, mode_gr: usize, ath: &Ath) -> PsyFrame {
        let mut frame = PsyFrame::default();
        let mut pe_ms = [[0.0f32; MAX_CHANNELS]; MAX_GRANULES];
        let mut ratio_ms = [[PsyRatio::default(); MAX_CHANNELS]; MAX_GRANULES];
        let stereo = self.joint_stereo && self.channels == 2;

        for gr in 0..mode_gr {
            let mut ratio = [PsyRatio::default(); MAX_CHANNELS];
            for ch in 0..self.channels {
                let gi: &GranuleInfo = &side.tt[gr][ch];
                ratio[ch] = self.ratio_of(&gi.xr, gi.block_type);
                frame.loudness[gr][ch] = ath.loudness(&gi.xr);
            }
            self.interchannel_masking(&mut ratio);
            for ch in 0..self.channels {
                frame.pe[gr][ch] = self.perceptual_entropy(&ratio[ch], side.tt[gr][ch].block_type, ath);
            }
            frame.ratio[gr] = ratio;
            frame.ms_ener_ratio[gr] = 0.5;

            if stereo {
                let l = &side.tt[gr][0];
                let r = &side.tt[gr][1];
                let mut mid = [0.0f32; GRANULE_SIZE];
                let mut sde = [0.0f32; GRANULE_SIZE];
                let (mut e_m, mut e_s) = (0.0f32, 0.0f32);
                for i in 0..GRANULE_SIZE {
                    mid[i] = (l.xr[i] + r.xr[i]) * FRAC_1_SQRT_2;
                    sde[i] = (l.xr[i] - r.xr[i]) * FRAC_1_SQRT_2;
                    e_m += mid[i] * mid[i];
                    e_s += sde[i] * sde[i];
                }
                if e_m + e_s > 0.0 {
                    frame.ms_ener_ratio[gr] = e_s / (e_m + e_s);
                }
                let mut ms = [self.ratio_of(&mid, l.block_type), self.ratio_of(&sde, r.block_type)];
                self.ms_thresholds(&frame.ratio[gr], &mut ms, ath, l.block_type == BlockType::Short);
                pe_ms[gr][0] = self.perceptual_entropy(&ms[0], l.block_type, ath);
                pe_ms[gr][1] = self.perceptual_entropy(&ms[1], r.block_type, ath);
                ratio_ms[gr] = ms;
            }
        }

        if stereo {
            let sum_lr: f32 = frame.pe[..mode_gr].iter().flatten().sum();
            let sum_ms: f32 = pe_ms[..mode_gr].iter().flatten().sum();
            let same_blocks =
                (0..mode_gr).all(|gr| side.tt[gr][0].block_type == side.tt[gr][1].block_type);
            if sum_ms <= sum_lr && same_blocks {
                frame.mid_side = true;
                frame.pe = pe_ms;
                frame.ratio = ratio_ms;
            }
            trace!("pe L/R {:.1} M/S {:.1} -> mid_side {}", sum_lr, sum_ms, frame.mid_side);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;

    fn session(mode: StereoMode) -> SessionConfig {
        EncoderConfig::new(44100, 2)
            .stereo_mode(mode)
            .bitrate(128)
            .resolve()
            .expect("valid config")
    }

    fn noise(seed: u32, amp: f32) -> [f32; GRANULE_SIZE] {
        let mut state = seed;
        let mut xr = [0.0f32; GRANULE_SIZE];
        for v in xr.iter_mut() {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            *v = ((state >> 8) as f32 / (1u32 << 24) as f32 - 0.5) * 2.0 * amp;
        }
        xr
    }

    #[test]
    fn test_block_switching_sequence() {
        let mut psy = PsyModel::new(&session(StereoMode::Stereo));
        let quiet = [false; 2];
        let hit = [true, false];
        assert_eq!(psy.block_types(quiet, hit)[0], BlockType::Start);
        assert_eq!(psy.block_types(hit, quiet)[0], BlockType::Short);
        assert_eq!(psy.block_types(quiet, quiet)[0], BlockType::Stop);
        assert_eq!(psy.block_types(quiet, quiet)[0], BlockType::Norm);
        // right channel never saw an attack
        assert_eq!(psy.prev_block[1], BlockType::Norm);
    }

    #[test]
    fn test_joint_stereo_couples_block_types() {
        let mut psy = PsyModel::new(&session(StereoMode::JointStereo));
        let types = psy.block_types([false; 2], [false, true]);
        assert_eq!(types, [BlockType::Start; 2]);
    }

    #[test]
    fn test_attack_detected_on_step() {
        let mut psy = PsyModel::new(&session(StereoMode::Stereo));
        let quiet = vec![0.0f32; GRANULE_SIZE];
        let mut step = vec![0.0f32; GRANULE_SIZE];
        for (i, v) in step.iter_mut().enumerate().skip(300) {
            *v = if i % 2 == 0 { 0.8 } else { -0.8 };
        }
        assert_eq!(psy.detect_attacks([&quiet, &quiet]), [false, false]);
        assert_eq!(psy.detect_attacks([&step, &quiet]), [true, false]);
    }

    #[test]
    fn test_silence_has_zero_pe() {
        let s = session(StereoMode::Stereo);
        let psy = PsyModel::new(&s);
        let ath = Ath::new(&s.bands, s.sample_rate, &s.ath);
        let side = SideInfo::default();
        let frame = psy.analyze(&side, 2, &ath);
        assert!(frame.pe.iter().flatten().all(|&pe| pe == 0.0));
        assert!(!frame.mid_side);
    }

    #[test]
    fn test_identical_channels_choose_mid_side() {
        let s = session(StereoMode::JointStereo);
        let psy = PsyModel::new(&s);
        let ath = Ath::new(&s.bands, s.sample_rate, &s.ath);
        let mut side = SideInfo::default();
        for gr in 0..2 {
            let xr = noise(gr as u32 + 1, 0.5);
            side.tt[gr][0].xr = xr;
            side.tt[gr][1].xr = xr;
        }
        let frame = psy.analyze(&side, 2, &ath);
        assert!(frame.mid_side);
        assert!(frame.ms_ener_ratio[0] < 1e-6);
        assert!(frame.pe[0][0] > 0.0);
        assert_eq!(frame.pe[0][1], 0.0);
    }

    #[test]
    fn test_noise_pe_in_expected_range() {
        let s = session(StereoMode::Stereo);
        let psy = PsyModel::new(&s);
        let ath = Ath::new(&s.bands, s.sample_rate, &s.ath);
        let mut side = SideInfo::default();
        side.tt[0][0].xr = noise(7, 0.3);
        let frame = psy.analyze(&side, 1, &ath);
        assert!(frame.pe[0][0] > 200.0 && frame.pe[0][0] < 3000.0, "pe {}", frame.pe[0][0]);
    }

    #[test]
    fn test_temporal_decay_range() {
        let d = temporal_decay(44100);
        assert!(d > 0.0 && d < 1.0);
        assert!(temporal_decay(8000) < d);
    }
}
