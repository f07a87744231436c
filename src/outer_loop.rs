//! Noise-shaping quantization loop
//!
//! The quantizer searches global gain and scalefactors of one granule
//! so that the Huffman cost fits a bit budget while the quantization
//! noise stays as far below the allowed distortion as the comparison
//! mode can get it. It owns the state carried between granules: the
//! warm start of the step size search and the pseudo-half step flags.

use crate::ath::{ath_adjust, Ath, BandFactors};
use crate::bit_count::BitCounter;
use crate::config::QualitySettings;
use crate::distortion::calc_noise;
use crate::tables::{ipow20, PRETAB};
use crate::types::{
    BlockType, CalcNoiseResult, GranuleInfo, NoiseCache, SideInfo, XrPow, GRANULE_SIZE, PSFB12,
    PSFB21, SBMAX_L, SBMAX_S, SBPSY_L, SBPSY_S, SFBMAX,
};
use log::{debug, trace};

/// `2^(0.75 * 0.5)`, one scalefactor step in the 3/4 power domain
const IFQSTEP34_HALF: f32 = 1.296_839_6;
/// `2^(0.75 * 1.0)`, one scalefactor step with `scalefac_scale`
const IFQSTEP34_FULL: f32 = 1.681_792_8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    None,
    Up,
    Down,
}

/// Convert the left/right spectra of granule `gr` to mid/side in place
pub fn ms_convert(side: &mut SideInfo, gr: usize) {
    let [left, right] = &mut side.tt[gr];
    let scale = std::f32::consts::SQRT_2 * 0.5;
    for (l, r) in left.xr.iter_mut().zip(right.xr.iter_mut()) {
        let (a, b) = (*l, *r);
        *l = (a + b) * scale;
        *r = (a - b) * scale;
    }
}

/// True when every slot has been amplified at least once
pub fn loop_break(gi: &GranuleInfo) -> bool {
    (0..gi.sfbmax).all(|sfb| gi.scalefac[sfb] + gi.subblock_gain[gi.window[sfb]] != 0)
}

fn penalties(noise: f64) -> f64 {
    (0.368 + 0.632 * noise * noise * noise).log10()
}

fn klemm_noise(distort: &[f32; SFBMAX], gi: &GranuleInfo) -> f64 {
    let sum = distort[..gi.psymax].iter().fold(1e-37, |acc, &d| acc + penalties(d as f64));
    sum.max(1e-20)
}

/// Decide whether trial `calc` is better than the incumbent `best`.
///
/// Once `best` has no band over the threshold, a trial must also use
/// strictly fewer bits whatever the mode says.
pub fn quant_compare(
    mode: u8,
    best: &CalcNoiseResult,
    calc: &mut CalcNoiseResult,
    gi: &GranuleInfo,
    distort: &[f32; SFBMAX],
) -> bool {
    let ssd_compare = |calc: &CalcNoiseResult| {
        if best.over_count > 0 {
            if calc.over_ssd == best.over_ssd {
                calc.bits < best.bits
            } else {
                calc.over_ssd <= best.over_ssd
            }
        } else {
            calc.max_noise < 0.0
                && calc.max_noise * 10.0 + calc.bits as f32 <= best.max_noise * 10.0 + best.bits as f32
        }
    };

    let better = match mode {
        0 => {
            calc.over_count < best.over_count
                || (calc.over_count == best.over_count && calc.over_noise < best.over_noise)
                || (calc.over_count == best.over_count
                    && calc.over_noise == best.over_noise
                    && calc.tot_noise < best.tot_noise)
        }
        8 => {
            calc.max_noise = klemm_noise(distort, gi) as f32;
            calc.max_noise < best.max_noise
        }
        1 => calc.max_noise < best.max_noise,
        2 => calc.tot_noise < best.tot_noise,
        3 => calc.tot_noise < best.tot_noise && calc.max_noise < best.max_noise,
        4 => {
            (calc.max_noise <= 0.0 && best.max_noise > 0.2)
                || (calc.max_noise <= 0.0
                    && best.max_noise < 0.0
                    && best.max_noise > calc.max_noise - 0.2
                    && calc.tot_noise < best.tot_noise)
                || (calc.max_noise <= 0.0
                    && best.max_noise > 0.0
                    && best.max_noise > calc.max_noise - 0.2
                    && calc.tot_noise < best.tot_noise + best.over_noise)
                || (calc.max_noise > 0.0
                    && best.max_noise > -0.05
                    && best.max_noise > calc.max_noise - 0.1
                    && calc.tot_noise + calc.over_noise < best.tot_noise + best.over_noise)
                || (calc.max_noise > 0.0
                    && best.max_noise > -0.1
                    && best.max_noise > calc.max_noise - 0.15
                    && calc.tot_noise + calc.over_noise + calc.over_noise
                        < best.tot_noise + best.over_noise + best.over_noise)
        }
        5 => {
            calc.over_noise < best.over_noise
                || (calc.over_noise == best.over_noise && calc.tot_noise < best.tot_noise)
        }
        6 => {
            calc.over_noise < best.over_noise
                || (calc.over_noise == best.over_noise
                    && (calc.max_noise < best.max_noise
                        || (calc.max_noise == best.max_noise && calc.tot_noise <= best.tot_noise)))
        }
        7 => calc.over_count < best.over_count || calc.over_noise < best.over_noise,
        _ => ssd_compare(calc),
    };

    if best.over_count == 0 {
        better && calc.bits < best.bits
    } else {
        better
    }
}

/// Switch on `scalefac_scale`, halving the scalefactors and rounding odd
/// ones up (the amplification of the extra half step lands in `xrpow`)
pub fn inc_scalefac_scale(gi: &mut GranuleInfo, xrpow: &mut XrPow) {
    let mut j = 0;
    for sfb in 0..gi.sfbmax {
        let width = gi.width[sfb];
        let mut s = gi.band_scalefac(sfb, &PRETAB);
        if s & 1 != 0 {
            s += 1;
            xrpow.amplify(gi, j, width, IFQSTEP34_HALF);
        }
        j += width;
        gi.scalefac[sfb] = s >> 1;
    }
    gi.preflag = false;
    gi.scalefac_scale = 1;
}

/// Per-channel quantization loop state
#[derive(Debug, Clone)]
pub struct Quantizer {
    counter: BitCounter,
    quality: QualitySettings,
    factors: BandFactors,
    /// Leave the best `xrpow` in place for a retry with another budget
    restore_xrpow: bool,
    current_step: [i32; 2],
    old_value: [i32; 2],
    pseudohalf: [bool; SFBMAX],
    /// Quantize long band 21 / short band 12 against their own threshold
    pub sfb21_extra: bool,
}

impl Quantizer {
    pub fn new(
        counter: BitCounter,
        quality: QualitySettings,
        factors: BandFactors,
        restore_xrpow: bool,
        sfb21_extra: bool,
    ) -> Self {
        Self {
            counter,
            quality,
            factors,
            restore_xrpow,
            current_step: [4; 2],
            old_value: [180; 2],
            pseudohalf: [false; SFBMAX],
            sfb21_extra,
        }
    }

    pub fn counter(&self) -> &BitCounter {
        &self.counter
    }

    pub fn quality(&self) -> &QualitySettings {
        &self.quality
    }

    pub fn factors(&self) -> &BandFactors {
        &self.factors
    }

    /// Bit 7 of `substep_shaping` mirrors a nearly full reservoir and
    /// stops the final truncation pass
    pub fn set_reservoir_nearly_full(&mut self, full: bool) {
        if full {
            self.quality.substep_shaping |= 0x80;
        } else {
            self.quality.substep_shaping &= 0x7f;
        }
    }

    fn count(&self, gi: &mut GranuleInfo, xrpow: &XrPow) -> i32 {
        let pseudohalf = if self.quality.substep_shaping & 2 != 0 { Some(&self.pseudohalf) } else { None };
        self.counter.count_bits(gi, xrpow, pseudohalf)
    }

    /// Reset `gi` for a fresh search: gain 210, zero scalefactors, band
    /// widths for its block type. Short block spectra are reordered so
    /// each band holds its three windows one after another.
    pub fn init_outer_loop(&self, gi: &mut GranuleInfo, ath: &Ath) {
        debug_assert!(!gi.mixed_block_flag);
        let bands = self.counter.bands();

        gi.part2_3_length = 0;
        gi.big_values = 0;
        gi.count1 = 0;
        gi.global_gain = 210;
        gi.scalefac_compress = 0;
        gi.table_select = [0; 3];
        gi.subblock_gain = [0; 4];
        gi.region0_count = 0;
        gi.region1_count = 0;
        gi.preflag = false;
        gi.scalefac_scale = 0;
        gi.count1table_select = 0;
        gi.part2_length = 0;
        gi.sfb_lmax = SBPSY_L;
        gi.sfb_smin = SBPSY_S;
        gi.psy_lmax = if self.sfb21_extra { SBMAX_L } else { SBPSY_L };
        gi.psymax = gi.psy_lmax;
        gi.sfbmax = gi.sfb_lmax;
        gi.sfbdivide = 11;
        for sfb in 0..SBMAX_L {
            gi.width[sfb] = bands.l[sfb + 1] - bands.l[sfb];
            gi.window[sfb] = 3;
        }

        if gi.block_type == BlockType::Short {
            gi.sfb_smin = 0;
            gi.sfb_lmax = 0;
            let s_max = if self.sfb21_extra { SBMAX_S } else { SBPSY_S };
            gi.psymax = gi.sfb_lmax + 3 * (s_max - gi.sfb_smin);
            gi.sfbmax = gi.sfb_lmax + 3 * (SBPSY_S - gi.sfb_smin);
            gi.sfbdivide = gi.sfbmax - 18;
            gi.psy_lmax = gi.sfb_lmax;

            let work = gi.xr;
            let mut ix = bands.l[gi.sfb_lmax];
            for sfb in gi.sfb_smin..SBMAX_S {
                for window in 0..3 {
                    for l in bands.s[sfb]..bands.s[sfb + 1] {
                        gi.xr[ix] = work[3 * l + window];
                        ix += 1;
                    }
                }
            }

            let mut j = gi.sfb_lmax;
            for sfb in gi.sfb_smin..SBMAX_S {
                let width = bands.s[sfb + 1] - bands.s[sfb];
                for window in 0..3 {
                    gi.width[j + window] = width;
                    gi.window[j + window] = window;
                }
                j += 3;
            }
        }

        gi.count1bits = 0;
        gi.sfb_partition_table = crate::tables::NR_OF_SFB_BLOCK[0][0];
        gi.slen = [0; 4];
        gi.max_nonzero_coeff = GRANULE_SIZE - 1;
        gi.scalefac = [0; SFBMAX];

        self.psfb21_analogsilence(gi, ath);
    }

    /// Zero the top of band 21 (band 12 per window for short blocks)
    /// from the highest line down, until a line reaches the ATH
    fn psfb21_analogsilence(&self, gi: &mut GranuleInfo, ath: &Ath) {
        let bands = self.counter.bands();
        if gi.block_type != BlockType::Short {
            let mut ath21_factor = 1.0;
            if self.factors.longfact[21] > 1e-12 {
                ath21_factor = self.factors.longfact[21];
            }
            for gsfb in (0..PSFB21).rev() {
                let ath21 = ath_adjust(ath.adjust, ath.psfb21[gsfb], ath.floor) * ath21_factor;
                for j in (bands.psfb21[gsfb]..bands.psfb21[gsfb + 1]).rev() {
                    if gi.xr[j].abs() < ath21 {
                        gi.xr[j] = 0.0;
                    } else {
                        return;
                    }
                }
            }
        } else {
            let mut ath12_factor = 1.0;
            if self.factors.shortfact[12] > 1e-12 {
                ath12_factor = self.factors.shortfact[12];
            }
            for block in 0..3 {
                'window: for gsfb in (0..PSFB12).rev() {
                    let start = bands.s[12] * 3
                        + (bands.s[13] - bands.s[12]) * block
                        + (bands.psfb12[gsfb] - bands.psfb12[0]);
                    let end = start + (bands.psfb12[gsfb + 1] - bands.psfb12[gsfb]);
                    let ath12 = ath_adjust(ath.adjust, ath.psfb12[gsfb], ath.floor) * ath12_factor;
                    for j in (start..end).rev() {
                        if gi.xr[j].abs() < ath12 {
                            gi.xr[j] = 0.0;
                        } else {
                            break 'window;
                        }
                    }
                }
            }
        }
    }

    /// Compute `xrpow = |xr|^(3/4)` for the fresh scalefactors.
    ///
    /// Returns false for a granule with nothing to quantize, in which case
    /// `l3_enc` is cleared.
    pub fn init_xrpow(&mut self, gi: &mut GranuleInfo, xrpow: &mut XrPow) -> bool {
        let upper = gi.max_nonzero_coeff;
        gi.xrpow_max = 0.0;
        xrpow.0[upper..].fill(0.0);

        let mut sum = 0.0f32;
        for i in 0..=upper {
            let tmp = gi.xr[i].abs();
            sum += tmp;
            xrpow.0[i] = (tmp * tmp.sqrt()).sqrt();
            if xrpow.0[i] > gi.xrpow_max {
                gi.xrpow_max = xrpow.0[i];
            }
        }

        if sum > 1e-20 {
            let half = self.quality.substep_shaping & 2 != 0;
            self.pseudohalf[..gi.psymax].fill(half);
            return true;
        }
        gi.l3_enc = [0; GRANULE_SIZE];
        false
    }

    /// Find the global gain whose cost is closest to `desired_rate` with
    /// all scalefactors zero. The step halves on every change of
    /// direction; a final linear pass makes the result fit.
    pub fn bin_search_step_size(
        &mut self,
        gi: &mut GranuleInfo,
        desired_rate: i32,
        ch: usize,
        xrpow: &XrPow,
    ) -> i32 {
        let mut current_step = self.current_step[ch];
        let start = self.old_value[ch];
        let mut flag_gone_over = false;
        let mut direction = Direction::None;
        let desired_rate = desired_rate - gi.part2_length;
        gi.global_gain = start;

        debug_assert!(current_step != 0);
        let mut n_bits;
        loop {
            n_bits = self.count(gi, xrpow);
            if current_step == 1 || n_bits == desired_rate {
                break;
            }
            let step = if n_bits > desired_rate {
                if direction == Direction::Down {
                    flag_gone_over = true;
                }
                if flag_gone_over {
                    current_step /= 2;
                }
                direction = Direction::Up;
                current_step
            } else {
                if direction == Direction::Up {
                    flag_gone_over = true;
                }
                if flag_gone_over {
                    current_step /= 2;
                }
                direction = Direction::Down;
                -current_step
            };
            gi.global_gain += step;
            if gi.global_gain < 0 {
                gi.global_gain = 0;
                flag_gone_over = true;
            }
            if gi.global_gain > 255 {
                gi.global_gain = 255;
                flag_gone_over = true;
            }
        }

        while n_bits > desired_rate && gi.global_gain < 255 {
            gi.global_gain += 1;
            n_bits = self.count(gi, xrpow);
        }
        if n_bits > desired_rate {
            n_bits = self.drop_high_lines(gi, desired_rate);
        }
        self.current_step[ch] = if start - gi.global_gain >= 4 { 4 } else { 2 };
        self.old_value[ch] = gi.global_gain;
        gi.part2_3_length = n_bits;
        trace!("step search ch {}: gain {} -> {} bits", ch, gi.global_gain, n_bits);
        n_bits
    }

    /// Zero quantized lines from the top of the spectrum until the Huffman
    /// data fits `huff_bits`. Only needed once the global gain is
    /// exhausted; returns the new `part2_3_length`.
    pub fn drop_high_lines(&self, gi: &mut GranuleInfo, huff_bits: i32) -> i32 {
        let huff_bits = huff_bits.max(0);
        let before = gi.part2_3_length;
        while gi.part2_3_length > huff_bits && gi.count1 > 0 {
            let end = gi.count1.min(GRANULE_SIZE);
            gi.l3_enc[end.saturating_sub(2)..end].fill(0);
            gi.part2_3_length = self.counter.noquant_count_bits(gi);
        }
        debug!(
            "gain {} over budget: {} -> {} bits, lines above {} dropped",
            gi.global_gain, before, gi.part2_3_length, gi.count1
        );
        gi.part2_3_length
    }

    /// Zero small lines whose removal keeps each band inside its allowed
    /// noise, then recount
    pub fn truncate_small_spectrums(&self, gi: &mut GranuleInfo, xmin: &[f32; SFBMAX]) {
        let substep = self.quality.substep_shaping;
        if (substep & 4 == 0 && gi.block_type == BlockType::Short) || substep & 0x80 != 0 {
            return;
        }
        let mut distort = [0.0f32; SFBMAX];
        calc_noise(gi, xmin, &mut distort, None);

        let mut work = [0.0f32; GRANULE_SIZE];
        for (w, (&x, &q)) in work.iter_mut().zip(gi.xr.iter().zip(gi.l3_enc.iter())) {
            *w = if q != 0 { x.abs() } else { 0.0 };
        }

        let first = if gi.block_type == BlockType::Short { 6 } else { 8 };
        let mut j: usize = gi.width[..first].iter().sum();
        for sfb in first..gi.psymax {
            let width = gi.width[sfb];
            let start_line = j;
            j += width;
            if distort[sfb] >= 1.0 {
                continue;
            }
            let band = &mut work[start_line..j];
            band.sort_by(|a, b| a.total_cmp(b));
            if band[width - 1] == 0.0 {
                continue;
            }

            let mut allowed_noise = (1.0 - distort[sfb]) * xmin[sfb];
            let mut threshold = 0.0f32;
            let mut start = 0;
            while start < width {
                let mut nsame = 1;
                while start + nsame < width && band[start] == band[start + nsame] {
                    nsame += 1;
                }
                let noise = band[start] * band[start] * nsame as f32;
                if allowed_noise < noise {
                    if start != 0 {
                        threshold = band[start - 1];
                    }
                    break;
                }
                allowed_noise -= noise;
                start += nsame;
            }
            if threshold == 0.0 {
                continue;
            }
            for k in start_line..j {
                if gi.xr[k].abs() <= threshold {
                    gi.l3_enc[k] = 0;
                }
            }
        }
        gi.part2_3_length = self.counter.noquant_count_bits(gi);
    }

    /// Increment the scalefactors of the bands selected by the
    /// amplification mode and rescale their `xrpow`
    pub fn amp_scalefac_bands(
        &mut self,
        gi: &mut GranuleInfo,
        distort: &[f32; SFBMAX],
        xrpow: &mut XrPow,
        refine: bool,
    ) {
        let ifqstep34 = if gi.scalefac_scale == 0 { IFQSTEP34_HALF } else { IFQSTEP34_FULL };
        let mut trigger = distort[..gi.sfbmax].iter().fold(0.0f32, |m, &d| m.max(d));

        let amp_mode = match self.quality.noise_shaping_amp {
            3 if refine => 2,
            3 => 1,
            m => m,
        };
        match amp_mode {
            2 => {}
            1 => {
                if trigger > 1.0 {
                    trigger = trigger.sqrt();
                } else {
                    trigger *= 0.95;
                }
            }
            _ => {
                if trigger > 1.0 {
                    trigger = 1.0;
                } else {
                    trigger *= 0.95;
                }
            }
        }

        let single_band = self.quality.noise_shaping_amp == 2;
        let mut j = 0;
        for sfb in 0..gi.sfbmax {
            let width = gi.width[sfb];
            let start = j;
            j += width;
            if distort[sfb] < trigger {
                continue;
            }
            if self.quality.substep_shaping & 2 != 0 {
                self.pseudohalf[sfb] = !self.pseudohalf[sfb];
                if !self.pseudohalf[sfb] && single_band {
                    return;
                }
            }
            gi.scalefac[sfb] += 1;
            xrpow.amplify(gi, start, width, ifqstep34);
            if single_band {
                return;
            }
        }
    }

    /// Raise the subblock gain of windows whose scalefactors overflow.
    /// Returns true when a window is already at its maximum gain.
    pub fn inc_subblock_gain(&self, gi: &mut GranuleInfo, xrpow: &mut XrPow) -> bool {
        if gi.scalefac[..gi.sfb_lmax].iter().any(|&s| s >= 16) {
            return true;
        }

        for window in 0..3 {
            let mut s1 = 0;
            let mut s2 = 0;
            let mut sfb = gi.sfb_lmax + window;
            while sfb < gi.sfbdivide {
                s1 = s1.max(gi.scalefac[sfb]);
                sfb += 3;
            }
            while sfb < gi.sfbmax {
                s2 = s2.max(gi.scalefac[sfb]);
                sfb += 3;
            }
            if s1 < 16 && s2 < 8 {
                continue;
            }
            if gi.subblock_gain[window] >= 7 {
                return true;
            }

            gi.subblock_gain[window] += 1;
            let mut j = self.counter.bands().l[gi.sfb_lmax];
            let mut sfb = gi.sfb_lmax + window;
            while sfb < gi.sfbmax {
                let width = gi.width[sfb];
                let s = gi.scalefac[sfb] - (4 >> gi.scalefac_scale);
                if s >= 0 {
                    gi.scalefac[sfb] = s;
                    j += width * 3;
                    sfb += 3;
                    continue;
                }
                gi.scalefac[sfb] = 0;
                let amp = ipow20(210 + (s << (gi.scalefac_scale + 1)));
                j += width * (window + 1);
                xrpow.amplify(gi, j - width, width, amp);
                j += width * (3 - window - 1);
                sfb += 3;
            }

            // band 12 has no scalefactor but follows the window gain
            let width = gi.width[sfb];
            j += width * (window + 1);
            xrpow.amplify(gi, j - width, width, ipow20(202));
        }
        false
    }

    /// Amplify distorted bands and keep the scalefactors encodable.
    /// Returns false when the search at this gain is exhausted.
    pub fn balance_noise(
        &mut self,
        gi: &mut GranuleInfo,
        distort: &[f32; SFBMAX],
        xrpow: &mut XrPow,
        refine: bool,
    ) -> bool {
        self.amp_scalefac_bands(gi, distort, xrpow, refine);

        if loop_break(gi) {
            return false;
        }
        let mut status = self.counter.scale_bitcount(gi);
        if !status {
            return true;
        }

        if self.quality.noise_shaping > 1 {
            self.pseudohalf = [false; SFBMAX];
            if gi.scalefac_scale == 0 {
                inc_scalefac_scale(gi, xrpow);
                status = false;
            } else if gi.block_type == BlockType::Short && self.quality.subblock_gain {
                status = self.inc_subblock_gain(gi, xrpow) || loop_break(gi);
            }
        }

        if !status {
            status = self.counter.scale_bitcount(gi);
        }
        !status
    }

    /// Search scalefactors and global gain of `gi` for `targ_bits`.
    ///
    /// Returns the number of bands left over the allowed distortion, or
    /// 100 without noise shaping.
    pub fn outer_loop(
        &mut self,
        gi: &mut GranuleInfo,
        xmin: &[f32; SFBMAX],
        xrpow: &mut XrPow,
        ch: usize,
        targ_bits: i32,
    ) -> i32 {
        self.outer_loop_observed(gi, xmin, xrpow, ch, targ_bits, &mut |_| {})
    }

    /// [`Quantizer::outer_loop`] reporting every trial it accepts as the
    /// new best, the initial quantization included
    pub fn outer_loop_observed(
        &mut self,
        gi: &mut GranuleInfo,
        xmin: &[f32; SFBMAX],
        xrpow: &mut XrPow,
        ch: usize,
        targ_bits: i32,
        on_accept: &mut dyn FnMut(&CalcNoiseResult),
    ) -> i32 {
        let mut distort = [0.0f32; SFBMAX];
        let mut cache = NoiseCache::default();
        let mut best_part2_3_length = 9_999_999;
        let mut end_of_search = false;
        let mut refine = false;
        let mut best_ggain_pass1 = 0;

        self.bin_search_step_size(gi, targ_bits, ch, xrpow);
        if self.quality.noise_shaping == 0 {
            return 100;
        }

        let mut best_noise = calc_noise(gi, xmin, &mut distort, Some(&mut cache));
        best_noise.bits = gi.part2_3_length;
        on_accept(&best_noise);

        let mut trial = gi.clone();
        let mut save_xrpow = xrpow.clone();
        let mut age = 0;

        while !end_of_search {
            loop {
                let search_limit = if self.quality.substep_shaping & 2 != 0 { 20 } else { 3 };
                let mut maxggain = 255;

                if self.sfb21_extra {
                    if distort[trial.sfbmax] > 1.0 {
                        break;
                    }
                    if trial.block_type == BlockType::Short
                        && (distort[trial.sfbmax + 1] > 1.0 || distort[trial.sfbmax + 2] > 1.0)
                    {
                        break;
                    }
                }

                if !self.balance_noise(&mut trial, &distort, xrpow, refine) {
                    break;
                }
                if trial.scalefac_scale != 0 {
                    maxggain = 254;
                }

                let huff_bits = targ_bits - trial.part2_length;
                if huff_bits <= 0 {
                    break;
                }

                trial.part2_3_length = self.count(&mut trial, xrpow);
                while trial.part2_3_length > huff_bits && trial.global_gain <= maxggain {
                    trial.global_gain += 1;
                    trial.part2_3_length = self.count(&mut trial, xrpow);
                }
                if trial.global_gain > maxggain {
                    break;
                }

                if best_noise.over_count == 0 {
                    while trial.part2_3_length > best_part2_3_length && trial.global_gain <= maxggain {
                        trial.global_gain += 1;
                        trial.part2_3_length = self.count(&mut trial, xrpow);
                    }
                    if trial.global_gain > maxggain {
                        break;
                    }
                }

                let mut noise = calc_noise(&trial, xmin, &mut distort, Some(&mut cache));
                noise.bits = trial.part2_3_length;

                let mode = if gi.block_type != BlockType::Short {
                    self.quality.quant_comp
                } else {
                    self.quality.quant_comp_short
                };
                if quant_compare(mode, &best_noise, &mut noise, &trial, &distort) {
                    trace!(
                        "accept gain {} sfs {}: {} bits, over {}",
                        trial.global_gain,
                        trial.scalefac_scale,
                        noise.bits,
                        noise.over_count
                    );
                    best_part2_3_length = gi.part2_3_length;
                    best_noise = noise;
                    on_accept(&best_noise);
                    gi.clone_from(&trial);
                    age = 0;
                    save_xrpow.clone_from(xrpow);
                } else if !self.quality.full_outer_loop {
                    age += 1;
                    if age > search_limit && best_noise.over_count == 0 {
                        break;
                    }
                    if self.quality.noise_shaping_amp == 3 && refine && age > 30 {
                        break;
                    }
                    if self.quality.noise_shaping_amp == 3
                        && refine
                        && trial.global_gain - best_ggain_pass1 > 15
                    {
                        break;
                    }
                }

                if trial.global_gain + trial.scalefac_scale >= 255 {
                    break;
                }
            }

            if self.quality.noise_shaping_amp == 3 && !refine {
                trial.clone_from(gi);
                xrpow.clone_from(&save_xrpow);
                age = 0;
                best_ggain_pass1 = trial.global_gain;
                refine = true;
            } else {
                end_of_search = true;
            }
        }

        debug_assert!(gi.global_gain + gi.scalefac_scale <= 255);
        if self.restore_xrpow {
            xrpow.clone_from(&save_xrpow);
        } else if self.quality.substep_shaping & 1 != 0 {
            self.truncate_small_spectrums(gi, xmin);
        }
        best_noise.over_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ath::AthConfig;
    use crate::distortion::{calc_xmin, MaskingParams};
    use crate::tables::scalefac_bands;
    use crate::types::PsyRatio;
    use proptest::prelude::*;

    fn quality(q: u8) -> QualitySettings {
        QualitySettings::from_quality(q)
    }

    fn setup(q: u8) -> (Quantizer, Ath) {
        let bands = scalefac_bands(0, 1, 44100);
        let ath = Ath::new(&bands, 44100, &AthConfig::default());
        let counter = BitCounter::new(bands, 2, quality(q).use_best_huffman);
        let quantizer = Quantizer::new(counter, quality(q), BandFactors::from_nspsytune(1), false, false);
        (quantizer, ath)
    }

    fn noise_spectrum(seed: u32, amp: f32) -> [f32; GRANULE_SIZE] {
        let mut xr = [0.0; GRANULE_SIZE];
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(7);
        for x in xr.iter_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            *x = ((state >> 8) as f32 / (1u32 << 23) as f32 - 1.0) * amp;
        }
        xr
    }

    /// Prepare a long granule ready for `outer_loop`
    fn prepare(
        q: &mut Quantizer,
        ath: &Ath,
        xr: [f32; GRANULE_SIZE],
        ratio: &PsyRatio,
    ) -> (GranuleInfo, XrPow, [f32; SFBMAX], bool) {
        let mut gi = GranuleInfo { xr, ..GranuleInfo::default() };
        q.init_outer_loop(&mut gi, ath);
        let mut xrpow = XrPow::default();
        let has_energy = q.init_xrpow(&mut gi, &mut xrpow);
        let mut xmin = [0.0; SFBMAX];
        calc_xmin(ath, q.factors(), &MaskingParams::default(), ratio, &mut gi, &mut xmin);
        (gi, xrpow, xmin, has_energy)
    }

    fn loud_ratio() -> PsyRatio {
        let mut ratio = PsyRatio::default();
        ratio.en.l = [1.0; SBMAX_L];
        ratio.thm.l = [1e-3; SBMAX_L];
        ratio
    }

    #[test]
    fn test_ms_convert_is_orthonormal() {
        let mut side = SideInfo::default();
        side.tt[0][0].xr[5] = 1.0;
        side.tt[0][1].xr[5] = 1.0;
        ms_convert(&mut side, 0);
        assert!((side.tt[0][0].xr[5] - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert_eq!(side.tt[0][1].xr[5], 0.0);
    }

    #[test]
    fn test_loop_break_needs_every_band() {
        let mut gi = GranuleInfo::default();
        gi.sfbmax = 3;
        gi.scalefac[0] = 1;
        gi.scalefac[1] = 1;
        assert!(!loop_break(&gi));
        gi.scalefac[2] = 2;
        assert!(loop_break(&gi));
    }

    #[test]
    fn test_quant_compare_never_accepts_more_bits_once_masked() {
        let gi = GranuleInfo::default();
        let distort = [0.0; SFBMAX];
        let best = CalcNoiseResult { over_count: 0, max_noise: -1.0, tot_noise: -10.0, bits: 500, ..Default::default() };
        for mode in 0..10 {
            let mut calc = CalcNoiseResult {
                over_count: 0,
                max_noise: -5.0,
                tot_noise: -50.0,
                over_noise: -1.0,
                bits: 501,
                ..Default::default()
            };
            assert!(!quant_compare(mode, &best, &mut calc, &gi, &distort), "mode {}", mode);
        }
    }

    #[test]
    fn test_quant_compare_mode9_prefers_lower_ssd() {
        let gi = GranuleInfo::default();
        let distort = [0.0; SFBMAX];
        let best = CalcNoiseResult { over_count: 2, over_ssd: 400, bits: 300, ..Default::default() };
        let mut lower = CalcNoiseResult { over_count: 3, over_ssd: 100, bits: 900, ..Default::default() };
        assert!(quant_compare(9, &best, &mut lower, &gi, &distort));
        let mut tie = CalcNoiseResult { over_ssd: 400, bits: 299, ..Default::default() };
        assert!(quant_compare(9, &best, &mut tie, &gi, &distort));
        let mut tie_more_bits = CalcNoiseResult { over_ssd: 400, bits: 300, ..Default::default() };
        assert!(!quant_compare(9, &best, &mut tie_more_bits, &gi, &distort));
    }

    #[test]
    fn test_quant_compare_mode0_counts_first() {
        let gi = GranuleInfo::default();
        let distort = [0.0; SFBMAX];
        let best = CalcNoiseResult { over_count: 3, over_noise: 1.0, ..Default::default() };
        let mut calc = CalcNoiseResult { over_count: 2, over_noise: 5.0, ..Default::default() };
        assert!(quant_compare(0, &best, &mut calc, &gi, &distort));
        let mut calc = CalcNoiseResult { over_count: 4, over_noise: 0.0, ..Default::default() };
        assert!(!quant_compare(0, &best, &mut calc, &gi, &distort));
    }

    #[test]
    fn test_inc_scalefac_scale_rounds_odd_up() {
        let mut gi = GranuleInfo::default();
        gi.sfbmax = 3;
        gi.width[..3].copy_from_slice(&[4, 4, 4]);
        gi.scalefac[..3].copy_from_slice(&[1, 2, 3]);
        let mut xrpow = XrPow::default();
        xrpow.0[..12].fill(1.0);
        inc_scalefac_scale(&mut gi, &mut xrpow);
        assert_eq!(&gi.scalefac[..3], &[1, 1, 2]);
        assert_eq!(gi.scalefac_scale, 1);
        assert!((xrpow.0[0] - IFQSTEP34_HALF).abs() < 1e-6);
        assert_eq!(xrpow.0[4], 1.0);
        assert!((xrpow.0[8] - IFQSTEP34_HALF).abs() < 1e-6);
    }

    #[test]
    fn test_amp_scalefac_bands_iso_mode_amplifies_over_bands() {
        let (mut q, _) = setup(5);
        let mut gi = GranuleInfo::default();
        gi.sfbmax = 4;
        gi.width[..4].copy_from_slice(&[4, 4, 4, 4]);
        let mut xrpow = XrPow::default();
        xrpow.0[..16].fill(1.0);
        let mut distort = [0.0; SFBMAX];
        distort[..4].copy_from_slice(&[0.5, 2.0, 3.0, 0.9]);
        q.amp_scalefac_bands(&mut gi, &distort, &mut xrpow, false);
        assert_eq!(&gi.scalefac[..4], &[0, 1, 1, 0]);
        assert!((gi.xrpow_max - IFQSTEP34_HALF).abs() < 1e-6);
    }

    #[test]
    fn test_amp_scalefac_bands_always_amplifies_something() {
        let (mut q, _) = setup(5);
        let mut gi = GranuleInfo::default();
        gi.sfbmax = 3;
        gi.width[..3].copy_from_slice(&[4, 4, 4]);
        let mut xrpow = XrPow::default();
        let mut distort = [0.0; SFBMAX];
        distort[..3].copy_from_slice(&[0.1, 0.4, 0.2]);
        q.amp_scalefac_bands(&mut gi, &distort, &mut xrpow, false);
        assert_eq!(&gi.scalefac[..3], &[0, 1, 0]);
    }

    #[test]
    fn test_inc_subblock_gain_moves_window_gain() {
        let (q, ath) = setup(5);
        let mut gi = GranuleInfo { block_type: BlockType::Short, ..GranuleInfo::default() };
        q.init_outer_loop(&mut gi, &ath);
        gi.scalefac[3] = 16;
        let mut xrpow = XrPow::default();
        assert!(!q.inc_subblock_gain(&mut gi, &mut xrpow));
        assert_eq!(gi.subblock_gain[0], 1);
        assert_eq!(gi.scalefac[3], 12);
        // 12 fits the 4-bit field again, nothing left to move
        assert!(!q.inc_subblock_gain(&mut gi, &mut xrpow));
        assert_eq!(gi.subblock_gain[0], 1);

        gi.scalefac[3] = 16;
        gi.subblock_gain[0] = 7;
        assert!(q.inc_subblock_gain(&mut gi, &mut xrpow));
        assert_eq!(gi.scalefac[3], 16);
    }

    #[test]
    fn test_init_outer_loop_reorders_short_blocks() {
        let (q, ath) = setup(5);
        let mut gi = GranuleInfo { block_type: BlockType::Short, ..GranuleInfo::default() };
        for (i, x) in gi.xr.iter_mut().enumerate() {
            *x = (i % 3) as f32 + 1.0;
        }
        q.init_outer_loop(&mut gi, &ath);
        assert_eq!(gi.sfbmax, 3 * SBPSY_S);
        assert_eq!(gi.sfbdivide, 3 * SBPSY_S - 18);
        assert_eq!(gi.width[0], 4);
        assert_eq!(gi.window[1], 1);
        // band 0 holds window 0 lines first, then windows 1 and 2
        assert_eq!(&gi.xr[..4], &[1.0; 4]);
        assert_eq!(&gi.xr[4..8], &[2.0; 4]);
        assert_eq!(&gi.xr[8..12], &[3.0; 4]);
    }

    #[test]
    fn test_silent_granule_has_nothing_to_quantize() {
        let (mut q, ath) = setup(5);
        let (gi, _, _, has_energy) = prepare(&mut q, &ath, [0.0; GRANULE_SIZE], &PsyRatio::default());
        assert!(!has_energy);
        assert!(gi.is_silent());
    }

    #[test]
    fn test_bin_search_fits_budget() {
        let (mut q, ath) = setup(7);
        let (mut gi, xrpow, _, _) = prepare(&mut q, &ath, noise_spectrum(3, 0.3), &PsyRatio::default());
        let bits = q.bin_search_step_size(&mut gi, 1500, 0, &xrpow);
        assert!(bits <= 1500);
        assert_eq!(bits, gi.part2_3_length);
        assert!((0..=255).contains(&gi.global_gain));
    }

    #[test]
    fn test_no_shaping_returns_sentinel() {
        let (mut q, ath) = setup(9);
        let (mut gi, mut xrpow, xmin, _) = prepare(&mut q, &ath, noise_spectrum(1, 0.2), &loud_ratio());
        assert_eq!(q.outer_loop(&mut gi, &xmin, &mut xrpow, 0, 2000), 100);
        assert!(gi.part2_3_length <= 2000);
    }

    #[test]
    fn test_full_scale_noise_terminates_distorted() {
        let (mut q, ath) = setup(2);
        let (mut gi, mut xrpow, xmin, _) = prepare(&mut q, &ath, noise_spectrum(11, 1.0), &PsyRatio::default());
        let over = q.outer_loop(&mut gi, &xmin, &mut xrpow, 0, 400);
        assert!(over > 0);
        assert!(gi.part2_3_length + gi.part2_length <= 400);
        assert!(gi.global_gain + gi.scalefac_scale <= 255);
    }

    #[test]
    fn test_gain_exhausted_short_granule_drops_high_lines() {
        let (mut q, ath) = setup(5);
        let mut gi = GranuleInfo { xr: noise_spectrum(21, 30000.0), block_type: BlockType::Short, ..GranuleInfo::default() };
        q.init_outer_loop(&mut gi, &ath);
        let mut xrpow = XrPow::default();
        assert!(q.init_xrpow(&mut gi, &mut xrpow));
        let mut xmin = [0.0; SFBMAX];
        calc_xmin(&ath, q.factors(), &MaskingParams::default(), &PsyRatio::default(), &mut gi, &mut xmin);

        let over = q.outer_loop(&mut gi, &xmin, &mut xrpow, 0, 300);
        assert!(over > 0);
        assert_eq!(gi.global_gain, 255);
        assert!(gi.part2_3_length + gi.part2_length <= 300);
        assert_eq!(gi.part2_3_length, q.counter().noquant_count_bits(&mut gi.clone()));
        // the bottom of the spectrum survives, the top is gone
        assert!(gi.l3_enc[..8].iter().any(|&v| v != 0));
        assert!(gi.l3_enc[GRANULE_SIZE - 64..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_drop_high_lines_reaches_zero_budget() {
        let (mut q, ath) = setup(7);
        let (mut gi, xrpow, _, _) = prepare(&mut q, &ath, noise_spectrum(4, 30000.0), &PsyRatio::default());
        gi.global_gain = 255;
        gi.part2_3_length = q.counter().count_bits(&mut gi, &xrpow, None);
        assert!(gi.part2_3_length > 0);
        assert_eq!(q.drop_high_lines(&mut gi, 0), 0);
        assert!(gi.l3_enc.iter().all(|&v| v == 0));
        assert_eq!(gi.big_values, 0);
    }

    #[test]
    fn test_truncation_only_removes_lines() {
        let (mut q, ath) = setup(2);
        let (mut gi, mut xrpow, xmin, _) = prepare(&mut q, &ath, noise_spectrum(5, 0.05), &loud_ratio());
        q.outer_loop(&mut gi, &xmin, &mut xrpow, 0, 3000);
        let before = gi.clone();
        let mut quality = *q.quality();
        quality.substep_shaping |= 1;
        let q2 = Quantizer::new(q.counter().clone(), quality, *q.factors(), false, false);
        q2.truncate_small_spectrums(&mut gi, &xmin);
        for (a, b) in gi.l3_enc.iter().zip(before.l3_enc.iter()) {
            assert!(*a == *b || *a == 0);
        }
        let mut recount = gi.clone();
        assert_eq!(q2.counter().noquant_count_bits(&mut recount), gi.part2_3_length);
    }

    #[test]
    fn test_truncation_leaves_low_bands_alone() {
        let (mut q, ath) = setup(2);
        let mut quality = *q.quality();
        quality.substep_shaping |= 1;
        let (mut gi, mut xrpow, xmin, _) = prepare(&mut q, &ath, noise_spectrum(8, 0.02), &loud_ratio());
        q.outer_loop(&mut gi, &xmin, &mut xrpow, 0, 3000);
        let before = gi.clone();
        let q2 = Quantizer::new(q.counter().clone(), quality, *q.factors(), false, false);
        q2.truncate_small_spectrums(&mut gi, &xmin);
        // the scan is band aligned and starts at long band 8
        let low: usize = gi.width[..8].iter().sum();
        assert_eq!(low, q.counter().bands().l[8]);
        assert_eq!(&gi.l3_enc[..low], &before.l3_enc[..low]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 100,
            verbose: 0,
            max_shrink_iters: 0,
            failure_persistence: None,
            ..ProptestConfig::default()
        })]

        #[test]
        fn property_outer_loop_respects_budget_and_gain_range(
            seed in 0u32..5000,
            amp in 0.001f32..1.0,
            targ_bits in 100i32..4095,
            q_level in 0u8..8,
        ) {
            let (mut q, ath) = setup(q_level);
            let (mut gi, mut xrpow, xmin, has_energy) =
                prepare(&mut q, &ath, noise_spectrum(seed, amp), &loud_ratio());
            prop_assume!(has_energy);
            q.outer_loop(&mut gi, &xmin, &mut xrpow, 0, targ_bits);
            prop_assert!(gi.global_gain >= 0 && gi.global_gain <= 255);
            prop_assert!(gi.global_gain + gi.scalefac_scale <= 255);
            if gi.global_gain < 255 {
                prop_assert!(gi.part2_3_length + gi.part2_length <= targ_bits);
            }
        }

        #[test]
        fn property_masked_trials_never_cost_more(
            seed in 0u32..5000,
            amp in 0.001f32..0.3,
            targ_bits in 500i32..4095,
        ) {
            let (mut q, ath) = setup(3);
            let (mut gi, mut xrpow, xmin, has_energy) =
                prepare(&mut q, &ath, noise_spectrum(seed, amp), &loud_ratio());
            prop_assume!(has_energy);
            let mut accepted = Vec::new();
            q.outer_loop_observed(&mut gi, &xmin, &mut xrpow, 0, targ_bits, &mut |r| accepted.push(*r));
            for pair in accepted.windows(2) {
                if pair[0].over_count == 0 {
                    prop_assert_eq!(pair[1].over_count, 0);
                    prop_assert!(pair[1].bits < pair[0].bits);
                }
            }
        }

        #[test]
        fn property_bin_search_converges(
            seed in 0u32..5000,
            amp in 0.01f32..1.0,
            desired in 50i32..4000,
        ) {
            let (mut q, ath) = setup(7);
            let (mut gi, xrpow, _, has_energy) =
                prepare(&mut q, &ath, noise_spectrum(seed, amp), &PsyRatio::default());
            prop_assume!(has_energy);
            let bits = q.bin_search_step_size(&mut gi, desired, 0, &xrpow);
            prop_assert!(bits <= desired || gi.global_gain == 255);
        }
    }
}
