//! Direct scalefactor search for psychoacoustic VBR
//!
//! Every band gets the coarsest quantizer step whose noise stays under
//! its allowed distortion. The global gain follows the coarsest band and
//! the scalefactors (with `scalefac_scale`, `preflag` and the subblock
//! gains of short blocks) make up the difference per band. A granule
//! that does not fit its ceiling has all band steps raised together.

use crate::outer_loop::Quantizer;
use crate::tables::{ipow20, pow20, ADJ43, POW43, PRETAB};
use crate::types::{
    BlockType, GranuleInfo, SideInfo, XrPow, GRANULE_SIZE, IXMAX_VAL, SBMAX_L, SFBMAX,
};
use log::trace;

const MAX_GAIN: i32 = 255;

/// Smallest gain at which `band_max` still fits the ESC range
fn min_gain(band_max: f32) -> i32 {
    if band_max <= 0.0 {
        return 0;
    }
    (0..=MAX_GAIN)
        .find(|&g| band_max * ipow20(g) <= IXMAX_VAL as f32)
        .unwrap_or(MAX_GAIN)
}

fn noise_at(xr: &[f32], xrpow: &[f32], step: i32) -> f32 {
    let istep = ipow20(step);
    let dq = pow20(step);
    xr.iter()
        .zip(xrpow.iter())
        .map(|(&x, &p)| {
            let t = p * istep;
            let q = (t + ADJ43[t as usize]) as usize;
            let e = x.abs() - POW43[q] * dq;
            e * e
        })
        .sum()
}

/// Coarsest step in `floor..=255` whose noise is within `xmin`
fn masked_step(xr: &[f32], xrpow: &[f32], xmin: f32, floor: i32) -> i32 {
    if noise_at(xr, xrpow, MAX_GAIN) <= xmin {
        return MAX_GAIN;
    }
    if noise_at(xr, xrpow, floor) > xmin {
        return floor;
    }
    let (mut lo, mut hi) = (floor, MAX_GAIN);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if noise_at(xr, xrpow, mid) <= xmin {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Band steps asked for by the masking analysis, and the finest each
/// band may go without overflowing the Huffman range
#[derive(Debug, Clone)]
struct BandTargets {
    /// Number of slots covering all 576 lines
    slots: usize,
    wanted: [i32; SFBMAX],
    floor: [i32; SFBMAX],
}

impl BandTargets {
    fn analyse(gi: &GranuleInfo, base: &XrPow, xmin: &[f32; SFBMAX]) -> Self {
        let slots = if gi.block_type == BlockType::Short { SFBMAX } else { SBMAX_L };
        let mut wanted = [MAX_GAIN; SFBMAX];
        let mut floor = [0; SFBMAX];
        let mut j = 0;
        for sfb in 0..slots {
            let end = (j + gi.width[sfb]).min(GRANULE_SIZE);
            let band_max = base.0[j..end].iter().copied().fold(0.0f32, f32::max);
            floor[sfb] = min_gain(band_max);
            if sfb < gi.psymax && band_max > 0.0 {
                wanted[sfb] = masked_step(&gi.xr[j..end], &base.0[j..end], xmin[sfb], floor[sfb]);
            }
            j = end;
        }
        Self { slots, wanted, floor }
    }

    /// Raise every wanted step by `offset`
    fn pressed(&self, gi: &GranuleInfo, offset: i32) -> Self {
        let mut out = self.clone();
        for sfb in 0..gi.psymax {
            out.wanted[sfb] = (self.wanted[sfb] + offset).clamp(self.floor[sfb], MAX_GAIN);
        }
        out
    }

    fn coarsest(&self, gi: &GranuleInfo) -> i32 {
        let target = self.wanted[..gi.sfbmax].iter().copied().max().unwrap_or(MAX_GAIN);
        // slots without a scalefactor cannot be refined individually
        let capped = self.wanted[gi.sfbmax..gi.psymax].iter().copied().fold(target, i32::min);
        capped.clamp(self.highest_floor(), MAX_GAIN)
    }

    fn highest_floor(&self) -> i32 {
        self.floor[..self.slots].iter().copied().max().unwrap_or(0)
    }
}

/// Scalefactors and subblock gains bringing every band at `global_gain`
/// down to (at most) its wanted step
fn assign_scalefactors(gi: &mut GranuleInfo, t: &BandTargets, global_gain: i32, scalefac_scale: i32) {
    gi.global_gain = global_gain;
    gi.scalefac_scale = scalefac_scale;
    gi.preflag = false;
    gi.subblock_gain = [0; 4];
    gi.scalefac = [0; SFBMAX];

    if gi.block_type == BlockType::Short {
        for window in 0..3 {
            let least = (gi.sfb_lmax + window..gi.sfbmax)
                .step_by(3)
                .map(|sfb| global_gain - t.wanted[sfb])
                .min()
                .unwrap_or(0);
            // slots without a scalefactor must stay above their floor
            let room = (gi.sfbmax + window..t.slots)
                .step_by(3)
                .map(|sfb| global_gain - t.floor[sfb])
                .min()
                .unwrap_or(least);
            gi.subblock_gain[window] = (least.min(room) / 8).clamp(0, 7);
        }
    }

    let mult = 2 << scalefac_scale;
    for sfb in 0..gi.sfbmax {
        let base = global_gain - gi.subblock_gain[gi.window[sfb]] * 8;
        let d = base - t.wanted[sfb];
        if d <= 0 {
            continue;
        }
        let mut sf = (d + mult - 1) / mult;
        if base - sf * mult < t.floor[sfb] {
            sf -= 1;
        }
        gi.scalefac[sfb] = sf;
    }
}

/// Settle global gain and scalefactors for `t` so that the scalefactors
/// are encodable
fn fit_scalefactors(quantizer: &Quantizer, gi: &mut GranuleInfo, t: &BandTargets) {
    let counter = quantizer.counter();
    let bottom = t.highest_floor();
    let mut global_gain = t.coarsest(gi);
    loop {
        // global_gain + scalefac_scale stays within 255
        for scalefac_scale in 0..=i32::from(global_gain < MAX_GAIN) {
            assign_scalefactors(gi, t, global_gain, scalefac_scale);
            if !counter.scale_bitcount(gi) {
                return;
            }
        }
        if global_gain > bottom {
            global_gain -= 1;
            continue;
        }
        // no gain left to trade: give up precision in the widest bands
        while counter.scale_bitcount(gi) {
            for s in gi.scalefac[..gi.sfbmax].iter_mut() {
                if *s > 0 {
                    *s -= 1;
                }
            }
        }
        return;
    }
}

/// Rebuild `xrpow` from `base` for the granule's current steps and count
/// the Huffman bits
fn quantize(quantizer: &Quantizer, gi: &mut GranuleInfo, base: &XrPow, xrpow: &mut XrPow, slots: usize) {
    xrpow.clone_from(base);
    gi.xrpow_max = 0.0;
    let mut j = 0;
    for sfb in 0..slots {
        let width = gi.width[sfb].min(GRANULE_SIZE - j);
        let d = gi.global_gain - gi.band_step(sfb, &PRETAB);
        let factor = 2f32.powf(0.1875 * d as f32);
        xrpow.amplify(gi, j, width, factor);
        j += width;
    }
    gi.part2_3_length = quantizer.counter().count_bits(gi, xrpow, None);
}

/// Quantize one granule within `max_bits` (Huffman plus scalefactor
/// bits). `base` is `|xr|^(3/4)` without any scalefactor applied.
pub fn vbr_encode_granule_direct(
    quantizer: &Quantizer,
    gi: &mut GranuleInfo,
    base: &XrPow,
    xmin: &[f32; SFBMAX],
    max_bits: i32,
) {
    let targets = BandTargets::analyse(gi, base, xmin);
    let mut xrpow = XrPow::default();

    let mut trial = |gi: &mut GranuleInfo, offset: i32| -> i32 {
        let t = targets.pressed(gi, offset);
        fit_scalefactors(quantizer, gi, &t);
        quantize(quantizer, gi, base, &mut xrpow, t.slots);
        gi.part2_3_length + gi.part2_length
    };

    let bits = trial(gi, 0);
    if bits <= max_bits {
        trace!("direct search: gain {}, {} bits", gi.global_gain, bits);
        return;
    }

    // bit pressure: smallest common offset that fits
    let (mut lo, mut hi) = (0, MAX_GAIN);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if trial(gi, mid) <= max_bits {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let mut bits = trial(gi, hi);
    if bits > max_bits {
        bits = quantizer.drop_high_lines(gi, max_bits - gi.part2_length) + gi.part2_length;
    }
    trace!("direct search under pressure: offset {}, gain {}, {} bits", hi, gi.global_gain, bits);
    debug_assert!(bits <= max_bits || max_bits < gi.part2_length);
}

/// Quantize every granule of a frame; returns the main data bits used
pub fn vbr_encode_frame(
    quantizer: &Quantizer,
    side: &mut SideInfo,
    xrpow: &[[XrPow; 2]; 2],
    xmin: &[[[f32; SFBMAX]; 2]; 2],
    max_bits: &[[i32; 2]; 2],
    mode_gr: usize,
    channels: usize,
) -> i32 {
    let mut used = 0;
    for gr in 0..mode_gr {
        for ch in 0..channels {
            let gi = &mut side.tt[gr][ch];
            if max_bits[gr][ch] == 0 {
                gi.l3_enc = [0; GRANULE_SIZE];
                gi.scalefac = [0; SFBMAX];
                quantizer.counter().scale_bitcount(gi);
                gi.part2_3_length = quantizer.counter().noquant_count_bits(gi);
            } else {
                vbr_encode_granule_direct(quantizer, gi, &xrpow[gr][ch], &xmin[gr][ch], max_bits[gr][ch]);
            }
            used += gi.part2_3_length + gi.part2_length;
        }
    }
    used
}
