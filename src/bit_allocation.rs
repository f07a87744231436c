//! Bit allocation between granules and channels
//!
//! Turns perceptual entropy and reservoir headroom into per-channel
//! targets for the quantization loop, and drives the VBR bit search.

use crate::config::SessionConfig;
use crate::outer_loop::Quantizer;
use crate::reservoir::BitReservoir;
use crate::types::{
    BlockType, GranuleInfo, SideInfo, XrPow, MAX_BITS_PER_CHANNEL, MAX_BITS_PER_GRANULE, SBMAX_L,
    SBMAX_S, SFBMAX,
};
use log::trace;

/// Granule ceiling from [`on_pe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeBudget {
    /// Most bits both channels of the granule may use together
    pub max_bits: i32,
    /// The reservoir is above 90% of its ceiling
    pub reservoir_nearly_full: bool,
}

/// Split the granule's reservoir grant between channels, giving more to
/// channels with higher perceptual entropy.
///
/// `compensate` is set for the second CBR granule, whose mean bits the
/// reservoir has not been credited with yet.
pub fn on_pe(
    reservoir: &BitReservoir,
    pe: &[f32; 2],
    channels: usize,
    targ_bits: &mut [i32; 2],
    mean_bits: i32,
    compensate: bool,
    substep_shaping: u8,
) -> PeBudget {
    let grant = reservoir.max_bits(mean_bits, compensate, substep_shaping);
    let extra_bits = grant.extra_bits;
    let max_bits = (grant.targ_bits + extra_bits).min(MAX_BITS_PER_GRANULE);

    let mut add_bits = [0i32; 2];
    let mut bits = 0;
    for ch in 0..channels {
        targ_bits[ch] = MAX_BITS_PER_CHANNEL.min(grant.targ_bits / channels as i32);

        let mut add = (targ_bits[ch] as f32 * pe[ch] / 700.0 - targ_bits[ch] as f32) as i32;

        // at most increase bits by 1.5 * average
        add = add.min(mean_bits * 3 / 4).max(0);
        if add + targ_bits[ch] > MAX_BITS_PER_CHANNEL {
            add = (MAX_BITS_PER_CHANNEL - targ_bits[ch]).max(0);
        }
        add_bits[ch] = add;
        bits += add;
    }
    if bits > extra_bits && bits > 0 {
        for add in add_bits.iter_mut().take(channels) {
            *add = extra_bits * *add / bits;
        }
    }

    for ch in 0..channels {
        targ_bits[ch] += add_bits[ch];
    }

    let bits: i32 = targ_bits[..channels].iter().sum();
    if bits > MAX_BITS_PER_GRANULE {
        for t in targ_bits.iter_mut().take(channels) {
            *t = *t * MAX_BITS_PER_GRANULE / bits;
        }
    }

    PeBudget {
        max_bits,
        reservoir_nearly_full: grant.nearly_full,
    }
}

/// Move bits from the side channel to the mid channel of an M/S granule.
///
/// `ms_ener_ratio` is side energy over mid plus side energy; 0.5 leaves
/// the split alone, 0 moves a third. The side channel keeps at least 125
/// bits as long as `max_bits` covers the incoming total.
pub fn reduce_side(targ_bits: &mut [i32; 2], ms_ener_ratio: f32, mean_bits: i32, max_bits: i32) {
    let fac = (0.33 * (0.5 - ms_ener_ratio) / 0.5).clamp(0.0, 0.5);

    let mut move_bits = (fac * 0.5 * (targ_bits[0] + targ_bits[1]) as f32) as i32;
    if move_bits > MAX_BITS_PER_CHANNEL - targ_bits[0] {
        move_bits = MAX_BITS_PER_CHANNEL - targ_bits[0];
    }
    move_bits = move_bits.max(0);

    if targ_bits[1] >= 125 {
        if targ_bits[1] - move_bits > 125 {
            // mid already has more than the average: only take from side
            if targ_bits[0] < mean_bits {
                targ_bits[0] += move_bits;
            }
            targ_bits[1] -= move_bits;
        } else {
            targ_bits[0] += targ_bits[1] - 125;
            targ_bits[1] = 125;
        }
    }

    let total = targ_bits[0] + targ_bits[1];
    if total > max_bits {
        targ_bits[0] = max_bits * targ_bits[0] / total;
        targ_bits[1] = max_bits * targ_bits[1] / total;
    }
    debug_assert!(targ_bits[0] <= MAX_BITS_PER_CHANNEL);
    debug_assert!(targ_bits[1] <= MAX_BITS_PER_CHANNEL);
}

/// Per-granule targets of an ABR frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbrTargets {
    pub targ_bits: [[i32; 2]; 2],
    /// Budget for a channel detected as analog silence
    pub analog_silence_bits: i32,
    /// Main data bits of the largest allowed frame
    pub max_frame_bits: i32,
}

/// Targets for an ABR frame from the average bitrate, perceptual entropy
/// and the M/S energy ratio
pub fn calc_target_bits(
    session: &SessionConfig,
    reservoir: &mut BitReservoir,
    side: &SideInfo,
    pe: &[[f32; 2]; 2],
    ms_ener_ratio: &[f32; 2],
    mid_side: bool,
    substep_shaping: u8,
) -> AbrTargets {
    let mode_gr = session.mode_gr;
    let channels = session.channels;
    let gr_ch = (mode_gr * channels) as i32;
    let sideinfo_bits = session.sideinfo_len as i32 * 8;

    let max_frame_bits = reservoir
        .frame_begin(session.frame_bits(session.vbr_max_index, false))
        .full_frame_bits;

    let analog_silence_bits = (session.frame_bits(1, false) - sideinfo_bits) / gr_ch;

    let mut mean = session.mean_bitrate_kbps as f32 * session.framesize as f32 * 1000.0;
    if substep_shaping & 1 != 0 {
        mean *= 1.09;
    }
    let mut mean_bits = (mean / session.sample_rate as f32) as i32;
    mean_bits -= sideinfo_bits;
    mean_bits /= gr_ch;

    // share of the average kept out of the reservoir: 1.0 at 256 kbps,
    // 0.93 at 128 kbps
    let res_factor =
        (0.93 + 0.07 * (11.0 - session.compression_ratio) / (11.0 - 5.5)).clamp(0.90, 1.00);

    let mut targ_bits = [[0i32; 2]; 2];
    for gr in 0..mode_gr {
        let mut sum = 0;
        for ch in 0..channels {
            let mut t = (res_factor * mean_bits as f32) as i32;
            if pe[gr][ch] > 700.0 {
                let mut add = ((pe[gr][ch] - 700.0) / 1.4) as i32;
                // short blocks use a little extra, no matter what the pe
                if side.tt[gr][ch].block_type == BlockType::Short && add < mean_bits / 2 {
                    add = mean_bits / 2;
                }
                if add > mean_bits * 3 / 2 {
                    add = mean_bits * 3 / 2;
                } else if add < 0 {
                    add = 0;
                }
                t += add;
            }
            t = t.min(MAX_BITS_PER_CHANNEL);
            targ_bits[gr][ch] = t;
            sum += t;
        }
        if sum > MAX_BITS_PER_GRANULE {
            for t in targ_bits[gr].iter_mut().take(channels) {
                *t = *t * MAX_BITS_PER_GRANULE / sum;
            }
        }
    }

    if mid_side {
        for gr in 0..mode_gr {
            reduce_side(
                &mut targ_bits[gr],
                ms_ener_ratio[gr],
                mean_bits * channels as i32,
                MAX_BITS_PER_GRANULE,
            );
        }
    }

    let mut total = 0;
    for row in targ_bits.iter_mut().take(mode_gr) {
        for t in row.iter_mut().take(channels) {
            *t = (*t).min(MAX_BITS_PER_CHANNEL);
            total += *t;
        }
    }

    if total > max_frame_bits && total > 0 {
        for row in targ_bits.iter_mut().take(mode_gr) {
            for t in row.iter_mut().take(channels) {
                *t = *t * max_frame_bits / total;
            }
        }
    }

    AbrTargets {
        targ_bits,
        analog_silence_bits,
        max_frame_bits,
    }
}

/// Main data bits available at every bitrate index up to the VBR
/// maximum. Entry 0 (free format) is unused.
///
/// Leaves the reservoir ceiling set for the largest index.
pub fn get_framebits(session: &SessionConfig, reservoir: &mut BitReservoir) -> [i32; 15] {
    let mut frame_bits = [0i32; 15];
    for (index, bits) in frame_bits.iter_mut().enumerate().take(session.vbr_max_index + 1).skip(1) {
        *bits = reservoir.frame_begin(session.frame_bits(index, false)).full_frame_bits;
    }
    frame_bits
}

/// Tighten the allowed noise of high bands and lower every granule's
/// ceiling by 10% after a VBR pass overshot the largest frame
pub fn bitpressure_strategy(
    side: &SideInfo,
    xmin: &mut [[[f32; SFBMAX]; 2]; 2],
    min_bits: &[[i32; 2]; 2],
    max_bits: &mut [[i32; 2]; 2],
    mode_gr: usize,
    channels: usize,
) {
    for gr in 0..mode_gr {
        for ch in 0..channels {
            let gi = &side.tt[gr][ch];
            let pxmin = &mut xmin[gr][ch];
            let mut pos = 0;
            for sfb in 0..gi.psy_lmax {
                pxmin[pos] *= 1.0 + 0.029 * (sfb * sfb) as f32 / (SBMAX_L * SBMAX_L) as f32;
                pos += 1;
            }
            if gi.block_type == BlockType::Short {
                for sfb in gi.sfb_smin..SBMAX_S {
                    let fac = 1.0 + 0.029 * (sfb * sfb) as f32 / (SBMAX_S * SBMAX_S) as f32;
                    for _ in 0..3 {
                        if pos < SFBMAX {
                            pxmin[pos] *= fac;
                        }
                        pos += 1;
                    }
                }
            }
            max_bits[gr][ch] = min_bits[gr][ch].max((0.9 * max_bits[gr][ch] as f32) as i32);
        }
    }
}

/// Binary search over the granule budget for the cheapest quantization
/// without audible distortion, within 12 bits of the optimum.
///
/// Without a masked solution the last trial is kept. `gi` and `xrpow` are
/// left at the best quantization found.
pub fn vbr_encode_granule(
    quantizer: &mut Quantizer,
    gi: &mut GranuleInfo,
    xmin: &[f32; SFBMAX],
    xrpow: &mut XrPow,
    ch: usize,
    mut min_bits: i32,
    mut max_bits: i32,
) {
    let ceiling = max_bits;
    let sfb21_extra = quantizer.sfb21_extra;
    let mut this_bits = (max_bits + min_bits) / 2;
    let mut best: Option<(GranuleInfo, XrPow)> = None;
    let mut restored = false;

    loop {
        quantizer.sfb21_extra = if this_bits > ceiling - 42 { false } else { sfb21_extra };

        let over = quantizer.outer_loop(gi, xmin, xrpow, ch, this_bits);
        trace!("vbr search ch {}: {} bits -> over {}", ch, this_bits, over);

        if over <= 0 {
            let real_bits = gi.part2_3_length;
            best = Some((gi.clone(), xrpow.clone()));
            restored = false;
            max_bits = real_bits - 32;
        } else {
            min_bits = this_bits + 32;
            if let Some((best_gi, best_xrpow)) = &best {
                gi.clone_from(best_gi);
                xrpow.clone_from(best_xrpow);
                restored = true;
            }
        }
        this_bits = (max_bits + min_bits) / 2;
        if max_bits - min_bits <= 12 {
            break;
        }
    }

    quantizer.sfb21_extra = sfb21_extra;
    if restored {
        if let Some((best_gi, _)) = &best {
            gi.l3_enc = best_gi.l3_enc;
        }
    }
    debug_assert!(gi.part2_3_length <= ceiling);
}
