//! Per-frame iteration strategies
//!
//! One [`IterationStrategy`] is chosen when the session is configured and
//! every frame goes through [`IterationStrategy::encode_frame`]. All four
//! strategies share the same granule machinery ([`Quantizer`],
//! [`calc_xmin`], the reservoir); they differ in how the bit budget of
//! each granule is derived and how the frame's bitrate is picked.

use crate::ath::{Ath, BandFactors};
use crate::bit_allocation::{
    bitpressure_strategy, calc_target_bits, get_framebits, on_pe, reduce_side, vbr_encode_granule,
};
use crate::bit_count::BitCounter;
use crate::config::SessionConfig;
use crate::distortion::{calc_xmin, MaskingParams};
use crate::error::{EncodingError, EncodingResult};
use crate::outer_loop::{ms_convert, Quantizer};
use crate::psymodel::{temporal_decay, PsyFrame};
use crate::reservoir::{BitReservoir, FrameBudget};
use crate::types::{
    BlockType, GranuleInfo, PsyRatio, SideInfo, XrPow, GRANULE_SIZE, MAX_CHANNELS, MAX_GRANULES,
    SFBMAX,
};
use crate::vbr_quantize::vbr_encode_frame;
use log::trace;

/// How the bits of a frame are allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub enum IterationStrategy {
    /// Constant bitrate, reservoir smoothing between frames
    Cbr,
    /// Average bitrate: targets from the mean, frame size from the result
    Abr,
    /// VBR by binary search over each granule's budget
    VbrOld,
    /// VBR by direct scalefactor search against the masking threshold
    VbrNew,
}

/// What the quantization of one frame settled on
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameOutcome {
    pub bitrate_index: usize,
    pub padding: bool,
    /// Average main data bits per granule of the chosen frame size
    pub mean_bits: i32,
    /// Budget each granule was quantized against
    pub targ_bits: [[i32; MAX_CHANNELS]; MAX_GRANULES],
    /// Bands left above the allowed distortion (100 without noise shaping)
    pub over_count: [[i32; MAX_CHANNELS]; MAX_GRANULES],
    /// No band above the ATH
    pub analog_silence: [[bool; MAX_CHANNELS]; MAX_GRANULES],
}

/// Quantization state owned by one encoder and carried between frames
#[derive(Debug, Clone)]
pub struct LoopState {
    pub quantizer: Quantizer,
    pub reservoir: BitReservoir,
    pub ath: Ath,
    masking: MaskingParams,
}

impl LoopState {
    pub fn new(session: &SessionConfig) -> Self {
        let counter = BitCounter::new(
            session.bands.clone(),
            session.mode_gr,
            session.quality.use_best_huffman,
        );
        let quantizer = Quantizer::new(
            counter,
            session.quality,
            BandFactors::from_nspsytune(session.exp_nspsytune),
            session.is_vbr(),
            session.sfb21_extra,
        );
        let direct = session.strategy == IterationStrategy::VbrNew;
        let masking = MaskingParams {
            masking_lower: 1.0,
            ath_adjusted: direct,
            athaa_fix: direct,
            ath_only: false,
            ath_short: false,
            use_temporal: session.use_temporal,
            decay: temporal_decay(session.sample_rate),
        };
        Self {
            quantizer,
            reservoir: BitReservoir::new(session),
            ath: Ath::new(&session.bands, session.sample_rate, &session.ath),
            masking,
        }
    }

    /// Reset `gi` for the search and compute its allowed distortion with
    /// the masking lowered by `mask_db`. Returns the number of bands
    /// above the ATH.
    fn prepare(&mut self, gi: &mut GranuleInfo, ratio: &PsyRatio, mask_db: f32, xmin: &mut [f32; SFBMAX]) -> usize {
        self.masking.masking_lower = 10f32.powf(0.1 * mask_db);
        self.quantizer.init_outer_loop(gi, &self.ath);
        calc_xmin(&self.ath, self.quantizer.factors(), &self.masking, ratio, gi, xmin)
    }

    /// Final bookkeeping of an accepted granule
    fn finish_one(&mut self, side: &mut SideInfo, gr: usize, ch: usize) {
        let counter = self.quantizer.counter();
        counter.best_scalefac_store(side, gr, ch);
        if counter.use_best_huffman() == 1 {
            counter.best_huffman_divide(&mut side.tt[gr][ch]);
        }
        self.reservoir.adjust(&side.tt[gr][ch]);
    }
}

fn mask_adjust_db(session: &SessionConfig, block_type: BlockType) -> f32 {
    if block_type == BlockType::Short {
        session.tuning.mask_adjust_short
    } else {
        session.tuning.mask_adjust
    }
}

/// Scale granule ceilings down so their sum fits `limit`
fn fit_to_frame(max_bits: &mut [[i32; 2]; 2], total: i32, limit: i32, mode_gr: usize, channels: usize) {
    if total <= limit || total <= 0 {
        return;
    }
    for row in max_bits.iter_mut().take(mode_gr) {
        for bits in row.iter_mut().take(channels) {
            *bits = limit * *bits / total;
        }
    }
}

impl IterationStrategy {
    /// Quantize the frame whose spectra are in `side` (left/right; they
    /// are converted to mid/side here when `psy.mid_side` is set) and
    /// close it in the reservoir.
    ///
    /// `padding` applies to constant bitrate frames only.
    pub fn encode_frame(
        self,
        state: &mut LoopState,
        session: &SessionConfig,
        side: &mut SideInfo,
        psy: &PsyFrame,
        padding: bool,
    ) -> EncodingResult<FrameOutcome> {
        match self {
            IterationStrategy::Cbr => Ok(cbr_frame(state, session, side, psy, padding)),
            IterationStrategy::Abr => abr_frame(state, session, side, psy),
            IterationStrategy::VbrOld => vbr_old_frame(state, session, side, psy),
            IterationStrategy::VbrNew => vbr_new_frame(state, session, side, psy),
        }
    }
}

fn cbr_frame(
    state: &mut LoopState,
    session: &SessionConfig,
    side: &mut SideInfo,
    psy: &PsyFrame,
    padding: bool,
) -> FrameOutcome {
    let budget = state.reservoir.frame_begin(session.frame_bits(session.bitrate_index, padding));
    let mean_bits = budget.mean_bits;
    let substep = session.quality.substep_shaping;
    let mut out = FrameOutcome {
        bitrate_index: session.bitrate_index,
        padding,
        mean_bits,
        ..FrameOutcome::default()
    };

    for gr in 0..session.mode_gr {
        let mut targ = [0i32; 2];
        let pe_budget = on_pe(
            &state.reservoir,
            &psy.pe[gr],
            session.channels,
            &mut targ,
            mean_bits,
            gr != 0,
            substep,
        );
        state.quantizer.set_reservoir_nearly_full(pe_budget.reservoir_nearly_full);

        if psy.mid_side {
            ms_convert(side, gr);
            reduce_side(&mut targ, psy.ms_ener_ratio[gr], mean_bits, pe_budget.max_bits);
        }

        for ch in 0..session.channels {
            let gi = &mut side.tt[gr][ch];
            let mut xmin = [0.0f32; SFBMAX];
            let mut xrpow = XrPow::default();
            state.masking.masking_lower = 10f32.powf(0.1 * mask_adjust_db(session, gi.block_type));
            state.quantizer.init_outer_loop(gi, &state.ath);
            if state.quantizer.init_xrpow(gi, &mut xrpow) {
                let over_ath = calc_xmin(
                    &state.ath,
                    state.quantizer.factors(),
                    &state.masking,
                    &psy.ratio[gr][ch],
                    gi,
                    &mut xmin,
                );
                if over_ath == 0 {
                    targ[ch] = 0;
                    out.analog_silence[gr][ch] = true;
                }
                out.over_count[gr][ch] = state.quantizer.outer_loop(gi, &xmin, &mut xrpow, ch, targ[ch]);
            } else {
                out.analog_silence[gr][ch] = true;
            }
            out.targ_bits[gr][ch] = targ[ch];
            state.finish_one(side, gr, ch);
        }
    }

    state.reservoir.frame_end(side, mean_bits);
    out
}

fn abr_frame(
    state: &mut LoopState,
    session: &SessionConfig,
    side: &mut SideInfo,
    psy: &PsyFrame,
) -> EncodingResult<FrameOutcome> {
    let targets = calc_target_bits(
        session,
        &mut state.reservoir,
        side,
        &psy.pe,
        &psy.ms_ener_ratio,
        psy.mid_side,
        session.quality.substep_shaping,
    );
    let mut out = FrameOutcome::default();

    for gr in 0..session.mode_gr {
        if psy.mid_side {
            ms_convert(side, gr);
        }
        for ch in 0..session.channels {
            let gi = &mut side.tt[gr][ch];
            let mut targ = targets.targ_bits[gr][ch];
            let mut xmin = [0.0f32; SFBMAX];
            let mut xrpow = XrPow::default();
            state.masking.masking_lower = 10f32.powf(0.1 * mask_adjust_db(session, gi.block_type));
            state.quantizer.init_outer_loop(gi, &state.ath);
            if state.quantizer.init_xrpow(gi, &mut xrpow) {
                let over_ath = calc_xmin(
                    &state.ath,
                    state.quantizer.factors(),
                    &state.masking,
                    &psy.ratio[gr][ch],
                    gi,
                    &mut xmin,
                );
                if over_ath == 0 {
                    targ = targets.analog_silence_bits;
                    out.analog_silence[gr][ch] = true;
                }
                out.over_count[gr][ch] = state.quantizer.outer_loop(gi, &xmin, &mut xrpow, ch, targ);
            } else {
                out.analog_silence[gr][ch] = true;
            }
            out.targ_bits[gr][ch] = targ;
            state.finish_one(side, gr, ch);
        }
    }

    // smallest frame that brings the reservoir back to non-negative
    let mut chosen: Option<(usize, FrameBudget)> = None;
    for index in session.vbr_min_index..=session.vbr_max_index {
        let budget = state.reservoir.frame_begin(session.frame_bits(index, false));
        if budget.full_frame_bits >= 0 {
            chosen = Some((index, budget));
            break;
        }
    }
    let (index, budget) = chosen.ok_or_else(|| {
        EncodingError::BitstreamError(format!(
            "ABR frame overdrew the reservoir by {} bits",
            -state.reservoir.reservoir_size()
        ))
    })?;

    state.reservoir.frame_end(side, budget.mean_bits);
    out.bitrate_index = index;
    out.mean_bits = budget.mean_bits;
    Ok(out)
}

/// First bitrate index a VBR frame tries; silent frames may drop below
/// the configured minimum unless it is enforced
fn lowest_index(session: &SessionConfig, analog_silence: bool) -> usize {
    if analog_silence && !session.vbr_hard_min {
        1
    } else {
        session.vbr_min_index
    }
}

fn vbr_old_frame(
    state: &mut LoopState,
    session: &SessionConfig,
    side: &mut SideInfo,
    psy: &PsyFrame,
) -> EncodingResult<FrameOutcome> {
    let mode_gr = session.mode_gr;
    let channels = session.channels;
    let substep = session.quality.substep_shaping;

    let full = state
        .reservoir
        .frame_begin(session.frame_bits(session.vbr_max_index, false))
        .full_frame_bits;
    let avg = full / mode_gr as i32;
    let frame_bits = get_framebits(session, &mut state.reservoir);

    let mut min_bits = [[0i32; 2]; 2];
    let mut max_bits = [[0i32; 2]; 2];
    let mut xmin = [[[0.0f32; SFBMAX]; 2]; 2];
    let mut analog_silence = true;
    let mut out = FrameOutcome::default();
    let mut total = 0;

    for gr in 0..mode_gr {
        let pe_budget = on_pe(&state.reservoir, &psy.pe[gr], channels, &mut max_bits[gr], avg, false, substep);
        state.quantizer.set_reservoir_nearly_full(pe_budget.reservoir_nearly_full);
        if psy.mid_side {
            ms_convert(side, gr);
            reduce_side(&mut max_bits[gr], psy.ms_ener_ratio[gr], avg, pe_budget.max_bits);
        }
        for ch in 0..channels {
            let gi = &mut side.tt[gr][ch];
            let (scale, offset) = if gi.block_type == BlockType::Short { (2.56, 0.14) } else { (1.28, 0.05) };
            let adjust = scale / (1.0 + (3.5 - psy.pe[gr][ch] / 300.0).exp()) - offset;
            let mask_db = mask_adjust_db(session, gi.block_type) - adjust;
            let bands = state.prepare(gi, &psy.ratio[gr][ch], mask_db, &mut xmin[gr][ch]);
            if bands != 0 {
                analog_silence = false;
            } else {
                out.analog_silence[gr][ch] = true;
            }
            min_bits[gr][ch] = 126;
            total += max_bits[gr][ch];
        }
    }

    fit_to_frame(&mut max_bits, total, frame_bits[session.vbr_max_index], mode_gr, channels);
    for gr in 0..mode_gr {
        for ch in 0..channels {
            min_bits[gr][ch] = min_bits[gr][ch].min(max_bits[gr][ch]);
        }
    }

    let fresh = side.tt.clone();
    let (index, budget) = loop {
        let mut used = 0;
        for gr in 0..mode_gr {
            for ch in 0..channels {
                side.tt[gr][ch].clone_from(&fresh[gr][ch]);
                let gi = &mut side.tt[gr][ch];
                let mut xrpow = XrPow::default();
                if !state.quantizer.init_xrpow(gi, &mut xrpow) || max_bits[gr][ch] == 0 {
                    gi.l3_enc = [0; GRANULE_SIZE];
                    continue;
                }
                vbr_encode_granule(
                    &mut state.quantizer,
                    gi,
                    &xmin[gr][ch],
                    &mut xrpow,
                    ch,
                    min_bits[gr][ch],
                    max_bits[gr][ch],
                );
                if substep & 1 != 0 {
                    state.quantizer.truncate_small_spectrums(gi, &xmin[gr][ch]);
                }
                used += gi.part2_3_length + gi.part2_length;
            }
        }

        let mut index = lowest_index(session, analog_silence);
        while index < session.vbr_max_index && used > frame_bits[index] {
            index += 1;
        }
        let budget = state.reservoir.frame_begin(session.frame_bits(index, false));
        trace!("vbr pass: {} bits used, index {} holds {}", used, index, budget.full_frame_bits);
        if used <= budget.full_frame_bits {
            break (index, budget);
        }

        let before = max_bits;
        bitpressure_strategy(side, &mut xmin, &min_bits, &mut max_bits, mode_gr, channels);
        if max_bits == before {
            return Err(EncodingError::BitstreamError(format!(
                "VBR frame needs {} bits, largest frame holds {}",
                used, budget.full_frame_bits
            )));
        }
    };

    for gr in 0..mode_gr {
        for ch in 0..channels {
            out.targ_bits[gr][ch] = max_bits[gr][ch];
            state.finish_one(side, gr, ch);
        }
    }
    state.reservoir.frame_end(side, budget.mean_bits);
    out.bitrate_index = index;
    out.mean_bits = budget.mean_bits;
    Ok(out)
}

fn vbr_new_frame(
    state: &mut LoopState,
    session: &SessionConfig,
    side: &mut SideInfo,
    psy: &PsyFrame,
) -> EncodingResult<FrameOutcome> {
    let mode_gr = session.mode_gr;
    let channels = session.channels;
    let substep = session.quality.substep_shaping;

    let largest = state.reservoir.frame_begin(session.frame_bits(session.vbr_max_index, false));
    let mut pad = state.reservoir.reservoir_max();
    let frame_bits = get_framebits(session, &mut state.reservoir);

    let mut max_bits = [[0i32; 2]; 2];
    let mut xmin = [[[0.0f32; SFBMAX]; 2]; 2];
    let mut analog_silence = true;
    let mut out = FrameOutcome::default();
    let mut total = 0;

    for gr in 0..mode_gr {
        on_pe(&state.reservoir, &psy.pe[gr], channels, &mut max_bits[gr], largest.mean_bits, false, substep);
        if psy.mid_side {
            ms_convert(side, gr);
        }
        for ch in 0..channels {
            let gi = &mut side.tt[gr][ch];
            let mask_db = mask_adjust_db(session, gi.block_type);
            if state.prepare(gi, &psy.ratio[gr][ch], mask_db, &mut xmin[gr][ch]) != 0 {
                analog_silence = false;
            } else {
                out.analog_silence[gr][ch] = true;
            }
            total += max_bits[gr][ch];
        }
    }
    fit_to_frame(&mut max_bits, total, frame_bits[session.vbr_max_index], mode_gr, channels);
    if analog_silence {
        pad = 0;
    }

    let mut xrpow: [[XrPow; 2]; 2] = Default::default();
    for gr in 0..mode_gr {
        for ch in 0..channels {
            if !state.quantizer.init_xrpow(&mut side.tt[gr][ch], &mut xrpow[gr][ch]) {
                max_bits[gr][ch] = 0;
            }
        }
    }

    let used = vbr_encode_frame(&state.quantizer, side, &xrpow, &xmin, &max_bits, mode_gr, channels);

    let mut index = lowest_index(session, analog_silence);
    while index < session.vbr_max_index && used > frame_bits[index] {
        index += 1;
    }
    if pad > 0 {
        // prefer the largest frame whose leftover still fits the reservoir
        let mut j = session.vbr_max_index;
        while j > index && frame_bits[j] - used > pad {
            j -= 1;
        }
        index = j;
    }
    if used > frame_bits[index] {
        return Err(EncodingError::BitstreamError(format!(
            "VBR frame needs {} bits, index {} holds {}",
            used, index, frame_bits[index]
        )));
    }

    let budget = state.reservoir.frame_begin(session.frame_bits(index, false));
    debug_assert!(used <= budget.full_frame_bits);
    for gr in 0..mode_gr {
        for ch in 0..channels {
            out.targ_bits[gr][ch] = max_bits[gr][ch];
            state.finish_one(side, gr, ch);
        }
    }
    state.reservoir.frame_end(side, budget.mean_bits);
    out.bitrate_index = index;
    out.mean_bits = budget.mean_bits;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, StereoMode, VbrMode};
    use crate::psymodel::PsyModel;

    fn session(config: EncoderConfig) -> SessionConfig {
        config.resolve().expect("valid config")
    }

    fn noise(seed: u32, amp: f32) -> [f32; GRANULE_SIZE] {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(7);
        let mut xr = [0.0f32; GRANULE_SIZE];
        for (i, x) in xr.iter_mut().enumerate() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            let tilt = 1.0 / (1.0 + i as f32 / 48.0);
            *x = ((state >> 8) as f32 / (1u32 << 23) as f32 - 1.0) * amp * tilt;
        }
        xr
    }

    /// Run `frames` frames of noise through a strategy, checking the
    /// reservoir after each one
    fn run(session: &SessionConfig, frames: usize, amp: f32) -> Vec<(FrameOutcome, SideInfo)> {
        let mut state = LoopState::new(session);
        let psy_model = PsyModel::new(session);
        let mut side = SideInfo::default();
        let mut outcomes = Vec::new();
        for frame in 0..frames {
            for gr in 0..session.mode_gr {
                for ch in 0..session.channels {
                    side.tt[gr][ch].xr = noise((frame * 4 + gr * 2 + ch) as u32, amp);
                }
            }
            let psy = psy_model.analyze(&side, session.mode_gr, &state.ath);
            state.ath.update_adjust(&psy.loudness, session.channels, session.mode_gr);
            let padding = false;
            let out = session
                .strategy
                .encode_frame(&mut state, session, &mut side, &psy, padding)
                .expect("frame fits");
            let size = state.reservoir.reservoir_size();
            assert!(size >= 0 && size <= state.reservoir.reservoir_max(), "reservoir {}", size);
            assert_eq!(size % 8, 0);
            // what the bitstream would report back
            side.main_data_begin = size / 8;
            outcomes.push((out, side.clone()));
        }
        outcomes
    }

    #[test]
    fn test_cbr_granules_stay_within_target() {
        let s = session(EncoderConfig::new(44100, 2).bitrate(128).quality(5));
        for (out, side) in run(&s, 4, 0.1) {
            for gr in 0..2 {
                for ch in 0..2 {
                    let gi = &side.tt[gr][ch];
                    assert!(gi.part2_3_length + gi.part2_length <= out.targ_bits[gr][ch]);
                    assert!(gi.global_gain >= 0 && gi.global_gain + gi.scalefac_scale <= 255);
                }
            }
            assert_eq!(out.bitrate_index, s.bitrate_index);
        }
    }

    #[test]
    fn test_cbr_silence_is_analog_silence() {
        let s = session(EncoderConfig::new(44100, 2).bitrate(128));
        for (out, side) in run(&s, 2, 0.0) {
            assert!(out.analog_silence.iter().flatten().all(|&a| a));
            assert!(side.tt.iter().flatten().all(|gi| gi.is_silent()));
        }
    }

    #[test]
    fn test_joint_stereo_identical_channels_use_mid_side() {
        let s = session(EncoderConfig::new(44100, 2).stereo_mode(StereoMode::JointStereo).bitrate(128));
        let mut state = LoopState::new(&s);
        let mut side = SideInfo::default();
        for gr in 0..2 {
            let xr = noise(gr as u32, 0.1);
            side.tt[gr][0].xr = xr;
            side.tt[gr][1].xr = xr;
        }
        let psy = PsyModel::new(&s).analyze(&side, 2, &state.ath);
        assert!(psy.mid_side);
        let out = s.strategy.encode_frame(&mut state, &s, &mut side, &psy, false).expect("cbr");
        // the side channel carries nothing but keeps its floor
        assert!(side.tt[0][1].is_silent());
        assert!(out.targ_bits[0][1] <= out.targ_bits[0][0]);
    }

    #[test]
    fn test_abr_picks_index_in_range() {
        let s = session(EncoderConfig::new(44100, 2).bitrate(128).vbr(VbrMode::Abr));
        for (out, _) in run(&s, 4, 0.1) {
            assert!((s.vbr_min_index..=s.vbr_max_index).contains(&out.bitrate_index));
        }
    }

    #[test]
    fn test_vbr_old_fits_frame() {
        let s = session(EncoderConfig::new(44100, 2).vbr(VbrMode::Rh).vbr_quality(4.0));
        for (out, side) in run(&s, 3, 0.1) {
            let used: i32 = side.tt.iter().flatten().map(|gi| gi.part2_3_length + gi.part2_length).sum();
            assert!(used <= s.frame_bits(out.bitrate_index, false) + 4088);
            assert!((1..=s.vbr_max_index).contains(&out.bitrate_index));
        }
    }

    #[test]
    fn test_vbr_new_sub_threshold_input_costs_nothing() {
        let s = session(EncoderConfig::new(44100, 1).vbr(VbrMode::Mtrh).vbr_quality(2.0));
        let bits = |v: &[(FrameOutcome, SideInfo)]| -> i32 {
            v.iter()
                .flat_map(|(_, side)| side.tt.iter().map(|gr| gr[0].part2_3_length))
                .sum()
        };
        let inaudible = run(&s, 3, 1e-8);
        assert_eq!(bits(&inaudible), 0);
        for (out, _) in &inaudible {
            assert!(out.analog_silence[0][0] && out.analog_silence[1][0]);
            assert_eq!(out.bitrate_index, 1);
        }
        let audible = run(&s, 3, 0.2);
        assert!(bits(&audible) > 0);
    }

    #[test]
    fn test_vbr_old_tracks_full_reservoir() {
        let s = session(EncoderConfig::new(44100, 1).vbr(VbrMode::Rh).vbr_quality(4.0));
        let mut state = LoopState::new(&s);
        let mut side = SideInfo::default();
        for gr in 0..2 {
            side.tt[gr][0].xr = noise(gr as u32, 0.1);
        }
        let psy = PsyModel::new(&s).analyze(&side, 2, &state.ath);

        state.reservoir.frame_begin(s.frame_bits(s.vbr_max_index, false));
        state.reservoir.resync(state.reservoir.reservoir_max());
        s.strategy.encode_frame(&mut state, &s, &mut side.clone(), &psy, false).expect("vbr");
        assert_ne!(state.quantizer.quality().substep_shaping & 0x80, 0);

        state.reservoir.resync(0);
        s.strategy.encode_frame(&mut state, &s, &mut side.clone(), &psy, false).expect("vbr");
        assert_eq!(state.quantizer.quality().substep_shaping & 0x80, 0);
    }

    #[test]
    fn test_silent_vbr_frames_respect_hard_minimum() {
        for mode in [VbrMode::Rh, VbrMode::Mtrh] {
            let soft = session(EncoderConfig::new(44100, 2).vbr(mode).vbr_min_bitrate(96, false));
            for (out, _) in run(&soft, 2, 0.0) {
                assert_eq!(out.bitrate_index, 1, "{:?}", mode);
            }
            let hard = session(EncoderConfig::new(44100, 2).vbr(mode).vbr_min_bitrate(96, true));
            for (out, _) in run(&hard, 2, 0.0) {
                assert_eq!(out.bitrate_index, hard.vbr_min_index, "{:?}", mode);
            }
        }
    }

    #[test]
    fn test_vbr_silence_uses_smallest_frame() {
        let s = session(EncoderConfig::new(44100, 2).vbr(VbrMode::Rh));
        for (out, _) in run(&s, 2, 0.0) {
            assert_eq!(out.bitrate_index, 1);
        }
    }
}
