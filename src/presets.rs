//! Tuning presets
//!
//! Psychoacoustic and quantizer parameters are looked up in three tables:
//! one per VBR flavour indexed by VBR quality, and one for ABR/CBR indexed
//! by bitrate. VBR settings between two integer quality levels are a
//! linear blend of the neighbouring rows.

use crate::error::{ConfigError, ConfigResult};

/// Linear blend of `low` towards `high`
pub fn lerp(low: f32, high: f32, frac: f32) -> f32 {
    low + frac * (high - low)
}

/// One row of a VBR switch map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VbrPreset {
    pub vbr_q: u8,
    pub quant_comp: u8,
    pub quant_comp_short: u8,
    /// Disables the sfb21 extra band
    pub exp_y: bool,
    pub st_lrm: f32,
    pub st_s: f32,
    pub masking_adj: f32,
    pub masking_adj_short: f32,
    pub ath_lower: f32,
    pub ath_curve: f32,
    pub ath_sensitivity: f32,
    pub interch: f32,
    pub safejoint: i32,
    pub sfb21mod: i32,
    pub msfix: f32,
}

impl VbrPreset {
    /// Blend the continuous parameters towards `next`. Integer switches
    /// always come from `self`.
    pub fn interpolate(&self, next: &VbrPreset, frac: f32) -> VbrPreset {
        VbrPreset {
            st_lrm: lerp(self.st_lrm, next.st_lrm, frac),
            st_s: lerp(self.st_s, next.st_s, frac),
            masking_adj: lerp(self.masking_adj, next.masking_adj, frac),
            masking_adj_short: lerp(self.masking_adj_short, next.masking_adj_short, frac),
            ath_lower: lerp(self.ath_lower, next.ath_lower, frac),
            ath_curve: lerp(self.ath_curve, next.ath_curve, frac),
            ath_sensitivity: lerp(self.ath_sensitivity, next.ath_sensitivity, frac),
            interch: lerp(self.interch, next.interch, frac),
            msfix: lerp(self.msfix, next.msfix, frac),
            ..*self
        }
    }
}

/// One row of the ABR switch map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbrPreset {
    pub kbps: u32,
    pub quant_comp: u8,
    pub quant_comp_short: u8,
    pub safejoint: i32,
    pub nsmsfix: f32,
    pub st_lrm: f32,
    pub st_s: f32,
    pub nsbass: f32,
    pub scale: f32,
    pub masking_adj: f32,
    pub ath_lower: f32,
    pub ath_curve: f32,
    pub interch: f32,
    pub sfscale: i32,
}

#[allow(clippy::too_many_arguments)]
const fn vbr(
    vbr_q: u8,
    quant_comp: u8,
    quant_comp_short: u8,
    exp_y: u8,
    st_lrm: f32,
    st_s: f32,
    masking_adj: f32,
    masking_adj_short: f32,
    ath_lower: f32,
    ath_curve: f32,
    ath_sensitivity: f32,
    interch: f32,
    safejoint: i32,
    sfb21mod: i32,
    msfix: f32,
) -> VbrPreset {
    VbrPreset {
        vbr_q,
        quant_comp,
        quant_comp_short,
        exp_y: exp_y != 0,
        st_lrm,
        st_s,
        masking_adj,
        masking_adj_short,
        ath_lower,
        ath_curve,
        ath_sensitivity,
        interch,
        safejoint,
        sfb21mod,
        msfix,
    }
}

#[allow(clippy::too_many_arguments)]
const fn abr(
    kbps: u32,
    quant_comp: u8,
    quant_comp_short: u8,
    safejoint: i32,
    nsmsfix: f32,
    st_lrm: f32,
    st_s: f32,
    nsbass: f32,
    scale: f32,
    masking_adj: f32,
    ath_lower: f32,
    ath_curve: f32,
    interch: f32,
    sfscale: i32,
) -> AbrPreset {
    AbrPreset {
        kbps,
        quant_comp,
        quant_comp_short,
        safejoint,
        nsmsfix,
        st_lrm,
        st_s,
        nsbass,
        scale,
        masking_adj,
        ath_lower,
        ath_curve,
        interch,
        sfscale,
    }
}

/// Switch map for the `Rh` VBR search
pub static VBR_OLD_SWITCH_MAP: [VbrPreset; 11] = [
    vbr(0, 9, 9, 0, 5.20, 125.0, -4.2, -6.3, 4.8, 1.0, 0.0, 0.0, 2, 21, 0.97),
    vbr(1, 9, 9, 0, 5.30, 125.0, -3.6, -5.6, 4.5, 1.5, 0.0, 0.0, 2, 21, 1.35),
    vbr(2, 9, 9, 0, 5.60, 125.0, -2.2, -3.5, 2.8, 2.0, 0.0, 0.0, 2, 21, 1.49),
    vbr(3, 9, 9, 1, 5.80, 130.0, -1.8, -2.8, 2.6, 3.0, -4.0, 0.0, 2, 20, 1.64),
    vbr(4, 9, 9, 1, 6.00, 135.0, -0.7, -1.1, 1.1, 3.5, -8.0, 0.0, 2, 0, 1.79),
    vbr(5, 9, 9, 1, 6.40, 140.0, 0.5, 0.4, -7.5, 4.0, -12.0, 0.0002, 0, 0, 1.95),
    vbr(6, 9, 9, 1, 6.60, 145.0, 0.67, 0.65, -14.7, 6.5, -19.0, 0.0004, 0, 0, 2.30),
    vbr(7, 9, 9, 1, 6.60, 145.0, 0.8, 0.75, -19.7, 8.0, -22.0, 0.0006, 0, 0, 2.70),
    vbr(8, 9, 9, 1, 6.60, 145.0, 1.2, 1.15, -27.5, 10.0, -23.0, 0.0007, 0, 0, 0.0),
    vbr(9, 9, 9, 1, 6.60, 145.0, 1.6, 1.6, -36.0, 11.0, -25.0, 0.0008, 0, 0, 0.0),
    vbr(10, 9, 9, 1, 6.60, 145.0, 2.0, 2.0, -36.0, 12.0, -25.0, 0.0008, 0, 0, 0.0),
];

/// Switch map for the `Mtrh` VBR search
pub static VBR_PSY_SWITCH_MAP: [VbrPreset; 11] = [
    vbr(0, 9, 9, 0, 4.20, 25.0, -7.0, -4.0, 7.5, 1.0, 0.0, 0.0, 2, 26, 0.97),
    vbr(1, 9, 9, 0, 4.20, 25.0, -5.6, -3.6, 4.5, 1.5, 0.0, 0.0, 2, 21, 1.35),
    vbr(2, 9, 9, 0, 4.20, 25.0, -4.4, -1.8, 2.0, 2.0, 0.0, 0.0, 2, 18, 1.49),
    vbr(3, 9, 9, 1, 4.20, 25.0, -3.4, -1.25, 1.1, 3.0, -4.0, 0.0, 2, 15, 1.64),
    vbr(4, 9, 9, 1, 4.20, 25.0, -2.2, 0.1, 0.0, 3.5, -8.0, 0.0, 2, 0, 1.79),
    vbr(5, 9, 9, 1, 4.20, 25.0, -1.0, 1.65, -7.7, 4.0, -12.0, 0.0002, 0, 0, 1.95),
    vbr(6, 9, 9, 1, 4.20, 25.0, -0.0, 2.47, -7.7, 6.5, -19.0, 0.0004, 0, 0, 2.0),
    vbr(7, 9, 9, 1, 4.20, 25.0, 0.5, 2.0, -14.5, 8.0, -22.0, 0.0006, 0, 0, 2.0),
    vbr(8, 9, 9, 1, 4.20, 25.0, 1.0, 2.4, -22.0, 10.0, -23.0, 0.0007, 0, 0, 2.0),
    vbr(9, 9, 9, 1, 4.20, 25.0, 1.5, 2.95, -30.0, 11.0, -25.0, 0.0008, 0, 0, 2.0),
    vbr(10, 9, 9, 1, 4.20, 25.0, 2.0, 2.95, -36.0, 12.0, -30.0, 0.0008, 0, 0, 2.0),
];

/// Switch map for ABR and CBR, one row per bitrate step
pub static ABR_SWITCH_MAP: [AbrPreset; 17] = [
    abr(8, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -30.0, 11.0, 0.0012, 1),
    abr(16, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -25.0, 11.0, 0.0010, 1),
    abr(24, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -20.0, 11.0, 0.0010, 1),
    abr(32, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -15.0, 11.0, 0.0010, 1),
    abr(40, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -10.0, 11.0, 0.0009, 1),
    abr(48, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -10.0, 11.0, 0.0009, 1),
    abr(56, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -6.0, 11.0, 0.0008, 1),
    abr(64, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, -2.0, 11.0, 0.0008, 1),
    abr(80, 9, 9, 0, 0.0, 6.60, 145.0, 0.0, 0.95, 0.0, 0.0, 8.0, 0.0007, 1),
    abr(96, 9, 9, 0, 2.50, 6.60, 145.0, 0.0, 0.95, 0.0, 1.0, 5.5, 0.0006, 1),
    abr(112, 9, 9, 0, 2.25, 6.60, 145.0, 0.0, 0.95, 0.0, 2.0, 4.5, 0.0005, 1),
    abr(128, 9, 9, 0, 1.95, 6.40, 140.0, 0.0, 0.95, 0.0, 3.0, 4.0, 0.0002, 1),
    abr(160, 9, 9, 1, 1.79, 6.00, 135.0, 0.0, 0.95, -2.0, 5.0, 3.5, 0.0, 1),
    abr(192, 9, 9, 1, 1.49, 5.60, 125.0, 0.0, 0.97, -4.0, 7.0, 3.0, 0.0, 0),
    abr(224, 9, 9, 1, 1.25, 5.20, 125.0, 0.0, 0.98, -6.0, 9.0, 2.0, 0.0, 0),
    abr(256, 9, 9, 1, 0.97, 5.20, 125.0, 0.0, 1.00, -8.0, 10.0, 1.0, 0.0, 0),
    abr(320, 9, 9, 1, 0.90, 5.20, 125.0, 0.0, 1.00, -10.0, 12.0, 0.0, 0.0, 0),
];

/// Which VBR switch map a quality level reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbrFlavour {
    Old,
    Psy,
}

/// Parameters a preset row resolves to, in the units the encoder uses
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub struct PsyTuning {
    pub quant_comp: u8,
    pub quant_comp_short: u8,
    /// Keep the sfb21 extra band off even at high sample rates
    pub no_sfb21_extra: bool,
    /// Attack threshold for long/short switching
    pub attack_threshold: f32,
    /// Attack threshold between short sub-blocks
    pub attack_threshold_short: f32,
    /// Masking offset in dB, long blocks
    pub mask_adjust: f32,
    /// Masking offset in dB, short blocks
    pub mask_adjust_short: f32,
    /// Positive values lower the ATH, in dB
    pub ath_lower_db: f32,
    pub ath_curve: f32,
    pub ath_sensitivity_db: f32,
    pub inter_ch_ratio: f32,
    pub msfix: f32,
    /// Extra `exp_nspsytune` bits (safejoint, sfb21 and bass tweaks)
    pub exp_nspsytune: i32,
    /// The row asks for `noise_shaping = 2`
    pub scalefac_scale_shaping: bool,
    /// Input gain applied before analysis
    pub scale: f32,
}

/// Blend of the VBR rows around `quality + frac`
pub fn vbr_tuning(flavour: VbrFlavour, quality: u8, frac: f32) -> PsyTuning {
    let map = match flavour {
        VbrFlavour::Old => &VBR_OLD_SWITCH_MAP,
        VbrFlavour::Psy => &VBR_PSY_SWITCH_MAP,
    };
    let a = usize::from(quality.min(9));
    let p = map[a].interpolate(&map[a + 1], frac);

    let mut exp_nspsytune = 0;
    if p.safejoint > 0 {
        exp_nspsytune |= p.safejoint;
    }
    if p.sfb21mod > 0 {
        exp_nspsytune |= p.sfb21mod << 20;
    }

    PsyTuning {
        quant_comp: p.quant_comp,
        quant_comp_short: p.quant_comp_short,
        no_sfb21_extra: p.exp_y,
        attack_threshold: p.st_lrm,
        attack_threshold_short: p.st_s,
        mask_adjust: p.masking_adj,
        mask_adjust_short: p.masking_adj_short,
        ath_lower_db: p.ath_lower,
        ath_curve: p.ath_curve,
        ath_sensitivity_db: p.ath_sensitivity,
        inter_ch_ratio: p.interch,
        msfix: p.msfix,
        exp_nspsytune,
        scalefac_scale_shaping: false,
        scale: 1.0,
    }
}

/// Row of [`ABR_SWITCH_MAP`] closest to `kbps`; ties go to the higher row
pub fn nearest_abr_index(kbps: u32) -> usize {
    let last = ABR_SWITCH_MAP.len() - 1;
    for b in 0..last {
        let upper = ABR_SWITCH_MAP[b + 1].kbps;
        if upper > kbps {
            let lower = ABR_SWITCH_MAP[b].kbps;
            return if upper - kbps > kbps.saturating_sub(lower) { b } else { b + 1 };
        }
    }
    last
}

/// Parameters of the ABR row nearest to `kbps`
pub fn abr_tuning(kbps: u32) -> PsyTuning {
    let r = &ABR_SWITCH_MAP[nearest_abr_index(kbps)];

    let mut exp_nspsytune = 0;
    if r.safejoint > 0 {
        exp_nspsytune |= 2;
    }
    if r.nsbass.abs() > 0.0 {
        let mut k = (r.nsbass * 4.0) as i32;
        if k < 0 {
            k += 64;
        }
        exp_nspsytune |= k << 2;
    }
    let mask_adjust_short = if r.masking_adj > 0.0 {
        r.masking_adj * 0.9
    } else {
        r.masking_adj * 1.1
    };

    PsyTuning {
        quant_comp: r.quant_comp,
        quant_comp_short: r.quant_comp_short,
        no_sfb21_extra: false,
        attack_threshold: r.st_lrm,
        attack_threshold_short: r.st_s,
        mask_adjust: r.masking_adj,
        mask_adjust_short,
        ath_lower_db: r.ath_lower,
        ath_curve: r.ath_curve,
        ath_sensitivity_db: 0.0,
        inter_ch_ratio: r.interch,
        msfix: r.nsmsfix,
        exp_nspsytune,
        scalefac_scale_shaping: r.sfscale > 0,
        scale: r.scale,
    }
}

/// Named presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub enum Preset {
    /// `V0`..`V9`, searched with the psychoacoustic VBR mode
    V(u8),
    Medium,
    MediumFast,
    Standard,
    StandardFast,
    Extreme,
    ExtremeFast,
    R3mix,
    /// 320 kbps CBR
    Insane,
    /// Average bitrate in kbps, 8..=320
    Abr(u32),
}

/// Rate control a preset selects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresetTarget {
    /// VBR with the given search flavour and quality
    Vbr { flavour: VbrFlavour, quality: u8 },
    /// Average bitrate in kbps
    Abr(u32),
    /// Constant bitrate in kbps
    Cbr(u32),
}

impl Preset {
    /// Resolve legacy names to their rate control target
    pub fn target(self) -> ConfigResult<PresetTarget> {
        let vbr = |flavour, quality| Ok(PresetTarget::Vbr { flavour, quality });
        match self {
            Preset::V(q) if q <= 9 => vbr(VbrFlavour::Psy, q),
            Preset::V(q) => Err(ConfigError::UnknownPreset(format!("V{}", q))),
            Preset::R3mix => vbr(VbrFlavour::Psy, 3),
            Preset::Medium => vbr(VbrFlavour::Old, 4),
            Preset::MediumFast => vbr(VbrFlavour::Psy, 4),
            Preset::Standard => vbr(VbrFlavour::Old, 2),
            Preset::StandardFast => vbr(VbrFlavour::Psy, 2),
            Preset::Extreme => vbr(VbrFlavour::Old, 0),
            Preset::ExtremeFast => vbr(VbrFlavour::Psy, 0),
            Preset::Insane => Ok(PresetTarget::Cbr(320)),
            Preset::Abr(kbps) if (8..=320).contains(&kbps) => Ok(PresetTarget::Abr(kbps)),
            Preset::Abr(kbps) => Err(ConfigError::UnknownPreset(format!("ABR {} kbps", kbps))),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let preset = match lower.as_str() {
            "medium" => Preset::Medium,
            "fast medium" => Preset::MediumFast,
            "standard" => Preset::Standard,
            "fast standard" => Preset::StandardFast,
            "extreme" => Preset::Extreme,
            "fast extreme" => Preset::ExtremeFast,
            "r3mix" => Preset::R3mix,
            "insane" => Preset::Insane,
            _ => {
                if let Some(q) = lower.strip_prefix('v').and_then(|v| v.parse::<u8>().ok()) {
                    Preset::V(q)
                } else if let Ok(kbps) = lower.parse::<u32>() {
                    Preset::Abr(kbps)
                } else {
                    return Err(ConfigError::UnknownPreset(s.to_string()));
                }
            }
        };
        preset.target()?;
        Ok(preset)
    }
}

/// Coded bandwidth in Hz per CBR/ABR bitrate in kbps
const BANDWIDTH_MAP: [(u32, u32); 17] = [
    (8, 2000),
    (16, 3700),
    (24, 3900),
    (32, 5500),
    (40, 7000),
    (48, 7500),
    (56, 10000),
    (64, 11000),
    (80, 13500),
    (96, 15100),
    (112, 15600),
    (128, 17000),
    (160, 17500),
    (192, 18600),
    (224, 19400),
    (256, 19700),
    (320, 20500),
];

/// VBR lowpass in Hz per quality level, blended like the switch maps
const VBR_LOWPASS: [f32; 11] = [
    19500.0, 19000.0, 18600.0, 18000.0, 17500.0, 16000.0, 15600.0, 14900.0, 12500.0, 10000.0, 3950.0,
];

/// Bandwidth of the bitrate row closest to `kbps`; ties go to the higher row
pub fn optimum_bandwidth(kbps: u32) -> u32 {
    let last = BANDWIDTH_MAP.len() - 1;
    let index = (0..last)
        .find(|&b| BANDWIDTH_MAP[b + 1].0 > kbps)
        .map(|b| {
            let (lower, upper) = (BANDWIDTH_MAP[b].0, BANDWIDTH_MAP[b + 1].0);
            if upper - kbps > kbps.saturating_sub(lower) { b } else { b + 1 }
        })
        .unwrap_or(last);
    BANDWIDTH_MAP[index].1
}

/// Lowpass frequency for VBR quality `quality` plus `frac`
pub fn vbr_lowpass(quality: u8, frac: f32) -> f32 {
    let q = usize::from(quality.min(9));
    lerp(VBR_LOWPASS[q], VBR_LOWPASS[q + 1], frac)
}

fn filter_coef(x: f32) -> f32 {
    if x >= 1.0 {
        0.0
    } else if x <= 0.0 {
        1.0
    } else {
        (std::f32::consts::FRAC_PI_2 * x).cos()
    }
}

/// Gain of each polyphase subband for a lowpass at `lowpass_hz`.
///
/// The transition is a quarter cosine ending at the first subband whose
/// centre reaches the cutoff; every band from there up is silenced. A
/// cutoff at the Nyquist frequency leaves all gains at one.
pub fn subband_lowpass(lowpass_hz: f32, sample_rate: u32) -> [f32; 32] {
    let mut gains = [1.0f32; 32];
    let cutoff = 2.0 * lowpass_hz / sample_rate as f32;
    if cutoff >= 1.0 {
        return gains;
    }
    let Some(stop) = (0..32).find(|&band| band as f32 / 31.0 >= cutoff) else {
        return gains;
    };
    let start = (stop as f32 - 0.75) / 31.0;
    let end = stop as f32 / 31.0;
    for (band, gain) in gains.iter_mut().enumerate() {
        let freq = band as f32 / 31.0;
        *gain = filter_coef((freq - start) / (end - start + 1e-20));
    }
    gains
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_whole_quality_reads_single_row() {
        let t = vbr_tuning(VbrFlavour::Old, 4, 0.0);
        assert_eq!(t.mask_adjust, -0.7);
        assert_eq!(t.ath_lower_db, 1.1);
        assert_eq!(t.attack_threshold, 6.0);
        assert!(t.no_sfb21_extra);
        assert_eq!(t.exp_nspsytune, 2);
    }

    #[test]
    fn test_fraction_blends_neighbours() {
        let t = vbr_tuning(VbrFlavour::Psy, 2, 0.5);
        assert!((t.mask_adjust - (-3.9)).abs() < 1e-5);
        assert!((t.ath_curve - 2.5).abs() < 1e-5);
        // switches come from the lower row
        assert!(!t.no_sfb21_extra);
        assert_eq!(t.exp_nspsytune, 2 | (18 << 20));
    }

    #[test]
    fn test_abr_row_selection() {
        assert_eq!(ABR_SWITCH_MAP[nearest_abr_index(128)].kbps, 128);
        assert_eq!(ABR_SWITCH_MAP[nearest_abr_index(136)].kbps, 128);
        assert_eq!(ABR_SWITCH_MAP[nearest_abr_index(144)].kbps, 160);
        assert_eq!(ABR_SWITCH_MAP[nearest_abr_index(150)].kbps, 160);
        assert_eq!(ABR_SWITCH_MAP[nearest_abr_index(8)].kbps, 8);
        assert_eq!(ABR_SWITCH_MAP[nearest_abr_index(400)].kbps, 320);
    }

    #[test]
    fn test_abr_short_mask_offset() {
        let t = abr_tuning(192);
        assert_eq!(t.mask_adjust, -4.0);
        assert!((t.mask_adjust_short - (-4.4)).abs() < 1e-5);
        assert!(!t.scalefac_scale_shaping);
        assert!(abr_tuning(128).scalefac_scale_shaping);
        assert_eq!(abr_tuning(320).exp_nspsytune, 2);
    }

    #[test]
    fn test_preset_names() {
        assert_eq!("standard".parse::<Preset>(), Ok(Preset::Standard));
        assert_eq!("V3".parse::<Preset>(), Ok(Preset::V(3)));
        assert_eq!("160".parse::<Preset>(), Ok(Preset::Abr(160)));
        assert!("v12".parse::<Preset>().is_err());
        assert!("loud".parse::<Preset>().is_err());
        assert_eq!(Preset::Insane.target(), Ok(PresetTarget::Cbr(320)));
        assert_eq!(
            Preset::Extreme.target(),
            Ok(PresetTarget::Vbr { flavour: VbrFlavour::Old, quality: 0 })
        );
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
        fn property_lerp_stays_between_rows(q in 0u8..10, frac in 0.0f32..1.0) {
            let a = usize::from(q);
            let t = vbr_tuning(VbrFlavour::Old, q, frac);
            let lo = VBR_OLD_SWITCH_MAP[a].masking_adj.min(VBR_OLD_SWITCH_MAP[a + 1].masking_adj);
            let hi = VBR_OLD_SWITCH_MAP[a].masking_adj.max(VBR_OLD_SWITCH_MAP[a + 1].masking_adj);
            prop_assert!(t.mask_adjust >= lo - 1e-5 && t.mask_adjust <= hi + 1e-5);
        }
    }

    #[test]
    fn test_bandwidth_follows_nearest_bitrate() {
        assert_eq!(optimum_bandwidth(128), 17000);
        assert_eq!(optimum_bandwidth(32), 5500);
        // 36 sits halfway between 32 and 40
        assert_eq!(optimum_bandwidth(36), 7000);
        assert_eq!(optimum_bandwidth(33), 5500);
        assert_eq!(optimum_bandwidth(400), 20500);
        assert_eq!(optimum_bandwidth(1), 2000);
    }

    #[test]
    fn test_vbr_lowpass_blends_levels() {
        assert_eq!(vbr_lowpass(0, 0.0), 19500.0);
        assert_eq!(vbr_lowpass(4, 0.0), 17500.0);
        assert!((vbr_lowpass(4, 0.5) - 16750.0).abs() < 1e-3);
        assert_eq!(vbr_lowpass(9, 0.0), 10000.0);
    }

    #[test]
    fn test_subband_lowpass_cuts_above_cutoff() {
        // 8250 Hz at 44.1 kHz stops at subband 12
        let gains = subband_lowpass(8250.0, 44100);
        assert!(gains[..12].iter().all(|&g| g == 1.0));
        assert!(gains[12..].iter().all(|&g| g == 0.0));

        let open = subband_lowpass(22050.0, 44100);
        assert!(open.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn test_subband_lowpass_is_monotone() {
        let gains = subband_lowpass(13000.0, 32000);
        for pair in gains.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert_eq!(gains[31], 0.0);
    }
}
