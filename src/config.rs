//! Configuration management for the Layer III encoder
//!
//! [`EncoderConfig`] is what a caller fills in. [`EncoderConfig::resolve`]
//! validates it and derives the immutable [`SessionConfig`] the encoder
//! runs with: frame layout, bitrate indices, iteration strategy,
//! quality switches and the preset-derived psychoacoustic tuning.

use crate::ath::AthConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::iteration::IterationStrategy;
use crate::presets::{
    abr_tuning, optimum_bandwidth, subband_lowpass, vbr_lowpass, vbr_tuning, Preset, PresetTarget, PsyTuning,
    VbrFlavour,
};
use crate::tables::{bitrate_index, frame_bits, sample_rate_lookup, scalefac_bands, BITRATE_TABLE};
use crate::types::{ScalefacBands, GRANULE_SIZE, SBLIMIT, SBMAX_L};

/// Output sample rates the encoder accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 9] = [
    44100, 48000, 32000, // MPEG-1
    22050, 24000, 16000, // MPEG-2
    11025, 12000, 8000, // MPEG-2.5
];

/// Every bitrate of the MPEG-1 and MPEG-2 tables, in kbps
pub const SUPPORTED_BITRATES: [u32; 18] = [
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 192, 224, 256, 320,
];

/// Stereo encoding modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub enum StereoMode {
    /// Standard stereo
    Stereo,
    /// Joint stereo (per granule mid/side decision)
    JointStereo,
    /// Dual channel (independent channels)
    DualChannel,
    /// Mono
    Mono,
}

impl StereoMode {
    /// Two-bit mode field of the frame header
    pub fn header_bits(self) -> u32 {
        match self {
            StereoMode::Stereo => 0,
            StereoMode::JointStereo => 1,
            StereoMode::DualChannel => 2,
            StereoMode::Mono => 3,
        }
    }
}

/// Pre-emphasis modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    /// No emphasis
    None,
    /// 50/15 microseconds emphasis
    Emphasis50_15,
    /// CCITT J.17 emphasis
    CcittJ17,
}

impl Emphasis {
    pub fn header_bits(self) -> u32 {
        match self {
            Emphasis::None => 0,
            Emphasis::Emphasis50_15 => 1,
            Emphasis::CcittJ17 => 3,
        }
    }
}

/// MPEG version enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub enum MpegVersion {
    /// MPEG-1
    Mpeg1,
    /// MPEG-2
    Mpeg2,
    /// MPEG-2.5
    Mpeg25,
}

impl MpegVersion {
    /// Row of the bitrate and sample-rate tables
    pub fn table_index(self) -> usize {
        match self {
            MpegVersion::Mpeg2 => 0,
            MpegVersion::Mpeg1 => 1,
            MpegVersion::Mpeg25 => 2,
        }
    }

    fn from_table_index(index: usize) -> Self {
        match index {
            1 => MpegVersion::Mpeg1,
            0 => MpegVersion::Mpeg2,
            _ => MpegVersion::Mpeg25,
        }
    }
}

/// Rate control requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub enum VbrMode {
    /// Constant bitrate
    Off,
    /// Average bitrate around `bitrate`
    Abr,
    /// Bit-budget binary search per granule
    Rh,
    /// Direct per-band step search
    Mtrh,
}

/// Switches derived from the quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub struct QualitySettings {
    /// 0 = no noise shaping, 1 = scalefactors, 2 = also `scalefac_scale`
    /// and subblock gain on overflow
    pub noise_shaping: u8,
    /// Band selection in `amp_scalefac_bands`; 3 is the two pass refine
    pub noise_shaping_amp: u8,
    pub noise_shaping_stop: u8,
    pub subblock_gain: bool,
    /// 1 = search region splits of every accepted granule
    pub use_best_huffman: u8,
    /// Bit 0 truncates small lines, bit 1 pseudo-half steps, bit 2 allows
    /// truncation in short blocks
    pub substep_shaping: u8,
    pub full_outer_loop: bool,
    /// `quant_compare` mode for long blocks
    pub quant_comp: u8,
    /// `quant_compare` mode for short blocks
    pub quant_comp_short: u8,
}

impl QualitySettings {
    /// Switches for quality `0..=9`, with the comparison modes every
    /// preset row uses
    pub fn from_quality(quality: u8) -> Self {
        let off = QualitySettings {
            noise_shaping: 0,
            noise_shaping_amp: 0,
            noise_shaping_stop: 0,
            subblock_gain: false,
            use_best_huffman: 0,
            substep_shaping: 0,
            full_outer_loop: false,
            quant_comp: 9,
            quant_comp_short: 9,
        };
        let shaped = QualitySettings { noise_shaping: 1, subblock_gain: true, ..off };
        match quality {
            7..=9 => off,
            5 | 6 => shaped,
            4 => QualitySettings { use_best_huffman: 1, ..shaped },
            3 => QualitySettings {
                noise_shaping_amp: 1,
                noise_shaping_stop: 1,
                use_best_huffman: 1,
                ..shaped
            },
            2 => QualitySettings {
                noise_shaping_amp: 1,
                noise_shaping_stop: 1,
                use_best_huffman: 1,
                substep_shaping: 2,
                ..shaped
            },
            _ => QualitySettings {
                noise_shaping_amp: 2,
                noise_shaping_stop: 1,
                use_best_huffman: 1,
                substep_shaping: 2,
                ..shaped
            },
        }
    }
}

/// Encoder configuration, filled in with chained setters
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub mode: StereoMode,
    /// CBR bitrate, or the mean bitrate for ABR, in kbps
    pub bitrate: u32,
    pub vbr: VbrMode,
    /// VBR quality 0 (best) ..= 9, fractional part blends presets
    pub vbr_quality: f32,
    /// Encoder quality 0 (best, slowest) ..= 9
    pub quality: u8,
    pub copyright: bool,
    pub original: bool,
    /// Protect header and side info with CRC-16
    pub error_protection: bool,
    pub emphasis: Emphasis,
    pub disable_reservoir: bool,
    /// Cap the reservoir at the 320 kbps frame size
    pub strict_iso: bool,
    pub preset: Option<Preset>,
    pub quant_comp: Option<u8>,
    pub quant_comp_short: Option<u8>,
    pub noise_shaping_amp: Option<u8>,
    pub exp_nspsytune: Option<i32>,
    pub ath_type: Option<u8>,
    pub ath_curve: Option<f32>,
    pub use_temporal: Option<bool>,
    /// Lowpass in Hz; `Some(0)` keeps the full band
    pub lowpass: Option<u32>,
    /// Smallest bitrate VBR and ABR frames may use
    pub vbr_min_bitrate: Option<u32>,
    /// Apply the minimum to silent frames too
    pub vbr_hard_min: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new(44100, 2)
    }
}

impl EncoderConfig {
    /// Joint stereo (mono for one channel) 128 kbps CBR at quality 5
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            mode: if channels == 1 { StereoMode::Mono } else { StereoMode::JointStereo },
            bitrate: 128,
            vbr: VbrMode::Off,
            vbr_quality: 4.0,
            quality: 5,
            copyright: false,
            original: true,
            error_protection: false,
            emphasis: Emphasis::None,
            disable_reservoir: false,
            strict_iso: false,
            preset: None,
            quant_comp: None,
            quant_comp_short: None,
            noise_shaping_amp: None,
            exp_nspsytune: None,
            ath_type: None,
            ath_curve: None,
            use_temporal: None,
            lowpass: None,
            vbr_min_bitrate: None,
            vbr_hard_min: false,
        }
    }

    pub fn stereo_mode(mut self, mode: StereoMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn bitrate(mut self, kbps: u32) -> Self {
        self.bitrate = kbps;
        self
    }

    pub fn vbr(mut self, mode: VbrMode) -> Self {
        self.vbr = mode;
        self
    }

    pub fn vbr_quality(mut self, quality: f32) -> Self {
        self.vbr_quality = quality;
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn copyright(mut self, copyright: bool) -> Self {
        self.copyright = copyright;
        self
    }

    pub fn original(mut self, original: bool) -> Self {
        self.original = original;
        self
    }

    pub fn error_protection(mut self, crc: bool) -> Self {
        self.error_protection = crc;
        self
    }

    pub fn emphasis(mut self, emphasis: Emphasis) -> Self {
        self.emphasis = emphasis;
        self
    }

    pub fn disable_reservoir(mut self, disable: bool) -> Self {
        self.disable_reservoir = disable;
        self
    }

    pub fn strict_iso(mut self, strict: bool) -> Self {
        self.strict_iso = strict;
        self
    }

    pub fn preset(mut self, preset: Preset) -> Self {
        self.preset = Some(preset);
        self
    }

    pub fn quant_comp(mut self, long: u8, short: u8) -> Self {
        self.quant_comp = Some(long);
        self.quant_comp_short = Some(short);
        self
    }

    pub fn noise_shaping_amp(mut self, amp: u8) -> Self {
        self.noise_shaping_amp = Some(amp);
        self
    }

    pub fn exp_nspsytune(mut self, bits: i32) -> Self {
        self.exp_nspsytune = Some(bits);
        self
    }

    pub fn ath(mut self, ath_type: u8, curve: f32) -> Self {
        self.ath_type = Some(ath_type);
        self.ath_curve = Some(curve);
        self
    }

    pub fn use_temporal(mut self, on: bool) -> Self {
        self.use_temporal = Some(on);
        self
    }

    pub fn lowpass(mut self, hz: u32) -> Self {
        self.lowpass = Some(hz);
        self
    }

    /// Lower bound for VBR/ABR frames; `hard` keeps it for silence too
    pub fn vbr_min_bitrate(mut self, kbps: u32, hard: bool) -> Self {
        self.vbr_min_bitrate = Some(kbps);
        self.vbr_hard_min = hard;
        self
    }

    /// Get the MPEG version based on sample rate
    pub fn mpeg_version(&self) -> Option<MpegVersion> {
        sample_rate_lookup(self.sample_rate).map(|(v, _)| MpegVersion::from_table_index(v))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let version = self
            .mpeg_version()
            .ok_or(ConfigError::UnsupportedSampleRate(self.sample_rate))?;
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::InvalidChannels(self.channels));
        }
        match (self.channels, self.mode) {
            (1, StereoMode::Mono) => {}
            (2, StereoMode::Stereo | StereoMode::JointStereo | StereoMode::DualChannel) => {}
            (channels, mode) => {
                return Err(ConfigError::InvalidStereoMode { mode: format!("{:?}", mode), channels })
            }
        }
        if self.quality > 9 {
            return Err(ConfigError::InvalidQuality(self.quality));
        }
        if !(0.0..10.0).contains(&self.vbr_quality) {
            return Err(ConfigError::InvalidVbrQuality(self.vbr_quality));
        }
        if let Some(preset) = self.preset {
            preset.target()?;
            return Ok(());
        }

        match self.vbr {
            VbrMode::Off => self.validate_cbr_bitrate(version, self.bitrate),
            VbrMode::Abr => {
                if (8..=320).contains(&self.bitrate) {
                    Ok(())
                } else {
                    Err(ConfigError::UnsupportedBitrate(self.bitrate))
                }
            }
            VbrMode::Rh | VbrMode::Mtrh => Ok(()),
        }
    }

    fn validate_cbr_bitrate(&self, version: MpegVersion, kbps: u32) -> ConfigResult<()> {
        if !SUPPORTED_BITRATES.contains(&kbps) {
            return Err(ConfigError::UnsupportedBitrate(kbps));
        }
        if bitrate_index(version.table_index(), kbps).is_none() {
            return Err(ConfigError::IncompatibleRateCombination {
                sample_rate: self.sample_rate,
                bitrate: kbps,
            });
        }
        Ok(())
    }

    /// Validate and derive the settings the encoder runs with
    pub fn resolve(&self) -> ConfigResult<SessionConfig> {
        self.validate()?;
        let (version_index, samplerate_index) = sample_rate_lookup(self.sample_rate)
            .ok_or(ConfigError::UnsupportedSampleRate(self.sample_rate))?;
        let version = MpegVersion::from_table_index(version_index);
        let channels = usize::from(self.channels);
        let mode_gr = if version == MpegVersion::Mpeg1 { 2 } else { 1 };

        let (vbr, vbr_q, vbr_frac, kbps) = match self.preset.map(Preset::target).transpose()? {
            Some(PresetTarget::Vbr { flavour, quality }) => {
                let mode = match flavour {
                    VbrFlavour::Old => VbrMode::Rh,
                    VbrFlavour::Psy => VbrMode::Mtrh,
                };
                (mode, quality, 0.0, self.bitrate)
            }
            Some(PresetTarget::Abr(kbps)) => (VbrMode::Abr, 0, 0.0, kbps),
            Some(PresetTarget::Cbr(kbps)) => (VbrMode::Off, 0, 0.0, kbps),
            None => {
                let q = self.vbr_quality.floor();
                (self.vbr, q as u8, self.vbr_quality - q, self.bitrate)
            }
        };
        if vbr == VbrMode::Off {
            self.validate_cbr_bitrate(version, kbps)?;
        }

        let mut quality = self.quality;
        let (strategy, tuning, mut sfb21_extra, default_temporal) = match vbr {
            VbrMode::Off => (IterationStrategy::Cbr, abr_tuning(kbps), false, true),
            VbrMode::Abr => (IterationStrategy::Abr, abr_tuning(kbps), false, true),
            VbrMode::Rh => {
                quality = quality.min(6);
                let t = vbr_tuning(VbrFlavour::Old, vbr_q, vbr_frac);
                (IterationStrategy::VbrOld, t, self.sample_rate > 44000, true)
            }
            VbrMode::Mtrh => {
                quality = if quality < 5 { 0 } else { 5 };
                let t = vbr_tuning(VbrFlavour::Psy, vbr_q, vbr_frac);
                (IterationStrategy::VbrNew, t, self.sample_rate > 44000, false)
            }
        };
        if tuning.no_sfb21_extra {
            sfb21_extra = false;
        }

        let mut qs = QualitySettings::from_quality(quality);
        if tuning.scalefac_scale_shaping {
            qs.noise_shaping = 2;
        }
        qs.quant_comp = self.quant_comp.unwrap_or(tuning.quant_comp);
        qs.quant_comp_short = self.quant_comp_short.unwrap_or(tuning.quant_comp_short);
        if let Some(amp) = self.noise_shaping_amp {
            qs.noise_shaping_amp = amp;
        }

        let exp_nspsytune = self.exp_nspsytune.unwrap_or(tuning.exp_nspsytune) | 1;
        let ath = AthConfig {
            ath_type: self.ath_type.unwrap_or(4),
            ath_curve: self.ath_curve.unwrap_or(tuning.ath_curve),
            ath_lower_db: tuning.ath_lower_db,
            no_ath: false,
            aa_type: 3,
            aa_sensitivity_db: tuning.ath_sensitivity_db,
        };

        let table = version.table_index();
        let (bitrate_index, vbr_min_index, vbr_max_index, mean_kbps) = match vbr {
            VbrMode::Off => {
                let idx = bitrate_index(table, kbps).ok_or(ConfigError::IncompatibleRateCombination {
                    sample_rate: self.sample_rate,
                    bitrate: kbps,
                })?;
                (idx, idx, idx, kbps)
            }
            _ => {
                let max = if self.sample_rate < 16000 { 8 } else { 14 };
                let min = match self.vbr_min_bitrate {
                    Some(min_kbps) => bitrate_index(table, min_kbps)
                        .ok_or(ConfigError::IncompatibleRateCombination {
                            sample_rate: self.sample_rate,
                            bitrate: min_kbps,
                        })?
                        .min(max),
                    None => 1,
                };
                let mean = kbps.clamp(BITRATE_TABLE[table][min], BITRATE_TABLE[table][max]);
                (max, min, max, mean)
            }
        };

        let nyquist = self.sample_rate as f32 / 2.0;
        let lowpass_hz = match self.lowpass {
            Some(0) => nyquist,
            Some(hz) => (hz as f32).min(nyquist),
            None => {
                let hz = match vbr {
                    VbrMode::Off => optimum_bandwidth(kbps) as f32,
                    VbrMode::Abr => optimum_bandwidth(mean_kbps) as f32,
                    VbrMode::Rh | VbrMode::Mtrh => vbr_lowpass(vbr_q, vbr_frac),
                };
                let hz = if channels == 1 && matches!(vbr, VbrMode::Off | VbrMode::Abr) { hz * 1.5 } else { hz };
                hz.min(20500.0).min(nyquist)
            }
        };
        let bands = scalefac_bands(samplerate_index, table, self.sample_rate);
        // nothing is left to code above the cutoff
        let sfb21_start = bands.l[SBMAX_L - 1] as f32 * nyquist / GRANULE_SIZE as f32;
        if lowpass_hz < sfb21_start {
            sfb21_extra = false;
        }

        let compression_ratio = match vbr {
            VbrMode::Rh | VbrMode::Mtrh => {
                const CMP: [f32; 10] = [5.7, 6.5, 7.3, 8.2, 10.0, 11.9, 13.0, 14.0, 15.0, 16.5];
                CMP[usize::from(vbr_q.min(9))]
            }
            _ => (self.sample_rate * 16 * channels as u32) as f32 / (1e3 * mean_kbps as f32),
        };

        let mut sideinfo_len = if version == MpegVersion::Mpeg1 {
            if channels == 1 { 4 + 17 } else { 4 + 32 }
        } else if channels == 1 {
            4 + 9
        } else {
            4 + 17
        };
        if self.error_protection {
            sideinfo_len += 2;
        }

        let session = SessionConfig {
            sample_rate: self.sample_rate,
            channels,
            mode: self.mode,
            version,
            samplerate_index,
            mode_gr,
            framesize: GRANULE_SIZE * mode_gr,
            sideinfo_len,
            bands,
            bitrate_index,
            vbr_min_index,
            vbr_max_index,
            vbr_hard_min: self.vbr_hard_min,
            mean_bitrate_kbps: mean_kbps,
            vbr,
            strategy,
            compression_ratio,
            quality: qs,
            tuning,
            ath,
            exp_nspsytune,
            sfb21_extra,
            lowpass_hz,
            amp_filter: subband_lowpass(lowpass_hz, self.sample_rate),
            use_temporal: self.use_temporal.unwrap_or(default_temporal),
            copyright: self.copyright,
            original: self.original,
            error_protection: self.error_protection,
            emphasis: self.emphasis,
            disable_reservoir: self.disable_reservoir,
            strict_iso: self.strict_iso,
        };
        log::info!(
            "{:?} {:?} {} Hz, {} ch, strategy {:?}, bitrate index {} ({}..={}), quality {}, lowpass {} Hz",
            session.version,
            session.mode,
            session.sample_rate,
            session.channels,
            session.strategy,
            session.bitrate_index,
            session.vbr_min_index,
            session.vbr_max_index,
            quality,
            session.lowpass_hz
        );
        Ok(session)
    }
}

/// Settings an encoder session runs with, derived once by
/// [`EncoderConfig::resolve`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub mode: StereoMode,
    pub version: MpegVersion,
    pub samplerate_index: usize,
    /// Granules per frame
    pub mode_gr: usize,
    /// Samples per channel per frame
    pub framesize: usize,
    /// Header plus side information, in bytes
    pub sideinfo_len: usize,
    pub bands: ScalefacBands,
    /// CBR index, or the largest index VBR/ABR may use
    pub bitrate_index: usize,
    pub vbr_min_index: usize,
    pub vbr_max_index: usize,
    /// Silent VBR frames keep `vbr_min_index` instead of the smallest frame
    pub vbr_hard_min: bool,
    pub mean_bitrate_kbps: u32,
    pub vbr: VbrMode,
    pub strategy: IterationStrategy,
    pub compression_ratio: f32,
    pub quality: QualitySettings,
    pub tuning: PsyTuning,
    pub ath: AthConfig,
    pub exp_nspsytune: i32,
    pub sfb21_extra: bool,
    /// Upper edge of the coded band
    pub lowpass_hz: f32,
    /// Gain applied to each polyphase subband before the MDCT
    pub amp_filter: [f32; SBLIMIT],
    pub use_temporal: bool,
    pub copyright: bool,
    pub original: bool,
    pub error_protection: bool,
    pub emphasis: Emphasis,
    pub disable_reservoir: bool,
    pub strict_iso: bool,
}

impl SessionConfig {
    /// Bitrate in kbps of table index `index`
    pub fn bitrate_kbps(&self, index: usize) -> u32 {
        BITRATE_TABLE[self.version.table_index()][index]
    }

    pub fn is_vbr(&self) -> bool {
        matches!(self.vbr, VbrMode::Rh | VbrMode::Mtrh)
    }

    /// Length in bits of a frame at bitrate index `index`
    pub fn frame_bits(&self, index: usize, padding: bool) -> i32 {
        let version = self.version.table_index();
        frame_bits(version, BITRATE_TABLE[version][index], self.sample_rate) + 8 * i32::from(padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        fn valid_sample_rate()(rate in prop::sample::select(SUPPORTED_SAMPLE_RATES.to_vec())) -> u32 {
            rate
        }
    }

    prop_compose! {
        fn invalid_sample_rate()(rate in prop::num::u32::ANY.prop_filter("Must be invalid", |rate| {
            !SUPPORTED_SAMPLE_RATES.contains(rate)
        })) -> u32 {
            rate
        }
    }

    fn compatible_config() -> impl Strategy<Value = EncoderConfig> {
        (valid_sample_rate(), 1u8..=2, 0u8..=9).prop_flat_map(|(sample_rate, channels, quality)| {
            let bitrates = match sample_rate {
                44100 | 48000 | 32000 => BITRATE_TABLE[1][1..].to_vec(),
                _ => BITRATE_TABLE[0][1..].to_vec(),
            };
            let modes = if channels == 1 {
                vec![StereoMode::Mono]
            } else {
                vec![StereoMode::Stereo, StereoMode::JointStereo, StereoMode::DualChannel]
            };
            (prop::sample::select(bitrates), prop::sample::select(modes)).prop_map(move |(bitrate, mode)| {
                EncoderConfig::new(sample_rate, channels)
                    .stereo_mode(mode)
                    .bitrate(bitrate)
                    .quality(quality)
            })
        })
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
        fn property_compatible_configs_resolve(config in compatible_config()) {
            let session = config.resolve();
            prop_assert!(session.is_ok(), "{:?}", session.err());
            let session = session.unwrap();
            let expected_gr = if config.sample_rate >= 32000 { 2 } else { 1 };
            prop_assert_eq!(session.mode_gr, expected_gr);
            prop_assert_eq!(session.framesize, 576 * expected_gr);
            prop_assert_eq!(session.bitrate_kbps(session.bitrate_index), config.bitrate);
            prop_assert_eq!(session.strategy, IterationStrategy::Cbr);
            prop_assert!(!session.sfb21_extra);
        }

        #[test]
        fn property_invalid_sample_rate_rejected(rate in invalid_sample_rate()) {
            let result = EncoderConfig::new(rate, 2).validate();
            prop_assert_eq!(result, Err(ConfigError::UnsupportedSampleRate(rate)));
        }
    }

    #[test]
    fn test_default_is_valid() {
        let config = EncoderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, StereoMode::JointStereo);
        assert_eq!(config.bitrate, 128);
        assert_eq!(EncoderConfig::new(8000, 1).mode, StereoMode::Mono);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            EncoderConfig::new(8000, 1).bitrate(320).validate(),
            Err(ConfigError::IncompatibleRateCombination { sample_rate: 8000, bitrate: 320 })
        );
        assert_eq!(EncoderConfig::new(44100, 2).bitrate(100).validate(), Err(ConfigError::UnsupportedBitrate(100)));
        assert_eq!(EncoderConfig::new(44100, 3).validate(), Err(ConfigError::InvalidChannels(3)));
        assert!(matches!(
            EncoderConfig::new(44100, 1).stereo_mode(StereoMode::Stereo).validate(),
            Err(ConfigError::InvalidStereoMode { channels: 1, .. })
        ));
        assert_eq!(EncoderConfig::default().quality(10).validate(), Err(ConfigError::InvalidQuality(10)));
        assert_eq!(
            EncoderConfig::default().vbr(VbrMode::Rh).vbr_quality(10.0).validate(),
            Err(ConfigError::InvalidVbrQuality(10.0))
        );
        assert_eq!(
            EncoderConfig::default().preset(Preset::V(11)).validate(),
            Err(ConfigError::UnknownPreset("V11".into()))
        );
    }

    #[test]
    fn test_quality_table() {
        let q9 = QualitySettings::from_quality(9);
        assert_eq!(q9.noise_shaping, 0);
        assert_eq!(QualitySettings::from_quality(8), QualitySettings::from_quality(7));
        let q5 = QualitySettings::from_quality(5);
        assert_eq!((q5.noise_shaping, q5.noise_shaping_amp, q5.use_best_huffman), (1, 0, 0));
        assert!(q5.subblock_gain);
        assert_eq!(QualitySettings::from_quality(4).use_best_huffman, 1);
        let q2 = QualitySettings::from_quality(2);
        assert_eq!((q2.noise_shaping_amp, q2.noise_shaping_stop, q2.substep_shaping), (1, 1, 2));
        let q0 = QualitySettings::from_quality(0);
        assert_eq!(q0.noise_shaping_amp, 2);
        assert_eq!(q0, QualitySettings::from_quality(1));
        assert!(!q0.full_outer_loop);
    }

    #[test]
    fn test_vbr_strategies_clamp_quality() {
        let rh = EncoderConfig::default().vbr(VbrMode::Rh).quality(9).resolve().unwrap();
        assert_eq!(rh.strategy, IterationStrategy::VbrOld);
        assert_eq!(rh.quality, QualitySettings { quant_comp: 9, quant_comp_short: 9, ..QualitySettings::from_quality(6) });
        assert_eq!((rh.vbr_min_index, rh.vbr_max_index), (1, 14));
        assert!(rh.use_temporal);

        let mtrh = EncoderConfig::new(48000, 2).vbr(VbrMode::Mtrh).quality(3).resolve().unwrap();
        assert_eq!(mtrh.strategy, IterationStrategy::VbrNew);
        assert_eq!(mtrh.quality.noise_shaping_amp, QualitySettings::from_quality(0).noise_shaping_amp);
        assert!(!mtrh.use_temporal);
        // V4 turns the sfb21 extra band off
        assert!(!mtrh.sfb21_extra);
        let v0 = EncoderConfig::new(48000, 2).preset(Preset::V(0)).resolve().unwrap();
        assert!(v0.sfb21_extra);

        let low = EncoderConfig::new(11025, 1).vbr(VbrMode::Rh).resolve().unwrap();
        assert_eq!(low.vbr_max_index, 8);
    }

    #[test]
    fn test_cbr_uses_abr_row() {
        let s = EncoderConfig::default().bitrate(128).resolve().unwrap();
        assert_eq!(s.tuning.mask_adjust, 0.0);
        assert!((s.tuning.scale - 0.95).abs() < 1e-6);
        assert_eq!(s.quality.noise_shaping, 2);
        assert_eq!(s.ath.ath_lower_db, 3.0);
        assert_eq!(s.exp_nspsytune & 1, 1);
        assert_eq!(s.sideinfo_len, 36);
        let crc = EncoderConfig::new(8000, 1).bitrate(32).error_protection(true).resolve().unwrap();
        assert_eq!(crc.sideinfo_len, 4 + 9 + 2);
    }

    #[test]
    fn test_overrides_win() {
        let s = EncoderConfig::default().quant_comp(1, 0).noise_shaping_amp(3).ath(2, 7.0).resolve().unwrap();
        assert_eq!((s.quality.quant_comp, s.quality.quant_comp_short), (1, 0));
        assert_eq!(s.quality.noise_shaping_amp, 3);
        assert_eq!((s.ath.ath_type, s.ath.ath_curve), (2, 7.0));
    }

    #[test]
    fn test_insane_preset_is_320_cbr() {
        let s = EncoderConfig::default().preset(Preset::Insane).resolve().unwrap();
        assert_eq!(s.strategy, IterationStrategy::Cbr);
        assert_eq!(s.bitrate_kbps(s.bitrate_index), 320);
        let abr = EncoderConfig::default().preset(Preset::Abr(150)).resolve().unwrap();
        assert_eq!(abr.strategy, IterationStrategy::Abr);
        assert_eq!(abr.mean_bitrate_kbps, 150);
    }

    #[test]
    fn test_lowpass_follows_bitrate_and_quality() {
        let mono = EncoderConfig::new(44100, 1).bitrate(32).resolve().unwrap();
        assert_eq!(mono.lowpass_hz, 8250.0);
        assert!(mono.amp_filter[..12].iter().all(|&g| g == 1.0));
        assert!(mono.amp_filter[12..].iter().all(|&g| g == 0.0));

        let stereo = EncoderConfig::new(44100, 2).bitrate(128).resolve().unwrap();
        assert_eq!(stereo.lowpass_hz, 17000.0);
        let abr = EncoderConfig::new(44100, 2).vbr(VbrMode::Abr).bitrate(150).resolve().unwrap();
        assert_eq!(abr.lowpass_hz, 17500.0);
        let vbr = EncoderConfig::new(44100, 1).vbr(VbrMode::Mtrh).vbr_quality(4.0).resolve().unwrap();
        assert_eq!(vbr.lowpass_hz, 17500.0);

        // capped at 20.5 kHz and at the Nyquist frequency
        let wide = EncoderConfig::new(48000, 1).bitrate(320).resolve().unwrap();
        assert_eq!(wide.lowpass_hz, 20500.0);
        let narrow = EncoderConfig::new(16000, 1).bitrate(160).resolve().unwrap();
        assert_eq!(narrow.lowpass_hz, 8000.0);
        assert!(narrow.amp_filter.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn test_lowpass_override_and_sfb21_cutoff() {
        let full = EncoderConfig::new(44100, 1).bitrate(32).lowpass(0).resolve().unwrap();
        assert_eq!(full.lowpass_hz, 22050.0);
        assert!(full.amp_filter.iter().all(|&g| g == 1.0));

        let rh = EncoderConfig::new(48000, 2).vbr(VbrMode::Rh).vbr_quality(0.0);
        assert!(rh.clone().resolve().unwrap().sfb21_extra);
        // band 21 starts at 16 kHz, a 12 kHz lowpass leaves it empty
        let cut = rh.lowpass(12000).resolve().unwrap();
        assert_eq!(cut.lowpass_hz, 12000.0);
        assert!(!cut.sfb21_extra);
    }

    #[test]
    fn test_vbr_minimum_bitrate() {
        let s = EncoderConfig::new(44100, 2).vbr(VbrMode::Rh).vbr_min_bitrate(64, true).resolve().unwrap();
        assert_eq!(s.bitrate_kbps(s.vbr_min_index), 64);
        assert!(s.vbr_hard_min);
        let soft = EncoderConfig::new(44100, 2).vbr(VbrMode::Mtrh).resolve().unwrap();
        assert_eq!(soft.vbr_min_index, 1);
        assert!(!soft.vbr_hard_min);
        // 8 kbps exists only for the lower sample rates
        assert!(matches!(
            EncoderConfig::new(44100, 2).vbr(VbrMode::Rh).vbr_min_bitrate(8, false).resolve(),
            Err(ConfigError::IncompatibleRateCombination { bitrate: 8, .. })
        ));
    }
}
