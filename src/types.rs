//! Core data types of the Layer III encoder
//!
//! The granule record ([`GranuleInfo`]) is the unit every stage of the
//! quantization loop reads and writes. The other types here carry the
//! psychoacoustic model output, the noise measurement of a trial
//! quantization and the per-frame side information.

/// Spectral lines per granule and channel
pub const GRANULE_SIZE: usize = 576;
/// Polyphase filterbank subbands
pub const SBLIMIT: usize = 32;
/// Analysis window length of the polyphase filterbank
pub const HAN_SIZE: usize = 512;
pub const MAX_CHANNELS: usize = 2;
pub const MAX_GRANULES: usize = 2;

/// Long-block scalefactor bands, including the unencoded band 21
pub const SBMAX_L: usize = 22;
/// Short-block scalefactor bands per window, including band 12
pub const SBMAX_S: usize = 13;
/// Long bands carrying a transmitted scalefactor
pub const SBPSY_L: usize = 21;
/// Short bands carrying a transmitted scalefactor
pub const SBPSY_S: usize = 12;
/// Pseudo bands splitting long band 21 for the ATH cut
pub const PSFB21: usize = 6;
/// Pseudo bands splitting short band 12 for the ATH cut
pub const PSFB12: usize = 6;
/// Maximum number of (band, window) slots in a granule
pub const SFBMAX: usize = SBMAX_S * 3;

/// Bit count signalling "not encodable"
pub const LARGE_BITS: i32 = 100_000;
/// Largest quantized magnitude a Huffman ESC table can carry
pub const IXMAX_VAL: i32 = 8206;
/// Hard cap on bits for one channel of one granule (12-bit field)
pub const MAX_BITS_PER_CHANNEL: i32 = 4095;
/// Hard cap on bits for one granule across channels
pub const MAX_BITS_PER_GRANULE: i32 = 7680;

/// Number of IPOW20 entries; valid global gains are `0..Q_MAX`
pub const Q_MAX: usize = 256 + 1;
/// Offset of POW20 for negative (amplifying) steps
pub const Q_MAX2: usize = 116;

/// MDCT window shape of a granule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub enum BlockType {
    #[default]
    Norm = 0,
    Start = 1,
    Short = 2,
    Stop = 3,
}

impl BlockType {
    /// Two-bit value written to the side information
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Scalefactor band boundaries for one output sample rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalefacBands {
    /// Long block band starts, `l[SBMAX_L]` is 576
    pub l: [usize; SBMAX_L + 1],
    /// Short block band starts (per window), `s[SBMAX_S]` is 192
    pub s: [usize; SBMAX_S + 1],
    /// Pseudo band starts inside long band 21
    pub psfb21: [usize; PSFB21 + 1],
    /// Pseudo band starts inside short band 12
    pub psfb12: [usize; PSFB12 + 1],
}

impl ScalefacBands {
    /// Build the band layout from the raw long/short boundary tables
    pub fn new(l: [usize; SBMAX_L + 1], s: [usize; SBMAX_S + 1]) -> Self {
        let mut psfb21 = [0; PSFB21 + 1];
        let size = (l[22] - l[21]) / PSFB21;
        for (i, start) in psfb21.iter_mut().enumerate() {
            *start = l[21] + i * size;
        }
        psfb21[PSFB21] = GRANULE_SIZE;

        let mut psfb12 = [0; PSFB12 + 1];
        let size = (s[13] - s[12]) / PSFB12;
        for (i, start) in psfb12.iter_mut().enumerate() {
            *start = s[12] + i * size;
        }
        psfb12[PSFB12] = GRANULE_SIZE / 3;

        Self { l, s, psfb21, psfb12 }
    }
}

/// Per-band energies or thresholds produced by the psychoacoustic model
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandValues {
    pub l: [f32; SBMAX_L],
    pub s: [[f32; 3]; SBMAX_S],
}

/// Masking information for one granule and channel
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PsyRatio {
    /// Signal energy per band
    pub en: BandValues,
    /// Masking threshold per band
    pub thm: BandValues,
}

/// Granule record: one channel's quantized representation of one granule
#[derive(Debug, Clone)]
pub struct GranuleInfo {
    /// MDCT coefficients, short blocks reordered window-interleaved per band
    pub xr: [f32; GRANULE_SIZE],
    /// Quantized magnitudes
    pub l3_enc: [i32; GRANULE_SIZE],
    /// Scalefactor per (band, window) slot; `-1` marks SCFSI reuse
    pub scalefac: [i32; SFBMAX],
    /// Largest `xrpow` value, for the ESC range check
    pub xrpow_max: f32,

    pub part2_3_length: i32,
    pub big_values: usize,
    pub count1: usize,
    pub global_gain: i32,
    pub scalefac_compress: i32,
    pub block_type: BlockType,
    pub mixed_block_flag: bool,
    pub table_select: [usize; 3],
    /// Window gains in units of 8 global gain steps; index 3 unused
    pub subblock_gain: [i32; 4],
    pub region0_count: usize,
    pub region1_count: usize,
    pub preflag: bool,
    pub scalefac_scale: i32,
    pub count1table_select: usize,

    pub part2_length: i32,
    pub sfb_lmax: usize,
    pub sfb_smin: usize,
    pub psy_lmax: usize,
    pub sfbmax: usize,
    pub psymax: usize,
    pub sfbdivide: usize,
    /// Width of each (band, window) slot
    pub width: [usize; SFBMAX],
    /// Short-block window of each slot, 0 for long bands
    pub window: [usize; SFBMAX],
    pub count1bits: i32,
    /// MPEG-2 scalefactor partition sizes
    pub sfb_partition_table: [usize; 4],
    pub slen: [i32; 4],
    pub max_nonzero_coeff: usize,
}

impl Default for GranuleInfo {
    fn default() -> Self {
        Self {
            xr: [0.0; GRANULE_SIZE],
            l3_enc: [0; GRANULE_SIZE],
            scalefac: [0; SFBMAX],
            xrpow_max: 0.0,
            part2_3_length: 0,
            big_values: 0,
            count1: 0,
            global_gain: 210,
            scalefac_compress: 0,
            block_type: BlockType::Norm,
            mixed_block_flag: false,
            table_select: [0; 3],
            subblock_gain: [0; 4],
            region0_count: 0,
            region1_count: 0,
            preflag: false,
            scalefac_scale: 0,
            count1table_select: 0,
            part2_length: 0,
            sfb_lmax: SBPSY_L,
            sfb_smin: SBPSY_S,
            psy_lmax: SBPSY_L,
            sfbmax: SBPSY_L,
            psymax: SBPSY_L,
            sfbdivide: 11,
            width: [0; SFBMAX],
            window: [0; SFBMAX],
            count1bits: 0,
            sfb_partition_table: [0; 4],
            slen: [0; 4],
            max_nonzero_coeff: GRANULE_SIZE - 1,
        }
    }
}

impl GranuleInfo {
    /// Scalefactor exponent applied to slot `sfb`, preemphasis included
    pub fn band_scalefac(&self, sfb: usize, pretab: &[i32]) -> i32 {
        let pre = if self.preflag { pretab[sfb] } else { 0 };
        self.scalefac[sfb] + pre
    }

    /// Quantizer step index of slot `sfb` relative to `global_gain`
    pub fn band_step(&self, sfb: usize, pretab: &[i32]) -> i32 {
        self.global_gain
            - (self.band_scalefac(sfb, pretab) << (self.scalefac_scale + 1))
            - self.subblock_gain[self.window[sfb]] * 8
    }

    /// True once every spectral line of the granule quantized to zero
    pub fn is_silent(&self) -> bool {
        self.l3_enc.iter().all(|&v| v == 0)
    }
}

/// `|xr|^(3/4)`, the quantizer input kept in lock-step with the scalefactors
///
/// Any change to a band's scalefactor must go through [`XrPow::amplify`]
/// so the band slice and `xrpow_max` stay consistent.
#[derive(Debug, Clone)]
pub struct XrPow(pub [f32; GRANULE_SIZE]);

impl Default for XrPow {
    fn default() -> Self {
        XrPow([0.0; GRANULE_SIZE])
    }
}

impl XrPow {
    /// Scale `len` lines starting at `start` by `factor`, refreshing
    /// `gi.xrpow_max` for the amplified lines
    pub fn amplify(&mut self, gi: &mut GranuleInfo, start: usize, len: usize, factor: f32) {
        for x in &mut self.0[start..start + len] {
            *x *= factor;
            if *x > gi.xrpow_max {
                gi.xrpow_max = *x;
            }
        }
    }
}

/// Outcome of measuring one trial quantization against `l3_xmin`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub struct CalcNoiseResult {
    /// Sum of log10 noise ratios over all bands
    pub tot_noise: f32,
    /// Sum of log10 noise ratios over bands above the threshold
    pub over_noise: f32,
    /// Largest log10 noise ratio
    pub max_noise: f32,
    /// Bands whose noise exceeds the allowed distortion
    pub over_count: i32,
    /// Sum of squared integer dB deviations of the over bands
    pub over_ssd: i32,
    /// `part2_3_length` of the trial
    pub bits: i32,
}

/// Memoized per-band noise, valid only for the `(step, global_gain)`
/// pair it was measured under
#[derive(Debug, Clone)]
pub struct NoiseCache {
    pub global_gain: [i32; SFBMAX],
    pub step: [i32; SFBMAX],
    pub noise: [f32; SFBMAX],
    pub noise_log: [f32; SFBMAX],
}

impl Default for NoiseCache {
    fn default() -> Self {
        Self {
            global_gain: [i32::MIN; SFBMAX],
            step: [i32::MIN; SFBMAX],
            noise: [0.0; SFBMAX],
            noise_log: [0.0; SFBMAX],
        }
    }
}

impl NoiseCache {
    /// Cached `(noise, noise_log)` for `sfb` if step and gain both match
    pub fn lookup(&self, sfb: usize, step: i32, global_gain: i32) -> Option<(f32, f32)> {
        if self.step[sfb] == step && self.global_gain[sfb] == global_gain {
            Some((self.noise[sfb], self.noise_log[sfb]))
        } else {
            None
        }
    }

    pub fn store(&mut self, sfb: usize, step: i32, global_gain: i32, noise: f32, noise_log: f32) {
        self.step[sfb] = step;
        self.global_gain[sfb] = global_gain;
        self.noise[sfb] = noise;
        self.noise_log[sfb] = noise_log;
    }
}

/// Side information of one frame
#[derive(Debug, Clone, Default)]
pub struct SideInfo {
    /// Granule records indexed `[granule][channel]`
    pub tt: [[GranuleInfo; MAX_CHANNELS]; MAX_GRANULES],
    pub main_data_begin: i32,
    pub private_bits: u32,
    /// Ancillary bits appended to the previous frame's main data
    pub resv_drain_pre: i32,
    /// Ancillary bits appended to this frame's main data
    pub resv_drain_post: i32,
    pub scfsi: [[i32; 4]; MAX_CHANNELS],
}
