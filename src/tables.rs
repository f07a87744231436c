//! Static lookup tables
//!
//! Frame-layout tables (bitrates, sample rates, scalefactor bands),
//! scalefactor coding tables, the polyphase analysis window and the
//! quantizer power tables. Everything here is read-only after first use.

use crate::types::{ScalefacBands, GRANULE_SIZE, IXMAX_VAL, Q_MAX, Q_MAX2, SFBMAX};
use lazy_static::lazy_static;

/// Bitrates in kbps indexed `[version][bitrate_index]`
/// (version 0 = MPEG-2, 1 = MPEG-1, 2 = MPEG-2.5)
pub const BITRATE_TABLE: [[u32; 15]; 3] = [
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// Sample rates indexed `[version][samplerate_index]`
pub const SAMPLE_RATE_TABLE: [[u32; 3]; 3] = [
    [22050, 24000, 16000],
    [44100, 48000, 32000],
    [11025, 12000, 8000],
];

/// Long-block band boundaries, indexed like [`SFB_SHORT`]
const SFB_LONG: [[usize; 23]; 9] = [
    // 22.05 kHz
    [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
    // 24 kHz
    [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 114, 136, 162, 194, 232, 278, 332, 394, 464, 540, 576],
    // 16 kHz
    [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
    // 44.1 kHz
    [0, 4, 8, 12, 16, 20, 24, 30, 36, 44, 52, 62, 74, 90, 110, 134, 162, 196, 238, 288, 342, 418, 576],
    // 48 kHz
    [0, 4, 8, 12, 16, 20, 24, 30, 36, 42, 50, 60, 72, 88, 106, 128, 156, 190, 230, 276, 330, 384, 576],
    // 32 kHz
    [0, 4, 8, 12, 16, 20, 24, 30, 36, 44, 54, 66, 82, 102, 126, 156, 194, 240, 296, 364, 448, 550, 576],
    // 11.025 kHz
    [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
    // 12 kHz
    [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
    // 8 kHz
    [0, 12, 24, 36, 48, 60, 72, 88, 108, 132, 160, 192, 232, 280, 336, 400, 476, 566, 568, 570, 572, 574, 576],
];

/// Short-block band boundaries per window, indexed by
/// `samplerate_index + 3 * version + 6 * (sample_rate < 16000)`
const SFB_SHORT: [[usize; 14]; 9] = [
    [0, 4, 8, 12, 18, 24, 32, 42, 56, 74, 100, 132, 174, 192],
    [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 136, 180, 192],
    [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 134, 174, 192],
    [0, 4, 8, 12, 16, 22, 30, 40, 52, 66, 84, 106, 136, 192],
    [0, 4, 8, 12, 16, 22, 28, 38, 50, 64, 80, 100, 126, 192],
    [0, 4, 8, 12, 16, 22, 30, 42, 58, 78, 104, 138, 180, 192],
    [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 134, 174, 192],
    [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 134, 174, 192],
    [0, 8, 16, 24, 36, 52, 72, 96, 124, 160, 162, 164, 166, 192],
];

/// Scalefactor band layout for a sample rate/version pair
pub fn scalefac_bands(samplerate_index: usize, version: usize, sample_rate: u32) -> ScalefacBands {
    let mpeg1 = if version == 1 { 1 } else { 0 };
    let j = samplerate_index + 3 * mpeg1 + if sample_rate < 16000 { 6 } else { 0 };
    ScalefacBands::new(SFB_LONG[j], SFB_SHORT[j])
}

/// MPEG-2 scalefactor partition sizes `[table][block kind][partition]`,
/// block kind 0 = long, 1 = short, 2 = mixed
pub const NR_OF_SFB_BLOCK: [[[usize; 4]; 3]; 6] = [
    [[6, 5, 5, 5], [9, 9, 9, 9], [6, 9, 9, 9]],
    [[6, 5, 7, 3], [9, 9, 12, 6], [6, 9, 12, 6]],
    [[11, 10, 0, 0], [18, 18, 0, 0], [15, 18, 0, 0]],
    [[7, 7, 7, 0], [12, 12, 12, 0], [6, 15, 12, 0]],
    [[6, 6, 6, 3], [12, 9, 9, 6], [6, 12, 9, 6]],
    [[8, 8, 5, 0], [15, 12, 9, 0], [6, 18, 9, 0]],
];

/// Preemphasis added to long-block scalefactors when `preflag` is set
pub const PRETAB: [i32; SFBMAX] = {
    let mut t = [0i32; SFBMAX];
    let p = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 3, 3, 3, 2, 0];
    let mut i = 0;
    while i < p.len() {
        t[i] = p[i];
        i += 1;
    }
    t
};

/// MPEG-1 `scalefac_compress` to slen1/slen2
pub const SLEN1_TAB: [i32; 16] = [0, 0, 0, 0, 3, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4];
pub const SLEN2_TAB: [i32; 16] = [0, 1, 2, 3, 0, 1, 2, 3, 1, 2, 3, 1, 2, 3, 2, 3];

/// Number of distinct values each slen1/slen2 can carry, plus one
pub const SLEN1_N: [i32; 16] = [1, 1, 1, 1, 8, 2, 2, 2, 4, 4, 4, 8, 8, 8, 16, 16];
pub const SLEN2_N: [i32; 16] = [1, 2, 4, 8, 1, 2, 4, 8, 2, 4, 8, 2, 4, 8, 4, 8];

/// part2 bits per `scalefac_compress` for short, mixed and long blocks
pub const SCALE_SHORT: [i32; 16] = [0, 18, 36, 54, 54, 36, 54, 72, 54, 72, 90, 72, 90, 108, 108, 126];
pub const SCALE_MIXED: [i32; 16] = [0, 18, 36, 54, 51, 35, 53, 71, 52, 70, 88, 69, 87, 105, 104, 122];
pub const SCALE_LONG: [i32; 16] = [0, 10, 20, 30, 33, 21, 31, 41, 32, 42, 52, 43, 53, 63, 64, 74];

/// Largest scalefactor per partition for each MPEG-2 partition table
pub const MAX_RANGE_SFAC_TAB: [[i32; 4]; 6] = [
    [15, 15, 7, 7],
    [15, 15, 7, 0],
    [7, 3, 0, 0],
    [15, 31, 31, 0],
    [7, 7, 7, 0],
    [3, 3, 0, 0],
];

/// Bits needed for values 0..16
pub const LOG2_TAB: [i32; 16] = [0, 1, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4];

/// Polyphase analysis window (ISO 11172-3 table C.1)
pub const ENWINDOW: [f32; 512] = [
    0.000000, -0.000000, -0.000000, -0.000000, -0.000000, -0.000000, -0.000000, -0.000001,
    -0.000001, -0.000001, -0.000001, -0.000001, -0.000001, -0.000002, -0.000002, -0.000002,
    -0.000002, -0.000003, -0.000003, -0.000003, -0.000004, -0.000004, -0.000005, -0.000005,
    -0.000006, -0.000007, -0.000008, -0.000008, -0.000009, -0.000010, -0.000011, -0.000012,
    -0.000014, -0.000015, -0.000017, -0.000018, -0.000020, -0.000021, -0.000023, -0.000025,
    -0.000028, -0.000030, -0.000032, -0.000035, -0.000038, -0.000041, -0.000043, -0.000046,
    -0.000050, -0.000053, -0.000056, -0.000060, -0.000063, -0.000066, -0.000070, -0.000073,
    -0.000077, -0.000081, -0.000084, -0.000087, -0.000091, -0.000093, -0.000096, -0.000099,
    0.000102, 0.000104, 0.000106, 0.000107, 0.000108, 0.000109, 0.000109, 0.000108,
    0.000107, 0.000105, 0.000103, 0.000099, 0.000095, 0.000090, 0.000084, 0.000078,
    0.000070, 0.000061, 0.000051, 0.000040, 0.000027, 0.000014, -0.000001, -0.000017,
    -0.000034, -0.000053, -0.000073, -0.000094, -0.000116, -0.000140, -0.000165, -0.000191,
    -0.000219, -0.000247, -0.000277, -0.000308, -0.000339, -0.000371, -0.000404, -0.000438,
    -0.000473, -0.000507, -0.000542, -0.000577, -0.000612, -0.000647, -0.000681, -0.000714,
    -0.000747, -0.000779, -0.000810, -0.000839, -0.000866, -0.000892, -0.000915, -0.000936,
    -0.000954, -0.000969, -0.000981, -0.000989, -0.000994, -0.000995, -0.000992, -0.000984,
    0.000971, 0.000954, 0.000931, 0.000903, 0.000869, 0.000829, 0.000784, 0.000732,
    0.000674, 0.000610, 0.000539, 0.000463, 0.000379, 0.000288, 0.000192, 0.000088,
    -0.000021, -0.000137, -0.000260, -0.000388, -0.000522, -0.000662, -0.000807, -0.000957,
    -0.001111, -0.001270, -0.001432, -0.001598, -0.001767, -0.001937, -0.002110, -0.002283,
    -0.002457, -0.002631, -0.002803, -0.002974, -0.003142, -0.003307, -0.003467, -0.003623,
    -0.003772, -0.003914, -0.004049, -0.004175, -0.004291, -0.004396, -0.004490, -0.004570,
    -0.004638, -0.004691, -0.004728, -0.004749, -0.004752, -0.004737, -0.004703, -0.004649,
    -0.004574, -0.004477, -0.004358, -0.004215, -0.004049, -0.003859, -0.003643, -0.003402,
    0.003135, 0.002841, 0.002522, 0.002175, 0.001801, 0.001400, 0.000971, 0.000516,
    0.000033, -0.000476, -0.001012, -0.001574, -0.002162, -0.002774, -0.003411, -0.004072,
    -0.004756, -0.005462, -0.006189, -0.006937, -0.007703, -0.008487, -0.009288, -0.010104,
    -0.010933, -0.011775, -0.012628, -0.013489, -0.014359, -0.015234, -0.016113, -0.016994,
    -0.017876, -0.018757, -0.019634, -0.020507, -0.021372, -0.022229, -0.023074, -0.023907,
    -0.024725, -0.025527, -0.026311, -0.027074, -0.027815, -0.028533, -0.029225, -0.029890,
    -0.030527, -0.031133, -0.031707, -0.032248, -0.032755, -0.033226, -0.033660, -0.034056,
    -0.034413, -0.034730, -0.035007, -0.035242, -0.035435, -0.035586, -0.035694, -0.035759,
    0.035781, 0.035759, 0.035694, 0.035586, 0.035435, 0.035242, 0.035007, 0.034730,
    0.034413, 0.034056, 0.033660, 0.033226, 0.032755, 0.032248, 0.031707, 0.031133,
    0.030527, 0.029890, 0.029225, 0.028533, 0.027815, 0.027074, 0.026311, 0.025527,
    0.024725, 0.023907, 0.023074, 0.022229, 0.021372, 0.020507, 0.019634, 0.018757,
    0.017876, 0.016994, 0.016113, 0.015234, 0.014359, 0.013489, 0.012628, 0.011775,
    0.010933, 0.010104, 0.009288, 0.008487, 0.007703, 0.006937, 0.006189, 0.005462,
    0.004756, 0.004072, 0.003411, 0.002774, 0.002162, 0.001574, 0.001012, 0.000476,
    -0.000033, -0.000516, -0.000971, -0.001400, -0.001801, -0.002175, -0.002522, -0.002841,
    0.003135, 0.003402, 0.003643, 0.003859, 0.004049, 0.004215, 0.004358, 0.004477,
    0.004574, 0.004649, 0.004703, 0.004737, 0.004752, 0.004749, 0.004728, 0.004691,
    0.004638, 0.004570, 0.004490, 0.004396, 0.004291, 0.004175, 0.004049, 0.003914,
    0.003772, 0.003623, 0.003467, 0.003307, 0.003142, 0.002974, 0.002803, 0.002631,
    0.002457, 0.002283, 0.002110, 0.001937, 0.001767, 0.001598, 0.001432, 0.001270,
    0.001111, 0.000957, 0.000807, 0.000662, 0.000522, 0.000388, 0.000260, 0.000137,
    0.000021, -0.000088, -0.000192, -0.000288, -0.000379, -0.000463, -0.000539, -0.000610,
    -0.000674, -0.000732, -0.000784, -0.000829, -0.000869, -0.000903, -0.000931, -0.000954,
    0.000971, 0.000984, 0.000992, 0.000995, 0.000994, 0.000989, 0.000981, 0.000969,
    0.000954, 0.000936, 0.000915, 0.000892, 0.000866, 0.000839, 0.000810, 0.000779,
    0.000747, 0.000714, 0.000681, 0.000647, 0.000612, 0.000577, 0.000542, 0.000507,
    0.000473, 0.000438, 0.000404, 0.000371, 0.000339, 0.000308, 0.000277, 0.000247,
    0.000219, 0.000191, 0.000165, 0.000140, 0.000116, 0.000094, 0.000073, 0.000053,
    0.000034, 0.000017, 0.000001, -0.000014, -0.000027, -0.000040, -0.000051, -0.000061,
    -0.000070, -0.000078, -0.000084, -0.000090, -0.000095, -0.000099, -0.000103, -0.000105,
    -0.000107, -0.000108, -0.000109, -0.000109, -0.000108, -0.000107, -0.000106, -0.000104,
    0.000102, 0.000099, 0.000096, 0.000093, 0.000091, 0.000087, 0.000084, 0.000081,
    0.000077, 0.000073, 0.000070, 0.000066, 0.000063, 0.000060, 0.000056, 0.000053,
    0.000050, 0.000046, 0.000043, 0.000041, 0.000038, 0.000035, 0.000032, 0.000030,
    0.000028, 0.000025, 0.000023, 0.000021, 0.000020, 0.000018, 0.000017, 0.000015,
    0.000014, 0.000012, 0.000011, 0.000010, 0.000009, 0.000008, 0.000008, 0.000007,
    0.000006, 0.000005, 0.000005, 0.000004, 0.000004, 0.000003, 0.000003, 0.000003,
    0.000002, 0.000002, 0.000002, 0.000002, 0.000001, 0.000001, 0.000001, 0.000001,
    0.000001, 0.000001, 0.000000, 0.000000, 0.000000, 0.000000, 0.000000, 0.000000,
];

/// Length of the power tables indexed by quantized magnitude
pub const PRECALC_SIZE: usize = IXMAX_VAL as usize + 2;

lazy_static! {
    /// `i^(4/3)`
    pub static ref POW43: Vec<f32> = (0..PRECALC_SIZE)
        .map(|i| (i as f64).powf(4.0 / 3.0) as f32)
        .collect();

    /// Rounding offsets making truncation equal nearest-in-power-domain
    pub static ref ADJ43: Vec<f32> = {
        let mut adj = vec![0.5f32; PRECALC_SIZE];
        for i in 0..PRECALC_SIZE - 1 {
            let mid = 0.5 * (POW43[i] as f64 + POW43[i + 1] as f64);
            adj[i] = ((i + 1) as f64 - mid.powf(0.75)) as f32;
        }
        adj
    };

    /// `2^(-0.1875 (i - 210))`, the inverse quantizer step in the 3/4 domain
    pub static ref IPOW20_TABLE: Vec<f32> = (0..Q_MAX)
        .map(|i| 2f64.powf(-(i as f64 - 210.0) * 0.1875) as f32)
        .collect();

    /// `2^(0.25 (i - 210 - Q_MAX2))`, the quantizer step
    pub static ref POW20_TABLE: Vec<f32> = (0..Q_MAX + Q_MAX2 + 1)
        .map(|i| 2f64.powf((i as f64 - 210.0 - Q_MAX2 as f64) * 0.25) as f32)
        .collect();
}

/// Quantizer step for step index `x` (`-Q_MAX2 <= x < Q_MAX`)
#[inline]
pub fn pow20(x: i32) -> f32 {
    debug_assert!(x + Q_MAX2 as i32 >= 0 && x < Q_MAX as i32);
    POW20_TABLE[(x + Q_MAX2 as i32) as usize]
}

/// Inverse step in the 3/4 power domain for gain `x` (`0 <= x < Q_MAX`)
#[inline]
pub fn ipow20(x: i32) -> f32 {
    debug_assert!(x >= 0 && x < Q_MAX as i32);
    IPOW20_TABLE[x as usize]
}

/// Size of a frame in bits, padding excluded
pub fn frame_bits(version: usize, bitrate_kbps: u32, sample_rate: u32) -> i32 {
    let samples = if version == 1 { 1152 } else { GRANULE_SIZE as u32 };
    (samples / 8 * bitrate_kbps * 1000 / sample_rate * 8) as i32
}

/// Index of `bitrate_kbps` in the bitrate table of `version`
pub fn bitrate_index(version: usize, bitrate_kbps: u32) -> Option<usize> {
    BITRATE_TABLE[version]
        .iter()
        .skip(1)
        .position(|&b| b == bitrate_kbps)
        .map(|i| i + 1)
}

/// `(version, samplerate_index)` of a supported sample rate
pub fn sample_rate_lookup(sample_rate: u32) -> Option<(usize, usize)> {
    SAMPLE_RATE_TABLE.iter().enumerate().find_map(|(version, rates)| {
        rates.iter().position(|&r| r == sample_rate).map(|idx| (version, idx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_tables_are_monotonic() {
        for (l, s) in SFB_LONG.iter().zip(SFB_SHORT.iter()) {
            assert!(l.windows(2).all(|w| w[0] < w[1]));
            assert!(s.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(l[22], 576);
            assert_eq!(s[13], 192);
        }
    }

    #[test]
    fn test_sample_rate_lookup() {
        assert_eq!(sample_rate_lookup(44100), Some((1, 0)));
        assert_eq!(sample_rate_lookup(24000), Some((0, 1)));
        assert_eq!(sample_rate_lookup(8000), Some((2, 2)));
        assert_eq!(sample_rate_lookup(44000), None);
    }

    #[test]
    fn test_frame_bits_known_values() {
        // 128 kbps at 44.1 kHz is 417 bytes without padding
        assert_eq!(frame_bits(1, 128, 44100), 417 * 8);
        // 32 kbps at 8 kHz is 288 bytes
        assert_eq!(frame_bits(2, 32, 8000), 288 * 8);
        assert_eq!(bitrate_index(1, 128), Some(9));
        assert_eq!(bitrate_index(2, 32), Some(4));
        assert_eq!(bitrate_index(1, 8), None);
    }

    #[test]
    fn test_power_tables() {
        assert_eq!(POW43[0], 0.0);
        assert!((POW43[8] - 16.0).abs() < 1e-4);
        assert!((ipow20(210) - 1.0).abs() < 1e-6);
        assert!((pow20(210) - 1.0).abs() < 1e-6);
        assert!(ipow20(100) > ipow20(101));
        assert!(pow20(-(Q_MAX2 as i32)) > 0.0);
        // truncation with adj43 must round to the nearest level in the 4/3 domain
        assert!(ADJ43[0] > 0.0 && ADJ43[0] < 1.0);
        assert_eq!(ADJ43[PRECALC_SIZE - 1], 0.5);
    }

    #[test]
    fn test_window_peak() {
        let peak = ENWINDOW.iter().fold(0f32, |m, &v| m.max(v.abs()));
        assert!((peak - 0.035781).abs() < 1e-6);
    }
}
