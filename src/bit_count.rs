//! Exact Huffman bit counting for a trial quantization
//!
//! The quantization loop treats [`BitCounter::count_bits`] as a pure cost
//! function of `(xrpow, global_gain)`. As a side effect it writes the
//! Huffman layout (big_values, count1, table selection and region split)
//! into the granule record, which the bitstream writer later trusts.

use crate::huffman::HT;
use crate::tables::{
    ipow20, ADJ43, LOG2_TAB, MAX_RANGE_SFAC_TAB, NR_OF_SFB_BLOCK, PRETAB, SCALE_LONG, SCALE_MIXED,
    SCALE_SHORT, SLEN1_N, SLEN1_TAB, SLEN2_N, SLEN2_TAB,
};
use crate::types::{
    BlockType, GranuleInfo, ScalefacBands, SideInfo, XrPow, GRANULE_SIZE, IXMAX_VAL, LARGE_BITS,
    SBMAX_L, SBPSY_L, SFBMAX,
};

/// Default region split per number of populated long bands
const SUBDV_TABLE: [(i32, i32); 23] = [
    (0, 0), (0, 0), (0, 0), (0, 0), (0, 0),
    (0, 1), (1, 1), (1, 1), (1, 2), (2, 2),
    (2, 3), (2, 3), (3, 4), (3, 4), (3, 4),
    (4, 5), (4, 5), (4, 6), (5, 6), (5, 6),
    (5, 7), (6, 7), (6, 7),
];

/// Long bands sharing one SCFSI flag
const SCFSI_BAND: [usize; 5] = [0, 6, 11, 16, 21];

/// Rounding threshold applied to pseudo-half bands
const PSEUDOHALF_ROUND: f64 = 0.634521682242439;

/// Scalefactor value meaning "no nonzero line, any value works"
const SF_ANYTHING: i32 = -2;

/// Huffman layout fields of a granule, the part `best_huffman_divide`
/// may swap for a cheaper alternative
#[derive(Debug, Clone, Copy)]
struct HuffmanLayout {
    part2_3_length: i32,
    big_values: usize,
    count1: usize,
    count1bits: i32,
    count1table_select: usize,
    table_select: [usize; 3],
    region0_count: usize,
    region1_count: usize,
}

impl HuffmanLayout {
    fn of(gi: &GranuleInfo) -> Self {
        Self {
            part2_3_length: gi.part2_3_length,
            big_values: gi.big_values,
            count1: gi.count1,
            count1bits: gi.count1bits,
            count1table_select: gi.count1table_select,
            table_select: gi.table_select,
            region0_count: gi.region0_count,
            region1_count: gi.region1_count,
        }
    }

    fn apply(&self, gi: &mut GranuleInfo) {
        gi.part2_3_length = self.part2_3_length;
        gi.big_values = self.big_values;
        gi.count1 = self.count1;
        gi.count1bits = self.count1bits;
        gi.count1table_select = self.count1table_select;
        gi.table_select = self.table_select;
        gi.region0_count = self.region0_count;
        gi.region1_count = self.region1_count;
    }
}

/// Best split of the first two big-value regions for each region-2 start
struct RegionSplit {
    bits: [i32; 23],
    div: [usize; 23],
    r0_table: [usize; 23],
    r1_table: [usize; 23],
}

/// Bit counter bound to one sample rate's band layout
#[derive(Debug, Clone)]
pub struct BitCounter {
    bands: ScalefacBands,
    /// Region0/region1 counts for a big-value boundary at line `i + 2`
    bv_scf: [i32; GRANULE_SIZE],
    mode_gr: usize,
    use_best_huffman: u8,
}

impl BitCounter {
    pub fn new(bands: ScalefacBands, mode_gr: usize, use_best_huffman: u8) -> Self {
        let mut bv_scf = [0i32; GRANULE_SIZE];
        let l = |i: i32| bands.l[i as usize] as i32;
        for i in (2..=GRANULE_SIZE as i32).step_by(2) {
            let mut scfb_anz = 0i32;
            loop {
                scfb_anz += 1;
                if l(scfb_anz) >= i {
                    break;
                }
            }
            let (r0, r1) = SUBDV_TABLE[scfb_anz as usize];

            let mut bv_index = r0;
            while bv_index >= 0 && l(bv_index + 1) > i {
                bv_index -= 1;
            }
            if bv_index < 0 {
                bv_index = r0;
            }
            bv_scf[(i - 2) as usize] = bv_index;
            let region0 = bv_index;

            let mut bv_index = r1;
            while bv_index >= 0 && l(bv_index + region0 + 2) > i {
                bv_index -= 1;
            }
            if bv_index < 0 {
                bv_index = r1;
            }
            bv_scf[(i - 1) as usize] = bv_index;
        }
        Self { bands, bv_scf, mode_gr, use_best_huffman }
    }

    pub fn bands(&self) -> &ScalefacBands {
        &self.bands
    }

    pub fn use_best_huffman(&self) -> u8 {
        self.use_best_huffman
    }

    /// Quantize `xrpow` at the granule's global gain and count the bits.
    ///
    /// `pseudohalf` is given when pseudo-half step shaping is active; it
    /// marks bands whose values below the rounding threshold are zeroed.
    /// Returns [`LARGE_BITS`] when a value would overflow the ESC tables.
    pub fn count_bits(
        &self,
        gi: &mut GranuleInfo,
        xrpow: &XrPow,
        pseudohalf: Option<&[bool; SFBMAX]>,
    ) -> i32 {
        let istep = ipow20(gi.global_gain);
        if gi.xrpow_max > IXMAX_VAL as f32 / istep {
            return LARGE_BITS;
        }
        quantize_xrpow(&xrpow.0, &mut gi.l3_enc, istep, gi.max_nonzero_coeff);

        if let Some(pseudohalf) = pseudohalf {
            let gain = gi.global_gain + gi.scalefac_scale;
            let roundfac = (PSEUDOHALF_ROUND / ipow20(gain) as f64) as f32;
            let mut j = 0;
            for sfb in 0..gi.sfbmax {
                let width = gi.width[sfb];
                if pseudohalf[sfb] {
                    for k in j..j + width {
                        if xrpow.0[k] < roundfac {
                            gi.l3_enc[k] = 0;
                        }
                    }
                }
                j += width;
            }
        }
        self.noquant_count_bits(gi)
    }

    /// Count the bits of the already quantized `l3_enc`
    pub fn noquant_count_bits(&self, gi: &mut GranuleInfo) -> i32 {
        let ix = &gi.l3_enc;
        let mut i = GRANULE_SIZE.min(((gi.max_nonzero_coeff + 2) >> 1) << 1);

        while i > 1 {
            if ix[i - 1] | ix[i - 2] != 0 {
                break;
            }
            i -= 2;
        }
        gi.count1 = i;

        let (mut a1, mut a2) = (0u32, 0u32);
        while i > 3 {
            let quad = [ix[i - 4], ix[i - 3], ix[i - 2], ix[i - 1]];
            if quad.iter().any(|&v| v as u32 > 1) {
                break;
            }
            a1 += HT[32].quad_bits(quad[0], quad[1], quad[2], quad[3]);
            a2 += HT[33].quad_bits(quad[0], quad[1], quad[2], quad[3]);
            i -= 4;
        }

        let mut bits = a1 as i32;
        gi.count1table_select = 0;
        if a1 > a2 {
            bits = a2 as i32;
            gi.count1table_select = 1;
        }
        gi.count1bits = bits;
        gi.big_values = i;
        if i == 0 {
            return bits;
        }

        let (mut r1, mut r2);
        match gi.block_type {
            BlockType::Short => {
                r1 = (3 * self.bands.s[3]).min(gi.big_values);
                r2 = gi.big_values;
            }
            BlockType::Norm => {
                gi.region0_count = self.bv_scf[i - 2] as usize;
                gi.region1_count = self.bv_scf[i - 1] as usize;
                debug_assert!(gi.region0_count + gi.region1_count + 2 < SBPSY_L);
                r2 = self.bands.l[gi.region0_count + gi.region1_count + 2];
                r1 = self.bands.l[gi.region0_count + 1];
                if r2 < i {
                    gi.table_select[2] = choose_table(&gi.l3_enc[r2..i], &mut bits);
                }
            }
            BlockType::Start | BlockType::Stop => {
                gi.region0_count = 7;
                gi.region1_count = SBMAX_L - 1 - 7 - 1;
                r1 = self.bands.l[7 + 1].min(i);
                r2 = i;
            }
        }

        r1 = r1.min(i);
        r2 = r2.min(i);
        if r1 > 0 {
            gi.table_select[0] = choose_table(&gi.l3_enc[..r1], &mut bits);
        }
        if r1 < r2 {
            gi.table_select[1] = choose_table(&gi.l3_enc[r1..r2], &mut bits);
        }
        bits
    }

    fn recalc_divide_init(&self, gi: &GranuleInfo) -> RegionSplit {
        let ix = &gi.l3_enc;
        let bigv = gi.big_values;
        let mut split = RegionSplit {
            bits: [LARGE_BITS; 23],
            div: [0; 23],
            r0_table: [0; 23],
            r1_table: [0; 23],
        };
        for r0 in 0..16 {
            let a1 = self.bands.l[r0 + 1];
            if a1 >= bigv {
                break;
            }
            let mut r0bits = 0;
            let r0t = choose_table(&ix[..a1], &mut r0bits);
            for r1 in 0..8 {
                let a2 = self.bands.l[r0 + r1 + 2];
                if a2 >= bigv {
                    break;
                }
                let mut bits = r0bits;
                let r1t = choose_table(&ix[a1..a2], &mut bits);
                if split.bits[r0 + r1] > bits {
                    split.bits[r0 + r1] = bits;
                    split.div[r0 + r1] = r0;
                    split.r0_table[r0 + r1] = r0t;
                    split.r1_table[r0 + r1] = r1t;
                }
            }
        }
        split
    }

    fn recalc_divide_sub(
        &self,
        candidate: &HuffmanLayout,
        best: &mut HuffmanLayout,
        ix: &[i32; GRANULE_SIZE],
        split: &RegionSplit,
    ) {
        let bigv = candidate.big_values;
        for r2 in 2..SBMAX_L + 1 {
            let a2 = self.bands.l[r2];
            if a2 >= bigv {
                break;
            }
            let mut bits = split.bits[r2 - 2] + candidate.count1bits;
            if best.part2_3_length <= bits {
                break;
            }
            let r2t = choose_table(&ix[a2..bigv], &mut bits);
            if best.part2_3_length <= bits {
                continue;
            }
            *best = *candidate;
            best.part2_3_length = bits;
            best.region0_count = split.div[r2 - 2];
            best.region1_count = r2 - 2 - split.div[r2 - 2];
            best.table_select = [split.r0_table[r2 - 2], split.r1_table[r2 - 2], r2t];
        }
    }

    /// Search region splits and the count1 boundary for a cheaper layout
    pub fn best_huffman_divide(&self, gi: &mut GranuleInfo) {
        if gi.block_type == BlockType::Short && self.mode_gr == 1 {
            return;
        }
        let mut best = HuffmanLayout::of(gi);
        let candidate = best;
        let mut split = None;
        if gi.block_type == BlockType::Norm {
            let s = self.recalc_divide_init(gi);
            self.recalc_divide_sub(&candidate, &mut best, &gi.l3_enc, &s);
            split = Some(s);
        }

        let ix = &gi.l3_enc;
        let mut i = candidate.big_values;
        if i == 0 || (ix[i - 2] | ix[i - 1]) as u32 > 1 {
            best.apply(gi);
            return;
        }
        i = best.count1 + 2;
        if i > GRANULE_SIZE {
            best.apply(gi);
            return;
        }

        // move the last big-value pair into the count1 region
        let mut candidate = best;
        candidate.count1 = i;
        let (mut a1, mut a2) = (0u32, 0u32);
        while i > candidate.big_values {
            let q = [ix[i - 4], ix[i - 3], ix[i - 2], ix[i - 1]];
            a1 += HT[32].quad_bits(q[0], q[1], q[2], q[3]);
            a2 += HT[33].quad_bits(q[0], q[1], q[2], q[3]);
            i -= 4;
        }
        candidate.big_values = i;
        candidate.count1table_select = 0;
        if a1 > a2 {
            a1 = a2;
            candidate.count1table_select = 1;
        }
        candidate.count1bits = a1 as i32;

        match split {
            Some(split) => self.recalc_divide_sub(&candidate, &mut best, ix, &split),
            None => {
                candidate.part2_3_length = a1 as i32;
                let r1 = self.bands.l[7 + 1].min(i);
                if r1 > 0 {
                    candidate.table_select[0] =
                        choose_table(&ix[..r1], &mut candidate.part2_3_length);
                }
                if i > r1 {
                    candidate.table_select[1] =
                        choose_table(&ix[r1..i], &mut candidate.part2_3_length);
                }
                if best.part2_3_length > candidate.part2_3_length {
                    best = candidate;
                }
            }
        }
        best.apply(gi);
    }

    /// Choose `scalefac_compress` and `part2_length` for the current
    /// scalefactors. Returns true when they cannot be encoded.
    pub fn scale_bitcount(&self, gi: &mut GranuleInfo) -> bool {
        if self.mode_gr == 2 {
            mpeg1_scale_bitcount(gi)
        } else {
            mpeg2_scale_bitcount(gi)
        }
    }

    /// Final scalefactor clean-up of an accepted granule: free bands
    /// with no nonzero line, prefer `scalefac_scale`/`preflag` when they
    /// are free and share scalefactors with granule 0 through SCFSI.
    pub fn best_scalefac_store(&self, side: &mut SideInfo, gr: usize, ch: usize) {
        let mut recalc = false;
        {
            let gi = &mut side.tt[gr][ch];
            let mut j = 0;
            for sfb in 0..gi.sfbmax {
                let width = gi.width[sfb];
                if gi.l3_enc[j..j + width].iter().all(|&v| v == 0) {
                    gi.scalefac[sfb] = SF_ANYTHING;
                    recalc = true;
                }
                j += width;
            }

            if gi.scalefac_scale == 0 && !gi.preflag {
                let s = gi.scalefac[..gi.sfbmax]
                    .iter()
                    .filter(|&&v| v > 0)
                    .fold(0, |acc, &v| acc | v);
                if s & 1 == 0 && s != 0 {
                    for v in gi.scalefac[..gi.sfbmax].iter_mut() {
                        if *v > 0 {
                            *v >>= 1;
                        }
                    }
                    gi.scalefac_scale = 1;
                    recalc = true;
                }
            }

            if !gi.preflag && gi.block_type != BlockType::Short && self.mode_gr == 2 {
                let fits = (11..SBPSY_L)
                    .all(|sfb| gi.scalefac[sfb] >= PRETAB[sfb] || gi.scalefac[sfb] == SF_ANYTHING);
                if fits {
                    for sfb in 11..SBPSY_L {
                        if gi.scalefac[sfb] > 0 {
                            gi.scalefac[sfb] -= PRETAB[sfb];
                        }
                    }
                    gi.preflag = true;
                    recalc = true;
                }
            }
        }

        side.scfsi[ch] = [0; 4];
        if self.mode_gr == 2
            && gr == 1
            && side.tt[0][ch].block_type != BlockType::Short
            && side.tt[1][ch].block_type != BlockType::Short
        {
            scfsi_calc(side, ch);
            recalc = false;
        }

        let gi = &mut side.tt[gr][ch];
        for v in gi.scalefac[..gi.sfbmax].iter_mut() {
            if *v == SF_ANYTHING {
                *v = 0;
            }
        }
        if recalc {
            self.scale_bitcount(gi);
        }
    }
}

/// Quantize the `xrpow` lines up to `max_nonzero` and zero the rest
fn quantize_xrpow(xrpow: &[f32; GRANULE_SIZE], ix: &mut [i32; GRANULE_SIZE], istep: f32, max_nonzero: usize) {
    let end = (max_nonzero + 1).min(GRANULE_SIZE);
    for (q, &x) in ix[..end].iter_mut().zip(xrpow[..end].iter()) {
        let t = x * istep;
        *q = (t + ADJ43[t as usize]) as i32;
    }
    ix[end..].fill(0);
}

/// Huffman table with the fewest bits for `ix`; adds the cost to `bits`
pub fn choose_table(ix: &[i32], bits: &mut i32) -> usize {
    let max = ix.iter().copied().max().unwrap_or(0);
    match max {
        0 => 0,
        1 => {
            *bits += count_pairs(ix, 1) as i32;
            1
        }
        2 => cheapest(ix, &[2, 3], bits),
        3 => cheapest(ix, &[5, 6], bits),
        4 | 5 => cheapest(ix, &[7, 8, 9], bits),
        6 | 7 => cheapest(ix, &[10, 11, 12], bits),
        8..=15 => cheapest(ix, &[13, 15], bits),
        _ => {
            if max > IXMAX_VAL {
                *bits = LARGE_BITS;
                return 0;
            }
            let esc = max - 15;
            let choice2 = (24..32).find(|&t| HT[t].linmax >= esc).unwrap_or(31);
            let choice = (choice2 - 8..24).find(|&t| HT[t].linmax >= esc).unwrap_or(23);
            cheapest(ix, &[choice, choice2], bits)
        }
    }
}

fn count_pairs(ix: &[i32], table: usize) -> u32 {
    let ht = &HT[table];
    ix.chunks_exact(2).map(|p| ht.pair_bits(p[0], p[1])).sum()
}

fn cheapest(ix: &[i32], tables: &[usize], bits: &mut i32) -> usize {
    let mut best = tables[0];
    let mut best_bits = count_pairs(ix, best);
    for &t in &tables[1..] {
        let b = count_pairs(ix, t);
        if b < best_bits {
            best = t;
            best_bits = b;
        }
    }
    *bits += best_bits as i32;
    best
}

fn mpeg1_scale_bitcount(gi: &mut GranuleInfo) -> bool {
    let tab = if gi.block_type == BlockType::Short {
        if gi.mixed_block_flag {
            &SCALE_MIXED
        } else {
            &SCALE_SHORT
        }
    } else {
        if !gi.preflag && (11..SBPSY_L).all(|sfb| gi.scalefac[sfb] >= PRETAB[sfb]) {
            gi.preflag = true;
            for sfb in 11..SBPSY_L {
                gi.scalefac[sfb] -= PRETAB[sfb];
            }
        }
        &SCALE_LONG
    };

    let max_slen1 = gi.scalefac[..gi.sfbdivide].iter().copied().fold(0, i32::max);
    let max_slen2 = gi.scalefac[gi.sfbdivide..gi.sfbmax].iter().copied().fold(0, i32::max);

    gi.part2_length = LARGE_BITS;
    for k in 0..16 {
        if max_slen1 < SLEN1_N[k] && max_slen2 < SLEN2_N[k] && gi.part2_length > tab[k] {
            gi.part2_length = tab[k];
            gi.scalefac_compress = k as i32;
        }
    }
    gi.part2_length == LARGE_BITS
}

fn mpeg2_scale_bitcount(gi: &mut GranuleInfo) -> bool {
    let table_number = if gi.preflag { 2 } else { 0 };
    let mut max_sfac = [0i32; 4];
    let row = if gi.block_type == BlockType::Short { 1 } else { 0 };
    let partition_table = NR_OF_SFB_BLOCK[table_number][row];

    let mut sfb = 0;
    for (partition, &count) in partition_table.iter().enumerate() {
        if row == 1 {
            for _ in 0..count / 3 {
                for window in 0..3 {
                    max_sfac[partition] = max_sfac[partition].max(gi.scalefac[sfb * 3 + window]);
                }
                sfb += 1;
            }
        } else {
            for _ in 0..count {
                max_sfac[partition] = max_sfac[partition].max(gi.scalefac[sfb]);
                sfb += 1;
            }
        }
    }

    let over = max_sfac
        .iter()
        .zip(MAX_RANGE_SFAC_TAB[table_number].iter())
        .filter(|(m, r)| m > r)
        .count();
    if over > 0 {
        return true;
    }

    gi.sfb_partition_table = partition_table;
    for (slen, &m) in gi.slen.iter_mut().zip(max_sfac.iter()) {
        *slen = LOG2_TAB[m as usize];
    }
    let [s1, s2, s3, s4] = gi.slen;
    gi.scalefac_compress = match table_number {
        0 => ((s1 * 5 + s2) << 4) + (s3 << 2) + s4,
        _ => 500 + s1 * 3 + s2,
    };
    gi.part2_length = gi
        .slen
        .iter()
        .zip(partition_table.iter())
        .map(|(&s, &n)| s * n as i32)
        .sum();
    false
}

fn scfsi_calc(side: &mut SideInfo, ch: usize) {
    let g0 = side.tt[0][ch].scalefac;
    let gi = &mut side.tt[1][ch];
    for i in 0..SCFSI_BAND.len() - 1 {
        let range = SCFSI_BAND[i]..SCFSI_BAND[i + 1];
        let shared = range
            .clone()
            .all(|sfb| g0[sfb] == gi.scalefac[sfb] || gi.scalefac[sfb] < 0);
        if shared {
            for sfb in range {
                gi.scalefac[sfb] = -1;
            }
            side.scfsi[ch][i] = 1;
        }
    }

    let summarize = |bands: std::ops::Range<usize>, sf: &[i32]| {
        bands.filter(|&sfb| sf[sfb] != -1).fold((0, 0), |(s, c), sfb| (s.max(sf[sfb]), c + 1))
    };
    let (s1, c1) = summarize(0..11, &gi.scalefac);
    let (s2, c2) = summarize(11..SBPSY_L, &gi.scalefac);

    for i in 0..16 {
        if s1 < SLEN1_N[i] && s2 < SLEN2_N[i] {
            let c = SLEN1_TAB[i] * c1 + SLEN2_TAB[i] * c2;
            if gi.part2_length > c {
                gi.part2_length = c;
                gi.scalefac_compress = i as i32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::scalefac_bands;
    use proptest::prelude::*;

    fn counter(mode_gr: usize) -> BitCounter {
        let bands = if mode_gr == 2 { scalefac_bands(0, 1, 44100) } else { scalefac_bands(1, 0, 24000) };
        BitCounter::new(bands, mode_gr, 0)
    }

    fn long_granule(c: &BitCounter) -> GranuleInfo {
        let mut gi = GranuleInfo::default();
        for sfb in 0..SBMAX_L {
            gi.width[sfb] = c.bands().l[sfb + 1] - c.bands().l[sfb];
        }
        gi.sfbmax = SBPSY_L;
        gi.sfbdivide = 11;
        gi
    }

    #[test]
    fn test_silent_granule_costs_nothing() {
        let c = counter(2);
        let mut gi = long_granule(&c);
        let xrpow = XrPow::default();
        gi.global_gain = 100;
        assert_eq!(c.count_bits(&mut gi, &xrpow, None), 0);
        assert_eq!(gi.big_values, 0);
        assert_eq!(gi.count1, 0);
    }

    #[test]
    fn test_overflowing_values_are_rejected() {
        let c = counter(2);
        let mut gi = long_granule(&c);
        let mut xrpow = XrPow::default();
        xrpow.0[0] = 1.0e6;
        gi.xrpow_max = 1.0e6;
        gi.global_gain = 0;
        assert_eq!(c.count_bits(&mut gi, &xrpow, None), LARGE_BITS);
    }

    #[test]
    fn test_count1_region_holds_only_ones() {
        let c = counter(2);
        let mut gi = long_granule(&c);
        gi.l3_enc[0] = 5;
        gi.l3_enc[1] = 3;
        for v in gi.l3_enc[2..10].iter_mut() {
            *v = 1;
        }
        let bits = c.noquant_count_bits(&mut gi);
        assert!(bits > 0);
        assert_eq!(gi.count1, 10);
        assert_eq!(gi.big_values, 2);
    }

    #[test]
    fn test_choose_table_uses_escape_for_large_values() {
        let mut bits = 0;
        let t = choose_table(&[100, 0], &mut bits);
        assert!((16..32).contains(&t));
        assert!(HT[t].linmax >= 85);
        let mut bits = 0;
        assert_eq!(choose_table(&[0, 0, 0, 0], &mut bits), 0);
        assert_eq!(bits, 0);
    }

    #[test]
    fn test_mpeg1_scale_bitcount_sets_preflag() {
        let c = counter(2);
        let mut gi = long_granule(&c);
        for sfb in 11..SBPSY_L {
            gi.scalefac[sfb] = PRETAB[sfb] + 1;
        }
        assert!(!c.scale_bitcount(&mut gi));
        assert!(gi.preflag);
        assert_eq!(gi.scalefac[11], 1);
        assert!(gi.part2_length > 0);
    }

    #[test]
    fn test_mpeg1_scale_bitcount_rejects_out_of_range() {
        let c = counter(2);
        let mut gi = long_granule(&c);
        gi.scalefac[0] = 16;
        assert!(c.scale_bitcount(&mut gi));
    }

    #[test]
    fn test_mpeg2_scale_bitcount_partitions() {
        let c = counter(1);
        let mut gi = long_granule(&c);
        gi.scalefac[0] = 15;
        gi.scalefac[6] = 3;
        assert!(!c.scale_bitcount(&mut gi));
        assert_eq!(gi.slen, [4, 2, 0, 0]);
        assert_eq!(gi.part2_length, 4 * 6 + 2 * 5);
        gi.scalefac[16] = 8;
        assert!(c.scale_bitcount(&mut gi));
    }

    #[test]
    fn test_best_scalefac_store_uses_scfsi() {
        let c = counter(2);
        let mut side = SideInfo::default();
        for gr in 0..2 {
            let mut gi = long_granule(&c);
            for v in gi.l3_enc.iter_mut() {
                *v = 1;
            }
            for sfb in 0..SBPSY_L {
                gi.scalefac[sfb] = (sfb % 3) as i32;
            }
            assert!(!c.scale_bitcount(&mut gi));
            side.tt[gr][0] = gi;
        }
        let before = side.tt[1][0].part2_length;
        c.best_scalefac_store(&mut side, 0, 0);
        c.best_scalefac_store(&mut side, 1, 0);
        assert_eq!(side.scfsi[0], [1, 1, 1, 1]);
        assert!(side.tt[1][0].part2_length < before);
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
        fn property_bits_non_increasing_in_gain(
            seed in 0u32..10_000,
            amp in 1.0f32..3000.0,
        ) {
            let c = counter(2);
            let mut gi = long_granule(&c);
            let mut xrpow = XrPow::default();
            let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
            for x in xrpow.0.iter_mut() {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                *x = ((state >> 8) as f32 / (1u32 << 24) as f32) * amp;
                gi.xrpow_max = gi.xrpow_max.max(*x);
            }
            let mut last = i32::MAX;
            for gain in (0..256).step_by(8) {
                gi.global_gain = gain;
                let bits = c.count_bits(&mut gi, &xrpow, None);
                prop_assert!(bits <= last || last == LARGE_BITS);
                if bits != LARGE_BITS {
                    last = bits;
                }
            }
        }

        #[test]
        fn property_best_huffman_divide_never_costs_more(
            values in proptest::collection::vec(0i32..20, 576),
            zeros_from in 100usize..576,
        ) {
            let c = BitCounter::new(scalefac_bands(0, 1, 44100), 2, 1);
            let mut gi = long_granule(&c);
            for (i, v) in values.iter().enumerate() {
                gi.l3_enc[i] = if i < zeros_from { *v } else { 0 };
            }
            gi.part2_3_length = c.noquant_count_bits(&mut gi);
            let before = gi.part2_3_length;
            c.best_huffman_divide(&mut gi);
            prop_assert!(gi.part2_3_length <= before);
        }
    }
}
