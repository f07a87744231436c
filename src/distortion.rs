//! Allowed and actual quantization noise per scalefactor band
//!
//! [`calc_xmin`] turns the psychoacoustic model output and the ATH into
//! the noise energy each band may carry. [`calc_noise`] measures what a
//! trial quantization actually produces and summarizes it in dB
//! relative to that allowance.

use crate::ath::{ath_adjust, Ath, BandFactors};
use crate::tables::{pow20, POW43, PRETAB};
use crate::types::{
    BlockType, CalcNoiseResult, GranuleInfo, NoiseCache, PsyRatio, GRANULE_SIZE, Q_MAX2, SBPSY_L,
    SBPSY_S, SFBMAX,
};

const DBL_EPSILON: f32 = 2.220_446e-16;

/// How the allowed distortion is derived for the active strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskingParams {
    /// Linear factor applied to the masking threshold
    pub masking_lower: f32,
    /// Pass ATH values through [`ath_adjust`] instead of scaling them
    pub ath_adjusted: bool,
    /// Use the ATH-weighted band energy as the floor (direct VBR search)
    pub athaa_fix: bool,
    /// Ignore masking, allow only the ATH
    pub ath_only: bool,
    /// Ignore masking for short blocks
    pub ath_short: bool,
    /// Let a window's threshold decay into the following windows
    pub use_temporal: bool,
    /// Temporal masking decay between short windows
    pub decay: f32,
}

impl Default for MaskingParams {
    fn default() -> Self {
        Self {
            masking_lower: 1.0,
            ath_adjusted: false,
            athaa_fix: false,
            ath_only: false,
            ath_short: false,
            use_temporal: true,
            decay: 0.0,
        }
    }
}

/// Sum of squares and ATH-limited sum of squares over `xr`
fn band_energy(xr: &[f32], rh1: f32) -> (f32, f32) {
    let mut en0 = 0.0f32;
    let mut rh2 = DBL_EPSILON;
    for &x in xr {
        let xa = x * x;
        en0 += xa;
        rh2 += if xa < rh1 { xa } else { rh1 };
    }
    (en0, rh2)
}

/// Fill `xmin` with the allowed noise energy of every (band, window)
/// slot up to `gi.psymax` and set `gi.max_nonzero_coeff`.
///
/// Returns the number of slots whose energy is above the ATH; zero means
/// the granule is analog silence.
pub fn calc_xmin(
    ath: &Ath,
    factors: &BandFactors,
    params: &MaskingParams,
    ratio: &PsyRatio,
    gi: &mut GranuleInfo,
    xmin: &mut [f32; SFBMAX],
) -> usize {
    let masking_lower = if params.athaa_fix { 1.0 } else { params.masking_lower };
    let mut ath_over = 0;
    let mut j = 0;
    let mut pos = 0;

    let mut gsfb = 0;
    while gsfb < gi.psy_lmax {
        let mut x_min = if params.ath_adjusted {
            ath_adjust(ath.adjust, ath.l[gsfb], ath.floor)
        } else {
            ath.adjust * ath.l[gsfb]
        };
        let width = gi.width[gsfb];
        let (en0, mut rh2) = band_energy(&gi.xr[j..j + width], x_min / width as f32);
        j += width;
        if en0 > x_min {
            ath_over += 1;
        }
        if gsfb == SBPSY_L {
            rh2 = rh2.max(x_min * factors.longfact[gsfb]);
        }
        if params.athaa_fix {
            x_min = rh2;
        }
        if !params.ath_only {
            let e = ratio.en.l[gsfb];
            if e > 0.0 {
                let mut x = en0 * ratio.thm.l[gsfb] * masking_lower / e;
                if params.athaa_fix {
                    x *= factors.longfact[gsfb];
                }
                x_min = x_min.max(x);
            }
        }
        xmin[pos] = if params.athaa_fix { x_min } else { x_min * factors.longfact[gsfb] };
        pos += 1;
        gsfb += 1;
    }

    let mut max_nonzero = GRANULE_SIZE - 1;
    if gi.block_type != BlockType::Short {
        let mut k = GRANULE_SIZE;
        while k > 0 {
            k -= 1;
            if gi.xr[k] != 0.0 {
                break;
            }
            max_nonzero = k;
        }
    }
    gi.max_nonzero_coeff = max_nonzero;

    let mut sfb = gi.sfb_smin;
    while gsfb < gi.psymax {
        let tmp_ath = if params.ath_adjusted {
            ath_adjust(ath.adjust, ath.s[sfb], ath.floor)
        } else {
            ath.adjust * ath.s[sfb]
        };
        let width = gi.width[gsfb];
        for b in 0..3 {
            let (en0, mut rh2) = band_energy(&gi.xr[j..j + width], tmp_ath / width as f32);
            j += width;
            if en0 > tmp_ath {
                ath_over += 1;
            }
            if sfb == SBPSY_S {
                rh2 = rh2.max(tmp_ath * factors.shortfact[sfb]);
            }
            let mut x_min = if params.athaa_fix { rh2 } else { tmp_ath };
            if !params.ath_only && !params.ath_short {
                let e = ratio.en.s[sfb][b];
                if e > 0.0 {
                    let mut x = en0 * ratio.thm.s[sfb][b] * masking_lower / e;
                    if params.athaa_fix {
                        x *= factors.shortfact[sfb];
                    }
                    x_min = x_min.max(x);
                }
            }
            xmin[pos] = if params.athaa_fix { x_min } else { x_min * factors.shortfact[sfb] };
            pos += 1;
        }
        if params.use_temporal {
            let w = pos - 3;
            if xmin[w] > xmin[w + 1] {
                xmin[w + 1] += (xmin[w] - xmin[w + 1]) * params.decay;
            }
            if xmin[w + 1] > xmin[w + 2] {
                xmin[w + 2] += (xmin[w + 1] - xmin[w + 2]) * params.decay;
            }
        }
        sfb += 1;
        gsfb += 3;
    }

    ath_over
}

/// Squared quantization error of the lines `start..start + len`
fn band_noise(gi: &GranuleInfo, start: usize, len: usize, step: f32) -> f32 {
    let xr = &gi.xr[start..start + len];
    if start > gi.count1 {
        return xr.iter().map(|&x| x * x).sum();
    }
    let ix = &gi.l3_enc[start..start + len];
    xr.iter()
        .zip(ix.iter())
        .map(|(&x, &q)| {
            let t = x.abs() - POW43[q as usize] * step;
            t * t
        })
        .sum()
}

/// Measure the noise of the current quantization of `gi` against `xmin`.
///
/// `distort[sfb]` receives noise over allowed noise per slot. With a
/// cache, slots whose step and global gain match the cached entry reuse
/// the stored noise.
pub fn calc_noise(
    gi: &GranuleInfo,
    xmin: &[f32; SFBMAX],
    distort: &mut [f32; SFBMAX],
    mut cache: Option<&mut NoiseCache>,
) -> CalcNoiseResult {
    let mut res = CalcNoiseResult { max_noise: -20.0, ..CalcNoiseResult::default() };
    let mut j = 0;

    for sfb in 0..gi.psymax {
        let s = gi.band_step(sfb, &PRETAB);
        let width = gi.width[sfb];

        let cached = cache.as_deref().and_then(|c| c.lookup(sfb, s, gi.global_gain));
        let noise = match cached {
            Some((noise, noise_log)) => {
                j += width;
                distort[sfb] = noise / xmin[sfb];
                noise_log
            }
            None => {
                let step = pow20(s.max(-(Q_MAX2 as i32)));
                let mut len = width;
                if j + width > gi.max_nonzero_coeff {
                    let useful = gi.max_nonzero_coeff as i64 - j as i64 + 1;
                    len = if useful > 0 { (useful as usize >> 1) << 1 } else { 0 };
                }
                let noise = band_noise(gi, j, len, step);
                j += width;

                let ratio = noise / xmin[sfb];
                distort[sfb] = ratio;
                let noise_log = (ratio.max(1e-20)).log10();
                if let Some(c) = cache.as_deref_mut() {
                    c.store(sfb, s, gi.global_gain, noise, noise_log);
                }
                noise_log
            }
        };

        res.tot_noise += noise;
        if noise > 0.0 {
            let tmp = ((noise * 10.0 + 0.5) as i32).max(1);
            res.over_ssd += tmp * tmp;
            res.over_count += 1;
            res.over_noise += noise;
        }
        res.max_noise = res.max_noise.max(noise);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ath::AthConfig;
    use crate::tables::scalefac_bands;
    use crate::types::{SBMAX_L, SBMAX_S};

    fn long_granule() -> GranuleInfo {
        let bands = scalefac_bands(0, 1, 44100);
        let mut gi = GranuleInfo::default();
        for sfb in 0..SBMAX_L {
            gi.width[sfb] = bands.l[sfb + 1] - bands.l[sfb];
        }
        gi
    }

    fn short_granule() -> GranuleInfo {
        let bands = scalefac_bands(0, 1, 44100);
        let mut gi = GranuleInfo::default();
        gi.block_type = BlockType::Short;
        gi.sfb_lmax = 0;
        gi.sfb_smin = 0;
        gi.psy_lmax = 0;
        gi.sfbmax = 3 * SBPSY_S;
        gi.psymax = 3 * SBPSY_S;
        gi.sfbdivide = gi.sfbmax - 18;
        for sfb in 0..SBMAX_S {
            for w in 0..3 {
                gi.width[3 * sfb + w] = bands.s[sfb + 1] - bands.s[sfb];
                gi.window[3 * sfb + w] = w;
            }
        }
        gi
    }

    fn ath() -> Ath {
        Ath::new(&scalefac_bands(0, 1, 44100), 44100, &AthConfig::default())
    }

    #[test]
    fn test_silence_has_no_band_above_ath() {
        let mut gi = long_granule();
        let mut xmin = [0.0; SFBMAX];
        let over = calc_xmin(
            &ath(),
            &BandFactors::from_nspsytune(1),
            &MaskingParams::default(),
            &PsyRatio::default(),
            &mut gi,
            &mut xmin,
        );
        assert_eq!(over, 0);
        assert!(xmin[..SBPSY_L].iter().all(|&v| v > 0.0));
        assert_eq!(gi.max_nonzero_coeff, 0);
    }

    #[test]
    fn test_masking_raises_allowed_noise() {
        let mut gi = long_granule();
        for x in gi.xr[..100].iter_mut() {
            *x = 0.1;
        }
        let mut ratio = PsyRatio::default();
        ratio.en.l[3] = 1.0;
        ratio.thm.l[3] = 0.5;
        let mut xmin = [0.0; SFBMAX];
        let over = calc_xmin(
            &ath(),
            &BandFactors::from_nspsytune(1),
            &MaskingParams::default(),
            &ratio,
            &mut gi,
            &mut xmin,
        );
        assert!(over > 0);
        let en3: f32 = gi.xr[12..16].iter().map(|x| x * x).sum();
        assert!((xmin[3] - en3 * 0.5).abs() < 1e-6);
        assert_eq!(gi.max_nonzero_coeff, 100);
    }

    #[test]
    fn test_temporal_masking_decays_into_later_windows() {
        let mut gi = short_granule();
        for x in gi.xr.iter_mut() {
            *x = 0.05;
        }
        let mut ratio = PsyRatio::default();
        ratio.en.s[4] = [1.0, 1.0, 1.0];
        ratio.thm.s[4] = [1.0, 0.0, 0.0];
        let params = MaskingParams { decay: 0.5, ..MaskingParams::default() };
        let mut xmin = [0.0; SFBMAX];
        calc_xmin(&ath(), &BandFactors::from_nspsytune(1), &params, &ratio, &mut gi, &mut xmin);
        let w0 = xmin[12];
        assert!(xmin[13] < w0 && xmin[13] > 0.0);
        assert!(xmin[14] < xmin[13]);
    }

    #[test]
    fn test_zero_spectrum_measures_no_noise() {
        let gi = long_granule();
        let xmin = [1.0; SFBMAX];
        let mut distort = [0.0; SFBMAX];
        let res = calc_noise(&gi, &xmin, &mut distort, None);
        assert_eq!(res.over_count, 0);
        assert_eq!(res.max_noise, -20.0);
        assert_eq!(res.tot_noise, -20.0 * SBPSY_L as f32);
    }

    #[test]
    fn test_unquantized_band_counts_as_over() {
        let mut gi = long_granule();
        gi.xr[0] = 1.0;
        gi.max_nonzero_coeff = 575;
        gi.count1 = 0;
        gi.big_values = 0;
        let xmin = [1e-3; SFBMAX];
        let mut distort = [0.0; SFBMAX];
        let res = calc_noise(&gi, &xmin, &mut distort, None);
        assert_eq!(res.over_count, 1);
        assert!((distort[0] - 1000.0).abs() < 1e-2);
        assert!((res.max_noise - 3.0).abs() < 1e-4);
        assert_eq!(res.over_ssd, 30 * 30);
    }

    #[test]
    fn test_cache_reuses_matching_entries() {
        let mut gi = long_granule();
        for (i, x) in gi.xr.iter_mut().enumerate() {
            *x = (i % 7) as f32 * 0.01;
        }
        gi.max_nonzero_coeff = 575;
        gi.count1 = 576;
        gi.big_values = 576;
        gi.global_gain = 150;
        let xmin = [1e-4; SFBMAX];
        let mut cache = NoiseCache::default();
        let mut d1 = [0.0; SFBMAX];
        let mut d2 = [0.0; SFBMAX];
        let first = calc_noise(&gi, &xmin, &mut d1, Some(&mut cache));
        let second = calc_noise(&gi, &xmin, &mut d2, Some(&mut cache));
        let fresh = calc_noise(&gi, &xmin, &mut d2, None);
        assert_eq!(first, second);
        assert_eq!(first, fresh);
        assert_eq!(d1, d2);
    }
}
