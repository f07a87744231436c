//! Absolute threshold of hearing
//!
//! Per-band ATH energies in the MDCT domain, the equal-loudness weights
//! used to measure how loud a granule is, and the adaptive ATH gain that
//! lowers the threshold for quiet passages.

use crate::types::{ScalefacBands, GRANULE_SIZE, PSFB12, PSFB21, SBMAX_L, SBMAX_S};

/// dB offset between the ATH formula and the MDCT energy scale
const NS_ATH_SCALE: f32 = 100.0;

/// ATH curve selection and adaptive-ATH tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AthConfig {
    /// Curve shape, 0..=5
    pub ath_type: u8,
    /// Curve parameter for types 4 and 5
    pub ath_curve: f32,
    /// Lowers (positive) or raises the whole curve, in dB
    pub ath_lower_db: f32,
    /// Replace the curve with -200 dB everywhere
    pub no_ath: bool,
    /// Adaptive ATH type, 0 disables adaptation
    pub aa_type: u8,
    /// Adaptive ATH sensitivity offset in dB
    pub aa_sensitivity_db: f32,
}

impl Default for AthConfig {
    fn default() -> Self {
        Self {
            ath_type: 4,
            ath_curve: 4.0,
            ath_lower_db: 0.0,
            no_ath: false,
            aa_type: 3,
            aa_sensitivity_db: 0.0,
        }
    }
}

/// Hearing threshold in dB SPL at `f` Hz, Gabriel Bouvigne's formula
fn ath_formula_gb(f: f32, value: f32, f_min: f32, f_max: f32) -> f32 {
    let mut f = if f < -0.3 { 3410.0 } else { f };
    f /= 1000.0;
    f = f.max(f_min).min(f_max);
    let f = f as f64;
    let ath = 3.640 * f.powf(-0.8) - 6.800 * (-0.6 * (f - 3.4).powi(2)).exp()
        + 6.000 * (-0.15 * (f - 8.7).powi(2)).exp()
        + (0.6 + 0.04 * value as f64) * 0.001 * f.powi(4);
    ath as f32
}

/// ATH in dB at `f` Hz for the configured curve
pub fn ath_formula(f: f32, config: &AthConfig) -> f32 {
    match config.ath_type {
        0 => ath_formula_gb(f, 9.0, 0.1, 24.0),
        1 => ath_formula_gb(f, -1.0, 0.1, 24.0),
        3 => ath_formula_gb(f, 1.0, 0.1, 24.0) + 6.0,
        4 => ath_formula_gb(f, config.ath_curve, 0.1, 24.0),
        5 => ath_formula_gb(f, config.ath_curve, 3.41, 16.1),
        _ => ath_formula_gb(f, 0.0, 0.1, 24.0),
    }
}

/// Rescale an ATH energy `x` by the adaptive gain `a` while keeping the
/// noise floor in place; high-threshold regions move more than low ones
pub fn ath_adjust(a: f32, x: f32, ath_floor: f32) -> f32 {
    const O: f32 = 90.308_733_62;
    const P: f32 = 94.824_448_63;
    let mut u = 10.0 * x.max(1e-37).log10();
    let v = a * a;
    let mut w = 0.0f32;
    u -= ath_floor;
    if v > 1e-20 {
        w = 1.0 + v.log10() * 10.0 / O;
    }
    if w < 0.0 {
        w = 0.0;
    }
    u *= w;
    u += ath_floor + O - P;
    10f64.powf(0.1 * u as f64) as f32
}

/// ATH energies per band plus the adaptive state
#[derive(Debug, Clone)]
pub struct Ath {
    pub l: [f32; SBMAX_L],
    pub s: [f32; SBMAX_S],
    pub psfb21: [f32; PSFB21],
    pub psfb12: [f32; PSFB12],
    /// ATH energy at 3.41 kHz, in dB
    pub floor: f32,
    /// Current adaptive gain applied to the ATH
    pub adjust: f32,
    /// Target the gain may move towards on the next frame
    pub adjust_limit: f32,
    /// Equal-loudness weight per MDCT line, summing to one
    pub eql_w: [f32; GRANULE_SIZE],
    use_adjust: u8,
    aa_sensitivity_p: f32,
}

impl Ath {
    pub fn new(bands: &ScalefacBands, sample_rate: u32, config: &AthConfig) -> Self {
        let sr = sample_rate as f32;
        let lower = -config.ath_lower_db / 10.0;
        let mdct = |f: f32| -> f32 {
            let ath = ath_formula(f, config) - NS_ATH_SCALE;
            10f64.powf((ath / 10.0 + lower) as f64) as f32
        };
        let band_min = |start: usize, end: usize, line_freq: f32| -> f32 {
            (start..end).map(|i| mdct(i as f32 * line_freq)).fold(f32::MAX, f32::min)
        };
        let long_freq = sr / (2.0 * 576.0);
        let short_freq = sr / (2.0 * 192.0);

        let mut l = [0.0; SBMAX_L];
        for (sfb, v) in l.iter_mut().enumerate() {
            *v = band_min(bands.l[sfb], bands.l[sfb + 1], long_freq);
        }
        let mut psfb21 = [0.0; PSFB21];
        for (sfb, v) in psfb21.iter_mut().enumerate() {
            *v = band_min(bands.psfb21[sfb], bands.psfb21[sfb + 1], long_freq);
        }
        let mut s = [0.0; SBMAX_S];
        for (sfb, v) in s.iter_mut().enumerate() {
            let width = bands.s[sfb + 1] - bands.s[sfb];
            *v = band_min(bands.s[sfb], bands.s[sfb + 1], short_freq) * width as f32;
        }
        let mut psfb12 = [0.0; PSFB12];
        let width12 = (bands.s[13] - bands.s[12]) as f32;
        for (sfb, v) in psfb12.iter_mut().enumerate() {
            *v = band_min(bands.psfb12[sfb], bands.psfb12[sfb + 1], short_freq) * width12;
        }

        if config.no_ath {
            l.fill(1e-20);
            s.fill(1e-20);
            psfb21.fill(1e-20);
            psfb12.fill(1e-20);
        }

        let mut eql_w = [0.0f32; GRANULE_SIZE];
        let mut balance = 0.0f64;
        for (i, w) in eql_w.iter_mut().enumerate() {
            let freq = (i as f32 + 0.5) * long_freq;
            *w = (1.0 / 10f64.powf(ath_formula(freq, config) as f64 / 10.0)) as f32;
            balance += *w as f64;
        }
        for w in eql_w.iter_mut() {
            *w = (*w as f64 / balance) as f32;
        }

        Self {
            l,
            s,
            psfb21,
            psfb12,
            floor: 10.0 * mdct(-1.0).log10(),
            adjust: 0.01,
            adjust_limit: 1.0,
            eql_w,
            use_adjust: config.aa_type,
            aa_sensitivity_p: 10f64.powf(config.aa_sensitivity_db as f64 / -10.0) as f32,
        }
    }

    /// Weighted power of one granule's spectrum; about one for full band
    /// noise at full scale
    pub fn loudness(&self, xr: &[f32; GRANULE_SIZE]) -> f32 {
        let sum: f32 = xr.iter().zip(self.eql_w.iter()).map(|(&x, &w)| x * x * w).sum();
        sum * GRANULE_SIZE as f32
    }

    /// Move the adaptive gain after a frame whose granules measured
    /// `loudness[gr][ch]`. Rising loudness snaps to full ATH after a one
    /// frame delay, falling loudness lowers the ATH gradually.
    pub fn update_adjust(&mut self, loudness: &[[f32; 2]; 2], channels: usize, mode_gr: usize) {
        if self.use_adjust == 0 {
            self.adjust = 1.0;
            return;
        }
        let granule_pow = |gr: usize| {
            let first = loudness[gr][0];
            if channels == 2 {
                first + loudness[gr][1]
            } else {
                first + first
            }
        };
        let mut max_pow = granule_pow(0);
        if mode_gr == 2 {
            max_pow = max_pow.max(granule_pow(1));
        }
        max_pow *= 0.5;
        max_pow *= self.aa_sensitivity_p;

        if max_pow > 0.03125 {
            if self.adjust >= 1.0 {
                self.adjust = 1.0;
            } else if self.adjust < self.adjust_limit {
                self.adjust = self.adjust_limit;
            }
            self.adjust_limit = 1.0;
        } else {
            let adj_lim_new = 31.98 * max_pow + 0.000625;
            if self.adjust >= adj_lim_new {
                self.adjust *= adj_lim_new * 0.075 + 0.925;
                if self.adjust < adj_lim_new {
                    self.adjust = adj_lim_new;
                }
            } else if self.adjust_limit >= adj_lim_new {
                self.adjust = adj_lim_new;
            } else if self.adjust < self.adjust_limit {
                self.adjust = self.adjust_limit;
            }
            self.adjust_limit = adj_lim_new;
        }
    }
}

/// Per-band threshold scaling from the `exp_nspsytune` bit fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandFactors {
    pub longfact: [f32; SBMAX_L],
    pub shortfact: [f32; SBMAX_S],
}

impl BandFactors {
    /// Decode bass/alto/treble/sfb21 offsets (6-bit signed quarter dB
    /// fields at bits 2, 8, 14 and 20)
    pub fn from_nspsytune(exp_nspsytune: i32) -> Self {
        let field = |shift: u32| {
            let mut i = (exp_nspsytune >> shift) & 63;
            if i >= 32 {
                i -= 64;
            }
            10f64.powf(i as f64 / 4.0 / 10.0) as f32
        };
        let bass = field(2);
        let alto = field(8);
        let treble = field(14);
        let sfb21 = treble * field(20);

        let mut longfact = [0.0; SBMAX_L];
        for (i, f) in longfact.iter_mut().enumerate() {
            *f = match i {
                0..=6 => bass,
                7..=13 => alto,
                14..=20 => treble,
                _ => sfb21,
            };
        }
        let mut shortfact = [0.0; SBMAX_S];
        for (i, f) in shortfact.iter_mut().enumerate() {
            *f = match i {
                0..=5 => bass,
                6..=10 => alto,
                11 => treble,
                _ => sfb21,
            };
        }
        Self { longfact, shortfact }
    }
}
