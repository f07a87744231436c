//! MDCT (Modified Discrete Cosine Transform) of the subband samples
//!
//! Each subband's 18 samples of the current granule, together with the
//! 18 of the previous one, go through an 18 point MDCT (long windows) or
//! three 6 point MDCTs (short windows). Long blocks then get the alias
//! reduction butterflies between neighbouring subbands.
//!
//! Short block output is window-interleaved: line `l` of window `w` is
//! stored at `xr[3 * l + w]`.

use crate::types::{BlockType, GRANULE_SIZE, SBLIMIT};
use lazy_static::lazy_static;
use std::f64::consts::PI;

/// Alias reduction coefficients (table B.9)
const ALIAS_COEF: [f64; 8] = [-0.6, -0.535, -0.33, -0.185, -0.095, -0.041, -0.0142, -0.0037];

struct MdctTables {
    /// Window shapes indexed by block type, 36 taps
    window: [[f32; 36]; 4],
    /// `cos(pi / 72 * (2n + 19)(2m + 1))`, scaled to unit gain
    cos_l: [[f32; 36]; 18],
    /// Short window, 12 taps
    window_s: [f32; 12],
    /// `cos(pi / 24 * (2n + 7)(2m + 1))`, scaled to unit gain
    cos_s: [[f32; 12]; 6],
    ca: [f32; 8],
    cs: [f32; 8],
}

lazy_static! {
    static ref TABLES: MdctTables = {
        let sin36 = |n: usize| (PI / 36.0 * (n as f64 + 0.5)).sin() as f32;
        let sin12 = |n: usize| (PI / 12.0 * (n as f64 + 0.5)).sin() as f32;

        let mut window = [[0.0f32; 36]; 4];
        for n in 0..36 {
            window[BlockType::Norm as usize][n] = sin36(n);
        }
        for n in 0..18 {
            window[BlockType::Start as usize][n] = sin36(n);
            window[BlockType::Stop as usize][n + 18] = sin36(n + 18);
        }
        for n in 18..24 {
            window[BlockType::Start as usize][n] = 1.0;
        }
        for n in 24..30 {
            window[BlockType::Start as usize][n] = sin12(n - 18);
        }
        for n in 6..12 {
            window[BlockType::Stop as usize][n] = sin12(n - 6);
        }
        for n in 12..18 {
            window[BlockType::Stop as usize][n] = 1.0;
        }

        let mut cos_l = [[0.0f32; 36]; 18];
        for (m, row) in cos_l.iter_mut().enumerate() {
            for (n, v) in row.iter_mut().enumerate() {
                *v = ((PI / 72.0 * (2 * n + 19) as f64 * (2 * m + 1) as f64).cos() / 9.0) as f32;
            }
        }

        let mut window_s = [0.0f32; 12];
        for (n, v) in window_s.iter_mut().enumerate() {
            *v = sin12(n);
        }
        let mut cos_s = [[0.0f32; 12]; 6];
        for (m, row) in cos_s.iter_mut().enumerate() {
            for (n, v) in row.iter_mut().enumerate() {
                *v = ((PI / 24.0 * (2 * n + 7) as f64 * (2 * m + 1) as f64).cos() / 3.0) as f32;
            }
        }

        let mut ca = [0.0f32; 8];
        let mut cs = [0.0f32; 8];
        for (i, &c) in ALIAS_COEF.iter().enumerate() {
            let sq = (1.0 + c * c).sqrt();
            ca[i] = (c / sq) as f32;
            cs[i] = (1.0 / sq) as f32;
        }

        MdctTables { window, cos_l, window_s, cos_s, ca, cs }
    };
}

/// Per-channel MDCT state: the previous granule's subband samples
#[derive(Debug, Clone)]
pub struct Mdct {
    prev: Vec<[[f32; SBLIMIT]; 18]>,
}

impl Mdct {
    pub fn new(channels: usize) -> Self {
        Self {
            prev: vec![[[0.0; SBLIMIT]; 18]; channels],
        }
    }

    /// Transform one granule of subband samples of `ch` into `xr`
    pub fn transform(
        &mut self,
        ch: usize,
        sb: &[[f32; SBLIMIT]; 18],
        block_type: BlockType,
        xr: &mut [f32; GRANULE_SIZE],
    ) {
        let tables = &*TABLES;
        let mut cur = *sb;
        // undo the frequency inversion of odd subbands
        for slot in cur.iter_mut().skip(1).step_by(2) {
            for v in slot.iter_mut().skip(1).step_by(2) {
                *v = -*v;
            }
        }

        let prev = &self.prev[ch];
        let mut input = [0.0f32; 36];
        for band in 0..SBLIMIT {
            for k in 0..18 {
                input[k] = prev[k][band];
                input[k + 18] = cur[k][band];
            }
            let out = &mut xr[band * 18..band * 18 + 18];

            if block_type == BlockType::Short {
                for w in 0..3 {
                    let seg = &input[6 + 6 * w..18 + 6 * w];
                    for (m, cos) in tables.cos_s.iter().enumerate() {
                        let sum: f32 = seg
                            .iter()
                            .zip(tables.window_s.iter())
                            .zip(cos.iter())
                            .map(|((&x, &win), &c)| x * win * c)
                            .sum();
                        // line 6 * band + m of window w
                        out[3 * m + w] = sum;
                    }
                }
            } else {
                let window = &tables.window[block_type as usize];
                for (m, cos) in tables.cos_l.iter().enumerate() {
                    out[m] = input
                        .iter()
                        .zip(window.iter())
                        .zip(cos.iter())
                        .map(|((&x, &win), &c)| x * win * c)
                        .sum();
                }
            }
        }

        if block_type != BlockType::Short {
            for band in 1..SBLIMIT {
                let edge = band * 18;
                for i in 0..8 {
                    let lo = xr[edge - 1 - i];
                    let hi = xr[edge + i];
                    xr[edge - 1 - i] = lo * tables.cs[i] - hi * tables.ca[i];
                    xr[edge + i] = hi * tables.cs[i] + lo * tables.ca[i];
                }
            }
        }

        // the next granule's window overlaps these samples
        self.prev[ch] = cur;
    }

    pub fn reset(&mut self) {
        for p in self.prev.iter_mut() {
            *p = [[0.0; SBLIMIT]; 18];
        }
    }
}
