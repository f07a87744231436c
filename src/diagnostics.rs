//! Per-frame encoding summaries
//!
//! Every encoded frame yields a [`FrameSummary`]: the bitrate it settled
//! on, the reservoir fill it left behind and what the quantization loop
//! chose for each granule. With the `diagnostics` feature an encoder also
//! keeps them in a [`SessionLog`] that can be exported as JSON.

use crate::iteration::FrameOutcome;
use crate::types::{BlockType, SideInfo, MAX_CHANNELS, MAX_GRANULES};

/// What the quantization loop settled on for one granule and channel
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub struct GranuleSummary {
    pub global_gain: i32,
    pub scalefac_scale: i32,
    /// Scalefactor bits
    pub part2_length: i32,
    /// Huffman bits
    pub part3_length: i32,
    pub targ_bits: i32,
    pub over_count: i32,
    pub block_type: BlockType,
    pub analog_silence: bool,
}

/// One encoded frame
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "diagnostics", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameSummary {
    /// Zero-based frame number
    pub frame: usize,
    pub bitrate_index: usize,
    pub padding: bool,
    pub mid_side: bool,
    /// Reservoir fill in bits after the frame was closed
    pub reservoir_bits: i32,
    pub main_data_begin: i32,
    /// Only the first `mode_gr` rows and `channels` columns are used
    pub granules: [[GranuleSummary; MAX_CHANNELS]; MAX_GRANULES],
}

impl FrameSummary {
    pub(crate) fn new(
        frame: usize,
        outcome: &FrameOutcome,
        side: &SideInfo,
        mid_side: bool,
        reservoir_bits: i32,
    ) -> Self {
        let mut granules = [[GranuleSummary::default(); MAX_CHANNELS]; MAX_GRANULES];
        for (gr, row) in granules.iter_mut().enumerate() {
            for (ch, g) in row.iter_mut().enumerate() {
                let gi = &side.tt[gr][ch];
                *g = GranuleSummary {
                    global_gain: gi.global_gain,
                    scalefac_scale: gi.scalefac_scale,
                    part2_length: gi.part2_length,
                    part3_length: gi.part2_3_length,
                    targ_bits: outcome.targ_bits[gr][ch],
                    over_count: outcome.over_count[gr][ch],
                    block_type: gi.block_type,
                    analog_silence: outcome.analog_silence[gr][ch],
                };
            }
        }
        Self {
            frame,
            bitrate_index: outcome.bitrate_index,
            padding: outcome.padding,
            mid_side,
            reservoir_bits,
            main_data_begin: side.main_data_begin,
            granules,
        }
    }

    /// Main data bits of one granule and channel
    pub fn granule_bits(&self, gr: usize, ch: usize) -> i32 {
        let g = &self.granules[gr][ch];
        g.part2_length + g.part3_length
    }
}

#[cfg(feature = "diagnostics")]
pub use log_export::SessionLog;

#[cfg(feature = "diagnostics")]
mod log_export {
    use super::FrameSummary;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    /// Frame summaries of one encoder instance
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SessionLog {
        pub created_at: DateTime<Utc>,
        pub sample_rate: u32,
        pub channels: usize,
        pub frames: Vec<FrameSummary>,
    }

    impl SessionLog {
        pub fn new(sample_rate: u32, channels: usize) -> Self {
            Self {
                created_at: Utc::now(),
                sample_rate,
                channels,
                frames: Vec::new(),
            }
        }

        pub fn record(&mut self, summary: FrameSummary) {
            self.frames.push(summary);
        }

        pub fn to_json(&self) -> serde_json::Result<String> {
            serde_json::to_string_pretty(self)
        }

        pub fn from_json(json: &str) -> serde_json::Result<Self> {
            serde_json::from_str(json)
        }

        /// Write the log as pretty-printed JSON
        pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
            let json = self.to_json()?;
            let mut file = File::create(path)?;
            file.write_all(json.as_bytes())?;
            Ok(())
        }

        pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
            let content = std::fs::read_to_string(path)?;
            Ok(Self::from_json(&content)?)
        }
    }
}
