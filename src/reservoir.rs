//! Bit reservoir
//!
//! Frames may hand unused main data bits to later frames through
//! `main_data_begin`. The reservoir tracks how many such bits are banked,
//! hands out per-granule targets, and decides how much stuffing a frame
//! has to carry when the bank would overflow.

use crate::config::SessionConfig;
use crate::tables::BITRATE_TABLE;
use crate::types::{GranuleInfo, SideInfo};
use log::trace;

/// Bits a granule may aim for and how much it may borrow on top
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservoirGrant {
    pub targ_bits: i32,
    pub extra_bits: i32,
    /// Set when the reservoir is more than 90% full
    pub nearly_full: bool,
}

/// Output of [`BitReservoir::frame_begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudget {
    /// Most main data bits the frame may carry, banked bits included
    pub full_frame_bits: i32,
    /// Average main data bits per granule
    pub mean_bits: i32,
}

/// Bit reservoir state carried from frame to frame
#[derive(Debug, Clone)]
pub struct BitReservoir {
    /// Banked bits (may dip below zero inside a frame)
    resv_size: i32,
    /// Ceiling for the current frame, a multiple of 8
    resv_max: i32,
    mode_gr: i32,
    sideinfo_bits: i32,
    /// Largest frame a decoder has to buffer, in bits
    buffer_constraint: i32,
    disabled: bool,
}

impl BitReservoir {
    /// Create an empty reservoir for a session
    pub fn new(session: &SessionConfig) -> Self {
        let version = session.version.table_index();
        let buffer_constraint = if session.strict_iso {
            let max_index = if session.sample_rate < 16000 { 8 } else { 14 };
            let max_kbps = BITRATE_TABLE[version][max_index] as i32;
            8 * (session.mode_gr as i32 * 72000 * max_kbps / session.sample_rate as i32)
        } else {
            8 * 1440
        };
        Self::with_limits(
            session.mode_gr,
            session.sideinfo_len,
            buffer_constraint,
            session.disable_reservoir,
        )
    }

    /// Reservoir with explicit limits
    pub fn with_limits(
        mode_gr: usize,
        sideinfo_len: usize,
        buffer_constraint: i32,
        disabled: bool,
    ) -> Self {
        Self {
            resv_size: 0,
            resv_max: 0,
            mode_gr: mode_gr as i32,
            sideinfo_bits: sideinfo_len as i32 * 8,
            buffer_constraint,
            disabled,
        }
    }

    /// Start a frame of `frame_bits` bits (header and padding included).
    ///
    /// Recomputes the reservoir ceiling for this frame length and returns
    /// how many main data bits the frame can spend.
    pub fn frame_begin(&mut self, frame_bits: i32) -> FrameBudget {
        let mean_bits = (frame_bits - self.sideinfo_bits) / self.mode_gr;

        // main_data_begin is 9 bits in MPEG-1 and 8 bits otherwise
        let resv_limit = 8 * 256 * self.mode_gr - 8;

        self.resv_max = (self.buffer_constraint - frame_bits).min(resv_limit);
        if self.resv_max < 0 || self.disabled {
            self.resv_max = 0;
        }

        let full_frame_bits = (mean_bits * self.mode_gr + self.resv_size.min(self.resv_max))
            .min(self.buffer_constraint);

        trace!(
            "reservoir begin: frame {} mean {} size {} max {}",
            frame_bits,
            mean_bits,
            self.resv_size,
            self.resv_max
        );

        FrameBudget {
            full_frame_bits,
            mean_bits,
        }
    }

    /// Target and extra bits for one granule.
    ///
    /// `compensate` adds back the mean of a granule already spent in this
    /// frame (CBR second granule). `substep_shaping` bit 0 lowers the
    /// ceiling to 90%.
    pub fn max_bits(&self, mean_bits: i32, compensate: bool, substep_shaping: u8) -> ReservoirGrant {
        let mut resv_size = self.resv_size;
        let mut resv_max = self.resv_max;
        if compensate {
            resv_size += mean_bits;
        }
        if substep_shaping & 1 != 0 {
            resv_max = (resv_max as f32 * 0.9) as i32;
        }

        let mut targ_bits = mean_bits;
        let add_bits;
        let nearly_full = resv_size * 10 > resv_max * 9;
        if nearly_full {
            add_bits = resv_size - (resv_max * 9) / 10;
            targ_bits += add_bits;
        } else {
            add_bits = 0;
            // build the reservoir up slowly
            if !self.disabled && substep_shaping & 1 == 0 {
                targ_bits -= (0.1 * mean_bits as f32) as i32;
            }
        }

        let six_tenths = (self.resv_max * 6) / 10;
        let extra_bits = (resv_size.min(six_tenths) - add_bits).max(0);

        ReservoirGrant {
            targ_bits,
            extra_bits,
            nearly_full,
        }
    }

    /// Charge the reservoir with the bits a finished granule used
    pub fn adjust(&mut self, gi: &GranuleInfo) {
        self.resv_size -= gi.part2_3_length + gi.part2_length;
    }

    /// Close a frame: credit the frame's bits, byte align, and move any
    /// overflow into ancillary stuffing.
    ///
    /// Stuffing goes first into the previous frame's main data (shrinking
    /// `main_data_begin`) and the remainder into this frame's.
    pub fn frame_end(&mut self, side: &mut SideInfo, mean_bits: i32) {
        self.resv_size += mean_bits * self.mode_gr;
        side.resv_drain_pre = 0;
        side.resv_drain_post = 0;

        let mut stuffing_bits = self.resv_size.rem_euclid(8);

        let over_bits = (self.resv_size - stuffing_bits) - self.resv_max;
        if over_bits > 0 {
            stuffing_bits += over_bits;
        }

        let mdb_bytes = (side.main_data_begin * 8).min(stuffing_bits) / 8;
        side.resv_drain_pre += 8 * mdb_bytes;
        stuffing_bits -= 8 * mdb_bytes;
        self.resv_size -= 8 * mdb_bytes;
        side.main_data_begin -= mdb_bytes;

        side.resv_drain_post += stuffing_bits;
        self.resv_size -= stuffing_bits;

        trace!(
            "reservoir end: size {} drain pre {} post {}",
            self.resv_size,
            side.resv_drain_pre,
            side.resv_drain_post
        );
    }

    /// Force the fill level, used when the bitstream disagrees with it
    pub fn resync(&mut self, bits: i32) {
        self.resv_size = bits;
    }

    /// Get current reservoir size
    pub fn reservoir_size(&self) -> i32 {
        self.resv_size
    }

    /// Get maximum reservoir size for the current frame
    pub fn reservoir_max(&self) -> i32 {
        self.resv_max
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}
