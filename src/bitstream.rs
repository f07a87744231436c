//! Bitstream writing for Layer III frames
//!
//! The [`BitstreamWriter`] keeps two streams apart: the fixed-size header
//! plus side information of every frame, and the main data that flows
//! through the bit reservoir. Headers wait in a queue and are spliced
//! into the output once the main data reaches their frame boundary, so a
//! frame's main data may start inside the slots of earlier frames.

use crate::config::{MpegVersion, SessionConfig, StereoMode};
use crate::error::{EncodingError, EncodingResult};
use crate::huffman::HT;
use crate::iteration::FrameOutcome;
use crate::reservoir::BitReservoir;
use crate::tables::{SLEN1_TAB, SLEN2_TAB};
use crate::types::{BlockType, GranuleInfo, SideInfo};
use log::{trace, warn};
use std::collections::VecDeque;

const CRC16_POLYNOMIAL: u32 = 0x8005;

/// Frame-level header fields not stored in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub bitrate_index: usize,
    pub padding: bool,
    /// 2 when the frame is coded mid/side, 0 otherwise
    pub mode_ext: u32,
}

impl FrameHeader {
    pub fn new(session: &SessionConfig, outcome: &FrameOutcome, mid_side: bool) -> Self {
        let mode_ext = if session.mode == StereoMode::JointStereo && mid_side { 2 } else { 0 };
        Self {
            bitrate_index: outcome.bitrate_index,
            padding: outcome.padding,
            mode_ext,
        }
    }
}

/// Header and side information waiting for the main data to reach
/// `write_timing`
#[derive(Debug, Clone)]
struct PendingHeader {
    write_timing: usize,
    bytes: Vec<u8>,
}

/// Bitstream writer for MP3 frame data
#[derive(Debug, Clone)]
pub struct BitstreamWriter {
    /// Completed bytes not yet handed to the caller
    buffer: Vec<u8>,
    /// Bit cache for sub-byte operations
    cache: u32,
    /// Number of bits in cache
    cache_bits: u8,
    /// Bits written since the start of the stream, headers included
    position: usize,
    headers: VecDeque<PendingHeader>,
    /// Stream position where the next frame's header goes
    next_timing: usize,
}

impl BitstreamWriter {
    /// Create a new bitstream writer with specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            cache: 0,
            cache_bits: 0,
            position: 0,
            headers: VecDeque::new(),
            next_timing: 0,
        }
    }

    /// Append `bits` bits of main data, most significant first.
    ///
    /// A queued header is inserted first whenever the stream sits on its
    /// frame boundary.
    pub fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        let mut remaining = bits;
        while remaining > 0 {
            if self.cache_bits == 0 {
                self.insert_due_headers();
            }
            let room = 8 - u32::from(self.cache_bits);
            let k = room.min(remaining);
            remaining -= k;
            let chunk = (value >> remaining) & ((1u32 << k) - 1);
            self.cache = (self.cache << k) | chunk;
            self.cache_bits += k as u8;
            self.position += k as usize;
            if self.cache_bits == 8 {
                self.buffer.push(self.cache as u8);
                self.cache = 0;
                self.cache_bits = 0;
            }
        }
    }

    fn insert_due_headers(&mut self) {
        while self.cache_bits == 0
            && self
                .headers
                .front()
                .map_or(false, |h| h.write_timing == self.position)
        {
            if let Some(header) = self.headers.pop_front() {
                self.position += header.bytes.len() * 8;
                self.buffer.extend_from_slice(&header.bytes);
            }
        }
    }

    /// Ancillary zero bits
    fn drain(&mut self, mut bits: usize) {
        while bits > 0 {
            let k = bits.min(32);
            self.write_bits(0, k as u32);
            bits -= k;
        }
    }

    /// Main data slots of already queued frames that are still empty
    fn banked_bits(&self) -> i64 {
        let queued: usize = self.headers.iter().map(|h| h.bytes.len() * 8).sum();
        self.next_timing as i64 - self.position as i64 - queued as i64
    }

    /// Write one encoded frame.
    ///
    /// Emits the stuffing the reservoir asked for before the main data,
    /// queues header and side information, writes scalefactors and
    /// Huffman data of every granule, then the stuffing that goes after
    /// it. On return `side.main_data_begin` holds the value for the next
    /// frame. Returns the frame length in bits.
    pub fn format_frame(
        &mut self,
        session: &SessionConfig,
        side: &mut SideInfo,
        header: FrameHeader,
        reservoir: &mut BitReservoir,
    ) -> EncodingResult<i32> {
        let frame_bits = session.frame_bits(header.bitrate_index, header.padding);
        let max_begin = if session.mode_gr == 2 { 511 } else { 255 };
        if side.main_data_begin < 0 || side.main_data_begin > max_begin {
            return Err(EncodingError::BitstreamError(format!(
                "main_data_begin {} outside 0..={}",
                side.main_data_begin, max_begin
            )));
        }

        self.drain(side.resv_drain_pre.max(0) as usize);

        if self.position > self.next_timing {
            return Err(EncodingError::BitstreamError(format!(
                "main data overran the frame boundary at bit {} by {} bits",
                self.next_timing,
                self.position - self.next_timing
            )));
        }
        let bytes = encode_side_info(session, side, header);
        self.headers.push_back(PendingHeader {
            write_timing: self.next_timing,
            bytes,
        });
        self.next_timing += frame_bits as usize;

        let mut bits = 8 * session.sideinfo_len as i32;
        bits += self.write_main_data(session, side)?;
        self.drain(side.resv_drain_post.max(0) as usize);
        bits += side.resv_drain_post;
        self.insert_due_headers();

        side.main_data_begin += (frame_bits - bits) / 8;

        let banked = self.banked_bits();
        if banked != i64::from(reservoir.reservoir_size()) {
            warn!(
                "bitstream holds {} unfilled bits, reservoir expects {}",
                banked,
                reservoir.reservoir_size()
            );
        }
        if side.main_data_begin * 8 != reservoir.reservoir_size() {
            warn!(
                "main_data_begin {} bytes disagrees with reservoir of {} bits, resyncing",
                side.main_data_begin,
                reservoir.reservoir_size()
            );
            reservoir.resync(side.main_data_begin * 8);
        }

        trace!(
            "frame at bit {}: {} bits, next main_data_begin {}",
            self.next_timing - frame_bits as usize,
            frame_bits,
            side.main_data_begin
        );
        Ok(frame_bits)
    }

    fn write_main_data(&mut self, session: &SessionConfig, side: &SideInfo) -> EncodingResult<i32> {
        let mut total = 0;
        for gr in 0..session.mode_gr {
            for ch in 0..session.channels {
                let gi = &side.tt[gr][ch];
                let scale_bits = if session.mode_gr == 2 {
                    self.write_scalefactors(gi)
                } else {
                    self.write_lsf_scalefactors(gi)
                };
                let data_bits = if gi.block_type == BlockType::Short {
                    self.write_short_big_values(session, gi)
                } else {
                    self.write_long_big_values(session, gi)
                } + self.write_count1(gi);

                let counted = gi.part2_3_length + gi.part2_length;
                let written = scale_bits + data_bits;
                if written != counted {
                    return Err(EncodingError::BitCountMismatch { counted, written });
                }
                total += written;
            }
        }
        Ok(total)
    }

    fn write_scalefactors(&mut self, gi: &GranuleInfo) -> i32 {
        let slen1 = SLEN1_TAB[gi.scalefac_compress as usize];
        let slen2 = SLEN2_TAB[gi.scalefac_compress as usize];
        let mut bits = 0;
        for sfb in 0..gi.sfbmax {
            // shared with granule 0 through scfsi
            if gi.scalefac[sfb] == -1 {
                continue;
            }
            let slen = if sfb < gi.sfbdivide { slen1 } else { slen2 };
            self.write_bits(gi.scalefac[sfb] as u32, slen as u32);
            bits += slen;
        }
        bits
    }

    fn write_lsf_scalefactors(&mut self, gi: &GranuleInfo) -> i32 {
        let per_band = if gi.block_type == BlockType::Short { 3 } else { 1 };
        let mut bits = 0;
        let mut i = 0;
        for (&count, &slen) in gi.sfb_partition_table.iter().zip(gi.slen.iter()) {
            for _ in 0..count {
                self.write_bits(gi.scalefac[i].max(0) as u32, slen as u32);
                bits += slen;
                i += 1;
            }
        }
        debug_assert!(i % per_band == 0);
        bits
    }

    fn write_long_big_values(&mut self, session: &SessionConfig, gi: &GranuleInfo) -> i32 {
        let bands = &session.bands.l;
        let big_values = gi.big_values;
        let r1 = gi.region0_count + 1;
        let r2 = r1 + gi.region1_count + 1;
        let region1_start = bands[r1.min(bands.len() - 1)].min(big_values);
        let region2_start = bands[r2.min(bands.len() - 1)].min(big_values);

        self.write_pairs(gi, gi.table_select[0], 0, region1_start)
            + self.write_pairs(gi, gi.table_select[1], region1_start, region2_start)
            + self.write_pairs(gi, gi.table_select[2], region2_start, big_values)
    }

    fn write_short_big_values(&mut self, session: &SessionConfig, gi: &GranuleInfo) -> i32 {
        let region1_start = (3 * session.bands.s[3]).min(gi.big_values);
        self.write_pairs(gi, gi.table_select[0], 0, region1_start)
            + self.write_pairs(gi, gi.table_select[1], region1_start, gi.big_values)
    }

    /// Huffman code, then linbits and sign of each value of the pairs in
    /// `start..end`
    fn write_pairs(&mut self, gi: &GranuleInfo, table: usize, start: usize, end: usize) -> i32 {
        if table == 0 || start >= end {
            return 0;
        }
        let h = &HT[table];
        let mut bits = 0;
        for i in (start..end).step_by(2) {
            let (x, y) = (gi.l3_enc[i], gi.l3_enc[i + 1]);
            let cx = if h.linbits > 0 { x.min(15) } else { x } as usize;
            let cy = if h.linbits > 0 { y.min(15) } else { y } as usize;
            let idx = cx * h.xlen + cy;
            let len = u32::from(h.lengths[idx]);
            self.write_bits(h.codes[idx], len);
            bits += len as i32;

            for (value, xr, escaped) in [(x, gi.xr[i], cx == 15), (y, gi.xr[i + 1], cy == 15)] {
                if h.linbits > 0 && escaped {
                    self.write_bits((value - 15) as u32, h.linbits);
                    bits += h.linbits as i32;
                }
                if value != 0 {
                    self.write_bits(u32::from(xr < 0.0), 1);
                    bits += 1;
                }
            }
        }
        bits
    }

    fn write_count1(&mut self, gi: &GranuleInfo) -> i32 {
        let h = &HT[32 + gi.count1table_select];
        let mut bits = 0;
        for i in (gi.big_values..gi.count1).step_by(4) {
            let quad = &gi.l3_enc[i..i + 4];
            let idx = quad.iter().fold(0usize, |acc, &v| (acc << 1) | (v != 0) as usize);
            let len = u32::from(h.lengths[idx]);
            self.write_bits(h.codes[idx], len);
            bits += len as i32;
            for (k, &v) in quad.iter().enumerate() {
                if v != 0 {
                    self.write_bits(u32::from(gi.xr[i + k] < 0.0), 1);
                    bits += 1;
                }
            }
        }
        bits
    }

    /// Complete the last frame with ancillary bits and byte-align.
    ///
    /// Every queued header reaches the output; the reservoir and
    /// `main_data_begin` start over from zero. Returns the stuffing bits.
    pub fn flush(&mut self, side: &mut SideInfo, reservoir: &mut BitReservoir) -> usize {
        let stuffing = self.banked_bits().max(0) as usize;
        self.drain(stuffing);
        self.insert_due_headers();
        if self.cache_bits > 0 {
            let pad = 8 - u32::from(self.cache_bits);
            self.write_bits(0, pad);
        }
        side.main_data_begin = 0;
        reservoir.resync(0);
        stuffing
    }

    /// Whole bytes ready for output
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Move the ready bytes into `out`.
    ///
    /// Nothing is consumed when `out` cannot hold all of them.
    pub fn copy_buffer(&mut self, out: &mut [u8]) -> EncodingResult<usize> {
        let needed = self.buffer.len();
        if out.len() < needed {
            return Err(EncodingError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        out[..needed].copy_from_slice(&self.buffer);
        self.buffer.clear();
        Ok(needed)
    }

    /// Take the ready bytes
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Reset the writer to the start of a new stream
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cache = 0;
        self.cache_bits = 0;
        self.position = 0;
        self.headers.clear();
        self.next_timing = 0;
    }

    /// Get the number of bits written so far
    pub fn bits_written(&self) -> usize {
        self.position
    }
}

impl Default for BitstreamWriter {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// MSB-first bit packer over a zeroed, fixed-size buffer
struct HeaderBits {
    buf: Vec<u8>,
    bits: usize,
}

impl HeaderBits {
    fn with_len(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            bits: 0,
        }
    }

    fn put(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            if (value >> i) & 1 != 0 {
                self.buf[self.bits / 8] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }
}

fn crc_update(value: u32, mut crc: u32) -> u32 {
    let mut value = value << 8;
    for _ in 0..8 {
        value <<= 1;
        crc <<= 1;
        if (crc ^ value) & 0x10000 != 0 {
            crc ^= CRC16_POLYNOMIAL;
        }
    }
    crc & 0xffff
}

/// CRC-16 (polynomial 0x8005, initial value 0xffff) of `data`
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xffff, |crc, &b| crc_update(u32::from(b), crc)) as u16
}

/// Header plus side information of one frame, `sideinfo_len` bytes
fn encode_side_info(session: &SessionConfig, side: &SideInfo, header: FrameHeader) -> Vec<u8> {
    let mut w = HeaderBits::with_len(session.sideinfo_len);

    let sync = if session.version == MpegVersion::Mpeg25 { 0xffe } else { 0xfff };
    w.put(sync, 12);
    w.put(u32::from(session.version == MpegVersion::Mpeg1), 1);
    // layer III
    w.put(1, 2);
    w.put(u32::from(!session.error_protection), 1);
    w.put(header.bitrate_index as u32, 4);
    w.put(session.samplerate_index as u32, 2);
    w.put(u32::from(header.padding), 1);
    w.put(0, 1);
    w.put(session.mode.header_bits(), 2);
    w.put(header.mode_ext, 2);
    w.put(u32::from(session.copyright), 1);
    w.put(u32::from(session.original), 1);
    w.put(session.emphasis.header_bits(), 2);
    if session.error_protection {
        w.put(0, 16);
    }

    if session.mode_gr == 2 {
        w.put(side.main_data_begin as u32, 9);
        w.put(side.private_bits, if session.channels == 2 { 3 } else { 5 });
        for ch in 0..session.channels {
            for band in 0..4 {
                w.put(side.scfsi[ch][band] as u32, 1);
            }
        }
        for gr in 0..2 {
            for ch in 0..session.channels {
                let gi = &side.tt[gr][ch];
                put_granule_head(&mut w, gi, 4);
                w.put(u32::from(gi.preflag), 1);
                w.put(gi.scalefac_scale as u32, 1);
                w.put(gi.count1table_select as u32, 1);
            }
        }
    } else {
        w.put(side.main_data_begin as u32, 8);
        w.put(side.private_bits, session.channels as u32);
        for ch in 0..session.channels {
            let gi = &side.tt[0][ch];
            put_granule_head(&mut w, gi, 9);
            w.put(gi.scalefac_scale as u32, 1);
            w.put(gi.count1table_select as u32, 1);
        }
    }
    debug_assert_eq!(w.bits, session.sideinfo_len * 8);

    let mut bytes = w.buf;
    if session.error_protection {
        let mut covered = Vec::with_capacity(bytes.len() - 4);
        covered.extend_from_slice(&bytes[2..4]);
        covered.extend_from_slice(&bytes[6..]);
        let crc = crc16(&covered);
        bytes[4] = (crc >> 8) as u8;
        bytes[5] = (crc & 0xff) as u8;
    }
    bytes
}

fn put_granule_head(w: &mut HeaderBits, gi: &GranuleInfo, compress_bits: u32) {
    w.put((gi.part2_3_length + gi.part2_length) as u32, 12);
    w.put((gi.big_values / 2) as u32, 9);
    w.put(gi.global_gain as u32, 8);
    w.put(gi.scalefac_compress as u32, compress_bits);
    if gi.block_type == BlockType::Norm {
        w.put(0, 1);
        for &table in gi.table_select.iter() {
            w.put(table as u32, 5);
        }
        w.put(gi.region0_count as u32, 4);
        w.put(gi.region1_count as u32, 3);
    } else {
        w.put(1, 1);
        w.put(gi.block_type.bits(), 2);
        w.put(u32::from(gi.mixed_block_flag), 1);
        w.put(gi.table_select[0] as u32, 5);
        w.put(gi.table_select[1] as u32, 5);
        for &gain in gi.subblock_gain[..3].iter() {
            w.put(gain as u32, 3);
        }
    }
}
