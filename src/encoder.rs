//! Main MP3 encoder implementation
//!
//! [`Mp3Encoder`] owns every piece of per-stream state: filterbank and
//! MDCT history, the psychoacoustic model, the quantization loop with its
//! bit reservoir, and the bitstream writer. PCM is buffered until a
//! granule is complete; each granule is transformed one granule late so
//! the block-switching decision can look at the granule after it.

use crate::bitstream::{BitstreamWriter, FrameHeader};
use crate::config::{EncoderConfig, SessionConfig};
use crate::diagnostics::FrameSummary;
use crate::error::{EncoderError, EncoderResult, InputDataError};
use crate::iteration::{IterationStrategy, LoopState};
use crate::mdct::Mdct;
use crate::psymodel::PsyModel;
use crate::subband::SubbandFilter;
use crate::types::{SideInfo, GRANULE_SIZE, MAX_CHANNELS, SBLIMIT};
use log::debug;

/// Filterbank output and attack flags of the granule waiting for its
/// successor
#[derive(Debug, Clone)]
struct Lookahead {
    sb: [[[f32; SBLIMIT]; 18]; MAX_CHANNELS],
    attack: [bool; MAX_CHANNELS],
}

/// Scale every subband sample by its lowpass gain
fn apply_lowpass(amp_filter: &[f32; SBLIMIT], sb: &mut [[f32; SBLIMIT]; 18]) {
    for slot in sb.iter_mut() {
        for (x, &gain) in slot.iter_mut().zip(amp_filter) {
            *x *= gain;
        }
    }
}

/// Padding decision for constant bitrate frames whose nominal length is
/// not a whole number of bytes
#[derive(Debug, Clone, Copy)]
struct SlotLag {
    frac: i64,
    lag: i64,
    sample_rate: i64,
}

impl SlotLag {
    fn new(session: &SessionConfig) -> Self {
        let kbps = i64::from(session.bitrate_kbps(session.bitrate_index));
        let sample_rate = i64::from(session.sample_rate);
        let frac = if session.strategy == IterationStrategy::Cbr {
            (session.mode_gr as i64 * 72_000 * kbps) % sample_rate
        } else {
            0
        };
        Self { frac, lag: frac, sample_rate }
    }

    /// The first frame is never padded
    fn next(&mut self) -> bool {
        if self.frac == 0 {
            return false;
        }
        self.lag -= self.frac;
        if self.lag < 0 {
            self.lag += self.sample_rate;
            true
        } else {
            false
        }
    }
}

/// Layer III encoder for one stream
pub struct Mp3Encoder {
    config: EncoderConfig,
    session: SessionConfig,
    filter: SubbandFilter,
    mdct: Mdct,
    psy: PsyModel,
    state: LoopState,
    side: SideInfo,
    writer: BitstreamWriter,
    /// PCM not yet run through the filterbank, per channel
    input: [Vec<f32>; MAX_CHANNELS],
    lookahead: Option<Lookahead>,
    /// Granules of the current frame already transformed into `side`
    granules_ready: usize,
    granules_fed: usize,
    granules_coded: usize,
    samples_in: usize,
    slot_lag: SlotLag,
    summaries: Vec<FrameSummary>,
    frames: usize,
    flushed: bool,
    #[cfg(feature = "diagnostics")]
    log: crate::diagnostics::SessionLog,
}

impl Mp3Encoder {
    /// Create a new MP3 encoder with the specified configuration
    pub fn new(config: EncoderConfig) -> EncoderResult<Self> {
        let session = config.resolve()?;
        let channels = session.channels;
        Ok(Self {
            filter: SubbandFilter::new(channels),
            mdct: Mdct::new(channels),
            psy: PsyModel::new(&session),
            state: LoopState::new(&session),
            side: SideInfo::default(),
            writer: BitstreamWriter::new(4096),
            input: Default::default(),
            lookahead: None,
            granules_ready: 0,
            granules_fed: 0,
            granules_coded: 0,
            samples_in: 0,
            slot_lag: SlotLag::new(&session),
            summaries: Vec::new(),
            frames: 0,
            flushed: false,
            #[cfg(feature = "diagnostics")]
            log: crate::diagnostics::SessionLog::new(session.sample_rate, channels),
            config,
            session,
        })
    }

    /// The configuration the encoder was created from
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// The resolved settings the encoder runs with
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Samples per channel in one frame
    pub fn samples_per_frame(&self) -> usize {
        self.session.framesize
    }

    /// Frames written so far
    pub fn frames_encoded(&self) -> usize {
        self.frames
    }

    /// Per-channel samples waiting for a full granule
    pub fn buffered_samples(&self) -> usize {
        self.input[0].len()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Summaries of the frames encoded since the last call
    pub fn take_frame_summaries(&mut self) -> Vec<FrameSummary> {
        std::mem::take(&mut self.summaries)
    }

    #[cfg(feature = "diagnostics")]
    pub fn session_log(&self) -> &crate::diagnostics::SessionLog {
        &self.log
    }

    /// Encode one block of PCM given per channel.
    ///
    /// `right` is ignored for mono and required for stereo. Returns the
    /// MP3 bytes completed by this call, which may be empty.
    pub fn encode(&mut self, left: &[i16], right: Option<&[i16]>) -> EncoderResult<Vec<u8>> {
        self.push_input(left, right)?;
        self.run(usize::MAX)?;
        Ok(self.writer.take_bytes())
    }

    /// Encode interleaved PCM (L, R, L, R, ... for stereo)
    pub fn encode_interleaved(&mut self, pcm: &[i16]) -> EncoderResult<Vec<u8>> {
        let channels = self.session.channels;
        if pcm.is_empty() {
            return Err(InputDataError::EmptyInput.into());
        }
        if pcm.len() % channels != 0 {
            return Err(InputDataError::RaggedInterleave { len: pcm.len(), channels }.into());
        }
        if channels == 1 {
            return self.encode(pcm, None);
        }
        let left: Vec<i16> = pcm.iter().step_by(2).copied().collect();
        let right: Vec<i16> = pcm.iter().skip(1).step_by(2).copied().collect();
        self.encode(&left, Some(&right))
    }

    /// Encode into a caller buffer; returns the bytes written.
    ///
    /// Fails with [`crate::error::EncodingError::BufferTooSmall`] when
    /// `out` cannot hold the completed frames. The frames stay queued, so
    /// the caller can retry with [`Mp3Encoder::drain_into`].
    pub fn encode_into(&mut self, left: &[i16], right: Option<&[i16]>, out: &mut [u8]) -> EncoderResult<usize> {
        self.push_input(left, right)?;
        self.run(usize::MAX)?;
        self.drain_into(out)
    }

    /// Move already completed bytes into `out`
    pub fn drain_into(&mut self, out: &mut [u8]) -> EncoderResult<usize> {
        Ok(self.writer.copy_buffer(out)?)
    }

    /// Encode what is left and close the stream.
    ///
    /// The last partial frame is padded with silence, as is the look-ahead
    /// granule the block-switching decision needs. The stream ends after
    /// exactly `ceil(samples / samples_per_frame)` frames.
    pub fn flush(&mut self) -> EncoderResult<Vec<u8>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;

        let framesize = self.session.framesize;
        let frames = (self.samples_in + framesize - 1) / framesize;
        let granules = frames * self.session.mode_gr;
        if granules > self.granules_coded {
            let wanted = (granules + 1 - self.granules_fed) * GRANULE_SIZE;
            for ch in 0..self.session.channels {
                let missing = wanted.saturating_sub(self.input[ch].len());
                self.input[ch].extend(std::iter::repeat(0.0).take(missing));
            }
            self.run(granules)?;
        }
        debug_assert_eq!(self.frames, frames);

        self.writer.flush(&mut self.side, &mut self.state.reservoir);
        debug!("flushed after {} frames", self.frames);
        Ok(self.writer.take_bytes())
    }

    /// Clear all stream state so the encoder can start a new stream
    pub fn reset(&mut self) {
        self.filter.reset();
        self.mdct.reset();
        self.psy = PsyModel::new(&self.session);
        self.state = LoopState::new(&self.session);
        self.side = SideInfo::default();
        self.writer.reset();
        self.input = Default::default();
        self.lookahead = None;
        self.granules_ready = 0;
        self.granules_fed = 0;
        self.granules_coded = 0;
        self.samples_in = 0;
        self.slot_lag = SlotLag::new(&self.session);
        self.summaries.clear();
        #[cfg(feature = "diagnostics")]
        {
            self.log = crate::diagnostics::SessionLog::new(self.session.sample_rate, self.session.channels);
        }
        self.frames = 0;
        self.flushed = false;
    }

    fn push_input(&mut self, left: &[i16], right: Option<&[i16]>) -> EncoderResult<()> {
        if self.flushed {
            return Err(InputDataError::AlreadyFlushed.into());
        }
        if left.is_empty() {
            return Err(InputDataError::EmptyInput.into());
        }
        match (self.session.channels, right) {
            (1, _) => {}
            (2, Some(right)) if left.len() != right.len() => {
                return Err(InputDataError::ChannelLengthMismatch {
                    left: left.len(),
                    right: right.len(),
                }
                .into());
            }
            (2, Some(right)) => self.input[1].extend(right.iter().map(|&s| f32::from(s))),
            (expected, _) => {
                return Err(InputDataError::InvalidChannelCount { expected, actual: 1 }.into())
            }
        }
        self.input[0].extend(left.iter().map(|&s| f32::from(s)));
        self.samples_in += left.len();
        Ok(())
    }

    /// Feed whole granules while fewer than `limit` have been coded
    fn run(&mut self, limit: usize) -> EncoderResult<()> {
        while self.input[0].len() >= GRANULE_SIZE && self.granules_coded < limit {
            self.feed_granule()?;
        }
        Ok(())
    }

    fn feed_granule(&mut self) -> EncoderResult<()> {
        let channels = self.session.channels;
        let mut pcm: [Vec<f32>; MAX_CHANNELS] = Default::default();
        for ch in 0..channels {
            pcm[ch] = self.input[ch].drain(..GRANULE_SIZE).collect();
        }
        if channels == 1 {
            pcm[1] = pcm[0].clone();
        }

        let mut sb = [[[0.0f32; SBLIMIT]; 18]; MAX_CHANNELS];
        for ch in 0..channels {
            self.filter.filter_granule(ch, &pcm[ch], &mut sb[ch]);
            apply_lowpass(&self.session.amp_filter, &mut sb[ch]);
        }
        let attack = self.psy.detect_attacks([pcm[0].as_slice(), pcm[1].as_slice()]);
        self.granules_fed += 1;

        let Some(current) = self.lookahead.replace(Lookahead { sb, attack }) else {
            return Ok(());
        };

        let types = self.psy.block_types(current.attack, attack);
        let gr = self.granules_ready;
        for ch in 0..channels {
            let gi = &mut self.side.tt[gr][ch];
            gi.block_type = types[ch];
            gi.mixed_block_flag = false;
            self.mdct.transform(ch, &current.sb[ch], types[ch], &mut gi.xr);
        }
        self.granules_ready += 1;
        self.granules_coded += 1;

        if self.granules_ready == self.session.mode_gr {
            self.granules_ready = 0;
            self.encode_frame()?;
        }
        Ok(())
    }

    /// Quantize and write the frame whose spectra are in `side`
    fn encode_frame(&mut self) -> EncoderResult<()> {
        let session = &self.session;
        let psy = self.psy.analyze(&self.side, session.mode_gr, &self.state.ath);
        self.state.ath.update_adjust(&psy.loudness, session.channels, session.mode_gr);

        let padding = self.slot_lag.next();
        let outcome = session
            .strategy
            .encode_frame(&mut self.state, session, &mut self.side, &psy, padding)?;

        let header = FrameHeader::new(session, &outcome, psy.mid_side);
        let frame_bits =
            self.writer
                .format_frame(session, &mut self.side, header, &mut self.state.reservoir)?;

        debug!(
            "frame {}: bitrate index {}, {} bits, reservoir {} bits",
            self.frames,
            outcome.bitrate_index,
            frame_bits,
            self.state.reservoir.reservoir_size()
        );

        let summary = FrameSummary::new(
            self.frames,
            &outcome,
            &self.side,
            psy.mid_side,
            self.state.reservoir.reservoir_size(),
        );
        #[cfg(feature = "diagnostics")]
        self.log.record(summary.clone());
        self.summaries.push(summary);
        self.frames += 1;
        Ok(())
    }
}

/// Encode a whole interleaved PCM buffer in one call
pub fn encode_pcm_to_mp3(config: EncoderConfig, pcm: &[i16]) -> Result<Vec<u8>, EncoderError> {
    let mut encoder = Mp3Encoder::new(config)?;
    let mut mp3 = if pcm.is_empty() { Vec::new() } else { encoder.encode_interleaved(pcm)? };
    mp3.extend(encoder.flush()?);
    Ok(mp3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StereoMode, VbrMode};
    use crate::error::{EncodingError, ERR_BUFFER_TOO_SMALL};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn sine(freq: f32, rate: u32, n: usize, amp: f32) -> Vec<i16> {
        (0..n)
            .map(|i| (amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin()) as i16)
            .collect()
    }

    /// Frame lengths found by walking the sync words
    fn frame_lengths(mp3: &[u8], session: &SessionConfig) -> Vec<usize> {
        let mut pos = 0;
        let mut lengths = Vec::new();
        while pos + 4 <= mp3.len() {
            assert_eq!(mp3[pos], 0xff, "no sync at {}", pos);
            let index = usize::from(mp3[pos + 2] >> 4);
            let padding = (mp3[pos + 2] >> 1) & 1 == 1;
            let len = (session.frame_bits(index, padding) / 8) as usize;
            lengths.push(len);
            pos += len;
        }
        assert_eq!(pos, mp3.len());
        lengths
    }

    #[test]
    fn test_silence_frame_count() {
        init_logger();
        let config = EncoderConfig::new(44100, 2).bitrate(128);
        let mut encoder = Mp3Encoder::new(config).unwrap();
        let silence = vec![0i16; 44100];
        let mut mp3 = encoder.encode(&silence, Some(&silence)).unwrap();
        mp3.extend(encoder.flush().unwrap());
        assert_eq!(encoder.frames_encoded(), (44100 + 1151) / 1152);
        let lengths = frame_lengths(&mp3, encoder.session());
        assert_eq!(lengths.len(), 39);
    }

    #[test]
    fn test_cbr_padding_pattern() {
        let mut encoder = Mp3Encoder::new(EncoderConfig::new(44100, 1).bitrate(128)).unwrap();
        let pcm = sine(440.0, 44100, 1152 * 10, 8000.0);
        let mut mp3 = encoder.encode(&pcm, None).unwrap();
        mp3.extend(encoder.flush().unwrap());
        let lengths = frame_lengths(&mp3, encoder.session());
        assert_eq!(lengths.len(), 10);
        // 417.96 bytes per frame on average
        assert_eq!(lengths[0], 417);
        assert!(lengths.iter().all(|&l| l == 417 || l == 418));
        let total: usize = lengths.iter().sum();
        assert!(total >= 4179 && total <= 4181);
    }

    #[test]
    fn test_lowpass_removes_content_above_cutoff() {
        // 32 kbps mono codes up to 8250 Hz
        let pcm = sine(15000.0, 44100, 1152 * 6, 12000.0);
        let huffman_bits = |config: EncoderConfig| -> i32 {
            let mut encoder = Mp3Encoder::new(config).unwrap();
            encoder.encode(&pcm, None).unwrap();
            encoder.flush().unwrap();
            encoder
                .take_frame_summaries()
                .iter()
                .flat_map(|s| s.granules.iter().map(|row| row[0].part3_length))
                .sum()
        };
        let filtered = huffman_bits(EncoderConfig::new(44100, 1).bitrate(32));
        let full_band = huffman_bits(EncoderConfig::new(44100, 1).bitrate(32).lowpass(0));
        assert!(filtered * 4 < full_band, "{} vs {}", filtered, full_band);
    }

    #[test]
    fn test_apply_lowpass_scales_subbands() {
        let mut amp_filter = [1.0f32; SBLIMIT];
        amp_filter[30] = 0.5;
        amp_filter[31] = 0.0;
        let mut sb = [[2.0f32; SBLIMIT]; 18];
        apply_lowpass(&amp_filter, &mut sb);
        for slot in &sb {
            assert_eq!(slot[0], 2.0);
            assert_eq!(slot[30], 1.0);
            assert_eq!(slot[31], 0.0);
        }
    }

    #[test]
    fn test_input_validation() {
        let mut stereo = Mp3Encoder::new(EncoderConfig::new(44100, 2)).unwrap();
        assert!(matches!(
            stereo.encode(&[0; 10], None),
            Err(EncoderError::InputData(InputDataError::InvalidChannelCount { expected: 2, actual: 1 }))
        ));
        assert!(matches!(
            stereo.encode(&[0; 10], Some(&[0; 9])),
            Err(EncoderError::InputData(InputDataError::ChannelLengthMismatch { left: 10, right: 9 }))
        ));
        assert!(matches!(
            stereo.encode_interleaved(&[0; 3]),
            Err(EncoderError::InputData(InputDataError::RaggedInterleave { .. }))
        ));
        assert!(matches!(stereo.encode(&[], None), Err(EncoderError::InputData(InputDataError::EmptyInput))));
        stereo.flush().unwrap();
        assert!(matches!(
            stereo.encode(&[0; 4], Some(&[0; 4])),
            Err(EncoderError::InputData(InputDataError::AlreadyFlushed))
        ));
    }

    #[test]
    fn test_small_buffer_keeps_bytes() {
        let mut encoder = Mp3Encoder::new(EncoderConfig::new(44100, 1).bitrate(64)).unwrap();
        let pcm = sine(1000.0, 44100, 1152 * 4, 6000.0);
        let mut tiny = [0u8; 8];
        let err = encoder.encode_into(&pcm, None, &mut tiny).unwrap_err();
        assert_eq!(err.code(), ERR_BUFFER_TOO_SMALL);
        let needed = match err {
            EncoderError::Encoding(EncodingError::BufferTooSmall { needed, .. }) => needed,
            other => panic!("unexpected {:?}", other),
        };
        let mut out = vec![0u8; needed];
        assert_eq!(encoder.drain_into(&mut out).unwrap(), needed);
        assert_eq!(out[0], 0xff);
    }

    #[test]
    fn test_interleaved_matches_separate_channels() {
        let left = sine(440.0, 44100, 4000, 5000.0);
        let right = sine(660.0, 44100, 4000, 5000.0);
        let interleaved: Vec<i16> = left.iter().zip(right.iter()).flat_map(|(&l, &r)| [l, r]).collect();
        let config = EncoderConfig::new(44100, 2).stereo_mode(StereoMode::Stereo).bitrate(160);

        let a = encode_pcm_to_mp3(config.clone(), &interleaved).unwrap();
        let mut encoder = Mp3Encoder::new(config).unwrap();
        let mut b = encoder.encode(&left, Some(&right)).unwrap();
        b.extend(encoder.flush().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_vbr_stream_uses_several_bitrates() {
        init_logger();
        let config = EncoderConfig::new(44100, 1).vbr(VbrMode::Rh).vbr_quality(2.0);
        let mut encoder = Mp3Encoder::new(config).unwrap();
        let mut pcm = vec![0i16; 1152 * 4];
        pcm.extend(sine(3000.0, 44100, 1152 * 6, 12000.0));
        let mut mp3 = encoder.encode(&pcm, None).unwrap();
        mp3.extend(encoder.flush().unwrap());
        let summaries = encoder.take_frame_summaries();
        assert_eq!(summaries.len(), 10);
        assert_eq!(summaries[0].bitrate_index, 1);
        assert!(summaries.iter().any(|s| s.bitrate_index > 1));
        assert_eq!(frame_lengths(&mp3, encoder.session()).len(), 10);
    }

    #[test]
    fn test_reset_reproduces_stream() {
        let pcm = sine(440.0, 32000, 3000, 9000.0);
        let mut encoder = Mp3Encoder::new(EncoderConfig::new(32000, 1).bitrate(96)).unwrap();
        let mut first = encoder.encode(&pcm, None).unwrap();
        first.extend(encoder.flush().unwrap());
        encoder.reset();
        let mut second = encoder.encode(&pcm, None).unwrap();
        second.extend(encoder.flush().unwrap());
        assert_eq!(first, second);
        assert_eq!(encoder.frames_encoded(), 3);
    }

    #[test]
    fn test_empty_stream_has_no_frames() {
        let mp3 = encode_pcm_to_mp3(EncoderConfig::new(44100, 2), &[]).unwrap();
        assert!(mp3.is_empty());
    }
}
