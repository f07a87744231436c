//! Error types for the Layer III encoder
//!
//! Every failure the encoder can surface to a caller is described here.
//! Conditions the quantization loop handles by degrading quality (global
//! gain exhaustion, analog silence) are not errors and never appear below.

use thiserror::Error;

/// Generic failure code returned by [`EncoderError::code`]
pub const ERR_GENERIC: i32 = -1;
/// Output buffer was too small for the pending frame bytes
pub const ERR_BUFFER_TOO_SMALL: i32 = -2;
/// Invalid configuration detected at initialisation
pub const ERR_CONFIG: i32 = -3;
/// Input PCM did not match the configured layout
pub const ERR_INPUT: i32 = -4;
/// Internal bitstream inconsistency
pub const ERR_INTERNAL: i32 = -5;

/// Main error type for the encoder
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input data validation errors
    #[error("Input data error: {0}")]
    InputData(#[from] InputDataError),

    /// Encoding process errors
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

impl EncoderError {
    /// Stable negative integer for callers that speak in return codes
    pub fn code(&self) -> i32 {
        match self {
            EncoderError::Config(_) => ERR_CONFIG,
            EncoderError::InputData(_) => ERR_INPUT,
            EncoderError::Encoding(e) => e.code(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Unsupported sample rate
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Unsupported bitrate
    #[error("Unsupported bitrate: {0} kbps")]
    UnsupportedBitrate(u32),

    /// Invalid channel configuration
    #[error("Invalid channel configuration: {0} channels")]
    InvalidChannels(u8),

    /// Incompatible sample rate and bitrate combination
    #[error("Incompatible sample rate ({sample_rate} Hz) and bitrate ({bitrate} kbps) combination")]
    IncompatibleRateCombination { sample_rate: u32, bitrate: u32 },

    /// Invalid stereo mode for channel count
    #[error("Invalid stereo mode {mode:?} for {channels} channels")]
    InvalidStereoMode { mode: String, channels: u8 },

    /// VBR quality outside 0..=9
    #[error("VBR quality {0} out of range 0..=9")]
    InvalidVbrQuality(f32),

    /// Encoder quality outside 0..=9
    #[error("Quality {0} out of range 0..=9")]
    InvalidQuality(u8),

    /// Unknown or unsupported preset
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
}

/// Input data validation errors
#[derive(Debug, Error, PartialEq)]
pub enum InputDataError {
    /// Channel buffers of different length
    #[error("Channel length mismatch: left has {left} samples, right has {right}")]
    ChannelLengthMismatch { left: usize, right: usize },

    /// Invalid channel count in PCM data
    #[error("Invalid channel count in PCM data: expected {expected}, got {actual}")]
    InvalidChannelCount { expected: usize, actual: usize },

    /// Interleaved buffer not a whole number of sample frames
    #[error("Interleaved PCM length {len} is not a multiple of {channels} channels")]
    RaggedInterleave { len: usize, channels: usize },

    /// Empty input data
    #[error("Empty input data provided")]
    EmptyInput,

    /// Encoding was already finished with `flush`
    #[error("Encoder already flushed")]
    AlreadyFlushed,
}

/// Encoding process errors
#[derive(Debug, Error, PartialEq)]
pub enum EncodingError {
    /// Caller-supplied output buffer cannot hold the pending bytes
    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Bitstream writing error
    #[error("Bitstream writing error: {0}")]
    BitstreamError(String),

    /// Bits written for a granule disagree with what the quantizer counted
    #[error("Bit count mismatch: counted {counted}, wrote {written}")]
    BitCountMismatch { counted: i32, written: i32 },
}

impl EncodingError {
    /// Negative return code for this error
    pub fn code(&self) -> i32 {
        match self {
            EncodingError::BufferTooSmall { .. } => ERR_BUFFER_TOO_SMALL,
            EncodingError::BitstreamError(_) | EncodingError::BitCountMismatch { .. } => {
                ERR_INTERNAL
            }
        }
    }
}

/// Specialized result types for different modules
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type InputResult<T> = std::result::Result<T, InputDataError>;
pub type EncodingResult<T> = std::result::Result<T, EncodingError>;
pub type EncoderResult<T> = std::result::Result<T, EncoderError>;
