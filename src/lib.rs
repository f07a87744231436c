//! # Layer III encoder
//!
//! A pure Rust MPEG-1/2/2.5 Layer III encoder. PCM runs through a
//! polyphase filterbank and MDCT, a psychoacoustic model derives masking
//! thresholds, and a closed-loop quantizer searches global gain and
//! scalefactors until each granule fits its bit budget with as little
//! audible distortion as it can manage. A bit reservoir carries unused
//! bits between frames.
//!
//! ```no_run
//! use layer3_rs::{EncoderConfig, Mp3Encoder};
//!
//! let mut encoder = Mp3Encoder::new(EncoderConfig::new(44100, 2).bitrate(128))?;
//! let left = vec![0i16; 44100];
//! let right = vec![0i16; 44100];
//! let mut mp3 = encoder.encode(&left, Some(&right))?;
//! mp3.extend(encoder.flush()?);
//! # Ok::<(), layer3_rs::EncoderError>(())
//! ```

pub mod ath;
pub mod bit_allocation;
pub mod bit_count;
pub mod bitstream;
pub mod config;
pub mod diagnostics;
pub mod distortion;
pub mod encoder;
pub mod error;
pub mod huffman;
pub mod iteration;
pub mod mdct;
pub mod outer_loop;
pub mod presets;
pub mod psymodel;
pub mod reservoir;
pub mod subband;
pub mod tables;
pub mod types;
pub mod vbr_quantize;

pub use config::{
    EncoderConfig, Emphasis, MpegVersion, SessionConfig, StereoMode, VbrMode, SUPPORTED_BITRATES,
    SUPPORTED_SAMPLE_RATES,
};
pub use diagnostics::{FrameSummary, GranuleSummary};
pub use encoder::{encode_pcm_to_mp3, Mp3Encoder};
pub use error::{
    ConfigError, EncoderError, EncoderResult, EncodingError, EncodingResult, InputDataError,
};
pub use iteration::IterationStrategy;
pub use presets::Preset;

#[cfg(feature = "diagnostics")]
pub use diagnostics::SessionLog;
