//! Native codec layer
//!
//! Engines, frames, packets and media conversion helpers. Everything here is
//! independent of the WebCodecs lifecycle; the state machines in
//! `crate::webcodecs` drive these types from their worker threads.

pub mod audio_buffer;
pub mod context;
pub mod flac;
pub mod frame;
pub mod packet;
pub mod pcm;
pub mod qoi;
pub mod resampler;
pub mod scaler;

pub use audio_buffer::AudioSampleBuffer;
pub use context::{
  CodecRegistry, DecoderEngine, DecoderFactory, EncoderEngine, EncoderFactory, MediaFormat,
};
pub use frame::Frame;
pub use packet::Packet;
pub use resampler::Resampler;
pub use scaler::Scaler;

/// Codec identifiers understood by the codec string parser
///
/// Recognizing an identifier does not imply an engine exists for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
  // Video
  H264,
  Hevc,
  Vp8,
  Vp9,
  Av1,
  Qoi,
  // Audio
  Aac,
  Opus,
  Mp3,
  Flac,
  Vorbis,
  PcmU8,
  PcmS16,
  PcmS24,
  PcmS32,
  PcmF32,
  Ulaw,
  Alaw,
}

impl CodecId {
  pub fn is_video(&self) -> bool {
    matches!(
      self,
      CodecId::H264 | CodecId::Hevc | CodecId::Vp8 | CodecId::Vp9 | CodecId::Av1 | CodecId::Qoi
    )
  }

  pub fn is_audio(&self) -> bool {
    !self.is_video()
  }

  pub fn is_pcm(&self) -> bool {
    matches!(
      self,
      CodecId::PcmU8
        | CodecId::PcmS16
        | CodecId::PcmS24
        | CodecId::PcmS32
        | CodecId::PcmF32
        | CodecId::Ulaw
        | CodecId::Alaw
    )
  }
}

/// Parameters an audio engine is created with
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
  pub sample_rate: u32,
  pub channels: u32,
  /// Target bitrate in bits per second (ignored by lossless engines)
  pub bitrate: Option<u64>,
  /// Fixed block size request (FLAC)
  pub block_size: Option<u32>,
  /// Compression effort 0-8 (FLAC)
  pub compression_level: Option<u32>,
  /// Bits per sample for integer outputs (FLAC encoder)
  pub bits_per_sample: Option<u32>,
}

/// Parameters a video engine is created with
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
  pub width: u32,
  pub height: u32,
  pub bitrate: Option<u64>,
  pub framerate: Option<f64>,
}

/// Media-specific half of an engine configuration
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSettings {
  Audio(AudioSettings),
  Video(VideoSettings),
}

/// Everything a factory needs to decide support and build an engine
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
  pub codec: String,
  pub codec_id: CodecId,
  pub media: MediaSettings,
}

/// Decoder-side configuration, including out-of-band initialization bytes
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderSettings {
  pub codec: String,
  pub codec_id: CodecId,
  pub media: MediaSettings,
  /// Codec description (e.g. `fLaC` + STREAMINFO)
  pub extradata: Option<Vec<u8>>,
}

impl EncoderSettings {
  pub fn audio(&self) -> Option<&AudioSettings> {
    match &self.media {
      MediaSettings::Audio(audio) => Some(audio),
      MediaSettings::Video(_) => None,
    }
  }

  pub fn video(&self) -> Option<&VideoSettings> {
    match &self.media {
      MediaSettings::Video(video) => Some(video),
      MediaSettings::Audio(_) => None,
    }
  }
}

impl DecoderSettings {
  pub fn audio(&self) -> Option<&AudioSettings> {
    match &self.media {
      MediaSettings::Audio(audio) => Some(audio),
      MediaSettings::Video(_) => None,
    }
  }

  pub fn video(&self) -> Option<&VideoSettings> {
    match &self.media {
      MediaSettings::Video(video) => Some(video),
      MediaSettings::Audio(_) => None,
    }
  }
}

/// Codec error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
  #[error("Codec not found: {0}")]
  CodecNotFound(String),

  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("Invalid data: {0}")]
  InvalidData(String),

  #[error("Codec not configured")]
  NotConfigured,

  #[error("Invalid state: {0}")]
  InvalidState(String),

  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),

  #[error("Unsupported sample format: {0}")]
  UnsupportedSampleFormat(String),

  #[error("Bitstream error: {0}")]
  Bitstream(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
