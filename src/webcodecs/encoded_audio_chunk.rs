//! EncodedAudioChunk - WebCodecs API implementation
//!
//! Represents a chunk of encoded audio data, plus the audio codec
//! configuration dictionaries.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/EncodedAudioChunk

use std::str::FromStr;

use crate::codec::Packet;
use crate::webcodecs::error::{type_error, Error, Result};

/// Type of encoded audio chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedAudioChunkType {
  /// Key chunk - can be decoded independently
  Key,
  /// Delta chunk - depends on previous chunks
  Delta,
}

impl EncodedAudioChunkType {
  pub fn as_str(&self) -> &'static str {
    match self {
      EncodedAudioChunkType::Key => "key",
      EncodedAudioChunkType::Delta => "delta",
    }
  }
}

impl FromStr for EncodedAudioChunkType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "key" => Ok(EncodedAudioChunkType::Key),
      "delta" => Ok(EncodedAudioChunkType::Delta),
      other => Err(type_error(&format!("Invalid chunk type: {}", other))),
    }
  }
}

impl std::fmt::Display for EncodedAudioChunkType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Bitrate mode for audio encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitrateMode {
  /// Variable bitrate (default)
  #[default]
  Variable,
  /// Constant bitrate
  Constant,
}

/// Options for creating an EncodedAudioChunk
/// W3C spec: https://w3c.github.io/webcodecs/#dictdef-encodedaudiochunkinit
#[derive(Debug, Clone, Default)]
pub struct EncodedAudioChunkInit {
  /// Chunk type (key or delta), required
  pub chunk_type: Option<EncodedAudioChunkType>,
  /// Timestamp in microseconds, required
  pub timestamp: Option<i64>,
  /// Duration in microseconds
  pub duration: Option<i64>,
  /// Encoded data, required
  pub data: Option<Vec<u8>>,
}

/// EncodedAudioChunk - immutable encoded audio payload
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedAudioChunk {
  data: Vec<u8>,
  chunk_type: EncodedAudioChunkType,
  timestamp_us: i64,
  duration_us: Option<i64>,
}

impl EncodedAudioChunk {
  /// Create a new EncodedAudioChunk
  pub fn new(init: EncodedAudioChunkInit) -> Result<Self> {
    let chunk_type = init
      .chunk_type
      .ok_or_else(|| type_error("type is required"))?;
    let timestamp_us = init
      .timestamp
      .ok_or_else(|| type_error("timestamp is required"))?;
    let data = init.data.ok_or_else(|| type_error("data is required"))?;

    Ok(Self {
      data,
      chunk_type,
      timestamp_us,
      duration_us: init.duration,
    })
  }

  /// Create from an engine packet (encoder output)
  ///
  /// `timestamp` overrides the packet PTS when the encoder re-blocks input.
  pub(crate) fn from_packet(packet: Packet, timestamp: Option<i64>) -> Self {
    let chunk_type = if packet.is_key() {
      EncodedAudioChunkType::Key
    } else {
      EncodedAudioChunkType::Delta
    };
    let timestamp_us = timestamp.unwrap_or_else(|| packet.pts());
    let duration_us = packet.duration();

    Self {
      data: packet.into_data(),
      chunk_type,
      timestamp_us,
      duration_us,
    }
  }

  /// Packet for decoder input
  pub(crate) fn to_packet(&self) -> Packet {
    Packet::with_timing(
      self.data.clone(),
      self.timestamp_us,
      self.duration_us,
      self.is_key(),
    )
  }

  pub fn chunk_type(&self) -> EncodedAudioChunkType {
    self.chunk_type
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.timestamp_us
  }

  /// Duration in microseconds
  pub fn duration(&self) -> Option<i64> {
    self.duration_us
  }

  pub fn byte_length(&self) -> usize {
    self.data.len()
  }

  /// Copy the encoded data into `destination`
  /// W3C spec: throws TypeError if destination is too small
  pub fn copy_to(&self, destination: &mut [u8]) -> Result<()> {
    if destination.len() < self.data.len() {
      return Err(type_error(&format!(
        "destination is too small: need {} bytes, got {}",
        self.data.len(),
        destination.len()
      )));
    }
    destination[..self.data.len()].copy_from_slice(&self.data);
    Ok(())
  }

  pub fn is_key(&self) -> bool {
    self.chunk_type == EncodedAudioChunkType::Key
  }
}

impl std::fmt::Debug for EncodedAudioChunk {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EncodedAudioChunk")
      .field("type", &self.chunk_type)
      .field("timestamp", &self.timestamp_us)
      .field("duration", &self.duration_us)
      .field("byte_length", &self.data.len())
      .finish()
  }
}

// ============================================================================
// Audio codec configuration (W3C WebCodecs Codec Registry)
// ============================================================================

/// FLAC encoder configuration (W3C WebCodecs FLAC Registration)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlacEncoderConfig {
  /// Block size (0 = auto, default: 4608)
  pub block_size: Option<u32>,
  /// Compression level 0-8 (default: 5)
  pub compress_level: Option<u32>,
}

/// Audio encoder configuration
///
/// codec, sample_rate and number_of_channels are Option so that a missing
/// field surfaces as TypeError from configure() or isConfigSupported().
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioEncoderConfig {
  /// Codec string (e.g., "flac", "pcm-s16", "opus")
  pub codec: Option<String>,
  /// Sample rate in Hz
  pub sample_rate: Option<f64>,
  pub number_of_channels: Option<u32>,
  /// Target bitrate in bits per second
  pub bitrate: Option<f64>,
  pub bitrate_mode: Option<BitrateMode>,
  /// FLAC codec-specific configuration
  pub flac: Option<FlacEncoderConfig>,
}

/// Audio decoder configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioDecoderConfig {
  /// Codec string (e.g., "flac", "pcm-s16")
  pub codec: Option<String>,
  /// Sample rate in Hz
  pub sample_rate: Option<f64>,
  pub number_of_channels: Option<u32>,
  /// Codec-specific description data (e.g., fLaC + STREAMINFO)
  pub description: Option<Vec<u8>>,
}

/// Audio encoder support information
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderSupport {
  /// Whether the configuration is supported
  pub supported: bool,
  /// The configuration that was tested
  pub config: AudioEncoderConfig,
}

/// Audio decoder support information
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDecoderSupport {
  /// Whether the configuration is supported
  pub supported: bool,
  /// The configuration that was tested
  pub config: AudioDecoderConfig,
}
