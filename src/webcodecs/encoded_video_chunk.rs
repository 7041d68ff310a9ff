//! EncodedVideoChunk - WebCodecs API implementation
//!
//! Represents a chunk of encoded video data, plus the video codec
//! configuration dictionaries.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/EncodedVideoChunk

use crate::codec::Packet;
use crate::webcodecs::error::{type_error, Result};
use crate::webcodecs::video_frame::{string_enum, VideoColorSpaceInit};

string_enum!(
  /// Type of encoded video chunk
  EncodedVideoChunkType {
    Key => "key",
    Delta => "delta",
  }
);

string_enum!(
  /// Hardware acceleration preference
  HardwareAcceleration {
    NoPreference => "no-preference",
    PreferHardware => "prefer-hardware",
    PreferSoftware => "prefer-software",
  }
);

string_enum!(
  /// Latency mode for video encoding
  LatencyMode {
    Quality => "quality",
    Realtime => "realtime",
  }
);

string_enum!(
  /// Bitrate mode for video encoding
  VideoEncoderBitrateMode {
    Variable => "variable",
    Constant => "constant",
    Quantizer => "quantizer",
  }
);

string_enum!(
  /// Alpha channel handling
  AlphaOption {
    Keep => "keep",
    Discard => "discard",
  }
);

/// Options for creating an EncodedVideoChunk
#[derive(Debug, Clone, Default)]
pub struct EncodedVideoChunkInit {
  /// Chunk type (key or delta), required
  pub chunk_type: Option<EncodedVideoChunkType>,
  /// Timestamp in microseconds, required
  pub timestamp: Option<i64>,
  /// Duration in microseconds
  pub duration: Option<i64>,
  /// Encoded data, required
  pub data: Option<Vec<u8>>,
}

/// EncodedVideoChunk - immutable encoded video payload
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedVideoChunk {
  data: Vec<u8>,
  chunk_type: EncodedVideoChunkType,
  timestamp_us: i64,
  duration_us: Option<i64>,
}

impl EncodedVideoChunk {
  pub fn new(init: EncodedVideoChunkInit) -> Result<Self> {
    let (Some(chunk_type), Some(timestamp_us), Some(data)) =
      (init.chunk_type, init.timestamp, init.data)
    else {
      return Err(type_error(
        "EncodedVideoChunkInit requires type, timestamp and data",
      ));
    };

    Ok(Self {
      data,
      chunk_type,
      timestamp_us,
      duration_us: init.duration,
    })
  }

  /// Create from an engine packet, keeping its timing
  pub(crate) fn from_packet(packet: Packet) -> Self {
    let chunk_type = if packet.is_key() {
      EncodedVideoChunkType::Key
    } else {
      EncodedVideoChunkType::Delta
    };
    let timestamp_us = packet.pts();
    let duration_us = packet.duration();
    Self {
      data: packet.into_data(),
      chunk_type,
      timestamp_us,
      duration_us,
    }
  }

  pub(crate) fn to_packet(&self) -> Packet {
    Packet::with_timing(
      self.data.clone(),
      self.timestamp_us,
      self.duration_us,
      self.is_key(),
    )
  }

  pub fn chunk_type(&self) -> EncodedVideoChunkType {
    self.chunk_type
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.timestamp_us
  }

  pub fn duration(&self) -> Option<i64> {
    self.duration_us
  }

  pub fn byte_length(&self) -> usize {
    self.data.len()
  }

  /// Copy the encoded data into `destination`
  pub fn copy_to(&self, destination: &mut [u8]) -> Result<()> {
    let Some(dest) = destination.get_mut(..self.data.len()) else {
      return Err(type_error(&format!(
        "destination is too small: need {} bytes, got {}",
        self.data.len(),
        destination.len()
      )));
    };
    dest.copy_from_slice(&self.data);
    Ok(())
  }

  pub fn is_key(&self) -> bool {
    self.chunk_type == EncodedVideoChunkType::Key
  }
}

impl std::fmt::Debug for EncodedVideoChunk {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EncodedVideoChunk")
      .field("type", &self.chunk_type)
      .field("timestamp", &self.timestamp_us)
      .field("duration", &self.duration_us)
      .field("byte_length", &self.data.len())
      .finish()
  }
}

// ============================================================================
// Video codec configuration
// ============================================================================

/// Video encoder configuration
///
/// codec, width and height are Option so that a missing field surfaces as
/// TypeError rather than a silent default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoEncoderConfig {
  /// Codec string (e.g., "qoi", "avc1.42001E")
  pub codec: Option<String>,
  /// Coded width in pixels
  pub width: Option<u32>,
  /// Coded height in pixels
  pub height: Option<u32>,
  pub display_width: Option<u32>,
  pub display_height: Option<u32>,
  /// Target bitrate in bits per second
  pub bitrate: Option<f64>,
  /// Frames per second
  pub framerate: Option<f64>,
  pub hardware_acceleration: Option<HardwareAcceleration>,
  pub alpha: Option<AlphaOption>,
  /// Only "L1T1" is accepted
  pub scalability_mode: Option<String>,
  pub bitrate_mode: Option<VideoEncoderBitrateMode>,
  pub latency_mode: Option<LatencyMode>,
}

/// Video decoder configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoDecoderConfig {
  pub codec: Option<String>,
  /// Codec-specific description data
  pub description: Option<Vec<u8>>,
  pub coded_width: Option<u32>,
  pub coded_height: Option<u32>,
  pub display_aspect_width: Option<u32>,
  pub display_aspect_height: Option<u32>,
  /// Color space applied to every decoded frame
  pub color_space: Option<VideoColorSpaceInit>,
  pub hardware_acceleration: Option<HardwareAcceleration>,
  pub optimize_for_latency: Option<bool>,
}

/// Video encoder support information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderSupport {
  pub supported: bool,
  pub config: VideoEncoderConfig,
}

/// Video decoder support information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDecoderSupport {
  pub supported: bool,
  pub config: VideoDecoderConfig,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::webcodecs::error::DOMExceptionName;

  #[test]
  fn test_new_and_accessors() {
    let chunk = EncodedVideoChunk::new(EncodedVideoChunkInit {
      chunk_type: Some("delta".parse().unwrap()),
      timestamp: Some(40_000),
      duration: None,
      data: Some(vec![0xAB; 16]),
    })
    .unwrap();
    assert_eq!(chunk.chunk_type(), EncodedVideoChunkType::Delta);
    assert_eq!(chunk.timestamp(), 40_000);
    assert_eq!(chunk.duration(), None);
    assert_eq!(chunk.byte_length(), 16);
    assert!(!chunk.is_key());
  }

  #[test]
  fn test_missing_data() {
    let err = EncodedVideoChunk::new(EncodedVideoChunkInit {
      chunk_type: Some(EncodedVideoChunkType::Key),
      timestamp: Some(0),
      ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }

  #[test]
  fn test_copy_to_too_small() {
    let chunk = EncodedVideoChunk::new(EncodedVideoChunkInit {
      chunk_type: Some(EncodedVideoChunkType::Key),
      timestamp: Some(0),
      duration: Some(33_333),
      data: Some(vec![1, 2, 3]),
    })
    .unwrap();
    let mut exact = [0u8; 3];
    chunk.copy_to(&mut exact).unwrap();
    assert_eq!(exact, [1, 2, 3]);
    let err = chunk.copy_to(&mut [0u8; 2]).unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }

  #[test]
  fn test_enum_strings() {
    assert_eq!(
      "prefer-software".parse::<HardwareAcceleration>().unwrap(),
      HardwareAcceleration::PreferSoftware
    );
    assert_eq!(VideoEncoderBitrateMode::Quantizer.as_str(), "quantizer");
    assert!("sometimes".parse::<AlphaOption>().is_err());
  }

  #[test]
  fn test_from_packet_keeps_timing() {
    let chunk = EncodedVideoChunk::from_packet(Packet::with_timing(vec![7; 4], 80_000, Some(40_000), true));
    assert!(chunk.is_key());
    assert_eq!(chunk.timestamp(), 80_000);
    assert_eq!(chunk.duration(), Some(40_000));
    assert_eq!(chunk.to_packet().as_slice(), &[7; 4]);
  }
}
