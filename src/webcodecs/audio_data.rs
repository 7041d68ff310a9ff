//! AudioData - WebCodecs API implementation
//!
//! Represents uncompressed audio data that can be encoded or played.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/AudioData

use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::codec::{Frame, Resampler};

use super::error::{invalid_state_error, type_error, Error, Result};

/// Audio sample format (WebCodecs spec)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioSampleFormat {
  /// Unsigned 8-bit integer samples, interleaved
  U8,
  /// Signed 16-bit integer samples, interleaved
  S16,
  /// Signed 32-bit integer samples, interleaved
  S32,
  /// 32-bit float samples, interleaved
  F32,
  /// Unsigned 8-bit integer samples, planar
  U8Planar,
  /// Signed 16-bit integer samples, planar
  S16Planar,
  /// Signed 32-bit integer samples, planar
  S32Planar,
  /// 32-bit float samples, planar
  F32Planar,
}

impl AudioSampleFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      AudioSampleFormat::U8 => "u8",
      AudioSampleFormat::S16 => "s16",
      AudioSampleFormat::S32 => "s32",
      AudioSampleFormat::F32 => "f32",
      AudioSampleFormat::U8Planar => "u8-planar",
      AudioSampleFormat::S16Planar => "s16-planar",
      AudioSampleFormat::S32Planar => "s32-planar",
      AudioSampleFormat::F32Planar => "f32-planar",
    }
  }

  /// Get bytes per sample
  pub fn bytes_per_sample(&self) -> usize {
    match self {
      AudioSampleFormat::U8 | AudioSampleFormat::U8Planar => 1,
      AudioSampleFormat::S16 | AudioSampleFormat::S16Planar => 2,
      AudioSampleFormat::S32
      | AudioSampleFormat::S32Planar
      | AudioSampleFormat::F32
      | AudioSampleFormat::F32Planar => 4,
    }
  }

  /// Check if this is a planar format
  pub fn is_planar(&self) -> bool {
    matches!(
      self,
      AudioSampleFormat::U8Planar
        | AudioSampleFormat::S16Planar
        | AudioSampleFormat::S32Planar
        | AudioSampleFormat::F32Planar
    )
  }

  pub fn is_float(&self) -> bool {
    matches!(self, AudioSampleFormat::F32 | AudioSampleFormat::F32Planar)
  }

  /// Interleaved format with the same sample type
  pub fn sample_type(&self) -> AudioSampleFormat {
    match self {
      AudioSampleFormat::U8Planar => AudioSampleFormat::U8,
      AudioSampleFormat::S16Planar => AudioSampleFormat::S16,
      AudioSampleFormat::S32Planar => AudioSampleFormat::S32,
      AudioSampleFormat::F32Planar => AudioSampleFormat::F32,
      other => *other,
    }
  }

  /// Byte value that fills a buffer with silence
  pub fn silence_byte(&self) -> u8 {
    if self.sample_type() == AudioSampleFormat::U8 {
      0x80
    } else {
      0
    }
  }
}

impl std::fmt::Display for AudioSampleFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AudioSampleFormat {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "u8" => Ok(AudioSampleFormat::U8),
      "s16" => Ok(AudioSampleFormat::S16),
      "s32" => Ok(AudioSampleFormat::S32),
      "f32" => Ok(AudioSampleFormat::F32),
      "u8-planar" => Ok(AudioSampleFormat::U8Planar),
      "s16-planar" => Ok(AudioSampleFormat::S16Planar),
      "s32-planar" => Ok(AudioSampleFormat::S32Planar),
      "f32-planar" => Ok(AudioSampleFormat::F32Planar),
      other => Err(type_error(&format!("Invalid AudioSampleFormat: {}", other))),
    }
  }
}

// ============================================================================
// Buffer views
// ============================================================================

/// A primitive sample type with a matching interleaved WebCodecs format
pub trait Sample: Copy {
  const FORMAT: AudioSampleFormat;
  const SIZE: usize;

  fn write_le(self, out: &mut Vec<u8>);
  fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_sample {
  ($ty:ty, $format:expr) => {
    impl Sample for $ty {
      const FORMAT: AudioSampleFormat = $format;
      const SIZE: usize = std::mem::size_of::<$ty>();

      fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
      }

      fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; std::mem::size_of::<$ty>()];
        raw.copy_from_slice(&bytes[..Self::SIZE]);
        <$ty>::from_le_bytes(raw)
      }
    }
  };
}

impl_sample!(u8, AudioSampleFormat::U8);
impl_sample!(i16, AudioSampleFormat::S16);
impl_sample!(i32, AudioSampleFormat::S32);
impl_sample!(f32, AudioSampleFormat::F32);

/// Serialize typed samples into a little-endian payload
pub fn samples_to_bytes<S: Sample>(samples: &[S]) -> Vec<u8> {
  let mut out = Vec::with_capacity(samples.len() * S::SIZE);
  for &s in samples {
    s.write_le(&mut out);
  }
  out
}

/// Read a little-endian payload back as typed samples; trailing bytes are ignored
pub fn bytes_to_samples<S: Sample>(bytes: &[u8]) -> Vec<S> {
  bytes.chunks_exact(S::SIZE).map(S::read_le).collect()
}

// ============================================================================
// AudioData
// ============================================================================

/// Options for creating an AudioData
#[derive(Debug, Clone, Default)]
pub struct AudioDataInit {
  /// Sample format
  pub format: Option<AudioSampleFormat>,
  /// Sample rate in Hz
  pub sample_rate: Option<u32>,
  /// Number of frames (samples per channel)
  pub number_of_frames: Option<u32>,
  /// Number of channels
  pub number_of_channels: Option<u32>,
  /// Timestamp in microseconds
  pub timestamp: Option<i64>,
  /// Sample payload; planar formats store planes back to back
  pub data: Option<Vec<u8>>,
}

/// Options for copyTo / allocationSize
#[derive(Debug, Clone, Default)]
pub struct AudioDataCopyToOptions {
  /// The index of the audio plane to copy
  pub plane_index: u32,
  /// The offset in frames to start copying from
  pub frame_offset: Option<u32>,
  /// The number of frames to copy (defaults to all remaining)
  pub frame_count: Option<u32>,
  /// Target format for conversion
  pub format: Option<AudioSampleFormat>,
}

/// Internal state for AudioData
struct AudioDataInner {
  frame: Frame,
  format: AudioSampleFormat,
  timestamp_us: i64,
}

/// Resolved copy region
struct CopyPlan {
  format: AudioSampleFormat,
  plane_index: usize,
  frame_offset: usize,
  frame_count: usize,
  byte_len: usize,
}

/// AudioData - represents uncompressed audio data
///
/// `close()` releases the samples; afterwards every accessor reads as zero
/// and `copy_to`, `allocation_size` and `try_clone` fail with InvalidStateError.
pub struct AudioData {
  inner: Mutex<Option<AudioDataInner>>,
}

impl AudioData {
  /// Create a new AudioData from raw sample data
  pub fn new(init: AudioDataInit) -> Result<Self> {
    let format = init
      .format
      .ok_or_else(|| type_error("format is required"))?;
    let sample_rate = init
      .sample_rate
      .ok_or_else(|| type_error("sampleRate is required"))?;
    let number_of_frames = init
      .number_of_frames
      .ok_or_else(|| type_error("numberOfFrames is required"))?;
    let number_of_channels = init
      .number_of_channels
      .ok_or_else(|| type_error("numberOfChannels is required"))?;
    let timestamp = init
      .timestamp
      .ok_or_else(|| type_error("timestamp is required"))?;
    let data = init.data.ok_or_else(|| type_error("data is required"))?;

    if sample_rate == 0 {
      return Err(type_error("sampleRate must be greater than 0"));
    }
    if number_of_frames == 0 {
      return Err(type_error("numberOfFrames must be greater than 0"));
    }
    if number_of_channels == 0 {
      return Err(type_error("numberOfChannels must be greater than 0"));
    }

    let needed = number_of_frames as usize * number_of_channels as usize * format.bytes_per_sample();
    if data.len() < needed {
      return Err(type_error(&format!(
        "data is too small: need {} bytes, got {}",
        needed,
        data.len()
      )));
    }

    let mut frame = Frame::from_audio_data(
      number_of_frames,
      number_of_channels,
      sample_rate,
      format,
      &data,
    )
    .map_err(|e| type_error(&e.to_string()))?;
    frame.set_pts(timestamp);

    Ok(Self::wrap(AudioDataInner {
      frame,
      format,
      timestamp_us: timestamp,
    }))
  }

  /// Wrap decoder output
  pub(crate) fn from_frame(frame: Frame) -> Result<Self> {
    let format = frame
      .sample_format()
      .ok_or_else(|| invalid_state_error("Decoder produced a non-audio frame"))?;
    Ok(Self::wrap(AudioDataInner {
      timestamp_us: frame.pts(),
      frame,
      format,
    }))
  }

  fn wrap(inner: AudioDataInner) -> Self {
    Self {
      inner: Mutex::new(Some(inner)),
    }
  }

  fn read<R>(&self, f: impl FnOnce(&AudioDataInner) -> R) -> Option<R> {
    let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    inner.as_ref().map(f)
  }

  fn open<R>(&self, f: impl FnOnce(&AudioDataInner) -> Result<R>) -> Result<R> {
    let inner = self.inner.lock()?;
    match inner.as_ref() {
      Some(i) => f(i),
      None => Err(invalid_state_error("AudioData is closed")),
    }
  }

  // ========================================================================
  // Properties (WebCodecs spec)
  // ========================================================================

  /// Sample format, `None` once closed
  pub fn format(&self) -> Option<AudioSampleFormat> {
    self.read(|i| i.format)
  }

  pub fn sample_rate(&self) -> u32 {
    self.read(|i| i.frame.sample_rate()).unwrap_or(0)
  }

  pub fn number_of_frames(&self) -> u32 {
    self.read(|i| i.frame.nb_samples()).unwrap_or(0)
  }

  pub fn number_of_channels(&self) -> u32 {
    self.read(|i| i.frame.channels()).unwrap_or(0)
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.read(|i| i.timestamp_us).unwrap_or(0)
  }

  /// Duration in microseconds
  pub fn duration(&self) -> u64 {
    self
      .read(|i| i.frame.nb_samples() as u64 * 1_000_000 / i.frame.sample_rate() as u64)
      .unwrap_or(0)
  }

  pub fn is_closed(&self) -> bool {
    self.read(|_| ()).is_none()
  }

  // ========================================================================
  // Methods (WebCodecs spec)
  // ========================================================================

  fn plan(inner: &AudioDataInner, options: &AudioDataCopyToOptions) -> Result<CopyPlan> {
    let format = options.format.unwrap_or(inner.format);
    let frames = inner.frame.nb_samples() as usize;
    let channels = inner.frame.channels() as usize;
    let plane_index = options.plane_index as usize;

    let plane_count = if format.is_planar() { channels } else { 1 };
    if plane_index >= plane_count {
      return Err(type_error(&format!(
        "planeIndex {} out of range for {} planes",
        plane_index, plane_count
      )));
    }

    let frame_offset = options.frame_offset.unwrap_or(0) as usize;
    if frame_offset >= frames {
      return Err(type_error(&format!(
        "frameOffset {} out of range for {} frames",
        frame_offset, frames
      )));
    }
    let remaining = frames - frame_offset;
    let frame_count = options.frame_count.map_or(remaining, |c| c as usize);
    if frame_count > remaining {
      return Err(type_error(&format!(
        "frameCount {} exceeds the {} frames available",
        frame_count, remaining
      )));
    }

    let samples_per_frame = if format.is_planar() { 1 } else { channels };
    Ok(CopyPlan {
      format,
      plane_index,
      frame_offset,
      frame_count,
      byte_len: frame_count * samples_per_frame * format.bytes_per_sample(),
    })
  }

  /// Bytes `copy_to` writes for these options
  pub fn allocation_size(&self, options: &AudioDataCopyToOptions) -> Result<usize> {
    self.open(|inner| Ok(Self::plan(inner, options)?.byte_len))
  }

  /// Copy one plane into `destination`, converting the sample format if asked
  pub fn copy_to(&self, destination: &mut [u8], options: &AudioDataCopyToOptions) -> Result<()> {
    self.open(|inner| {
      let plan = Self::plan(inner, options)?;
      if destination.len() < plan.byte_len {
        return Err(type_error(&format!(
          "destination is too small: need {} bytes, got {}",
          plan.byte_len,
          destination.len()
        )));
      }

      let converted;
      let source = if plan.format == inner.format {
        &inner.frame
      } else {
        let mut converter = Resampler::new_format_converter(
          inner.frame.channels(),
          inner.frame.sample_rate(),
          inner.format,
          plan.format,
        )?;
        converted = converter.convert_alloc(&inner.frame)?;
        &converted
      };

      let bps = plan.format.bytes_per_sample();
      let stride = if plan.format.is_planar() {
        bps
      } else {
        bps * source.channels() as usize
      };
      let plane = source
        .audio_channel_data(plan.plane_index)
        .ok_or_else(|| type_error("planeIndex out of range"))?;
      let start = plan.frame_offset * stride;
      destination[..plan.byte_len].copy_from_slice(&plane[start..start + plan.byte_len]);
      Ok(())
    })
  }

  /// Deep copy (WebCodecs `clone()`)
  pub fn try_clone(&self) -> Result<AudioData> {
    self.open(|inner| {
      Ok(Self::wrap(AudioDataInner {
        frame: inner.frame.clone(),
        format: inner.format,
        timestamp_us: inner.timestamp_us,
      }))
    })
  }

  /// Release the samples; idempotent
  pub fn close(&self) {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    *inner = None;
  }

  // ========================================================================
  // Internal methods for codec integration
  // ========================================================================

  /// Copy of the samples for the encoder queue
  pub(crate) fn frame_snapshot(&self) -> Result<Frame> {
    let inner = self.inner.lock()?;
    match inner.as_ref() {
      Some(i) => {
        let mut frame = i.frame.clone();
        frame.set_pts(i.timestamp_us);
        Ok(frame)
      }
      None => Err(type_error("AudioData is closed")),
    }
  }
}

impl std::fmt::Debug for AudioData {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self
      .read(|i| {
        f.debug_struct("AudioData")
          .field("format", &i.format)
          .field("sample_rate", &i.frame.sample_rate())
          .field("number_of_frames", &i.frame.nb_samples())
          .field("number_of_channels", &i.frame.channels())
          .field("timestamp", &i.timestamp_us)
          .finish()
      })
      .unwrap_or_else(|| f.debug_struct("AudioData").field("closed", &true).finish())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::webcodecs::error::DOMExceptionName;

  fn stereo_s16(frames: usize) -> AudioData {
    let samples: Vec<i16> = (0..frames * 2).map(|i| i as i16).collect();
    AudioData::new(AudioDataInit {
      format: Some(AudioSampleFormat::S16),
      sample_rate: Some(48000),
      number_of_frames: Some(frames as u32),
      number_of_channels: Some(2),
      timestamp: Some(1000),
      data: Some(samples_to_bytes(&samples)),
    })
    .unwrap()
  }

  #[test]
  fn test_format_strings() {
    assert_eq!("f32-planar".parse::<AudioSampleFormat>().unwrap(), AudioSampleFormat::F32Planar);
    assert_eq!(AudioSampleFormat::S16Planar.to_string(), "s16-planar");
    let err = "s24".parse::<AudioSampleFormat>().unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }

  #[test]
  fn test_accessors() {
    let data = stereo_s16(480);
    assert_eq!(data.format(), Some(AudioSampleFormat::S16));
    assert_eq!(data.sample_rate(), 48000);
    assert_eq!(data.number_of_frames(), 480);
    assert_eq!(data.number_of_channels(), 2);
    assert_eq!(data.timestamp(), 1000);
    assert_eq!(data.duration(), 10_000);
  }

  #[test]
  fn test_missing_field_is_type_error() {
    let err = AudioData::new(AudioDataInit {
      format: Some(AudioSampleFormat::F32),
      sample_rate: Some(48000),
      number_of_frames: Some(10),
      number_of_channels: Some(1),
      timestamp: None,
      data: Some(vec![0; 40]),
    })
    .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);

    let err = AudioData::new(AudioDataInit {
      format: Some(AudioSampleFormat::F32),
      sample_rate: Some(48000),
      number_of_frames: Some(10),
      number_of_channels: Some(1),
      timestamp: Some(0),
      data: Some(vec![0; 39]),
    })
    .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }

  #[test]
  fn test_copy_to_deinterleaves() {
    let data = stereo_s16(4);
    let options = AudioDataCopyToOptions {
      plane_index: 1,
      format: Some(AudioSampleFormat::S16Planar),
      ..Default::default()
    };
    assert_eq!(data.allocation_size(&options).unwrap(), 8);
    let mut out = vec![0u8; 8];
    data.copy_to(&mut out, &options).unwrap();
    assert_eq!(bytes_to_samples::<i16>(&out), vec![1, 3, 5, 7]);
  }

  #[test]
  fn test_copy_to_with_offset_and_count() {
    let data = stereo_s16(8);
    let options = AudioDataCopyToOptions {
      frame_offset: Some(2),
      frame_count: Some(3),
      ..Default::default()
    };
    let mut out = vec![0u8; data.allocation_size(&options).unwrap()];
    data.copy_to(&mut out, &options).unwrap();
    assert_eq!(bytes_to_samples::<i16>(&out), vec![4, 5, 6, 7, 8, 9]);

    let too_far = AudioDataCopyToOptions {
      frame_offset: Some(8),
      ..Default::default()
    };
    assert!(data.allocation_size(&too_far).is_err());
  }

  #[test]
  fn test_copy_to_converts_sample_type() {
    let data = AudioData::new(AudioDataInit {
      format: Some(AudioSampleFormat::F32),
      sample_rate: Some(8000),
      number_of_frames: Some(2),
      number_of_channels: Some(1),
      timestamp: Some(0),
      data: Some(samples_to_bytes(&[0.5f32, -1.0])),
    })
    .unwrap();
    let options = AudioDataCopyToOptions {
      format: Some(AudioSampleFormat::S16),
      ..Default::default()
    };
    let mut out = vec![0u8; 4];
    data.copy_to(&mut out, &options).unwrap();
    let samples = bytes_to_samples::<i16>(&out);
    assert_eq!(samples[0], 16384);
    assert_eq!(samples[1], -32767);
  }

  #[test]
  fn test_small_destination_is_type_error() {
    let data = stereo_s16(4);
    let mut out = vec![0u8; 15];
    let err = data
      .copy_to(&mut out, &AudioDataCopyToOptions::default())
      .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }

  #[test]
  fn test_close_semantics() {
    let data = stereo_s16(16);
    let copy = data.try_clone().unwrap();
    data.close();
    data.close();

    assert!(data.is_closed());
    assert_eq!(data.format(), None);
    assert_eq!(data.sample_rate(), 0);
    assert_eq!(data.number_of_frames(), 0);
    assert_eq!(data.duration(), 0);
    assert_eq!(
      data.try_clone().unwrap_err().name(),
      DOMExceptionName::InvalidStateError
    );
    assert_eq!(
      data
        .allocation_size(&AudioDataCopyToOptions::default())
        .unwrap_err()
        .name(),
      DOMExceptionName::InvalidStateError
    );
    let mut out = vec![0u8; 64];
    assert!(data
      .copy_to(&mut out, &AudioDataCopyToOptions::default())
      .is_err());

    // the clone is independent
    assert_eq!(copy.number_of_frames(), 16);
  }
}
