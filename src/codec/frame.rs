//! Raw media frame
//!
//! Owns tightly packed planes of either video pixels or audio samples.
//! Video planes follow the layout described by `VideoPixelFormat::plane_sizes`.
//! Audio frames hold one plane for interleaved formats and one plane per
//! channel for planar formats.

use crate::webcodecs::{AudioSampleFormat, VideoPixelFormat};

use super::{CodecError, CodecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLayout {
  Video {
    width: u32,
    height: u32,
    format: VideoPixelFormat,
  },
  Audio {
    nb_samples: u32,
    channels: u32,
    sample_rate: u32,
    format: AudioSampleFormat,
  },
}

/// Owned raw frame (video picture or batch of audio samples)
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  layout: FrameLayout,
  planes: Vec<Vec<u8>>,
  pts: i64,
  duration: Option<i64>,
}

impl Frame {
  /// Allocate a zeroed video frame
  pub fn new_video(width: u32, height: u32, format: VideoPixelFormat) -> CodecResult<Self> {
    if width == 0 || height == 0 {
      return Err(CodecError::InvalidConfig(format!(
        "Invalid frame dimensions {}x{}",
        width, height
      )));
    }
    let planes = format
      .plane_sizes(width, height)
      .into_iter()
      .map(|(stride, rows)| vec![0u8; stride as usize * rows as usize])
      .collect();

    Ok(Self {
      layout: FrameLayout::Video {
        width,
        height,
        format,
      },
      planes,
      pts: 0,
      duration: None,
    })
  }

  /// Build a video frame from a contiguous buffer with planes back to back
  pub fn from_video_data(
    width: u32,
    height: u32,
    format: VideoPixelFormat,
    data: &[u8],
  ) -> CodecResult<Self> {
    let mut frame = Self::new_video(width, height, format)?;
    let needed = frame.data_size();
    if data.len() < needed {
      return Err(CodecError::InvalidData(format!(
        "Video data too short: need {} bytes, got {}",
        needed,
        data.len()
      )));
    }
    let mut offset = 0;
    for plane in frame.planes.iter_mut() {
      let len = plane.len();
      plane.copy_from_slice(&data[offset..offset + len]);
      offset += len;
    }
    Ok(frame)
  }

  /// Allocate a zeroed audio frame
  pub fn new_audio(
    nb_samples: u32,
    channels: u32,
    sample_rate: u32,
    format: AudioSampleFormat,
  ) -> CodecResult<Self> {
    if channels == 0 || sample_rate == 0 {
      return Err(CodecError::InvalidConfig(format!(
        "Invalid audio layout: {} channels at {} Hz",
        channels, sample_rate
      )));
    }
    let bps = format.bytes_per_sample();
    let planes = if format.is_planar() {
      (0..channels)
        .map(|_| vec![0u8; nb_samples as usize * bps])
        .collect()
    } else {
      vec![vec![0u8; nb_samples as usize * channels as usize * bps]]
    };

    Ok(Self {
      layout: FrameLayout::Audio {
        nb_samples,
        channels,
        sample_rate,
        format,
      },
      planes,
      pts: 0,
      duration: None,
    })
  }

  /// Build an audio frame from a contiguous buffer (planar planes back to back)
  pub fn from_audio_data(
    nb_samples: u32,
    channels: u32,
    sample_rate: u32,
    format: AudioSampleFormat,
    data: &[u8],
  ) -> CodecResult<Self> {
    let mut frame = Self::new_audio(nb_samples, channels, sample_rate, format)?;
    let needed = frame.data_size();
    if data.len() < needed {
      return Err(CodecError::InvalidData(format!(
        "Audio data too short: need {} bytes, got {}",
        needed,
        data.len()
      )));
    }
    let mut offset = 0;
    for plane in frame.planes.iter_mut() {
      let len = plane.len();
      plane.copy_from_slice(&data[offset..offset + len]);
      offset += len;
    }
    Ok(frame)
  }

  // ========================================================================
  // Layout
  // ========================================================================

  pub fn is_video(&self) -> bool {
    matches!(self.layout, FrameLayout::Video { .. })
  }

  pub fn is_audio(&self) -> bool {
    matches!(self.layout, FrameLayout::Audio { .. })
  }

  /// Frame width (0 for audio)
  pub fn width(&self) -> u32 {
    match self.layout {
      FrameLayout::Video { width, .. } => width,
      FrameLayout::Audio { .. } => 0,
    }
  }

  /// Frame height (0 for audio)
  pub fn height(&self) -> u32 {
    match self.layout {
      FrameLayout::Video { height, .. } => height,
      FrameLayout::Audio { .. } => 0,
    }
  }

  pub fn pixel_format(&self) -> Option<VideoPixelFormat> {
    match self.layout {
      FrameLayout::Video { format, .. } => Some(format),
      FrameLayout::Audio { .. } => None,
    }
  }

  /// Samples per channel (0 for video)
  pub fn nb_samples(&self) -> u32 {
    match self.layout {
      FrameLayout::Audio { nb_samples, .. } => nb_samples,
      FrameLayout::Video { .. } => 0,
    }
  }

  pub fn channels(&self) -> u32 {
    match self.layout {
      FrameLayout::Audio { channels, .. } => channels,
      FrameLayout::Video { .. } => 0,
    }
  }

  pub fn sample_rate(&self) -> u32 {
    match self.layout {
      FrameLayout::Audio { sample_rate, .. } => sample_rate,
      FrameLayout::Video { .. } => 0,
    }
  }

  pub fn sample_format(&self) -> Option<AudioSampleFormat> {
    match self.layout {
      FrameLayout::Audio { format, .. } => Some(format),
      FrameLayout::Video { .. } => None,
    }
  }

  // ========================================================================
  // Timing
  // ========================================================================

  /// Presentation timestamp in microseconds
  pub fn pts(&self) -> i64 {
    self.pts
  }

  pub fn set_pts(&mut self, pts: i64) {
    self.pts = pts;
  }

  /// Duration in microseconds
  pub fn duration(&self) -> Option<i64> {
    self.duration
  }

  pub fn set_duration(&mut self, duration: i64) {
    self.duration = Some(duration);
  }

  // ========================================================================
  // Data Access
  // ========================================================================

  pub fn plane_count(&self) -> usize {
    self.planes.len()
  }

  pub fn plane(&self, index: usize) -> Option<&[u8]> {
    self.planes.get(index).map(|p| p.as_slice())
  }

  pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
    self.planes.get_mut(index).map(|p| p.as_mut_slice())
  }

  /// Bytes per row of a video plane
  pub fn linesize(&self, index: usize) -> usize {
    match self.layout {
      FrameLayout::Video {
        width,
        height,
        format,
      } => format
        .plane_sizes(width, height)
        .get(index)
        .map(|(stride, _)| *stride as usize)
        .unwrap_or(0),
      FrameLayout::Audio { .. } => self.planes.get(index).map(|p| p.len()).unwrap_or(0),
    }
  }

  /// Channel data: plane `ch` for planar audio, the whole buffer for channel 0
  /// of interleaved audio
  pub fn audio_channel_data(&self, ch: usize) -> Option<&[u8]> {
    let format = self.sample_format()?;
    if format.is_planar() || ch == 0 {
      self.plane(ch)
    } else {
      None
    }
  }

  pub fn audio_channel_data_mut(&mut self, ch: usize) -> Option<&mut [u8]> {
    let format = self.sample_format()?;
    if format.is_planar() || ch == 0 {
      self.plane_mut(ch)
    } else {
      None
    }
  }

  /// Total byte size of all planes
  pub fn data_size(&self) -> usize {
    self.planes.iter().map(|p| p.len()).sum()
  }

  /// Copy all planes back to back into `dest`
  pub fn copy_to_buffer(&self, dest: &mut [u8]) -> CodecResult<usize> {
    let size = self.data_size();
    if dest.len() < size {
      return Err(CodecError::InvalidData(format!(
        "Buffer too small: need {} bytes, got {}",
        size,
        dest.len()
      )));
    }
    let mut offset = 0;
    for plane in &self.planes {
      dest[offset..offset + plane.len()].copy_from_slice(plane);
      offset += plane.len();
    }
    Ok(size)
  }

  /// Contiguous copy of all planes
  pub fn to_vec(&self) -> Vec<u8> {
    self.planes.concat()
  }
}
