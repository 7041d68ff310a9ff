//! Audio resampler
//!
//! Converts between sample formats, channel counts and sample rates.
//! Rate conversion is linear interpolation with the fractional read position
//! and the last input sample carried across calls, so consecutive chunks of a
//! stream resample without seams.

use crate::webcodecs::AudioSampleFormat;

use super::{CodecError, CodecResult, Frame};

/// Audio sample format, channel layout and sample rate converter
pub struct Resampler {
  src_channels: u32,
  src_sample_rate: u32,
  src_format: AudioSampleFormat,
  dst_channels: u32,
  dst_sample_rate: u32,
  dst_format: AudioSampleFormat,
  /// Next output position in input samples, relative to the current chunk
  position: f64,
  /// Last input sample per destination channel from the previous chunk
  last: Vec<f32>,
}

impl Resampler {
  /// Create a new resampler for the given conversion
  pub fn new(
    src_channels: u32,
    src_sample_rate: u32,
    src_format: AudioSampleFormat,
    dst_channels: u32,
    dst_sample_rate: u32,
    dst_format: AudioSampleFormat,
  ) -> CodecResult<Self> {
    if src_channels == 0 || dst_channels == 0 || src_sample_rate == 0 || dst_sample_rate == 0 {
      return Err(CodecError::InvalidConfig(
        "Resampler needs non-zero channels and sample rates".into(),
      ));
    }
    Ok(Self {
      src_channels,
      src_sample_rate,
      src_format,
      dst_channels,
      dst_sample_rate,
      dst_format,
      position: 0.0,
      last: Vec::new(),
    })
  }

  /// Create a resampler for format conversion only
  pub fn new_format_converter(
    channels: u32,
    sample_rate: u32,
    src_format: AudioSampleFormat,
    dst_format: AudioSampleFormat,
  ) -> CodecResult<Self> {
    Self::new(
      channels,
      sample_rate,
      src_format,
      channels,
      sample_rate,
      dst_format,
    )
  }

  /// Convert audio samples to a newly allocated frame
  pub fn convert_alloc(&mut self, src: &Frame) -> CodecResult<Frame> {
    let format = src
      .sample_format()
      .ok_or_else(|| CodecError::InvalidData("Frame is not audio".into()))?;
    if format != self.src_format
      || src.channels() != self.src_channels
      || src.sample_rate() != self.src_sample_rate
    {
      return Err(CodecError::InvalidData(format!(
        "Resampler expects {} ch {} Hz {}, got {} ch {} Hz {}",
        self.src_channels,
        self.src_sample_rate,
        self.src_format,
        src.channels(),
        src.sample_rate(),
        format
      )));
    }

    if !self.needs_conversion() {
      return Ok(src.clone());
    }
    if self.is_format_only() && self.src_format.sample_type() == self.dst_format.sample_type() {
      return reorganize(src, self.dst_format);
    }

    let channels = remix(read_channels(src)?, self.dst_channels);
    let channels = if self.src_sample_rate == self.dst_sample_rate {
      channels
    } else {
      self.interpolate(channels)
    };
    let mut frame = write_channels(&channels, self.dst_sample_rate, self.dst_format)?;
    frame.set_pts(src.pts());
    Ok(frame)
  }

  fn interpolate(&mut self, input: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    let n = input.first().map(|c| c.len()).unwrap_or(0);
    if n == 0 {
      return input;
    }
    let step = self.src_sample_rate as f64 / self.dst_sample_rate as f64;
    let has_last = self.last.len() == input.len();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); input.len()];

    while self.position < (n - 1) as f64 {
      let idx0 = self.position.floor();
      let frac = (self.position - idx0) as f32;
      for (ch, samples) in input.iter().enumerate() {
        let a = if idx0 < 0.0 {
          if has_last {
            self.last[ch]
          } else {
            samples[0]
          }
        } else {
          samples[idx0 as usize]
        };
        let b = samples[(idx0 + 1.0) as usize];
        output[ch].push(a + (b - a) * frac);
      }
      self.position += step;
    }

    self.position -= n as f64;
    self.last = input.iter().map(|c| c[n - 1]).collect();
    output
  }

  /// Drop interpolation state (after reset)
  pub fn reset(&mut self) {
    self.position = 0.0;
    self.last.clear();
  }

  // ========================================================================
  // Accessors
  // ========================================================================

  pub fn src_channels(&self) -> u32 {
    self.src_channels
  }

  pub fn src_sample_rate(&self) -> u32 {
    self.src_sample_rate
  }

  pub fn src_format(&self) -> AudioSampleFormat {
    self.src_format
  }

  pub fn dst_channels(&self) -> u32 {
    self.dst_channels
  }

  pub fn dst_sample_rate(&self) -> u32 {
    self.dst_sample_rate
  }

  pub fn dst_format(&self) -> AudioSampleFormat {
    self.dst_format
  }

  /// Check if only the sample format changes
  pub fn is_format_only(&self) -> bool {
    self.src_channels == self.dst_channels && self.src_sample_rate == self.dst_sample_rate
  }

  /// Check if any conversion is actually needed
  pub fn needs_conversion(&self) -> bool {
    self.src_channels != self.dst_channels
      || self.src_sample_rate != self.dst_sample_rate
      || self.src_format != self.dst_format
  }
}

impl std::fmt::Debug for Resampler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Resampler")
      .field("src_channels", &self.src_channels)
      .field("src_sample_rate", &self.src_sample_rate)
      .field("src_format", &self.src_format)
      .field("dst_channels", &self.dst_channels)
      .field("dst_sample_rate", &self.dst_sample_rate)
      .field("dst_format", &self.dst_format)
      .finish()
  }
}

// ============================================================================
// Sample helpers
// ============================================================================

/// Decode one sample to the [-1.0, 1.0] range
fn decode_sample(bytes: &[u8], format: AudioSampleFormat) -> f32 {
  match format.bytes_per_sample() {
    1 => (bytes[0] as f32 - 128.0) / 128.0,
    2 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
    _ if format.is_float() => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    _ => (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / 2_147_483_648.0) as f32,
  }
}

fn encode_sample(value: f32, format: AudioSampleFormat, out: &mut Vec<u8>) {
  let clamped = value.clamp(-1.0, 1.0);
  match format.bytes_per_sample() {
    1 => out.push((clamped * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8),
    2 => out.extend_from_slice(&((clamped * 32767.0).round() as i16).to_le_bytes()),
    _ if format.is_float() => out.extend_from_slice(&value.to_le_bytes()),
    _ => out.extend_from_slice(&((clamped as f64 * 2_147_483_647.0).round() as i32).to_le_bytes()),
  }
}

/// Read every channel of an audio frame as normalized f32 samples
pub fn read_channels(frame: &Frame) -> CodecResult<Vec<Vec<f32>>> {
  let format = frame
    .sample_format()
    .ok_or_else(|| CodecError::InvalidData("Frame is not audio".into()))?;
  let bps = format.bytes_per_sample();
  let channels = frame.channels() as usize;
  let frames = frame.nb_samples() as usize;
  let mut out = vec![Vec::with_capacity(frames); channels];

  if format.is_planar() {
    for (ch, samples) in out.iter_mut().enumerate() {
      let data = frame
        .audio_channel_data(ch)
        .ok_or_else(|| CodecError::InvalidData(format!("Missing channel {}", ch)))?;
      samples.extend(data.chunks_exact(bps).take(frames).map(|s| decode_sample(s, format)));
    }
  } else {
    let data = frame
      .audio_channel_data(0)
      .ok_or_else(|| CodecError::InvalidData("Missing audio data".into()))?;
    for (i, sample) in data.chunks_exact(bps).take(frames * channels).enumerate() {
      out[i % channels].push(decode_sample(sample, format));
    }
  }
  Ok(out)
}

/// Build an audio frame from normalized f32 channels
pub fn write_channels(
  channels: &[Vec<f32>],
  sample_rate: u32,
  format: AudioSampleFormat,
) -> CodecResult<Frame> {
  let frames = channels.first().map(|c| c.len()).unwrap_or(0);
  let mut data = Vec::with_capacity(frames * channels.len() * format.bytes_per_sample());
  if format.is_planar() {
    for samples in channels {
      for &s in samples {
        encode_sample(s, format, &mut data);
      }
    }
  } else {
    for i in 0..frames {
      for samples in channels {
        encode_sample(samples[i], format, &mut data);
      }
    }
  }
  Frame::from_audio_data(
    frames as u32,
    channels.len() as u32,
    sample_rate,
    format,
    &data,
  )
}

/// Up/down mix: mono to many duplicates, many to mono averages, otherwise the
/// leading channels are kept and missing ones are silent
fn remix(mut channels: Vec<Vec<f32>>, dst_channels: u32) -> Vec<Vec<f32>> {
  let dst = dst_channels as usize;
  if channels.len() == dst || channels.is_empty() {
    return channels;
  }
  let frames = channels[0].len();
  if channels.len() == 1 {
    return vec![channels[0].clone(); dst];
  }
  if dst == 1 {
    let count = channels.len() as f32;
    let mixed = (0..frames)
      .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / count)
      .collect();
    return vec![mixed];
  }
  channels.resize(dst, vec![0.0; frames]);
  channels
}

/// Interleave or deinterleave without touching sample values
fn reorganize(src: &Frame, dst_format: AudioSampleFormat) -> CodecResult<Frame> {
  let mut dst = Frame::new_audio(src.nb_samples(), src.channels(), src.sample_rate(), dst_format)?;
  let bps = dst_format.bytes_per_sample();
  let channels = src.channels() as usize;
  let frames = src.nb_samples() as usize;
  let src_planar = src.sample_format().map(|f| f.is_planar()).unwrap_or(false);

  for ch in 0..channels {
    for i in 0..frames {
      let (src_plane, src_off) = if src_planar {
        (ch, i * bps)
      } else {
        (0, (i * channels + ch) * bps)
      };
      let (dst_plane, dst_off) = if dst_format.is_planar() {
        (ch, i * bps)
      } else {
        (0, (i * channels + ch) * bps)
      };
      let sample = src
        .plane(src_plane)
        .and_then(|p| p.get(src_off..src_off + bps))
        .ok_or_else(|| CodecError::InvalidData("Audio plane too short".into()))?
        .to_vec();
      if let Some(plane) = dst.plane_mut(dst_plane) {
        plane[dst_off..dst_off + bps].copy_from_slice(&sample);
      }
    }
  }
  dst.set_pts(src.pts());
  Ok(dst)
}
