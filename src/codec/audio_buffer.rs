//! Audio sample buffer for re-blocking samples before encoding
//!
//! Fixed block size engines (FLAC) need every frame to carry exactly
//! `frame_size` samples per channel. This buffer accumulates converted input
//! and hands out full blocks; on flush the trailing partial block is padded
//! with silence so that short inputs still produce output.

use crate::webcodecs::AudioSampleFormat;

use super::{CodecError, CodecResult, Frame};

/// Default FLAC block size, matching what libFLAC picks for 48 kHz input
pub const FLAC_DEFAULT_BLOCK_SIZE: usize = 4608;

/// Buffer for accumulating audio samples
pub struct AudioSampleBuffer {
  /// Interleaved sample bytes
  buffer: Vec<u8>,
  /// Samples per channel currently buffered
  samples_in_buffer: usize,
  /// Target frame size (samples per channel)
  frame_size: usize,
  channels: u32,
  sample_rate: u32,
  /// Format of produced frames
  format: AudioSampleFormat,
  bytes_per_sample: usize,
}

impl AudioSampleBuffer {
  /// Create a new audio sample buffer
  ///
  /// # Arguments
  /// * `frame_size` - Number of samples per channel required per frame
  /// * `channels` - Number of audio channels
  /// * `sample_rate` - Sample rate in Hz
  /// * `format` - Sample format of produced frames
  pub fn new(
    frame_size: usize,
    channels: u32,
    sample_rate: u32,
    format: AudioSampleFormat,
  ) -> Self {
    let bytes_per_sample = format.bytes_per_sample();
    Self {
      buffer: Vec::with_capacity(frame_size * channels as usize * bytes_per_sample * 2),
      samples_in_buffer: 0,
      frame_size: frame_size.max(1),
      channels,
      sample_rate,
      format,
      bytes_per_sample,
    }
  }

  /// Append interleaved sample bytes
  pub fn add_samples(&mut self, samples: &[u8], num_samples: usize) -> CodecResult<()> {
    let sample_bytes = num_samples * self.channels as usize * self.bytes_per_sample;
    if samples.len() < sample_bytes {
      return Err(CodecError::InvalidData(
        "Sample data too short for specified sample count".into(),
      ));
    }
    self.buffer.extend_from_slice(&samples[..sample_bytes]);
    self.samples_in_buffer += num_samples;
    Ok(())
  }

  /// Append the samples of a frame, interleaving planar input
  pub fn add_frame(&mut self, frame: &Frame) -> CodecResult<()> {
    let frame_format = frame
      .sample_format()
      .ok_or_else(|| CodecError::InvalidData("Frame is not audio".into()))?;

    if frame.channels() != self.channels {
      return Err(CodecError::InvalidConfig(format!(
        "Channel count mismatch: expected {}, got {}",
        self.channels,
        frame.channels()
      )));
    }
    if frame_format.bytes_per_sample() != self.bytes_per_sample {
      return Err(CodecError::UnsupportedSampleFormat(frame_format.to_string()));
    }

    let nb_samples = frame.nb_samples() as usize;
    if !frame_format.is_planar() {
      let data = frame
        .audio_channel_data(0)
        .ok_or_else(|| CodecError::InvalidState("No audio data in frame".into()))?;
      return self.add_samples(data, nb_samples);
    }

    let bps = self.bytes_per_sample;
    let channels = self.channels as usize;
    let mut interleaved = vec![0u8; nb_samples * channels * bps];
    for ch in 0..channels {
      let ch_data = frame
        .audio_channel_data(ch)
        .ok_or_else(|| CodecError::InvalidState(format!("Missing channel {}", ch)))?;
      for sample in 0..nb_samples {
        let src = sample * bps;
        let dst = (sample * channels + ch) * bps;
        interleaved[dst..dst + bps].copy_from_slice(&ch_data[src..src + bps]);
      }
    }
    self.add_samples(&interleaved, nb_samples)
  }

  /// Check if there are enough samples for a full frame
  pub fn has_full_frame(&self) -> bool {
    self.samples_in_buffer >= self.frame_size
  }

  /// Samples per channel currently buffered
  pub fn samples_available(&self) -> usize {
    self.samples_in_buffer
  }

  /// Number of complete frames available
  pub fn frames_available(&self) -> usize {
    self.samples_in_buffer / self.frame_size
  }

  /// Take a full frame of samples from the buffer
  ///
  /// Returns None if there aren't enough samples for a full frame
  pub fn take_frame(&mut self) -> CodecResult<Option<Frame>> {
    if !self.has_full_frame() {
      return Ok(None);
    }
    let frame_bytes = self.frame_size * self.channels as usize * self.bytes_per_sample;
    let block: Vec<u8> = self.buffer.drain(..frame_bytes).collect();
    self.samples_in_buffer -= self.frame_size;
    self.build_frame(&block, self.frame_size).map(Some)
  }

  /// Flush remaining samples as one full frame padded with silence
  ///
  /// Returns None if the buffer is empty. The number of real samples in the
  /// padded frame is returned alongside it.
  pub fn flush_padded(&mut self) -> CodecResult<Option<(Frame, usize)>> {
    if self.samples_in_buffer == 0 {
      return Ok(None);
    }
    let real = self.samples_in_buffer;
    let frame_bytes = self.frame_size * self.channels as usize * self.bytes_per_sample;
    let mut block = std::mem::take(&mut self.buffer);
    let silence = self.format.silence_byte();
    block.resize(frame_bytes, silence);
    self.samples_in_buffer = 0;
    let frame = self.build_frame(&block, self.frame_size)?;
    Ok(Some((frame, real)))
  }

  /// Clear the buffer
  pub fn clear(&mut self) {
    self.buffer.clear();
    self.samples_in_buffer = 0;
  }

  fn build_frame(&self, interleaved: &[u8], nb_samples: usize) -> CodecResult<Frame> {
    let mut frame = Frame::new_audio(
      nb_samples as u32,
      self.channels,
      self.sample_rate,
      self.format,
    )?;
    let bps = self.bytes_per_sample;
    let channels = self.channels as usize;

    if self.format.is_planar() {
      for ch in 0..channels {
        if let Some(ch_data) = frame.audio_channel_data_mut(ch) {
          for sample in 0..nb_samples {
            let src = (sample * channels + ch) * bps;
            let dst = sample * bps;
            ch_data[dst..dst + bps].copy_from_slice(&interleaved[src..src + bps]);
          }
        }
      }
    } else if let Some(data) = frame.audio_channel_data_mut(0) {
      let len = data.len();
      data.copy_from_slice(&interleaved[..len]);
    }
    Ok(frame)
  }

  // ========================================================================
  // Accessors
  // ========================================================================

  pub fn frame_size(&self) -> usize {
    self.frame_size
  }

  pub fn channels(&self) -> u32 {
    self.channels
  }

  pub fn sample_rate(&self) -> u32 {
    self.sample_rate
  }

  pub fn format(&self) -> AudioSampleFormat {
    self.format
  }
}

impl std::fmt::Debug for AudioSampleBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AudioSampleBuffer")
      .field("frame_size", &self.frame_size)
      .field("channels", &self.channels)
      .field("sample_rate", &self.sample_rate)
      .field("format", &self.format)
      .field("samples_in_buffer", &self.samples_in_buffer)
      .field("frames_available", &self.frames_available())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn s16_frame(nb_samples: u32, channels: u32, value: i16) -> Frame {
    let data: Vec<u8> = (0..nb_samples * channels)
      .flat_map(|_| value.to_le_bytes())
      .collect();
    Frame::from_audio_data(nb_samples, channels, 48000, AudioSampleFormat::S16, &data).unwrap()
  }

  #[test]
  fn test_buffer_creation() {
    let buffer = AudioSampleBuffer::new(1024, 2, 48000, AudioSampleFormat::S16);
    assert_eq!(buffer.frame_size(), 1024);
    assert_eq!(buffer.channels(), 2);
    assert_eq!(buffer.sample_rate(), 48000);
    assert!(!buffer.has_full_frame());
  }

  #[test]
  fn test_reblocks_across_inputs() {
    let mut buffer = AudioSampleBuffer::new(1000, 2, 48000, AudioSampleFormat::S16);
    buffer.add_frame(&s16_frame(600, 2, 1)).unwrap();
    assert!(buffer.take_frame().unwrap().is_none());
    buffer.add_frame(&s16_frame(600, 2, 2)).unwrap();

    let frame = buffer.take_frame().unwrap().unwrap();
    assert_eq!(frame.nb_samples(), 1000);
    assert_eq!(buffer.samples_available(), 200);
  }

  #[test]
  fn test_flush_pads_with_silence() {
    let mut buffer = AudioSampleBuffer::new(4608, 2, 48000, AudioSampleFormat::S16);
    buffer.add_frame(&s16_frame(1024, 2, 7)).unwrap();

    let (frame, real) = buffer.flush_padded().unwrap().unwrap();
    assert_eq!(real, 1024);
    assert_eq!(frame.nb_samples(), 4608);
    let data = frame.plane(0).unwrap();
    assert_eq!(i16::from_le_bytes([data[0], data[1]]), 7);
    let tail = data.len() - 2;
    assert_eq!(i16::from_le_bytes([data[tail], data[tail + 1]]), 0);
    assert!(buffer.flush_padded().unwrap().is_none());
  }

  #[test]
  fn test_planar_output() {
    let mut buffer = AudioSampleBuffer::new(4, 2, 48000, AudioSampleFormat::S16Planar);
    let data: Vec<u8> = [1i16, -1, 2, -2, 3, -3, 4, -4]
      .iter()
      .flat_map(|s| s.to_le_bytes())
      .collect();
    buffer.add_samples(&data, 4).unwrap();
    let frame = buffer.take_frame().unwrap().unwrap();
    let right = frame.audio_channel_data(1).unwrap();
    assert_eq!(i16::from_le_bytes([right[0], right[1]]), -1);
    assert_eq!(i16::from_le_bytes([right[6], right[7]]), -4);
  }

  #[test]
  fn test_channel_mismatch() {
    let mut buffer = AudioSampleBuffer::new(1024, 1, 48000, AudioSampleFormat::S16);
    assert!(buffer.add_frame(&s16_frame(10, 2, 0)).is_err());
  }
}
