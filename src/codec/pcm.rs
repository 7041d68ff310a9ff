//! PCM and G.711 engines
//!
//! Codec strings `pcm-u8`, `pcm-s16`, `pcm-s24`, `pcm-s32`, `pcm-f32`,
//! `ulaw` and `alaw`. Payloads are interleaved little-endian samples; every
//! input frame becomes one key packet.

use crate::webcodecs::AudioSampleFormat;

use super::{
  context::{DecoderEngine, DecoderFactory, EncoderEngine, EncoderFactory, MediaFormat},
  CodecError, CodecId, CodecResult, DecoderSettings, EncoderSettings, Frame, Packet,
};

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;
const ALAW_SEG_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// Raw sample format the encoder consumes and the decoder produces
fn native_format(codec_id: CodecId) -> Option<AudioSampleFormat> {
  match codec_id {
    CodecId::PcmU8 => Some(AudioSampleFormat::U8),
    CodecId::PcmS16 | CodecId::Ulaw | CodecId::Alaw => Some(AudioSampleFormat::S16),
    CodecId::PcmS24 | CodecId::PcmS32 => Some(AudioSampleFormat::S32),
    CodecId::PcmF32 => Some(AudioSampleFormat::F32),
    _ => None,
  }
}

/// Bytes per sample in the encoded payload
fn wire_bytes_per_sample(codec_id: CodecId) -> usize {
  match codec_id {
    CodecId::PcmU8 | CodecId::Ulaw | CodecId::Alaw => 1,
    CodecId::PcmS16 => 2,
    CodecId::PcmS24 => 3,
    _ => 4,
  }
}

// ============================================================================
// G.711
// ============================================================================

pub fn linear_to_ulaw(sample: i16) -> u8 {
  let mut s = sample as i32;
  let sign = if s < 0 {
    s = -s;
    0x80
  } else {
    0
  };
  s = s.min(ULAW_CLIP) + ULAW_BIAS;

  let mut exponent = 7;
  let mut mask = 0x4000;
  while exponent > 0 && (s & mask) == 0 {
    exponent -= 1;
    mask >>= 1;
  }
  let mantissa = (s >> (exponent + 3)) & 0x0F;
  !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn ulaw_to_linear(byte: u8) -> i16 {
  let u = !byte as i32;
  let mut t = ((u & 0x0F) << 3) + ULAW_BIAS;
  t <<= (u & 0x70) >> 4;
  if u & 0x80 != 0 {
    (ULAW_BIAS - t) as i16
  } else {
    (t - ULAW_BIAS) as i16
  }
}

pub fn linear_to_alaw(sample: i16) -> u8 {
  let mut s = sample as i32 >> 3;
  let mask = if s >= 0 {
    0xD5
  } else {
    s = -s - 1;
    0x55
  };
  let seg = ALAW_SEG_END.iter().position(|&end| s <= end).unwrap_or(8);
  if seg >= 8 {
    return (0x7F ^ mask) as u8;
  }
  let quant = if seg < 2 { (s >> 1) & 0x0F } else { (s >> seg) & 0x0F };
  (((seg as i32) << 4 | quant) ^ mask) as u8
}

pub fn alaw_to_linear(byte: u8) -> i16 {
  let a = (byte ^ 0x55) as i32;
  let mut t = (a & 0x0F) << 4;
  let seg = (a & 0x70) >> 4;
  match seg {
    0 => t += 8,
    1 => t += 0x108,
    _ => {
      t += 0x108;
      t <<= seg - 1;
    }
  }
  if a & 0x80 != 0 {
    t as i16
  } else {
    -t as i16
  }
}

// ============================================================================
// Encoder
// ============================================================================

pub struct PcmEncoder {
  codec_id: CodecId,
  format: AudioSampleFormat,
  channels: u32,
}

impl PcmEncoder {
  pub fn new(codec_id: CodecId, channels: u32) -> CodecResult<Self> {
    let format =
      native_format(codec_id).ok_or_else(|| CodecError::CodecNotFound(format!("{:?}", codec_id)))?;
    Ok(Self {
      codec_id,
      format,
      channels,
    })
  }
}

impl EncoderEngine for PcmEncoder {
  fn encode(&mut self, frame: &Frame) -> CodecResult<Vec<Packet>> {
    if frame.sample_format() != Some(self.format) || frame.channels() != self.channels {
      return Err(CodecError::InvalidData(format!(
        "PCM encoder expects {} with {} channels",
        self.format, self.channels
      )));
    }
    let samples = frame
      .plane(0)
      .ok_or_else(|| CodecError::InvalidData("Missing audio plane".into()))?;

    let payload = match self.codec_id {
      CodecId::PcmS24 => samples
        .chunks_exact(4)
        .flat_map(|s| [s[1], s[2], s[3]])
        .collect(),
      CodecId::Ulaw => samples
        .chunks_exact(2)
        .map(|s| linear_to_ulaw(i16::from_le_bytes([s[0], s[1]])))
        .collect(),
      CodecId::Alaw => samples
        .chunks_exact(2)
        .map(|s| linear_to_alaw(i16::from_le_bytes([s[0], s[1]])))
        .collect(),
      _ => samples.to_vec(),
    };

    Ok(vec![Packet::with_timing(
      payload,
      frame.pts(),
      frame.duration(),
      true,
    )])
  }

  fn flush(&mut self) -> CodecResult<Vec<Packet>> {
    Ok(Vec::new())
  }

  fn reset(&mut self) {}

  fn input_format(&self) -> MediaFormat {
    MediaFormat::Audio(self.format)
  }
}

pub struct PcmEncoderFactory;

impl EncoderFactory for PcmEncoderFactory {
  fn name(&self) -> &'static str {
    "pcm"
  }

  fn supports(&self, settings: &EncoderSettings) -> bool {
    settings.codec_id.is_pcm()
      && settings
        .audio()
        .is_some_and(|a| a.channels > 0 && a.sample_rate > 0)
  }

  fn create(&self, settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
    let audio = settings
      .audio()
      .ok_or_else(|| CodecError::InvalidConfig("PCM needs audio settings".into()))?;
    Ok(Box::new(PcmEncoder::new(settings.codec_id, audio.channels)?))
  }
}

// ============================================================================
// Decoder
// ============================================================================

pub struct PcmDecoder {
  codec_id: CodecId,
  format: AudioSampleFormat,
  channels: u32,
  sample_rate: u32,
}

impl PcmDecoder {
  pub fn new(codec_id: CodecId, channels: u32, sample_rate: u32) -> CodecResult<Self> {
    let format =
      native_format(codec_id).ok_or_else(|| CodecError::CodecNotFound(format!("{:?}", codec_id)))?;
    Ok(Self {
      codec_id,
      format,
      channels,
      sample_rate,
    })
  }
}

impl DecoderEngine for PcmDecoder {
  fn decode(&mut self, packet: &Packet) -> CodecResult<Vec<Frame>> {
    let data = packet.as_slice();
    let unit = wire_bytes_per_sample(self.codec_id) * self.channels as usize;
    if data.is_empty() {
      return Ok(Vec::new());
    }
    if data.len() % unit != 0 {
      return Err(CodecError::InvalidData(format!(
        "PCM payload of {} bytes is not a multiple of {}",
        data.len(),
        unit
      )));
    }
    let nb_samples = (data.len() / unit) as u32;

    let samples: Vec<u8> = match self.codec_id {
      CodecId::PcmS24 => data
        .chunks_exact(3)
        .flat_map(|s| [0, s[0], s[1], s[2]])
        .collect(),
      CodecId::Ulaw => data
        .iter()
        .flat_map(|&b| ulaw_to_linear(b).to_le_bytes())
        .collect(),
      CodecId::Alaw => data
        .iter()
        .flat_map(|&b| alaw_to_linear(b).to_le_bytes())
        .collect(),
      _ => data.to_vec(),
    };

    let mut frame = Frame::from_audio_data(
      nb_samples,
      self.channels,
      self.sample_rate,
      self.format,
      &samples,
    )?;
    frame.set_pts(packet.pts());
    frame.set_duration(nb_samples as i64 * 1_000_000 / self.sample_rate as i64);
    Ok(vec![frame])
  }

  fn reset(&mut self) {}
}

pub struct PcmDecoderFactory;

impl DecoderFactory for PcmDecoderFactory {
  fn name(&self) -> &'static str {
    "pcm"
  }

  fn supports(&self, settings: &DecoderSettings) -> bool {
    settings.codec_id.is_pcm()
      && settings
        .audio()
        .is_some_and(|a| a.channels > 0 && a.sample_rate > 0)
  }

  fn create(&self, settings: &DecoderSettings) -> CodecResult<Box<dyn DecoderEngine>> {
    let audio = settings
      .audio()
      .ok_or_else(|| CodecError::InvalidConfig("PCM needs audio settings".into()))?;
    Ok(Box::new(PcmDecoder::new(
      settings.codec_id,
      audio.channels,
      audio.sample_rate,
    )?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn s16_frame(samples: &[i16], channels: u32) -> Frame {
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    Frame::from_audio_data(
      samples.len() as u32 / channels,
      channels,
      8000,
      AudioSampleFormat::S16,
      &data,
    )
    .unwrap()
  }

  #[test]
  fn test_ulaw_round_trip_error_is_small() {
    for &s in &[0i16, 1000, -1000, 12345, -32768, 32767] {
      let back = ulaw_to_linear(linear_to_ulaw(s));
      let tolerance = (s as i32).abs() / 16 + 8;
      assert!((back as i32 - s as i32).abs() <= tolerance, "{} -> {}", s, back);
    }
    assert_eq!(linear_to_ulaw(0), 0xFF);
  }

  #[test]
  fn test_alaw_round_trip_error_is_small() {
    for &s in &[0i16, 1000, -1000, 12345, -32768, 32767] {
      let back = alaw_to_linear(linear_to_alaw(s));
      let tolerance = (s as i32).abs() / 16 + 16;
      assert!((back as i32 - s as i32).abs() <= tolerance, "{} -> {}", s, back);
    }
    assert_eq!(linear_to_alaw(0), 0xD5);
  }

  #[test]
  fn test_s16_is_passthrough() {
    let mut encoder = PcmEncoder::new(CodecId::PcmS16, 2).unwrap();
    let mut frame = s16_frame(&[1, -1, 2, -2], 2);
    frame.set_pts(500);
    let packets = encoder.encode(&frame).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].pts(), 500);
    assert_eq!(packets[0].as_slice(), frame.plane(0).unwrap());

    let mut decoder = PcmDecoder::new(CodecId::PcmS16, 2, 8000).unwrap();
    let frames = decoder.decode(&packets[0]).unwrap();
    assert_eq!(frames[0].nb_samples(), 2);
    assert_eq!(frames[0].plane(0), frame.plane(0));
    assert_eq!(frames[0].pts(), 500);
  }

  #[test]
  fn test_s24_packs_three_bytes() {
    let data: Vec<u8> = [0x1234_5600i32, -256]
      .iter()
      .flat_map(|s| s.to_le_bytes())
      .collect();
    let frame = Frame::from_audio_data(2, 1, 48000, AudioSampleFormat::S32, &data).unwrap();
    let mut encoder = PcmEncoder::new(CodecId::PcmS24, 1).unwrap();
    let packet = encoder.encode(&frame).unwrap().remove(0);
    assert_eq!(packet.as_slice(), &[0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF]);

    let mut decoder = PcmDecoder::new(CodecId::PcmS24, 1, 48000).unwrap();
    let decoded = decoder.decode(&packet).unwrap().remove(0);
    assert_eq!(decoded.plane(0).unwrap(), data.as_slice());
  }

  #[test]
  fn test_decoder_rejects_partial_sample() {
    let mut decoder = PcmDecoder::new(CodecId::PcmS16, 2, 8000).unwrap();
    assert!(decoder.decode(&Packet::new(vec![0; 3])).is_err());
  }

  #[test]
  fn test_encoder_rejects_wrong_format() {
    let mut encoder = PcmEncoder::new(CodecId::PcmF32, 2).unwrap();
    assert!(encoder.encode(&s16_frame(&[0, 0], 2)).is_err());
  }
}
