//! FLAC engine
//!
//! The encoder emits one FLAC frame per packet with fixed-size blocks. Each
//! subframe is the smallest of constant, verbatim or a fixed predictor
//! (orders 0-4) with Rice-coded residuals. Stereo input additionally tries
//! left/side, right/side and mid/side decorrelation.
//!
//! The decoder accepts frames from any conforming encoder, including LPC
//! subframes, wasted bits and both Rice parameter widths.
//!
//! The codec description is `fLaC` followed by a STREAMINFO metadata block.

use crate::webcodecs::AudioSampleFormat;

use super::{
  audio_buffer::FLAC_DEFAULT_BLOCK_SIZE,
  context::{DecoderEngine, DecoderFactory, EncoderEngine, EncoderFactory, MediaFormat},
  CodecError, CodecId, CodecResult, DecoderSettings, EncoderSettings, Frame, Packet,
};

/// Stream marker that starts every FLAC description
pub const FLAC_MARKER: &[u8; 4] = b"fLaC";
const STREAMINFO_LEN: usize = 34;
const FRAME_SYNC: u32 = 0x3FFE;
const MAX_RICE_PARAM: u32 = 14;

// ============================================================================
// CRC
// ============================================================================

const fn crc8_table() -> [u8; 256] {
  let mut table = [0u8; 256];
  let mut i = 0;
  while i < 256 {
    let mut crc = i as u8;
    let mut bit = 0;
    while bit < 8 {
      crc = if crc & 0x80 != 0 {
        (crc << 1) ^ 0x07
      } else {
        crc << 1
      };
      bit += 1;
    }
    table[i] = crc;
    i += 1;
  }
  table
}

const fn crc16_table() -> [u16; 256] {
  let mut table = [0u16; 256];
  let mut i = 0;
  while i < 256 {
    let mut crc = (i as u16) << 8;
    let mut bit = 0;
    while bit < 8 {
      crc = if crc & 0x8000 != 0 {
        (crc << 1) ^ 0x8005
      } else {
        crc << 1
      };
      bit += 1;
    }
    table[i] = crc;
    i += 1;
  }
  table
}

static CRC8_TABLE: [u8; 256] = crc8_table();
static CRC16_TABLE: [u16; 256] = crc16_table();

fn crc8(data: &[u8]) -> u8 {
  data
    .iter()
    .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

fn crc16(data: &[u8]) -> u16 {
  data.iter().fold(0u16, |crc, &byte| {
    (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ byte) as usize]
  })
}

// ============================================================================
// Bit I/O
// ============================================================================

#[derive(Default)]
struct BitWriter {
  bytes: Vec<u8>,
  acc: u64,
  bits: u32,
}

impl BitWriter {
  fn with_capacity(capacity: usize) -> Self {
    Self {
      bytes: Vec::with_capacity(capacity),
      acc: 0,
      bits: 0,
    }
  }

  /// Write the low `n` bits of `value`, `n <= 32`
  fn write_bits(&mut self, value: u64, n: u32) {
    if n == 0 {
      return;
    }
    self.acc = (self.acc << n) | (value & ((1u64 << n) - 1));
    self.bits += n;
    while self.bits >= 8 {
      self.bits -= 8;
      self.bytes.push((self.acc >> self.bits) as u8);
    }
    self.acc &= (1u64 << self.bits) - 1;
  }

  fn write_signed(&mut self, value: i64, n: u32) {
    self.write_bits(value as u64, n);
  }

  fn write_unary(&mut self, mut zeros: u64) {
    while zeros >= 32 {
      self.write_bits(0, 32);
      zeros -= 32;
    }
    self.write_bits(1, zeros as u32 + 1);
  }

  fn write_rice(&mut self, value: i64, k: u32) {
    let folded = fold(value);
    self.write_unary(folded >> k);
    self.write_bits(folded, k);
  }

  fn write_utf8(&mut self, value: u64) {
    if value < 0x80 {
      self.write_bits(value, 8);
      return;
    }
    let mut continuation = Vec::new();
    let mut v = value;
    let mut first_bits = 6u32;
    loop {
      continuation.push(0x80 | (v & 0x3F) as u8);
      v >>= 6;
      first_bits -= 1;
      if v < (1 << first_bits) {
        break;
      }
    }
    let count = continuation.len() as u32 + 1;
    let prefix = (0xFFu64 << (8 - count)) & 0xFF;
    self.write_bits(prefix | v, 8);
    for byte in continuation.iter().rev() {
      self.write_bits(*byte as u64, 8);
    }
  }

  fn align(&mut self) {
    if self.bits > 0 {
      let pad = 8 - self.bits;
      self.write_bits(0, pad);
    }
  }

  fn bit_len(&self) -> usize {
    self.bytes.len() * 8 + self.bits as usize
  }

  fn append(&mut self, other: &BitWriter) {
    for &byte in &other.bytes {
      self.write_bits(byte as u64, 8);
    }
    self.write_bits(other.acc, other.bits);
  }

  fn into_bytes(mut self) -> Vec<u8> {
    self.align();
    self.bytes
  }
}

fn fold(value: i64) -> u64 {
  ((value << 1) ^ (value >> 63)) as u64
}

struct BitReader<'a> {
  data: &'a [u8],
  byte_pos: usize,
  bit_pos: u32,
}

impl<'a> BitReader<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self {
      data,
      byte_pos: 0,
      bit_pos: 0,
    }
  }

  fn read_bits(&mut self, n: u32) -> CodecResult<u32> {
    if n > 32 {
      return Err(CodecError::Bitstream(format!("Cannot read {} bits", n)));
    }
    let mut result = 0u64;
    let mut left = n;
    while left > 0 {
      let byte = *self
        .data
        .get(self.byte_pos)
        .ok_or_else(|| CodecError::Bitstream("Unexpected end of frame".into()))?;
      let available = 8 - self.bit_pos;
      let take = left.min(available);
      let bits = ((byte as u32) >> (available - take)) & ((1u32 << take) - 1);
      result = (result << take) | bits as u64;
      self.bit_pos += take;
      left -= take;
      if self.bit_pos == 8 {
        self.bit_pos = 0;
        self.byte_pos += 1;
      }
    }
    Ok(result as u32)
  }

  fn read_bit(&mut self) -> CodecResult<bool> {
    Ok(self.read_bits(1)? == 1)
  }

  fn read_signed(&mut self, n: u32) -> CodecResult<i64> {
    if n == 0 {
      return Ok(0);
    }
    let value = self.read_bits(n)? as i64;
    let shift = 64 - n;
    Ok((value << shift) >> shift)
  }

  fn read_unary(&mut self) -> CodecResult<u64> {
    let mut count = 0u64;
    while !self.read_bit()? {
      count += 1;
    }
    Ok(count)
  }

  fn read_rice(&mut self, k: u32) -> CodecResult<i64> {
    let high = self.read_unary()?;
    let low = self.read_bits(k)? as u64;
    let folded = (high << k) | low;
    Ok(((folded >> 1) as i64) ^ -((folded & 1) as i64))
  }

  fn read_utf8(&mut self) -> CodecResult<u64> {
    let first = self.read_bits(8)? as u8;
    if first & 0x80 == 0 {
      return Ok(first as u64);
    }
    let count = first.leading_ones();
    if !(2..=7).contains(&count) {
      return Err(CodecError::Bitstream("Invalid UTF-8 coded number".into()));
    }
    let mut value = (first & (0xFFu8 >> (count + 1))) as u64;
    for _ in 1..count {
      let byte = self.read_bits(8)? as u8;
      if byte & 0xC0 != 0x80 {
        return Err(CodecError::Bitstream("Invalid UTF-8 continuation".into()));
      }
      value = (value << 6) | (byte & 0x3F) as u64;
    }
    Ok(value)
  }

  fn align(&mut self) {
    if self.bit_pos > 0 {
      self.bit_pos = 0;
      self.byte_pos += 1;
    }
  }

  fn position(&self) -> usize {
    self.byte_pos
  }
}

// ============================================================================
// STREAMINFO
// ============================================================================

/// Parsed STREAMINFO metadata block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
  pub min_block_size: u32,
  pub max_block_size: u32,
  pub sample_rate: u32,
  pub channels: u32,
  pub bits_per_sample: u32,
  pub total_samples: u64,
}

impl StreamInfo {
  fn to_bytes(self) -> Vec<u8> {
    let mut w = BitWriter::with_capacity(STREAMINFO_LEN);
    w.write_bits(self.min_block_size as u64, 16);
    w.write_bits(self.max_block_size as u64, 16);
    w.write_bits(0, 24);
    w.write_bits(0, 24);
    w.write_bits(self.sample_rate as u64, 20);
    w.write_bits(self.channels as u64 - 1, 3);
    w.write_bits(self.bits_per_sample as u64 - 1, 5);
    w.write_bits(self.total_samples >> 32, 4);
    w.write_bits(self.total_samples & 0xFFFF_FFFF, 32);
    let mut bytes = w.into_bytes();
    bytes.resize(STREAMINFO_LEN, 0);
    bytes
  }

  fn parse(data: &[u8]) -> CodecResult<Self> {
    if data.len() < STREAMINFO_LEN {
      return Err(CodecError::InvalidData("STREAMINFO too short".into()));
    }
    let mut r = BitReader::new(data);
    let min_block_size = r.read_bits(16)?;
    let max_block_size = r.read_bits(16)?;
    r.read_bits(24)?;
    r.read_bits(24)?;
    let sample_rate = r.read_bits(20)?;
    let channels = r.read_bits(3)? + 1;
    let bits_per_sample = r.read_bits(5)? + 1;
    let total_samples = ((r.read_bits(4)? as u64) << 32) | r.read_bits(32)? as u64;
    Ok(Self {
      min_block_size,
      max_block_size,
      sample_rate,
      channels,
      bits_per_sample,
      total_samples,
    })
  }

  /// `fLaC` marker plus a last-metadata-block STREAMINFO
  pub fn to_description(self) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 + STREAMINFO_LEN);
    out.extend_from_slice(FLAC_MARKER);
    out.extend_from_slice(&[0x80, 0x00, 0x00, STREAMINFO_LEN as u8]);
    out.extend_from_slice(&self.to_bytes());
    out
  }

  /// Parse a description: `fLaC` + metadata blocks, or a bare STREAMINFO
  pub fn from_description(data: &[u8]) -> CodecResult<Self> {
    if !data.starts_with(FLAC_MARKER) {
      return Self::parse(data);
    }
    let mut pos = 4;
    while pos + 4 <= data.len() {
      let header = data[pos];
      let len = u32::from_be_bytes([0, data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
      let body = pos + 4;
      if header & 0x7F == 0 {
        return Self::parse(data.get(body..body + len).unwrap_or(&[]));
      }
      if header & 0x80 != 0 {
        break;
      }
      pos = body + len;
    }
    Err(CodecError::InvalidData(
      "FLAC description has no STREAMINFO".into(),
    ))
  }
}

// ============================================================================
// Frame header codes
// ============================================================================

fn block_size_code(block_size: u32) -> (u32, Option<(u64, u32)>) {
  match block_size {
    192 => (1, None),
    576 => (2, None),
    1152 => (3, None),
    2304 => (4, None),
    4608 => (5, None),
    256 => (8, None),
    512 => (9, None),
    1024 => (10, None),
    2048 => (11, None),
    4096 => (12, None),
    8192 => (13, None),
    16384 => (14, None),
    32768 => (15, None),
    n if n <= 256 => (6, Some((n as u64 - 1, 8))),
    n => (7, Some((n as u64 - 1, 16))),
  }
}

fn sample_rate_code(rate: u32) -> (u32, Option<(u64, u32)>) {
  match rate {
    88200 => (1, None),
    176400 => (2, None),
    192000 => (3, None),
    8000 => (4, None),
    16000 => (5, None),
    22050 => (6, None),
    24000 => (7, None),
    32000 => (8, None),
    44100 => (9, None),
    48000 => (10, None),
    96000 => (11, None),
    r if r % 1000 == 0 && r / 1000 <= 255 => (12, Some(((r / 1000) as u64, 8))),
    r if r <= 0xFFFF => (13, Some((r as u64, 16))),
    r if r % 10 == 0 && r / 10 <= 0xFFFF => (14, Some(((r / 10) as u64, 16))),
    _ => (0, None),
  }
}

fn sample_size_code(bps: u32) -> u32 {
  match bps {
    8 => 1,
    12 => 2,
    16 => 4,
    20 => 5,
    24 => 6,
    _ => 0,
  }
}

// ============================================================================
// Encoder
// ============================================================================

/// Stereo decorrelation modes, by FLAC channel assignment code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelMode {
  Independent,
  LeftSide = 8,
  RightSide = 9,
  MidSide = 10,
}

pub struct FlacEncoder {
  sample_rate: u32,
  channels: u32,
  bits_per_sample: u32,
  block_size: u32,
  frame_number: u64,
}

impl FlacEncoder {
  pub fn new(
    sample_rate: u32,
    channels: u32,
    bits_per_sample: u32,
    block_size: u32,
  ) -> CodecResult<Self> {
    if !(1..=8).contains(&channels) {
      return Err(CodecError::InvalidConfig(format!(
        "FLAC supports 1-8 channels, got {}",
        channels
      )));
    }
    if sample_rate == 0 || sample_rate > 655_350 {
      return Err(CodecError::InvalidConfig(format!(
        "Invalid FLAC sample rate {}",
        sample_rate
      )));
    }
    if bits_per_sample != 16 && bits_per_sample != 24 {
      return Err(CodecError::InvalidConfig(format!(
        "FLAC encoder writes 16 or 24 bit samples, got {}",
        bits_per_sample
      )));
    }
    if !(16..=65535).contains(&block_size) {
      return Err(CodecError::InvalidConfig(format!(
        "Invalid FLAC block size {}",
        block_size
      )));
    }
    Ok(Self {
      sample_rate,
      channels,
      bits_per_sample,
      block_size,
      frame_number: 0,
    })
  }

  pub fn stream_info(&self) -> StreamInfo {
    StreamInfo {
      min_block_size: self.block_size,
      max_block_size: self.block_size,
      sample_rate: self.sample_rate,
      channels: self.channels,
      bits_per_sample: self.bits_per_sample,
      total_samples: 0,
    }
  }

  fn input_sample_format(&self) -> AudioSampleFormat {
    if self.bits_per_sample == 16 {
      AudioSampleFormat::S16
    } else {
      AudioSampleFormat::S32
    }
  }

  /// Split interleaved input into per-channel integer samples
  fn read_channels(&self, frame: &Frame) -> CodecResult<Vec<Vec<i64>>> {
    let data = frame
      .plane(0)
      .ok_or_else(|| CodecError::InvalidData("Missing audio plane".into()))?;
    let channels = self.channels as usize;
    let mut out = vec![Vec::with_capacity(frame.nb_samples() as usize); channels];
    if self.bits_per_sample == 16 {
      for (i, s) in data.chunks_exact(2).enumerate() {
        out[i % channels].push(i16::from_le_bytes([s[0], s[1]]) as i64);
      }
    } else {
      for (i, s) in data.chunks_exact(4).enumerate() {
        out[i % channels].push((i32::from_le_bytes([s[0], s[1], s[2], s[3]]) >> 8) as i64);
      }
    }
    Ok(out)
  }

  fn encode_block(&mut self, channels: &[Vec<i64>]) -> Vec<u8> {
    let n = channels.first().map(|c| c.len()).unwrap_or(0) as u32;
    let bps = self.bits_per_sample;

    let (mode, subframes) = if channels.len() == 2 {
      let left = &channels[0];
      let right = &channels[1];
      let side: Vec<i64> = left.iter().zip(right).map(|(l, r)| l - r).collect();
      let mid: Vec<i64> = left.iter().zip(right).map(|(l, r)| (l + r) >> 1).collect();
      let l = encode_subframe(left, bps);
      let r = encode_subframe(right, bps);
      let s = encode_subframe(&side, bps + 1);
      let m = encode_subframe(&mid, bps);
      let candidates = [
        (ChannelMode::Independent, l.bit_len() + r.bit_len()),
        (ChannelMode::LeftSide, l.bit_len() + s.bit_len()),
        (ChannelMode::RightSide, s.bit_len() + r.bit_len()),
        (ChannelMode::MidSide, m.bit_len() + s.bit_len()),
      ];
      let best = candidates
        .iter()
        .min_by_key(|(_, bits)| *bits)
        .map(|(mode, _)| *mode)
        .unwrap_or(ChannelMode::Independent);
      let subframes = match best {
        ChannelMode::Independent => vec![l, r],
        ChannelMode::LeftSide => vec![l, s],
        ChannelMode::RightSide => vec![s, r],
        ChannelMode::MidSide => vec![m, s],
      };
      (best, subframes)
    } else {
      (
        ChannelMode::Independent,
        channels.iter().map(|c| encode_subframe(c, bps)).collect(),
      )
    };

    let mut w = BitWriter::with_capacity((n as usize) * channels.len() * 2 + 16);
    w.write_bits(FRAME_SYNC as u64, 14);
    w.write_bits(0, 1);
    w.write_bits(0, 1);
    let (bs_code, bs_extra) = block_size_code(n);
    let (sr_code, sr_extra) = sample_rate_code(self.sample_rate);
    w.write_bits(bs_code as u64, 4);
    w.write_bits(sr_code as u64, 4);
    let channel_code = match mode {
      ChannelMode::Independent => self.channels - 1,
      other => other as u32,
    };
    w.write_bits(channel_code as u64, 4);
    w.write_bits(sample_size_code(bps) as u64, 3);
    w.write_bits(0, 1);
    w.write_utf8(self.frame_number);
    if let Some((value, bits)) = bs_extra {
      w.write_bits(value, bits);
    }
    if let Some((value, bits)) = sr_extra {
      w.write_bits(value, bits);
    }
    let header_crc = crc8(&w.bytes);
    w.write_bits(header_crc as u64, 8);

    for subframe in &subframes {
      w.append(subframe);
    }
    let mut bytes = w.into_bytes();
    let footer = crc16(&bytes);
    bytes.extend_from_slice(&footer.to_be_bytes());

    self.frame_number += 1;
    bytes
  }
}

/// Encode one channel, picking the smallest subframe type
fn encode_subframe(samples: &[i64], bps: u32) -> BitWriter {
  let n = samples.len();
  if n > 0 && samples.iter().all(|&s| s == samples[0]) {
    let mut w = BitWriter::with_capacity(8);
    w.write_bits(0, 1);
    w.write_bits(0, 6);
    w.write_bits(0, 1);
    w.write_signed(samples[0], bps);
    return w;
  }

  let mut best = verbatim_subframe(samples, bps);
  for order in 0..=4usize.min(n.saturating_sub(1)) {
    let residual = fixed_residual(samples, order);
    let k = best_rice_param(&residual);
    let estimate = 8 + order * bps as usize + 6 + rice_bits(&residual, k);
    if estimate >= best.bit_len() {
      continue;
    }
    let mut w = BitWriter::with_capacity(estimate / 8 + 8);
    w.write_bits(0, 1);
    w.write_bits(8 + order as u64, 6);
    w.write_bits(0, 1);
    for &s in &samples[..order] {
      w.write_signed(s, bps);
    }
    w.write_bits(0, 2);
    w.write_bits(0, 4);
    w.write_bits(k as u64, 4);
    for &r in &residual {
      w.write_rice(r, k);
    }
    best = w;
  }
  best
}

fn verbatim_subframe(samples: &[i64], bps: u32) -> BitWriter {
  let mut w = BitWriter::with_capacity(samples.len() * bps as usize / 8 + 2);
  w.write_bits(0, 1);
  w.write_bits(1, 6);
  w.write_bits(0, 1);
  for &s in samples {
    w.write_signed(s, bps);
  }
  w
}

fn fixed_residual(samples: &[i64], order: usize) -> Vec<i64> {
  (order..samples.len())
    .map(|i| {
      let s = |k: usize| samples[i - k];
      let prediction = match order {
        0 => 0,
        1 => s(1),
        2 => 2 * s(1) - s(2),
        3 => 3 * s(1) - 3 * s(2) + s(3),
        _ => 4 * s(1) - 6 * s(2) + 4 * s(3) - s(4),
      };
      samples[i] - prediction
    })
    .collect()
}

fn rice_bits(residual: &[i64], k: u32) -> usize {
  residual
    .iter()
    .map(|&r| (fold(r) >> k) as usize + 1 + k as usize)
    .sum()
}

fn best_rice_param(residual: &[i64]) -> u32 {
  if residual.is_empty() {
    return 0;
  }
  let mean = residual.iter().map(|&r| fold(r)).sum::<u64>() / residual.len() as u64;
  let guess = (64 - mean.leading_zeros()).min(MAX_RICE_PARAM);
  let lo = guess.saturating_sub(1);
  let hi = (guess + 1).min(MAX_RICE_PARAM);
  (lo..=hi)
    .min_by_key(|&k| rice_bits(residual, k))
    .unwrap_or(guess)
}

impl EncoderEngine for FlacEncoder {
  fn encode(&mut self, frame: &Frame) -> CodecResult<Vec<Packet>> {
    if frame.sample_format() != Some(self.input_sample_format())
      || frame.channels() != self.channels
    {
      return Err(CodecError::InvalidData(format!(
        "FLAC encoder expects {} with {} channels",
        self.input_sample_format(),
        self.channels
      )));
    }
    if frame.nb_samples() == 0 {
      return Ok(Vec::new());
    }
    if frame.nb_samples() > 65535 {
      return Err(CodecError::InvalidData("FLAC block too large".into()));
    }
    let channels = self.read_channels(frame)?;
    let bytes = self.encode_block(&channels);
    let duration = frame.nb_samples() as i64 * 1_000_000 / self.sample_rate as i64;
    Ok(vec![Packet::with_timing(
      bytes,
      frame.pts(),
      Some(duration),
      true,
    )])
  }

  fn flush(&mut self) -> CodecResult<Vec<Packet>> {
    Ok(Vec::new())
  }

  fn reset(&mut self) {
    self.frame_number = 0;
  }

  fn extradata(&self) -> Option<Vec<u8>> {
    Some(self.stream_info().to_description())
  }

  fn frame_size(&self) -> Option<usize> {
    Some(self.block_size as usize)
  }

  fn input_format(&self) -> MediaFormat {
    MediaFormat::Audio(self.input_sample_format())
  }
}

pub struct FlacEncoderFactory;

impl EncoderFactory for FlacEncoderFactory {
  fn name(&self) -> &'static str {
    "flac"
  }

  fn supports(&self, settings: &EncoderSettings) -> bool {
    settings.codec_id == CodecId::Flac
      && settings.audio().is_some_and(|a| {
        (1..=8).contains(&a.channels)
          && (1..=655_350).contains(&a.sample_rate)
          && a.block_size.map_or(true, |b| (16..=65535).contains(&b))
          && a.bits_per_sample.map_or(true, |b| b == 16 || b == 24)
      })
  }

  fn create(&self, settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
    let audio = settings
      .audio()
      .ok_or_else(|| CodecError::InvalidConfig("FLAC needs audio settings".into()))?;
    Ok(Box::new(FlacEncoder::new(
      audio.sample_rate,
      audio.channels,
      audio.bits_per_sample.unwrap_or(16),
      audio.block_size.unwrap_or(FLAC_DEFAULT_BLOCK_SIZE as u32),
    )?))
  }
}

// ============================================================================
// Decoder
// ============================================================================

/// One decoded FLAC frame
struct DecodedBlock {
  sample_rate: u32,
  bits_per_sample: u32,
  channels: Vec<Vec<i64>>,
}

pub struct FlacDecoder {
  stream_info: Option<StreamInfo>,
  fallback_rate: u32,
  fallback_channels: u32,
}

impl FlacDecoder {
  pub fn new(description: Option<&[u8]>, sample_rate: u32, channels: u32) -> CodecResult<Self> {
    let stream_info = description.map(StreamInfo::from_description).transpose()?;
    Ok(Self {
      stream_info,
      fallback_rate: sample_rate,
      fallback_channels: channels,
    })
  }

  fn decode_frame(&self, data: &[u8]) -> CodecResult<(DecodedBlock, usize)> {
    let mut r = BitReader::new(data);
    if r.read_bits(14)? != FRAME_SYNC {
      return Err(CodecError::Bitstream("Missing FLAC frame sync".into()));
    }
    r.read_bits(2)?;
    let bs_code = r.read_bits(4)?;
    let sr_code = r.read_bits(4)?;
    let channel_code = r.read_bits(4)?;
    let ss_code = r.read_bits(3)?;
    r.read_bit()?;
    r.read_utf8()?;

    let block_size = match bs_code {
      0 => return Err(CodecError::Bitstream("Reserved block size".into())),
      1 => 192,
      2..=5 => 576 << (bs_code - 2),
      6 => r.read_bits(8)? + 1,
      7 => r.read_bits(16)? + 1,
      _ => 256 << (bs_code - 8),
    };
    let sample_rate = match sr_code {
      0 => self
        .stream_info
        .map(|s| s.sample_rate)
        .unwrap_or(self.fallback_rate),
      1 => 88200,
      2 => 176400,
      3 => 192000,
      4 => 8000,
      5 => 16000,
      6 => 22050,
      7 => 24000,
      8 => 32000,
      9 => 44100,
      10 => 48000,
      11 => 96000,
      12 => r.read_bits(8)? * 1000,
      13 => r.read_bits(16)?,
      14 => r.read_bits(16)? * 10,
      _ => return Err(CodecError::Bitstream("Invalid sample rate code".into())),
    };
    let bits_per_sample = match ss_code {
      0 => self
        .stream_info
        .map(|s| s.bits_per_sample)
        .ok_or_else(|| CodecError::Bitstream("Sample size needs STREAMINFO".into()))?,
      1 => 8,
      2 => 12,
      4 => 16,
      5 => 20,
      6 => 24,
      _ => return Err(CodecError::Bitstream("Unsupported sample size".into())),
    };

    let header_end = r.position();
    let expected_crc8 = r.read_bits(8)? as u8;
    if crc8(&data[..header_end]) != expected_crc8 {
      return Err(CodecError::Bitstream("FLAC header CRC mismatch".into()));
    }

    let channel_count = match channel_code {
      0..=7 => channel_code + 1,
      8..=10 => 2,
      _ => return Err(CodecError::Bitstream("Reserved channel assignment".into())),
    };
    let mut channels = Vec::with_capacity(channel_count as usize);
    for ch in 0..channel_count {
      let side = matches!((channel_code, ch), (8, 1) | (9, 0) | (10, 1));
      let bps = bits_per_sample + side as u32;
      channels.push(decode_subframe(&mut r, block_size as usize, bps)?);
    }

    match channel_code {
      8 => {
        for i in 0..block_size as usize {
          channels[1][i] = channels[0][i] - channels[1][i];
        }
      }
      9 => {
        for i in 0..block_size as usize {
          channels[0][i] += channels[1][i];
        }
      }
      10 => {
        for i in 0..block_size as usize {
          let side = channels[1][i];
          let mid = (channels[0][i] << 1) | (side & 1);
          channels[0][i] = (mid + side) >> 1;
          channels[1][i] = (mid - side) >> 1;
        }
      }
      _ => {}
    }
    for channel in &channels {
      for &sample in channel {
        check_sample_range(sample, bits_per_sample)?;
      }
    }

    r.align();
    let end = r.position();
    let footer = data
      .get(end..end + 2)
      .ok_or_else(|| CodecError::Bitstream("Missing FLAC frame CRC".into()))?;
    if crc16(&data[..end]) != u16::from_be_bytes([footer[0], footer[1]]) {
      return Err(CodecError::Bitstream("FLAC frame CRC mismatch".into()));
    }

    Ok((
      DecodedBlock {
        sample_rate,
        bits_per_sample,
        channels,
      },
      end + 2,
    ))
  }
}

fn decode_subframe(r: &mut BitReader, block_size: usize, bps: u32) -> CodecResult<Vec<i64>> {
  if r.read_bit()? {
    return Err(CodecError::Bitstream("Subframe padding bit set".into()));
  }
  let kind = r.read_bits(6)?;
  let wasted = if r.read_bit()? {
    r.read_unary()? as u32 + 1
  } else {
    0
  };
  if wasted >= bps {
    return Err(CodecError::Bitstream("Too many wasted bits".into()));
  }
  let bps = bps - wasted;

  let mut samples = match kind {
    0 => vec![r.read_signed(bps)?; block_size],
    1 => (0..block_size)
      .map(|_| r.read_signed(bps))
      .collect::<CodecResult<Vec<_>>>()?,
    8..=12 => {
      let order = (kind - 8) as usize;
      let coeffs: &[i64] = match order {
        0 => &[],
        1 => &[1],
        2 => &[2, -1],
        3 => &[3, -3, 1],
        _ => &[4, -6, 4, -1],
      };
      let warmup = read_warmup(r, order, block_size, bps)?;
      let residual = decode_residual(r, block_size, order)?;
      predict(warmup, &residual, coeffs, 0, bps)?
    }
    32..=63 => {
      let order = (kind - 31) as usize;
      let warmup = read_warmup(r, order, block_size, bps)?;
      let precision = r.read_bits(4)? + 1;
      if precision == 16 {
        return Err(CodecError::Bitstream("Invalid LPC precision".into()));
      }
      let shift = r.read_signed(5)?;
      if shift < 0 {
        return Err(CodecError::Bitstream("Negative LPC shift".into()));
      }
      let coeffs = (0..order)
        .map(|_| r.read_signed(precision))
        .collect::<CodecResult<Vec<_>>>()?;
      let residual = decode_residual(r, block_size, order)?;
      predict(warmup, &residual, &coeffs, shift as u32, bps)?
    }
    _ => {
      return Err(CodecError::Bitstream(format!(
        "Reserved subframe type {}",
        kind
      )))
    }
  };

  if wasted > 0 {
    samples.iter_mut().for_each(|s| *s <<= wasted);
  }
  Ok(samples)
}

fn read_warmup(
  r: &mut BitReader,
  order: usize,
  block_size: usize,
  bps: u32,
) -> CodecResult<Vec<i64>> {
  if order > block_size {
    return Err(CodecError::Bitstream("Predictor order exceeds block".into()));
  }
  let mut samples = Vec::with_capacity(block_size);
  for _ in 0..order {
    samples.push(r.read_signed(bps)?);
  }
  Ok(samples)
}

/// Run the predictor over the residual, rejecting any sample that leaves the
/// `bps` range so later predictions cannot overflow
fn predict(
  mut samples: Vec<i64>,
  residual: &[i64],
  coeffs: &[i64],
  shift: u32,
  bps: u32,
) -> CodecResult<Vec<i64>> {
  let overflow = || CodecError::Bitstream("FLAC prediction overflow".into());
  for &res in residual {
    let len = samples.len();
    let prediction = coeffs
      .iter()
      .enumerate()
      .try_fold(0i64, |acc, (j, &c)| {
        c.checked_mul(samples[len - 1 - j])
          .and_then(|term| acc.checked_add(term))
      })
      .ok_or_else(overflow)?;
    let sample = res.checked_add(prediction >> shift).ok_or_else(overflow)?;
    check_sample_range(sample, bps)?;
    samples.push(sample);
  }
  Ok(samples)
}

fn check_sample_range(sample: i64, bps: u32) -> CodecResult<()> {
  let limit = 1i64 << (bps - 1);
  if sample < -limit || sample >= limit {
    return Err(CodecError::Bitstream(format!(
      "FLAC sample {} exceeds {} bits",
      sample, bps
    )));
  }
  Ok(())
}

fn decode_residual(r: &mut BitReader, block_size: usize, order: usize) -> CodecResult<Vec<i64>> {
  let param_bits = match r.read_bits(2)? {
    0 => 4,
    1 => 5,
    _ => return Err(CodecError::Bitstream("Reserved residual coding".into())),
  };
  let escape = (1u32 << param_bits) - 1;
  let partition_order = r.read_bits(4)?;
  let partitions = 1usize << partition_order;
  if block_size % partitions != 0 || (block_size >> partition_order) < order {
    return Err(CodecError::Bitstream("Invalid residual partitioning".into()));
  }

  let mut residual = Vec::with_capacity(block_size - order);
  for partition in 0..partitions {
    let count = if partition == 0 {
      (block_size >> partition_order) - order
    } else {
      block_size >> partition_order
    };
    let k = r.read_bits(param_bits)?;
    if k == escape {
      let raw_bits = r.read_bits(5)?;
      for _ in 0..count {
        residual.push(r.read_signed(raw_bits)?);
      }
    } else {
      for _ in 0..count {
        residual.push(r.read_rice(k)?);
      }
    }
  }
  Ok(residual)
}

impl DecoderEngine for FlacDecoder {
  fn decode(&mut self, packet: &Packet) -> CodecResult<Vec<Frame>> {
    let mut data = packet.as_slice();
    let mut pts = packet.pts();
    let mut frames = Vec::new();

    while !data.is_empty() {
      let (block, consumed) = self.decode_frame(data)?;
      data = &data[consumed..];

      let channel_count = block.channels.len() as u32;
      if self.fallback_channels != 0 && channel_count != self.fallback_channels {
        return Err(CodecError::InvalidData(format!(
          "FLAC frame has {} channels, configured for {}",
          channel_count, self.fallback_channels
        )));
      }
      let nb_samples = block.channels.first().map(|c| c.len()).unwrap_or(0);
      let (format, shift, width) = if block.bits_per_sample <= 16 {
        (AudioSampleFormat::S16, 16 - block.bits_per_sample, 2)
      } else {
        (AudioSampleFormat::S32, 32 - block.bits_per_sample, 4)
      };

      let mut bytes = Vec::with_capacity(nb_samples * block.channels.len() * width);
      for i in 0..nb_samples {
        for channel in &block.channels {
          let value = channel[i] << shift;
          if width == 2 {
            bytes.extend_from_slice(&(value as i16).to_le_bytes());
          } else {
            bytes.extend_from_slice(&(value as i32).to_le_bytes());
          }
        }
      }

      let mut frame = Frame::from_audio_data(
        nb_samples as u32,
        channel_count,
        block.sample_rate,
        format,
        &bytes,
      )?;
      let duration = nb_samples as i64 * 1_000_000 / block.sample_rate.max(1) as i64;
      frame.set_pts(pts);
      frame.set_duration(duration);
      pts += duration;
      frames.push(frame);
    }
    Ok(frames)
  }

  fn reset(&mut self) {}
}

pub struct FlacDecoderFactory;

impl DecoderFactory for FlacDecoderFactory {
  fn name(&self) -> &'static str {
    "flac"
  }

  fn supports(&self, settings: &DecoderSettings) -> bool {
    settings.codec_id == CodecId::Flac
      && settings.audio().is_some()
      && settings
        .extradata
        .as_deref()
        .map_or(true, |d| StreamInfo::from_description(d).is_ok())
  }

  fn create(&self, settings: &DecoderSettings) -> CodecResult<Box<dyn DecoderEngine>> {
    let audio = settings
      .audio()
      .ok_or_else(|| CodecError::InvalidConfig("FLAC needs audio settings".into()))?;
    Ok(Box::new(FlacDecoder::new(
      settings.extradata.as_deref(),
      audio.sample_rate,
      audio.channels,
    )?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn s16_frame(channels: &[Vec<i16>], rate: u32) -> Frame {
    let n = channels[0].len();
    let data: Vec<u8> = (0..n)
      .flat_map(|i| channels.iter().flat_map(move |c| c[i].to_le_bytes()))
      .collect();
    Frame::from_audio_data(
      n as u32,
      channels.len() as u32,
      rate,
      AudioSampleFormat::S16,
      &data,
    )
    .unwrap()
  }

  fn sine(n: usize, period: f32, amplitude: f32) -> Vec<i16> {
    (0..n)
      .map(|i| ((i as f32 * std::f32::consts::TAU / period).sin() * amplitude) as i16)
      .collect()
  }

  #[test]
  fn test_crc_known_values() {
    assert_eq!(crc8(b"123456789"), 0xF4);
    assert_eq!(crc16(b"123456789"), 0xFEE8);
  }

  #[test]
  fn test_description_layout() {
    let encoder = FlacEncoder::new(48000, 2, 16, 4608).unwrap();
    let description = encoder.extradata().unwrap();
    assert_eq!(description.len(), 42);
    assert_eq!(
      u32::from_be_bytes([description[0], description[1], description[2], description[3]]),
      0x664C_6143
    );
    assert_eq!(description[4], 0x80);

    let info = StreamInfo::from_description(&description).unwrap();
    assert_eq!(info.sample_rate, 48000);
    assert_eq!(info.channels, 2);
    assert_eq!(info.bits_per_sample, 16);
    assert_eq!(info.max_block_size, 4608);
  }

  #[test]
  fn test_utf8_frame_numbers() {
    for value in [0u64, 0x7F, 0x80, 0x7FF, 0x800, 0xFFFF, 0x1_0000, 0x7FFF_FFFF] {
      let mut w = BitWriter::default();
      w.write_utf8(value);
      let bytes = w.into_bytes();
      let mut r = BitReader::new(&bytes);
      assert_eq!(r.read_utf8().unwrap(), value, "value {:#x}", value);
    }
  }

  #[test]
  fn test_rice_round_trip() {
    let values = [0i64, -1, 1, 100, -100, 32767, -32768];
    let mut w = BitWriter::default();
    for &v in &values {
      w.write_rice(v, 3);
    }
    let bytes = w.into_bytes();
    let mut r = BitReader::new(&bytes);
    for &v in &values {
      assert_eq!(r.read_rice(3).unwrap(), v);
    }
  }

  #[test]
  fn test_lossless_stereo_round_trip() {
    let left = sine(4608, 100.0, 12000.0);
    let right = sine(4608, 37.0, 9000.0);
    let frame = s16_frame(&[left, right], 48000);

    let mut encoder = FlacEncoder::new(48000, 2, 16, 4608).unwrap();
    let packet = encoder.encode(&frame).unwrap().remove(0);
    assert!(packet.size() < frame.data_size());

    let description = encoder.extradata();
    let mut decoder = FlacDecoder::new(description.as_deref(), 48000, 2).unwrap();
    let decoded = decoder.decode(&packet).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].sample_format(), Some(AudioSampleFormat::S16));
    assert_eq!(decoded[0].nb_samples(), 4608);
    assert_eq!(decoded[0].plane(0), frame.plane(0));
  }

  #[test]
  fn test_correlated_stereo_uses_decorrelation() {
    let left = sine(1024, 64.0, 10000.0);
    let right: Vec<i16> = left.iter().map(|s| s.saturating_add(3)).collect();
    let frame = s16_frame(&[left, right], 44100);
    let mut encoder = FlacEncoder::new(44100, 2, 16, 1024).unwrap();
    let packet = encoder.encode(&frame).unwrap().remove(0);
    // byte 3 high nibble holds the channel assignment
    assert!(packet.as_slice()[3] >> 4 >= 8);

    let mut decoder = FlacDecoder::new(None, 44100, 2).unwrap();
    let decoded = decoder.decode(&packet).unwrap();
    assert_eq!(decoded[0].plane(0), frame.plane(0));
  }

  #[test]
  fn test_silence_is_constant_subframe() {
    let frame = s16_frame(&[vec![0; 4608]], 48000);
    let mut encoder = FlacEncoder::new(48000, 1, 16, 4608).unwrap();
    let packet = encoder.encode(&frame).unwrap().remove(0);
    assert!(packet.size() < 32);
  }

  #[test]
  fn test_24_bit_round_trip() {
    let samples: Vec<i32> = (0..300).map(|i| (i * 7919 % 65536 - 32768) << 12).collect();
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let frame = Frame::from_audio_data(300, 1, 96000, AudioSampleFormat::S32, &data).unwrap();

    let mut encoder = FlacEncoder::new(96000, 1, 24, 4608).unwrap();
    let packet = encoder.encode(&frame).unwrap().remove(0);
    let mut decoder = FlacDecoder::new(encoder.extradata().as_deref(), 96000, 1).unwrap();
    let decoded = decoder.decode(&packet).unwrap().remove(0);
    assert_eq!(decoded.sample_format(), Some(AudioSampleFormat::S32));
    assert_eq!(decoded.plane(0).unwrap(), data.as_slice());
  }

  #[test]
  fn test_corrupt_frame_is_rejected() {
    let frame = s16_frame(&[sine(576, 50.0, 5000.0)], 48000);
    let mut encoder = FlacEncoder::new(48000, 1, 16, 576).unwrap();
    let mut bytes = encoder.encode(&frame).unwrap().remove(0).into_data();
    let last = bytes.len() - 3;
    bytes[last] ^= 0x40;
    let mut decoder = FlacDecoder::new(None, 48000, 1).unwrap();
    assert!(decoder.decode(&Packet::new(bytes)).is_err());
  }

  /// Mono 16-bit frame of 192 samples with one order-1 LPC subframe and an
  /// all-zero residual, so every sample is `coeff` times the previous one
  fn lpc_frame(coeff: i64) -> Vec<u8> {
    let mut w = BitWriter::default();
    w.write_bits(FRAME_SYNC as u64, 14);
    w.write_bits(0, 2);
    w.write_bits(1, 4);
    w.write_bits(10, 4);
    w.write_bits(0, 4);
    w.write_bits(4, 3);
    w.write_bits(0, 1);
    w.write_utf8(0);
    let header_crc = crc8(&w.bytes);
    w.write_bits(header_crc as u64, 8);

    w.write_bits(0, 1);
    w.write_bits(32, 6);
    w.write_bits(0, 1);
    w.write_signed(1, 16);
    w.write_bits(2, 4);
    w.write_signed(0, 5);
    w.write_signed(coeff, 3);
    w.write_bits(0, 2);
    w.write_bits(0, 4);
    w.write_bits(0, 4);
    for _ in 1..192 {
      w.write_rice(0, 0);
    }
    let mut bytes = w.into_bytes();
    let footer = crc16(&bytes);
    bytes.extend_from_slice(&footer.to_be_bytes());
    bytes
  }

  #[test]
  fn test_lpc_subframe_decodes() {
    let mut decoder = FlacDecoder::new(None, 48000, 1).unwrap();
    let decoded = decoder.decode(&Packet::new(lpc_frame(1))).unwrap().remove(0);
    assert_eq!(decoded.nb_samples(), 192);
    let expected: Vec<u8> = (0..192).flat_map(|_| 1i16.to_le_bytes()).collect();
    assert_eq!(decoded.plane(0).unwrap(), expected.as_slice());
  }

  #[test]
  fn test_diverging_predictor_is_rejected() {
    // doubling from 1 leaves the 16-bit range after 15 samples
    let mut decoder = FlacDecoder::new(None, 48000, 1).unwrap();
    match decoder.decode(&Packet::new(lpc_frame(2))) {
      Err(CodecError::Bitstream(message)) => assert!(message.contains("16 bits")),
      other => panic!("expected a bitstream error, got {:?}", other.map(|f| f.len())),
    }
  }

  #[test]
  fn test_factory_rejects_bad_settings() {
    use crate::codec::{AudioSettings, MediaSettings};
    let settings = |channels| EncoderSettings {
      codec: "flac".into(),
      codec_id: CodecId::Flac,
      media: MediaSettings::Audio(AudioSettings {
        sample_rate: 48000,
        channels,
        bitrate: None,
        block_size: None,
        compression_level: None,
        bits_per_sample: None,
      }),
    };
    assert!(FlacEncoderFactory.supports(&settings(2)));
    assert!(!FlacEncoderFactory.supports(&settings(9)));
  }
}
