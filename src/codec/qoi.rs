//! QOI ("Quite OK Image") engine
//!
//! Every picture is a self-contained QOI image, so each encoded chunk is a
//! key chunk. The encoder consumes RGBA and always writes 4-channel images.
//!
//! See: https://qoiformat.org/qoi-specification.pdf

use crate::webcodecs::VideoPixelFormat;

use super::{
  context::{DecoderEngine, DecoderFactory, EncoderEngine, EncoderFactory, MediaFormat},
  CodecError, CodecId, CodecResult, DecoderSettings, EncoderSettings, Frame, Packet,
};

const MAGIC: &[u8; 4] = b"qoif";
const HEADER_LEN: usize = 14;
const END_MARKER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];
/// Upper bound on decoded pixels, mirrors the reference decoder's guard
const MAX_PIXELS: u64 = 400_000_000;

const OP_INDEX: u8 = 0x00;
const OP_DIFF: u8 = 0x40;
const OP_LUMA: u8 = 0x80;
const OP_RUN: u8 = 0xC0;
const OP_RGB: u8 = 0xFE;
const OP_RGBA: u8 = 0xFF;
const MASK_2: u8 = 0xC0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rgba([u8; 4]);

impl Rgba {
  const START: Rgba = Rgba([0, 0, 0, 255]);

  fn hash(self) -> usize {
    let [r, g, b, a] = self.0;
    (r as usize * 3 + g as usize * 5 + b as usize * 7 + a as usize * 11) % 64
  }
}

/// Parsed QOI header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QoiHeader {
  pub width: u32,
  pub height: u32,
  pub channels: u8,
  pub colorspace: u8,
}

impl QoiHeader {
  pub fn parse(data: &[u8]) -> CodecResult<Self> {
    if data.len() < HEADER_LEN + END_MARKER.len() || &data[..4] != MAGIC {
      return Err(CodecError::InvalidData("Not a QOI image".into()));
    }
    let width = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let height = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let header = Self {
      width,
      height,
      channels: data[12],
      colorspace: data[13],
    };
    if width == 0
      || height == 0
      || !(3..=4).contains(&header.channels)
      || header.colorspace > 1
      || width as u64 * height as u64 > MAX_PIXELS
    {
      return Err(CodecError::InvalidData(format!(
        "Invalid QOI header {:?}",
        header
      )));
    }
    Ok(header)
  }
}

/// Encode tightly packed RGBA pixels into a QOI image
pub fn encode_rgba(pixels: &[u8], width: u32, height: u32) -> CodecResult<Vec<u8>> {
  let count = width as usize * height as usize;
  if pixels.len() < count * 4 {
    return Err(CodecError::InvalidData(format!(
      "QOI input needs {} bytes, got {}",
      count * 4,
      pixels.len()
    )));
  }

  let mut out = Vec::with_capacity(HEADER_LEN + count * 2 + END_MARKER.len());
  out.extend_from_slice(MAGIC);
  out.extend_from_slice(&width.to_be_bytes());
  out.extend_from_slice(&height.to_be_bytes());
  out.push(4);
  out.push(0);

  let mut index = [Rgba([0; 4]); 64];
  let mut prev = Rgba::START;
  let mut run = 0u8;

  for (i, chunk) in pixels[..count * 4].chunks_exact(4).enumerate() {
    let px = Rgba([chunk[0], chunk[1], chunk[2], chunk[3]]);
    if px == prev {
      run += 1;
      if run == 62 || i == count - 1 {
        out.push(OP_RUN | (run - 1));
        run = 0;
      }
      continue;
    }
    if run > 0 {
      out.push(OP_RUN | (run - 1));
      run = 0;
    }

    let slot = px.hash();
    if index[slot] == px {
      out.push(OP_INDEX | slot as u8);
    } else {
      index[slot] = px;
      if px.0[3] == prev.0[3] {
        let dr = px.0[0].wrapping_sub(prev.0[0]) as i8;
        let dg = px.0[1].wrapping_sub(prev.0[1]) as i8;
        let db = px.0[2].wrapping_sub(prev.0[2]) as i8;
        let dr_dg = dr.wrapping_sub(dg);
        let db_dg = db.wrapping_sub(dg);
        if (-2..=1).contains(&dr) && (-2..=1).contains(&dg) && (-2..=1).contains(&db) {
          out.push(OP_DIFF | ((dr + 2) as u8) << 4 | ((dg + 2) as u8) << 2 | (db + 2) as u8);
        } else if (-32..=31).contains(&dg) && (-8..=7).contains(&dr_dg) && (-8..=7).contains(&db_dg)
        {
          out.push(OP_LUMA | (dg + 32) as u8);
          out.push(((dr_dg + 8) as u8) << 4 | (db_dg + 8) as u8);
        } else {
          out.extend_from_slice(&[OP_RGB, px.0[0], px.0[1], px.0[2]]);
        }
      } else {
        out.push(OP_RGBA);
        out.extend_from_slice(&px.0);
      }
    }
    prev = px;
  }

  out.extend_from_slice(&END_MARKER);
  Ok(out)
}

/// Decode a QOI image into RGBA pixels
pub fn decode_rgba(data: &[u8]) -> CodecResult<(QoiHeader, Vec<u8>)> {
  let header = QoiHeader::parse(data)?;
  let count = header.width as usize * header.height as usize;
  let body_end = data.len() - END_MARKER.len();

  let mut pixels = Vec::with_capacity(count * 4);
  let mut index = [Rgba([0; 4]); 64];
  let mut px = Rgba::START;
  let mut pos = HEADER_LEN;
  let truncated = || CodecError::Bitstream("Truncated QOI data".into());

  while pixels.len() < count * 4 {
    let op = *data.get(pos).filter(|_| pos < body_end).ok_or_else(truncated)?;
    pos += 1;
    let mut repeat = 1usize;

    match op {
      OP_RGB => {
        let bytes = data.get(pos..pos + 3).ok_or_else(truncated)?;
        px.0[..3].copy_from_slice(bytes);
        pos += 3;
      }
      OP_RGBA => {
        let bytes = data.get(pos..pos + 4).ok_or_else(truncated)?;
        px.0.copy_from_slice(bytes);
        pos += 4;
      }
      _ => match op & MASK_2 {
        OP_INDEX => px = index[op as usize],
        OP_DIFF => {
          px.0[0] = px.0[0].wrapping_add((op >> 4 & 0x03).wrapping_sub(2));
          px.0[1] = px.0[1].wrapping_add((op >> 2 & 0x03).wrapping_sub(2));
          px.0[2] = px.0[2].wrapping_add((op & 0x03).wrapping_sub(2));
        }
        OP_LUMA => {
          let next = *data.get(pos).ok_or_else(truncated)?;
          pos += 1;
          let dg = (op & 0x3F).wrapping_sub(32);
          px.0[0] = px.0[0].wrapping_add(dg.wrapping_sub(8).wrapping_add(next >> 4 & 0x0F));
          px.0[1] = px.0[1].wrapping_add(dg);
          px.0[2] = px.0[2].wrapping_add(dg.wrapping_sub(8).wrapping_add(next & 0x0F));
        }
        _ => repeat = (op & 0x3F) as usize + 1,
      },
    }

    index[px.hash()] = px;
    let remaining = (count * 4 - pixels.len()) / 4;
    for _ in 0..repeat.min(remaining) {
      pixels.extend_from_slice(&px.0);
    }
  }

  Ok((header, pixels))
}

// ============================================================================
// Engines
// ============================================================================

pub struct QoiEncoder {
  width: u32,
  height: u32,
}

impl QoiEncoder {
  pub fn new(width: u32, height: u32) -> CodecResult<Self> {
    if width == 0 || height == 0 || width as u64 * height as u64 > MAX_PIXELS {
      return Err(CodecError::InvalidConfig(format!(
        "Invalid QOI dimensions {}x{}",
        width, height
      )));
    }
    Ok(Self { width, height })
  }
}

impl EncoderEngine for QoiEncoder {
  fn encode(&mut self, frame: &Frame) -> CodecResult<Vec<Packet>> {
    if frame.pixel_format() != Some(VideoPixelFormat::RGBA)
      || frame.width() != self.width
      || frame.height() != self.height
    {
      return Err(CodecError::UnsupportedPixelFormat(format!(
        "QOI encoder expects RGBA {}x{}",
        self.width, self.height
      )));
    }
    let pixels = frame
      .plane(0)
      .ok_or_else(|| CodecError::InvalidData("Missing RGBA plane".into()))?;
    let data = encode_rgba(pixels, self.width, self.height)?;
    Ok(vec![Packet::with_timing(
      data,
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
    MediaFormat::Video(VideoPixelFormat::RGBA)
  }
}

pub struct QoiEncoderFactory;

impl EncoderFactory for QoiEncoderFactory {
  fn name(&self) -> &'static str {
    "qoi"
  }

  fn supports(&self, settings: &EncoderSettings) -> bool {
    settings.codec_id == CodecId::Qoi
      && settings.video().is_some_and(|v| {
        v.width > 0 && v.height > 0 && v.width as u64 * v.height as u64 <= MAX_PIXELS
      })
  }

  fn create(&self, settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
    let video = settings
      .video()
      .ok_or_else(|| CodecError::InvalidConfig("QOI needs video settings".into()))?;
    Ok(Box::new(QoiEncoder::new(video.width, video.height)?))
  }
}

#[derive(Default)]
pub struct QoiDecoder;

impl DecoderEngine for QoiDecoder {
  fn decode(&mut self, packet: &Packet) -> CodecResult<Vec<Frame>> {
    let (header, rgba) = decode_rgba(packet.as_slice())?;
    let format = if header.channels == 4 {
      VideoPixelFormat::RGBA
    } else {
      VideoPixelFormat::RGBX
    };
    let mut frame = Frame::from_video_data(header.width, header.height, format, &rgba)?;
    frame.set_pts(packet.pts());
    if let Some(duration) = packet.duration() {
      frame.set_duration(duration);
    }
    Ok(vec![frame])
  }

  fn reset(&mut self) {}
}

pub struct QoiDecoderFactory;

impl DecoderFactory for QoiDecoderFactory {
  fn name(&self) -> &'static str {
    "qoi"
  }

  fn supports(&self, settings: &DecoderSettings) -> bool {
    settings.codec_id == CodecId::Qoi
  }

  fn create(&self, _settings: &DecoderSettings) -> CodecResult<Box<dyn DecoderEngine>> {
    Ok(Box::new(QoiDecoder))
  }
}
