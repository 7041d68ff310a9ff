//! Codec string parser for WebCodecs API
//!
//! Parses codec strings like vp09.PP.LL.DD, av01.P.LLT.DD, avc1.PPCCLL, hev1.P.T.Lxxx
//! into structured information including profile, level, and bit depth.
//! Recognizing a string says nothing about whether an engine exists for it.

use crate::codec::CodecId;

/// Parsed codec information extracted from a WebCodecs codec string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCodec {
  pub codec_id: CodecId,
  /// Profile number (codec-specific interpretation)
  pub profile: Option<u8>,
  /// Level value (codec-specific, often needs multiplication by 10)
  pub level: Option<u8>,
  /// Bit depth (8, 10, or 12)
  pub bit_depth: Option<u8>,
  /// Chroma subsampling (420, 422, 444)
  pub chroma_subsampling: Option<u16>,
}

impl ParsedCodec {
  /// Create a new ParsedCodec with just the codec ID
  pub fn new(codec_id: CodecId) -> Self {
    Self {
      codec_id,
      profile: None,
      level: None,
      bit_depth: None,
      chroma_subsampling: None,
    }
  }
}

/// Parse a video codec string into structured information
///
/// Supported formats:
/// - VP9: `vp09.PP.LL.DD.CC.cp.tc.mc.FF` or `vp9`
/// - AV1: `av01.P.LLT.DD.M.CCC.cp.tc.mc.F` or `av1`
/// - H.264: `avc1.PPCCLL` or `avc3.PPCCLL`
/// - H.265: `hev1.P.T.Lxxx` or `hvc1.P.T.Lxxx`
/// - VP8: `vp8`
/// - QOI: `qoi`
///
/// Returns `None` if the codec string is not recognized or malformed.
pub fn parse_codec_string(codec: &str) -> Option<ParsedCodec> {
  let lower = codec.to_lowercase();
  let mut parts = lower.split('.');
  let fourcc = parts.next()?;
  let fields: Vec<&str> = parts.collect();

  match (fourcc, fields.is_empty()) {
    ("vp8", true) => Some(ParsedCodec::new(CodecId::Vp8)),
    ("vp9", true) => Some(ParsedCodec::new(CodecId::Vp9)),
    ("av1", true) => Some(ParsedCodec::new(CodecId::Av1)),
    ("qoi", true) => Some(ParsedCodec {
      bit_depth: Some(8),
      chroma_subsampling: Some(444),
      ..ParsedCodec::new(CodecId::Qoi)
    }),
    ("vp09", false) => parse_vp9(&fields),
    ("av01", false) => parse_av1(&fields),
    ("avc1" | "avc3", false) => parse_avc(&fields),
    ("hev1" | "hvc1", false) => parse_hevc(&fields),
    _ => None,
  }
}

fn decimal(field: Option<&&str>) -> Option<u8> {
  field.and_then(|f| f.parse().ok())
}

/// VP9: PP.LL.DD[.CC...]
/// - PP: profile (00-03)
/// - LL: level (10-62)
/// - DD: bit depth (08, 10, 12)
/// - CC: chroma subsampling (00/01=420, 02=422, 03=444)
fn parse_vp9(fields: &[&str]) -> Option<ParsedCodec> {
  if fields.len() < 3 {
    return None;
  }
  Some(ParsedCodec {
    profile: Some(decimal(fields.first())?),
    level: Some(decimal(fields.get(1))?),
    bit_depth: Some(decimal(fields.get(2))?),
    chroma_subsampling: fields.get(3).and_then(|cc| match *cc {
      "00" | "01" => Some(420),
      "02" => Some(422),
      "03" => Some(444),
      _ => None,
    }),
    ..ParsedCodec::new(CodecId::Vp9)
  })
}

/// AV1: P.LLT.DD[.M.CCC...]
/// - P: profile (0=Main, 1=High, 2=Professional)
/// - LLT: seq_level_idx followed by the tier letter
/// - CCC: chroma subsampling (110=420, 100=422, 000=444)
fn parse_av1(fields: &[&str]) -> Option<ParsedCodec> {
  if fields.len() < 3 {
    return None;
  }
  let level_tier = fields[1];
  let digits = level_tier.trim_end_matches(['m', 'h']);
  Some(ParsedCodec {
    profile: Some(decimal(fields.first())?),
    level: Some(digits.parse().ok()?),
    bit_depth: Some(decimal(fields.get(2))?),
    chroma_subsampling: fields.get(4).and_then(|ccc| match *ccc {
      "110" | "111" => Some(420),
      "100" => Some(422),
      "000" => Some(444),
      _ => None,
    }),
    ..ParsedCodec::new(CodecId::Av1)
  })
}

/// H.264: PPCCLL in hex
/// - PP: profile_idc (42=Baseline, 4D=Main, 64=High, ...)
/// - CC: constraint_set flags
/// - LL: level_idc (1F=3.1, 28=4.0, ...)
fn parse_avc(fields: &[&str]) -> Option<ParsedCodec> {
  let hex = fields.first().filter(|h| h.len() == 6)?;
  let byte = |range: std::ops::Range<usize>| u8::from_str_radix(hex.get(range)?, 16).ok();
  let profile = byte(0..2)?;
  byte(2..4)?;
  Some(ParsedCodec {
    profile: Some(profile),
    level: Some(byte(4..6)?),
    bit_depth: Some(if profile >= 110 { 10 } else { 8 }),
    chroma_subsampling: Some(match profile {
      122 => 422,
      244 => 444,
      _ => 420,
    }),
    ..ParsedCodec::new(CodecId::H264)
  })
}

/// H.265: P.T.Lxxx[.Bx...]
/// - P: general_profile_idc, optionally prefixed with the profile space (A-C)
/// - Lxxx / Hxxx: tier and level × 30 (L120 = 4.0)
fn parse_hevc(fields: &[&str]) -> Option<ParsedCodec> {
  if fields.len() < 3 {
    return None;
  }
  let profile: u8 = fields[0]
    .trim_start_matches(|c: char| c.is_ascii_alphabetic())
    .parse()
    .ok()?;
  let level = fields[2]
    .strip_prefix(['l', 'h'])
    .and_then(|l| l.parse::<u8>().ok())?;
  Some(ParsedCodec {
    profile: Some(profile),
    level: Some(level),
    bit_depth: Some(if profile == 2 { 10 } else { 8 }),
    ..ParsedCodec::new(CodecId::Hevc)
  })
}

/// Parse an audio codec string into its codec identifier
///
/// Supported formats:
/// - AAC: `mp4a.40.N`, `mp4a.67` or `aac`
/// - MP3: `mp3`, `mp4a.69`, `mp4a.6B`
/// - `opus`, `flac`, `vorbis`
/// - PCM: `pcm-u8`, `pcm-s16`, `pcm-s24`, `pcm-s32`, `pcm-f32`, `ulaw`, `alaw`
pub fn parse_audio_codec_string(codec: &str) -> Option<CodecId> {
  let codec_lower = codec.to_lowercase();
  let id = match codec_lower.as_str() {
    "aac" | "mp4a.67" => CodecId::Aac,
    "mp3" | "mp4a.69" | "mp4a.6b" | "mp4a.40.34" => CodecId::Mp3,
    "opus" => CodecId::Opus,
    "flac" => CodecId::Flac,
    "vorbis" => CodecId::Vorbis,
    "pcm-u8" => CodecId::PcmU8,
    "pcm-s16" => CodecId::PcmS16,
    "pcm-s24" => CodecId::PcmS24,
    "pcm-s32" => CodecId::PcmS32,
    "pcm-f32" => CodecId::PcmF32,
    "ulaw" => CodecId::Ulaw,
    "alaw" => CodecId::Alaw,
    other => {
      let object_type = other.strip_prefix("mp4a.40.")?;
      if object_type.is_empty() || !object_type.chars().all(|c| c.is_ascii_digit()) {
        return None;
      }
      CodecId::Aac
    }
  };
  Some(id)
}
