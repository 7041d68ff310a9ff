//! VideoEncoder - WebCodecs API implementation
//!
//! Encodes VideoFrames into EncodedVideoChunks through a registered engine.
//! See: https://w3c.github.io/webcodecs/#videoencoder-interface

use std::future::Future;
use std::sync::Arc;

use crate::codec::{
  CodecRegistry, EncoderEngine, EncoderSettings, Frame, MediaFormat, MediaSettings, Scaler,
  VideoSettings,
};
use crate::webcodecs::codec_core::{
  CodecCore, CodecState, DequeueCallback, DequeueEvents, ErrorCallback, Processor,
};
use crate::webcodecs::codec_string::parse_codec_string;
use crate::webcodecs::error::{not_supported_error, type_error, Error, Result};
use crate::webcodecs::{
  EncodedVideoChunk, VideoColorSpace, VideoColorSpaceInit, VideoDecoderConfig,
  VideoEncoderConfig, VideoEncoderSupport, VideoFrame, VideoPixelFormat,
};

pub type VideoEncoderOutputCallback =
  Box<dyn FnMut(EncodedVideoChunk, EncodedVideoChunkMetadata) + Send>;

/// VideoEncoder init dictionary; both callbacks are required
#[derive(Default)]
pub struct VideoEncoderInit {
  pub output: Option<VideoEncoderOutputCallback>,
  pub error: Option<ErrorCallback>,
}

impl VideoEncoderInit {
  pub fn new(
    output: impl FnMut(EncodedVideoChunk, EncodedVideoChunkMetadata) + Send + 'static,
    error: impl FnMut(Error) + Send + 'static,
  ) -> Self {
    Self {
      output: Some(Box::new(output)),
      error: Some(Box::new(error)),
    }
  }
}

/// Per-frame encode options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoEncoderEncodeOptions {
  /// Force this frame to be a key frame
  pub key_frame: Option<bool>,
}

/// Output callback metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedVideoChunkMetadata {
  /// Decoder configuration, present on the first chunk after configure
  pub decoder_config: Option<VideoDecoderConfigOutput>,
}

/// Decoder configuration output (for passing to a decoder)
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDecoderConfigOutput {
  pub codec: String,
  pub coded_width: u32,
  pub coded_height: u32,
  pub display_aspect_width: u32,
  pub display_aspect_height: u32,
  /// Color space of the first encoded frame
  pub color_space: Option<VideoColorSpaceInit>,
  pub description: Option<Vec<u8>>,
}

impl From<VideoDecoderConfigOutput> for VideoDecoderConfig {
  fn from(output: VideoDecoderConfigOutput) -> Self {
    VideoDecoderConfig {
      codec: Some(output.codec),
      description: output.description,
      coded_width: Some(output.coded_width),
      coded_height: Some(output.coded_height),
      display_aspect_width: Some(output.display_aspect_width),
      display_aspect_height: Some(output.display_aspect_height),
      color_space: output.color_space,
      ..Default::default()
    }
  }
}

fn validate_config(config: &VideoEncoderConfig) -> Result<()> {
  match config.codec.as_deref() {
    Some(codec) if !codec.trim().is_empty() => {}
    _ => return Err(type_error("codec is required")),
  }
  if config.width.is_none() {
    return Err(type_error("width is required"));
  }
  if config.height.is_none() {
    return Err(type_error("height is required"));
  }
  match (config.display_width, config.display_height) {
    (Some(_), None) | (None, Some(_)) => {
      return Err(type_error(
        "displayWidth and displayHeight must be set together",
      ))
    }
    (Some(0), _) | (_, Some(0)) => return Err(type_error("display size must be non-zero")),
    _ => {}
  }
  if config.bitrate.is_some_and(|b| !b.is_finite() || b <= 0.0) {
    return Err(type_error("bitrate must be greater than 0"));
  }
  if config.framerate.is_some_and(|f| !f.is_finite() || f <= 0.0) {
    return Err(type_error("framerate must be greater than 0"));
  }
  Ok(())
}

fn encoder_settings(config: &VideoEncoderConfig) -> Result<EncoderSettings> {
  let codec = config.codec.clone().unwrap_or_default();
  let parsed = parse_codec_string(&codec)
    .ok_or_else(|| not_supported_error(&format!("Unsupported video codec: {}", codec)))?;
  let (width, height) = (config.width.unwrap_or(0), config.height.unwrap_or(0));
  if width == 0 || height == 0 {
    return Err(not_supported_error(&format!(
      "Unsupported dimensions: {}x{}",
      width, height
    )));
  }
  if let Some(mode) = config.scalability_mode.as_deref() {
    if mode != "L1T1" {
      return Err(not_supported_error(&format!(
        "Unsupported scalabilityMode: {}",
        mode
      )));
    }
  }

  Ok(EncoderSettings {
    codec,
    codec_id: parsed.codec_id,
    media: MediaSettings::Video(VideoSettings {
      width,
      height,
      bitrate: config.bitrate.map(|b| b as u64),
      framerate: config.framerate,
    }),
  })
}

/// One queued frame
pub(crate) struct EncodeRequest {
  frame: Frame,
  color_space: VideoColorSpace,
  key_frame: bool,
}

pub(crate) struct VideoEncodeProcessor {
  engine: Box<dyn EncoderEngine>,
  codec: String,
  width: u32,
  height: u32,
  display: (u32, u32),
  input_format: VideoPixelFormat,
  scaler: Option<Scaler>,
  color_space: Option<VideoColorSpace>,
  description_sent: bool,
}

impl VideoEncodeProcessor {
  fn open(registry: &CodecRegistry, settings: EncoderSettings, config: &VideoEncoderConfig) -> Result<Self> {
    let engine = registry
      .create_encoder(&settings)
      .map_err(|e| not_supported_error(&e.to_string()))?;
    let input_format = match engine.input_format() {
      MediaFormat::Video(format) => format,
      MediaFormat::Audio(_) => return Err(not_supported_error("Engine does not accept video")),
    };
    let (width, height) = settings
      .video()
      .map(|v| (v.width, v.height))
      .ok_or_else(|| not_supported_error("Missing video settings"))?;
    let display = config
      .display_width
      .zip(config.display_height)
      .unwrap_or((width, height));

    Ok(Self {
      engine,
      codec: settings.codec,
      width,
      height,
      display,
      input_format,
      scaler: None,
      color_space: None,
      description_sent: false,
    })
  }

  fn convert(&mut self, frame: &Frame) -> Result<Frame> {
    let source = frame
      .pixel_format()
      .ok_or_else(|| type_error("VideoFrame has no pixel format"))?;
    if source == self.input_format && frame.width() == self.width && frame.height() == self.height {
      return Ok(frame.clone());
    }
    let stale = self.scaler.as_ref().map_or(true, |s| {
      s.src_format() != source || s.src_width() != frame.width() || s.src_height() != frame.height()
    });
    if stale {
      tracing::debug!(
        target: "webcodecs",
        from = %source,
        to = %self.input_format,
        src_width = frame.width(),
        src_height = frame.height(),
        "creating scaler"
      );
      self.scaler = Some(Scaler::new(
        frame.width(),
        frame.height(),
        source,
        self.width,
        self.height,
        self.input_format,
      )?);
    }
    match self.scaler.as_ref() {
      Some(scaler) => Ok(scaler.scale_alloc(frame)?),
      None => Ok(frame.clone()),
    }
  }

  fn wrap(&mut self, packets: Vec<crate::codec::Packet>) -> Vec<(EncodedVideoChunk, EncodedVideoChunkMetadata)> {
    packets
      .into_iter()
      .map(|packet| {
        let chunk = EncodedVideoChunk::from_packet(packet);
        let metadata = self.next_metadata();
        (chunk, metadata)
      })
      .collect()
  }

  fn next_metadata(&mut self) -> EncodedVideoChunkMetadata {
    if self.description_sent {
      return EncodedVideoChunkMetadata::default();
    }
    self.description_sent = true;
    EncodedVideoChunkMetadata {
      decoder_config: Some(VideoDecoderConfigOutput {
        codec: self.codec.clone(),
        coded_width: self.width,
        coded_height: self.height,
        display_aspect_width: self.display.0,
        display_aspect_height: self.display.1,
        color_space: self.color_space.as_ref().map(VideoColorSpace::to_json),
        description: self.engine.extradata(),
      }),
    }
  }
}

impl Processor for VideoEncodeProcessor {
  type Input = EncodeRequest;
  type Output = (EncodedVideoChunk, EncodedVideoChunkMetadata);

  fn process(&mut self, request: EncodeRequest) -> Result<Vec<Self::Output>> {
    if self.color_space.is_none() {
      self.color_space = Some(request.color_space);
    }
    let input = self.convert(&request.frame)?;
    if request.key_frame {
      self.engine.request_key_frame();
    }
    tracing::trace!(target: "webcodecs", timestamp = input.pts(), key_frame = request.key_frame, "encode frame");
    let packets = self.engine.encode(&input)?;
    Ok(self.wrap(packets))
  }

  fn flush(&mut self) -> Result<Vec<Self::Output>> {
    let packets = self.engine.flush()?;
    Ok(self.wrap(packets))
  }

  fn close(&mut self) {
    self.engine.close();
  }
}

/// VideoEncoder - WebCodecs-compliant video encoder
pub struct VideoEncoder {
  core: CodecCore<VideoEncodeProcessor>,
  registry: Arc<CodecRegistry>,
}

impl VideoEncoder {
  pub fn new(init: VideoEncoderInit) -> Result<Self> {
    Self::with_registry(init, Arc::new(CodecRegistry::builtin()))
  }

  pub fn with_registry(init: VideoEncoderInit, registry: Arc<CodecRegistry>) -> Result<Self> {
    let mut output = init
      .output
      .ok_or_else(|| type_error("output callback is required"))?;
    let error = init
      .error
      .ok_or_else(|| type_error("error callback is required"))?;
    let core = CodecCore::<VideoEncodeProcessor>::new(
      "VideoEncoder",
      Box::new(move |(chunk, metadata): (EncodedVideoChunk, EncodedVideoChunkMetadata)| {
        output(chunk, metadata)
      }),
      error,
    )?;
    Ok(Self { core, registry })
  }

  pub fn state(&self) -> CodecState {
    self.core.state()
  }

  pub fn encode_queue_size(&self) -> u32 {
    self.core.queue_size()
  }

  pub fn set_ondequeue(&self, callback: Option<DequeueCallback>) {
    self.core.set_ondequeue(callback);
  }

  pub fn dequeue_events(&self) -> DequeueEvents {
    self.core.dequeue_events()
  }

  pub fn wait_for_queue_below(&self, limit: u32) -> impl Future<Output = ()> + Send + 'static {
    self.core.wait_for_queue_below(limit)
  }

  pub fn configure(&self, config: VideoEncoderConfig) -> Result<()> {
    self.core.check_open()?;
    validate_config(&config)?;

    let processor = encoder_settings(&config)
      .and_then(|settings| VideoEncodeProcessor::open(&self.registry, settings, &config));
    match processor {
      Ok(processor) => self.core.configure(processor),
      Err(e) => Err(self.core.fail_configure(e)),
    }
  }

  /// Queue `frame` for encoding; the caller keeps ownership and closes it
  pub fn encode(&self, frame: &VideoFrame, options: VideoEncoderEncodeOptions) -> Result<()> {
    self.core.check_configured()?;
    let (frame, color_space) = frame.frame_snapshot()?;
    self.core.enqueue(EncodeRequest {
      frame,
      color_space,
      key_frame: options.key_frame.unwrap_or(false),
    })
  }

  pub fn flush(&self) -> impl Future<Output = Result<()>> + Send + 'static {
    self.core.flush()
  }

  pub fn reset(&self) -> Result<()> {
    self.core.reset()
  }

  pub fn close(&self) {
    self.core.close();
  }

  pub async fn is_config_supported(config: VideoEncoderConfig) -> Result<VideoEncoderSupport> {
    Self::config_support(&CodecRegistry::builtin(), config)
  }

  pub(crate) fn config_support(
    registry: &CodecRegistry,
    config: VideoEncoderConfig,
  ) -> Result<VideoEncoderSupport> {
    validate_config(&config)?;
    let supported = encoder_settings(&config)
      .map(|settings| registry.find_encoder(&settings).is_some())
      .unwrap_or(false);
    Ok(VideoEncoderSupport { supported, config })
  }
}

impl std::fmt::Debug for VideoEncoder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("VideoEncoder")
      .field("state", &self.state())
      .field("encode_queue_size", &self.encode_queue_size())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::webcodecs::error::DOMExceptionName;
  use crate::webcodecs::{VideoColorPrimaries, VideoFrameBufferInit};
  use std::sync::mpsc;

  fn config(width: u32, height: u32) -> VideoEncoderConfig {
    VideoEncoderConfig {
      codec: Some("qoi".into()),
      width: Some(width),
      height: Some(height),
      ..Default::default()
    }
  }

  fn frame(format: VideoPixelFormat, width: u32, height: u32, timestamp: i64) -> VideoFrame {
    let size = format.allocation_size(width, height);
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    VideoFrame::new(
      &data,
      VideoFrameBufferInit {
        format: Some(format),
        coded_width: Some(width),
        coded_height: Some(height),
        timestamp: Some(timestamp),
        color_space: Some(VideoColorSpaceInit {
          primaries: Some(VideoColorPrimaries::Bt709),
          ..Default::default()
        }),
        ..Default::default()
      },
    )
    .unwrap()
  }

  fn encoder() -> (
    VideoEncoder,
    mpsc::Receiver<(EncodedVideoChunk, EncodedVideoChunkMetadata)>,
    mpsc::Receiver<Error>,
  ) {
    let (out_tx, out_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    let encoder = VideoEncoder::new(VideoEncoderInit::new(
      move |chunk, metadata| {
        let _ = out_tx.send((chunk, metadata));
      },
      move |e| {
        let _ = err_tx.send(e);
      },
    ))
    .unwrap();
    (encoder, out_rx, err_rx)
  }

  #[test]
  fn test_validation() {
    let (encoder, _, _) = encoder();
    let mut missing_width = config(16, 16);
    missing_width.width = None;
    assert_eq!(
      encoder.configure(missing_width).unwrap_err().name(),
      DOMExceptionName::TypeError
    );
    let mut one_sided = config(16, 16);
    one_sided.display_width = Some(32);
    assert_eq!(
      encoder.configure(one_sided).unwrap_err().name(),
      DOMExceptionName::TypeError
    );
    assert_eq!(encoder.state(), CodecState::Unconfigured);
  }

  #[test]
  fn test_scalability_mode_not_supported() {
    let registry = CodecRegistry::builtin();
    let mut cfg = config(16, 16);
    cfg.scalability_mode = Some("L1T3".into());
    assert!(!VideoEncoder::config_support(&registry, cfg).unwrap().supported);
    let mut cfg = config(16, 16);
    cfg.scalability_mode = Some("L1T1".into());
    assert!(VideoEncoder::config_support(&registry, cfg).unwrap().supported);
    assert!(!VideoEncoder::config_support(&registry, config(0, 16)).unwrap().supported);
  }

  #[test]
  fn test_encode_converts_and_reports_config() {
    let (encoder, outputs, _) = encoder();
    let mut cfg = config(8, 8);
    cfg.display_width = Some(16);
    cfg.display_height = Some(8);
    encoder.configure(cfg).unwrap();

    let source = frame(VideoPixelFormat::I420, 16, 16, 0);
    encoder
      .encode(&source, VideoEncoderEncodeOptions { key_frame: Some(true) })
      .unwrap();
    source.close();
    encoder
      .encode(&frame(VideoPixelFormat::RGBA, 8, 8, 33_333), Default::default())
      .unwrap();
    futures::executor::block_on(encoder.flush()).unwrap();

    let chunks: Vec<_> = outputs.try_iter().collect();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|(c, _)| c.is_key()));
    assert_eq!(chunks[1].0.timestamp(), 33_333);
    let decoder_config = chunks[0].1.decoder_config.clone().unwrap();
    assert_eq!(decoder_config.coded_width, 8);
    assert_eq!(decoder_config.display_aspect_width, 16);
    assert_eq!(
      decoder_config.color_space.unwrap().primaries,
      Some(VideoColorPrimaries::Bt709)
    );
    assert!(chunks[1].1.decoder_config.is_none());
  }

  #[test]
  fn test_closed_frame_is_type_error() {
    let (encoder, _, _) = encoder();
    encoder.configure(config(4, 4)).unwrap();
    let source = frame(VideoPixelFormat::RGBA, 4, 4, 0);
    source.close();
    assert_eq!(
      encoder
        .encode(&source, Default::default())
        .unwrap_err()
        .name(),
      DOMExceptionName::TypeError
    );
  }
}
