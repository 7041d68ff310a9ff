//! VideoDecoder - WebCodecs API implementation
//!
//! Decodes EncodedVideoChunks into VideoFrames through a registered engine.
//! See: https://w3c.github.io/webcodecs/#videodecoder-interface

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{
  CodecRegistry, DecoderEngine, DecoderSettings, Frame, MediaSettings, Packet, VideoSettings,
};
use crate::webcodecs::codec_core::{
  CodecCore, CodecState, DequeueCallback, DequeueEvents, ErrorCallback, Processor,
};
use crate::webcodecs::codec_string::parse_codec_string;
use crate::webcodecs::error::{data_error, not_supported_error, type_error, Error, Result};
use crate::webcodecs::{
  EncodedVideoChunk, VideoColorSpace, VideoDecoderConfig, VideoDecoderSupport, VideoFrame,
};

pub type VideoDecoderOutputCallback = Box<dyn FnMut(VideoFrame) + Send>;

/// VideoDecoder init dictionary; both callbacks are required
#[derive(Default)]
pub struct VideoDecoderInit {
  pub output: Option<VideoDecoderOutputCallback>,
  pub error: Option<ErrorCallback>,
}

impl VideoDecoderInit {
  pub fn new(
    output: impl FnMut(VideoFrame) + Send + 'static,
    error: impl FnMut(Error) + Send + 'static,
  ) -> Self {
    Self {
      output: Some(Box::new(output)),
      error: Some(Box::new(error)),
    }
  }
}

fn validate_config(config: &VideoDecoderConfig) -> Result<()> {
  match config.codec.as_deref() {
    Some(codec) if !codec.trim().is_empty() => {}
    _ => return Err(type_error("codec is required")),
  }
  match (config.coded_width, config.coded_height) {
    (Some(0), _) | (_, Some(0)) => {
      return Err(type_error("codedWidth and codedHeight must be greater than 0"))
    }
    (Some(_), None) | (None, Some(_)) => {
      return Err(type_error("codedWidth and codedHeight must be set together"))
    }
    _ => {}
  }
  match (config.display_aspect_width, config.display_aspect_height) {
    (Some(0), _) | (_, Some(0)) => Err(type_error(
      "displayAspectWidth and displayAspectHeight must be greater than 0",
    )),
    (Some(_), None) | (None, Some(_)) => Err(type_error(
      "displayAspectWidth and displayAspectHeight must be set together",
    )),
    _ => Ok(()),
  }
}

fn decoder_settings(config: &VideoDecoderConfig) -> Result<DecoderSettings> {
  let codec = config.codec.clone().unwrap_or_default();
  let parsed = parse_codec_string(&codec)
    .filter(|parsed| parsed.codec_id.is_video())
    .ok_or_else(|| not_supported_error(&format!("Unsupported video codec: {}", codec)))?;

  Ok(DecoderSettings {
    codec,
    codec_id: parsed.codec_id,
    media: MediaSettings::Video(VideoSettings {
      width: config.coded_width.unwrap_or(0),
      height: config.coded_height.unwrap_or(0),
      bitrate: None,
      framerate: None,
    }),
    extradata: config.description.clone(),
  })
}

pub(crate) struct VideoDecodeProcessor {
  engine: Box<dyn DecoderEngine>,
  aspect: Option<(u32, u32)>,
  color_space: VideoColorSpace,
}

impl VideoDecodeProcessor {
  fn display_size(&self, frame: &Frame) -> Option<(u32, u32)> {
    let (aspect_width, aspect_height) = self.aspect?;
    let height = frame.height();
    let width = (height as f64 * aspect_width as f64 / aspect_height as f64).round() as u32;
    Some((width.max(1), height))
  }

  fn wrap(&self, frames: Vec<Frame>, packet: Option<&Packet>) -> Result<Vec<VideoFrame>> {
    frames
      .into_iter()
      .map(|mut frame| {
        if let Some(packet) = packet {
          frame.set_pts(packet.pts());
          if let Some(duration) = packet.duration() {
            frame.set_duration(duration);
          }
        }
        let display = self.display_size(&frame);
        VideoFrame::from_internal(frame, display, self.color_space.clone())
      })
      .collect()
  }
}

impl Processor for VideoDecodeProcessor {
  type Input = Packet;
  type Output = VideoFrame;

  fn process(&mut self, packet: Packet) -> Result<Vec<VideoFrame>> {
    let frames = self.engine.decode(&packet).map_err(Error::from_decode)?;
    self.wrap(frames, Some(&packet))
  }

  fn flush(&mut self) -> Result<Vec<VideoFrame>> {
    let frames = self.engine.flush().map_err(Error::from_decode)?;
    self.wrap(frames, None)
  }

  fn close(&mut self) {
    self.engine.close();
  }
}

/// VideoDecoder - WebCodecs-compliant video decoder
pub struct VideoDecoder {
  core: CodecCore<VideoDecodeProcessor>,
  registry: Arc<CodecRegistry>,
  key_required: AtomicBool,
}

impl VideoDecoder {
  pub fn new(init: VideoDecoderInit) -> Result<Self> {
    Self::with_registry(init, Arc::new(CodecRegistry::builtin()))
  }

  pub fn with_registry(init: VideoDecoderInit, registry: Arc<CodecRegistry>) -> Result<Self> {
    let output = init
      .output
      .ok_or_else(|| type_error("output callback is required"))?;
    let error = init
      .error
      .ok_or_else(|| type_error("error callback is required"))?;
    Ok(Self {
      core: CodecCore::new("VideoDecoder", output, error)?,
      registry,
      key_required: AtomicBool::new(true),
    })
  }

  pub fn state(&self) -> CodecState {
    self.core.state()
  }

  pub fn decode_queue_size(&self) -> u32 {
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

  pub fn configure(&self, config: VideoDecoderConfig) -> Result<()> {
    self.core.check_open()?;
    validate_config(&config)?;

    let engine = decoder_settings(&config).and_then(|settings| {
      self
        .registry
        .create_decoder(&settings)
        .map_err(|e| not_supported_error(&e.to_string()))
    });
    match engine {
      Ok(engine) => {
        self.core.configure(VideoDecodeProcessor {
          engine,
          aspect: config.display_aspect_width.zip(config.display_aspect_height),
          color_space: VideoColorSpace::new(config.color_space.clone()),
        })?;
        self.key_required.store(true, Ordering::SeqCst);
        Ok(())
      }
      Err(e) => Err(self.core.fail_configure(e)),
    }
  }

  pub fn decode(&self, chunk: &EncodedVideoChunk) -> Result<()> {
    self.core.check_configured()?;
    if self.key_required.load(Ordering::SeqCst) && !chunk.is_key() {
      return Err(data_error("A key frame is required after configure, flush or reset"));
    }
    self.core.enqueue(chunk.to_packet())?;
    self.key_required.store(false, Ordering::SeqCst);
    Ok(())
  }

  pub fn flush(&self) -> impl Future<Output = Result<()>> + Send + 'static {
    self.key_required.store(true, Ordering::SeqCst);
    self.core.flush()
  }

  pub fn reset(&self) -> Result<()> {
    self.core.reset()?;
    self.key_required.store(true, Ordering::SeqCst);
    Ok(())
  }

  pub fn close(&self) {
    self.core.close();
  }

  pub async fn is_config_supported(config: VideoDecoderConfig) -> Result<VideoDecoderSupport> {
    Self::config_support(&CodecRegistry::builtin(), config)
  }

  pub(crate) fn config_support(
    registry: &CodecRegistry,
    config: VideoDecoderConfig,
  ) -> Result<VideoDecoderSupport> {
    validate_config(&config)?;
    let supported = decoder_settings(&config)
      .map(|settings| registry.find_decoder(&settings).is_some())
      .unwrap_or(false);
    Ok(VideoDecoderSupport { supported, config })
  }
}

impl std::fmt::Debug for VideoDecoder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("VideoDecoder")
      .field("state", &self.state())
      .field("decode_queue_size", &self.decode_queue_size())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::qoi::encode_rgba;
  use crate::webcodecs::error::DOMExceptionName;
  use crate::webcodecs::{
    EncodedVideoChunkInit, EncodedVideoChunkType, VideoColorSpaceInit, VideoFrameCopyToOptions,
    VideoMatrixCoefficients, VideoPixelFormat,
  };
  use std::sync::mpsc;

  fn qoi_chunk(chunk_type: EncodedVideoChunkType, timestamp: i64) -> EncodedVideoChunk {
    let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| (i * 7 % 256) as u8).collect();
    EncodedVideoChunk::new(EncodedVideoChunkInit {
      chunk_type: Some(chunk_type),
      timestamp: Some(timestamp),
      duration: Some(40_000),
      data: Some(encode_rgba(&pixels, 4, 4).unwrap()),
    })
    .unwrap()
  }

  fn decoder() -> (VideoDecoder, mpsc::Receiver<VideoFrame>, mpsc::Receiver<Error>) {
    let (out_tx, out_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    let decoder = VideoDecoder::new(VideoDecoderInit::new(
      move |frame| {
        let _ = out_tx.send(frame);
      },
      move |e| {
        let _ = err_tx.send(e);
      },
    ))
    .unwrap();
    (decoder, out_rx, err_rx)
  }

  fn config() -> VideoDecoderConfig {
    VideoDecoderConfig {
      codec: Some("qoi".into()),
      ..Default::default()
    }
  }

  #[test]
  fn test_config_validation() {
    let (decoder, _, _) = decoder();
    let mut one_sided = config();
    one_sided.coded_width = Some(4);
    assert_eq!(
      decoder.configure(one_sided).unwrap_err().name(),
      DOMExceptionName::TypeError
    );
    let mut zero_aspect = config();
    zero_aspect.display_aspect_width = Some(0);
    zero_aspect.display_aspect_height = Some(1);
    assert_eq!(
      decoder.configure(zero_aspect).unwrap_err().name(),
      DOMExceptionName::TypeError
    );
    assert_eq!(decoder.state(), CodecState::Unconfigured);
  }

  #[test]
  fn test_decode_applies_config() {
    let (decoder, outputs, _) = decoder();
    let mut cfg = config();
    cfg.display_aspect_width = Some(16);
    cfg.display_aspect_height = Some(9);
    cfg.color_space = Some(VideoColorSpaceInit {
      matrix: Some(VideoMatrixCoefficients::Rgb),
      ..Default::default()
    });
    decoder.configure(cfg).unwrap();
    decoder
      .decode(&qoi_chunk(EncodedVideoChunkType::Key, 120_000))
      .unwrap();
    futures::executor::block_on(decoder.flush()).unwrap();

    let frame = outputs.try_recv().unwrap();
    assert_eq!(frame.format(), Some(VideoPixelFormat::RGBA));
    assert_eq!(frame.timestamp(), 120_000);
    assert_eq!(frame.duration(), Some(40_000));
    assert_eq!((frame.display_width(), frame.display_height()), (7, 4));
    assert_eq!(frame.color_space().matrix(), Some(VideoMatrixCoefficients::Rgb));
    let size = frame
      .allocation_size(&VideoFrameCopyToOptions::default())
      .unwrap();
    assert_eq!(size, 64);
  }

  #[test]
  fn test_delta_first_is_data_error() {
    let (decoder, _, _) = decoder();
    decoder.configure(config()).unwrap();
    let err = decoder
      .decode(&qoi_chunk(EncodedVideoChunkType::Delta, 0))
      .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::DataError);
    assert_eq!(decoder.state(), CodecState::Configured);
  }

  #[test]
  fn test_corrupt_chunk_closes_with_error() {
    let (decoder, _, errors) = decoder();
    decoder.configure(config()).unwrap();
    let chunk = EncodedVideoChunk::new(EncodedVideoChunkInit {
      chunk_type: Some(EncodedVideoChunkType::Key),
      timestamp: Some(0),
      duration: None,
      data: Some(vec![1, 2, 3]),
    })
    .unwrap();
    decoder.decode(&chunk).unwrap();
    assert!(futures::executor::block_on(decoder.flush()).is_err());
    assert_eq!(errors.try_recv().unwrap().name(), DOMExceptionName::DataError);
    assert_eq!(decoder.state(), CodecState::Closed);
  }

  #[test]
  fn test_unknown_codec_support() {
    let registry = CodecRegistry::builtin();
    let mut cfg = config();
    cfg.codec = Some("bogus".into());
    assert!(!VideoDecoder::config_support(&registry, cfg).unwrap().supported);
    let mut cfg = config();
    cfg.codec = Some("vp8".into());
    assert!(!VideoDecoder::config_support(&registry, cfg).unwrap().supported);
    assert!(VideoDecoder::config_support(&registry, config()).unwrap().supported);
  }
}
