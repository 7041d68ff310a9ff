//! Runtime context
//!
//! Owns the codec registry that encoders and decoders are created from.
//! Nothing is installed globally; pass a `WebCodecs` (it is cheap to clone)
//! to whatever needs to create codecs.

use std::sync::Arc;

use crate::codec::CodecRegistry;
use crate::webcodecs::error::Result;
use crate::webcodecs::{
  AudioDecoder, AudioDecoderConfig, AudioDecoderInit, AudioDecoderSupport, AudioEncoder,
  AudioEncoderConfig, AudioEncoderInit, AudioEncoderSupport, VideoDecoder, VideoDecoderConfig,
  VideoDecoderInit, VideoDecoderSupport, VideoEncoder, VideoEncoderConfig, VideoEncoderInit,
  VideoEncoderSupport,
};

#[derive(Clone, Debug)]
pub struct WebCodecs {
  registry: Arc<CodecRegistry>,
}

impl Default for WebCodecs {
  fn default() -> Self {
    Self::new()
  }
}

impl WebCodecs {
  /// Context backed by the built-in engines
  pub fn new() -> Self {
    Self::with_registry(CodecRegistry::builtin())
  }

  pub fn with_registry(registry: CodecRegistry) -> Self {
    tracing::debug!(
      target: "webcodecs",
      encoders = ?registry.encoder_names(),
      decoders = ?registry.decoder_names(),
      "creating runtime context"
    );
    Self {
      registry: Arc::new(registry),
    }
  }

  pub fn registry(&self) -> &CodecRegistry {
    &self.registry
  }

  pub fn audio_encoder(&self, init: AudioEncoderInit) -> Result<AudioEncoder> {
    AudioEncoder::with_registry(init, self.registry.clone())
  }

  pub fn audio_decoder(&self, init: AudioDecoderInit) -> Result<AudioDecoder> {
    AudioDecoder::with_registry(init, self.registry.clone())
  }

  pub fn video_encoder(&self, init: VideoEncoderInit) -> Result<VideoEncoder> {
    VideoEncoder::with_registry(init, self.registry.clone())
  }

  pub fn video_decoder(&self, init: VideoDecoderInit) -> Result<VideoDecoder> {
    VideoDecoder::with_registry(init, self.registry.clone())
  }

  pub async fn is_audio_encoder_config_supported(
    &self,
    config: AudioEncoderConfig,
  ) -> Result<AudioEncoderSupport> {
    AudioEncoder::config_support(&self.registry, config)
  }

  pub async fn is_audio_decoder_config_supported(
    &self,
    config: AudioDecoderConfig,
  ) -> Result<AudioDecoderSupport> {
    AudioDecoder::config_support(&self.registry, config)
  }

  pub async fn is_video_encoder_config_supported(
    &self,
    config: VideoEncoderConfig,
  ) -> Result<VideoEncoderSupport> {
    VideoEncoder::config_support(&self.registry, config)
  }

  pub async fn is_video_decoder_config_supported(
    &self,
    config: VideoDecoderConfig,
  ) -> Result<VideoDecoderSupport> {
    VideoDecoder::config_support(&self.registry, config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::{
    CodecId, CodecResult, EncoderEngine, EncoderFactory, EncoderSettings, Frame, MediaFormat,
    Packet,
  };
  use crate::webcodecs::error::{DOMExceptionName, Error};
  use crate::webcodecs::{
    AudioData, AudioDataInit, AudioSampleFormat, CodecState, EncodedAudioChunk,
    EncodedAudioChunkMetadata,
  };
  use futures::executor::block_on;
  use std::sync::mpsc;

  /// Emits a one-byte key packet per frame
  struct CountingOpus;

  impl EncoderEngine for CountingOpus {
    fn encode(&mut self, frame: &Frame) -> CodecResult<Vec<Packet>> {
      Ok(vec![Packet::with_timing(vec![0xfc], frame.pts(), frame.duration(), true)])
    }
    fn flush(&mut self) -> CodecResult<Vec<Packet>> {
      Ok(Vec::new())
    }
    fn reset(&mut self) {}
    fn input_format(&self) -> MediaFormat {
      MediaFormat::Audio(AudioSampleFormat::F32)
    }
  }

  struct CountingOpusFactory;

  impl EncoderFactory for CountingOpusFactory {
    fn name(&self) -> &'static str {
      "counting-opus"
    }
    fn supports(&self, settings: &EncoderSettings) -> bool {
      settings.codec_id == CodecId::Opus
    }
    fn create(&self, _settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
      Ok(Box::new(CountingOpus))
    }
  }

  fn opus_config() -> AudioEncoderConfig {
    AudioEncoderConfig {
      codec: Some("opus".into()),
      sample_rate: Some(48000.0),
      number_of_channels: Some(1),
      ..Default::default()
    }
  }

  #[test]
  fn test_builtin_context_rejects_opus() {
    let context = WebCodecs::new();
    let support = block_on(context.is_audio_encoder_config_supported(opus_config())).unwrap();
    assert!(!support.supported);
    assert_eq!(support.config, opus_config());
  }

  #[test]
  fn test_injected_engine_is_used() {
    let mut registry = CodecRegistry::builtin();
    registry.register_encoder(Arc::new(CountingOpusFactory));
    let context = WebCodecs::with_registry(registry);
    assert!(block_on(context.is_audio_encoder_config_supported(opus_config()))
      .unwrap()
      .supported);

    let (tx, rx) = mpsc::channel();
    let encoder = context
      .audio_encoder(AudioEncoderInit::new(
        move |chunk: EncodedAudioChunk, _: EncodedAudioChunkMetadata| {
          let _ = tx.send(chunk.timestamp());
        },
        |_: Error| {},
      ))
      .unwrap();
    encoder.configure(opus_config()).unwrap();
    assert_eq!(encoder.state(), CodecState::Configured);

    let data = AudioData::new(AudioDataInit {
      format: Some(AudioSampleFormat::F32),
      sample_rate: Some(48000),
      number_of_frames: Some(960),
      number_of_channels: Some(1),
      timestamp: Some(0),
      data: Some(vec![0u8; 960 * 4]),
    })
    .unwrap();
    encoder.encode(&data).unwrap();
    block_on(encoder.flush()).unwrap();
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0]);
  }

  #[test]
  fn test_missing_callbacks_are_type_errors() {
    let context = WebCodecs::new();
    let err = context
      .video_decoder(VideoDecoderInit::default())
      .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }
}
