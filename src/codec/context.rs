//! Codec engine contract and registry
//!
//! Every concrete codec implements `EncoderEngine` or `DecoderEngine` and is
//! created through a factory. The registry is the lookup the WebCodecs
//! state machines use at configure time and for `isConfigSupported`.

use std::sync::Arc;

use crate::webcodecs::{AudioSampleFormat, VideoPixelFormat};

use super::{
  flac::{FlacDecoderFactory, FlacEncoderFactory},
  pcm::{PcmDecoderFactory, PcmEncoderFactory},
  qoi::{QoiDecoderFactory, QoiEncoderFactory},
  CodecError, CodecResult, DecoderSettings, EncoderSettings, Frame, Packet,
};

/// Raw format an engine consumes or produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
  Audio(AudioSampleFormat),
  Video(VideoPixelFormat),
}

/// An opened encoder
///
/// Outputs must come back in input order. `close` may be called more than once.
pub trait EncoderEngine: Send {
  /// Encode one frame, returning any packets that became available
  fn encode(&mut self, frame: &Frame) -> CodecResult<Vec<Packet>>;

  /// Drain everything still buffered inside the engine
  fn flush(&mut self) -> CodecResult<Vec<Packet>>;

  /// Drop internal state but stay usable
  fn reset(&mut self);

  /// Release resources
  fn close(&mut self) {}

  /// Out-of-band decoder initialization bytes, surfaced on the first output
  fn extradata(&self) -> Option<Vec<u8>> {
    None
  }

  /// Fixed samples-per-channel block size, if the codec needs one
  fn frame_size(&self) -> Option<usize> {
    None
  }

  /// Make the next encoded frame independently decodable
  ///
  /// Intra-only engines can ignore this.
  fn request_key_frame(&mut self) {}

  /// Raw format `encode` expects
  fn input_format(&self) -> MediaFormat;
}

/// An opened decoder
pub trait DecoderEngine: Send {
  /// Decode one packet into zero or more frames
  fn decode(&mut self, packet: &Packet) -> CodecResult<Vec<Frame>>;

  /// Drain buffered frames
  fn flush(&mut self) -> CodecResult<Vec<Frame>> {
    Ok(Vec::new())
  }

  fn reset(&mut self);

  fn close(&mut self) {}
}

/// Creates encoders for the settings it recognizes
pub trait EncoderFactory: Send + Sync {
  /// Short name for logging
  fn name(&self) -> &'static str;

  /// Cheap, side-effect free support check
  fn supports(&self, settings: &EncoderSettings) -> bool;

  fn create(&self, settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>>;
}

/// Creates decoders for the settings it recognizes
pub trait DecoderFactory: Send + Sync {
  fn name(&self) -> &'static str;

  fn supports(&self, settings: &DecoderSettings) -> bool;

  fn create(&self, settings: &DecoderSettings) -> CodecResult<Box<dyn DecoderEngine>>;
}

/// Ordered set of engine factories
///
/// Factories registered later take precedence over earlier ones, so a
/// user-supplied engine can shadow a built-in for the same codec.
#[derive(Clone, Default)]
pub struct CodecRegistry {
  encoders: Vec<Arc<dyn EncoderFactory>>,
  decoders: Vec<Arc<dyn DecoderFactory>>,
}

impl CodecRegistry {
  /// Registry without any engines
  pub fn empty() -> Self {
    Self::default()
  }

  /// Registry with the native PCM, FLAC and QOI engines
  pub fn builtin() -> Self {
    let mut registry = Self::empty();
    registry.register_encoder(Arc::new(PcmEncoderFactory));
    registry.register_encoder(Arc::new(FlacEncoderFactory));
    registry.register_encoder(Arc::new(QoiEncoderFactory));
    registry.register_decoder(Arc::new(PcmDecoderFactory));
    registry.register_decoder(Arc::new(FlacDecoderFactory));
    registry.register_decoder(Arc::new(QoiDecoderFactory));
    registry
  }

  pub fn register_encoder(&mut self, factory: Arc<dyn EncoderFactory>) -> &mut Self {
    self.encoders.insert(0, factory);
    self
  }

  pub fn register_decoder(&mut self, factory: Arc<dyn DecoderFactory>) -> &mut Self {
    self.decoders.insert(0, factory);
    self
  }

  pub fn find_encoder(&self, settings: &EncoderSettings) -> Option<&Arc<dyn EncoderFactory>> {
    self.encoders.iter().find(|f| f.supports(settings))
  }

  pub fn find_decoder(&self, settings: &DecoderSettings) -> Option<&Arc<dyn DecoderFactory>> {
    self.decoders.iter().find(|f| f.supports(settings))
  }

  /// Open an encoder for `settings`
  pub fn create_encoder(&self, settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
    let factory = self
      .find_encoder(settings)
      .ok_or_else(|| CodecError::CodecNotFound(settings.codec.clone()))?;
    tracing::debug!(target: "webcodecs", engine = factory.name(), codec = %settings.codec, "opening encoder");
    factory.create(settings)
  }

  /// Open a decoder for `settings`
  pub fn create_decoder(&self, settings: &DecoderSettings) -> CodecResult<Box<dyn DecoderEngine>> {
    let factory = self
      .find_decoder(settings)
      .ok_or_else(|| CodecError::CodecNotFound(settings.codec.clone()))?;
    tracing::debug!(target: "webcodecs", engine = factory.name(), codec = %settings.codec, "opening decoder");
    factory.create(settings)
  }

  pub fn encoder_names(&self) -> Vec<&'static str> {
    self.encoders.iter().map(|f| f.name()).collect()
  }

  pub fn decoder_names(&self) -> Vec<&'static str> {
    self.decoders.iter().map(|f| f.name()).collect()
  }
}

impl std::fmt::Debug for CodecRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CodecRegistry")
      .field("encoders", &self.encoder_names())
      .field("decoders", &self.decoder_names())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::{AudioSettings, CodecId, MediaSettings};

  struct NullEncoder;

  impl EncoderEngine for NullEncoder {
    fn encode(&mut self, _frame: &Frame) -> CodecResult<Vec<Packet>> {
      Ok(Vec::new())
    }
    fn flush(&mut self) -> CodecResult<Vec<Packet>> {
      Ok(Vec::new())
    }
    fn reset(&mut self) {}
    fn input_format(&self) -> MediaFormat {
      MediaFormat::Audio(AudioSampleFormat::F32)
    }
  }

  struct OpusStub;

  impl EncoderFactory for OpusStub {
    fn name(&self) -> &'static str {
      "opus-stub"
    }
    fn supports(&self, settings: &EncoderSettings) -> bool {
      settings.codec_id == CodecId::Opus
    }
    fn create(&self, _settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
      Ok(Box::new(NullEncoder))
    }
  }

  fn audio_settings(codec: &str, codec_id: CodecId) -> EncoderSettings {
    EncoderSettings {
      codec: codec.to_string(),
      codec_id,
      media: MediaSettings::Audio(AudioSettings {
        sample_rate: 48000,
        channels: 2,
        bitrate: None,
        block_size: None,
        compression_level: None,
        bits_per_sample: None,
      }),
    }
  }

  #[test]
  fn test_builtin_encoders() {
    let registry = CodecRegistry::builtin();
    assert!(registry.find_encoder(&audio_settings("flac", CodecId::Flac)).is_some());
    assert!(registry.find_encoder(&audio_settings("pcm-s16", CodecId::PcmS16)).is_some());
    assert!(registry.find_encoder(&audio_settings("opus", CodecId::Opus)).is_none());
  }

  #[test]
  fn test_registered_factory_is_found() {
    let mut registry = CodecRegistry::builtin();
    registry.register_encoder(Arc::new(OpusStub));
    assert_eq!(registry.encoder_names()[0], "opus-stub");
    assert!(registry.create_encoder(&audio_settings("opus", CodecId::Opus)).is_ok());
  }

  #[test]
  fn test_missing_engine_is_codec_not_found() {
    let registry = CodecRegistry::empty();
    let err = registry
      .create_encoder(&audio_settings("flac", CodecId::Flac))
      .err()
      .unwrap();
    assert_eq!(err, CodecError::CodecNotFound("flac".into()));
  }
}
