//! AudioEncoder - WebCodecs API implementation
//!
//! Encodes AudioData into EncodedAudioChunks through a registered engine.
//! See: https://w3c.github.io/webcodecs/#audioencoder-interface

use std::future::Future;
use std::sync::Arc;

use crate::codec::{
  AudioSampleBuffer, AudioSettings, CodecId, CodecRegistry, EncoderEngine, EncoderSettings, Frame,
  MediaFormat, MediaSettings, Resampler,
};
use crate::webcodecs::codec_core::{
  CodecCore, CodecState, DequeueCallback, DequeueEvents, ErrorCallback, Processor,
};
use crate::webcodecs::codec_string::parse_audio_codec_string;
use crate::webcodecs::error::{not_supported_error, type_error, Error, Result};
use crate::webcodecs::{
  AudioData, AudioDecoderConfig, AudioEncoderConfig, AudioEncoderSupport, AudioSampleFormat,
  EncodedAudioChunk,
};

/// Output callback: receives each chunk and its metadata
pub type AudioEncoderOutputCallback =
  Box<dyn FnMut(EncodedAudioChunk, EncodedAudioChunkMetadata) + Send>;

/// AudioEncoder init dictionary
///
/// Both callbacks are required; construction fails with TypeError otherwise.
#[derive(Default)]
pub struct AudioEncoderInit {
  pub output: Option<AudioEncoderOutputCallback>,
  pub error: Option<ErrorCallback>,
}

impl AudioEncoderInit {
  pub fn new(
    output: impl FnMut(EncodedAudioChunk, EncodedAudioChunkMetadata) + Send + 'static,
    error: impl FnMut(Error) + Send + 'static,
  ) -> Self {
    Self {
      output: Some(Box::new(output)),
      error: Some(Box::new(error)),
    }
  }
}

/// Output callback metadata for audio
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedAudioChunkMetadata {
  /// Decoder configuration, present on the first chunk after configure
  pub decoder_config: Option<AudioDecoderConfigOutput>,
}

/// Decoder configuration output (for passing to a decoder)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDecoderConfigOutput {
  pub codec: String,
  pub sample_rate: f64,
  pub number_of_channels: u32,
  /// Codec description (e.g., fLaC + STREAMINFO)
  pub description: Option<Vec<u8>>,
}

impl From<AudioDecoderConfigOutput> for AudioDecoderConfig {
  fn from(output: AudioDecoderConfigOutput) -> Self {
    AudioDecoderConfig {
      codec: Some(output.codec),
      sample_rate: Some(output.sample_rate),
      number_of_channels: Some(output.number_of_channels),
      description: output.description,
    }
  }
}

// ============================================================================
// Configuration validation
// ============================================================================

/// Reject structurally invalid configs with TypeError
fn validate_config(config: &AudioEncoderConfig) -> Result<()> {
  match config.codec.as_deref() {
    None => return Err(type_error("codec is required")),
    Some(codec) if codec.trim().is_empty() => return Err(type_error("codec must not be empty")),
    _ => {}
  }
  match config.sample_rate {
    None => return Err(type_error("sampleRate is required")),
    Some(rate) if !rate.is_finite() || rate <= 0.0 => {
      return Err(type_error("sampleRate must be greater than 0"))
    }
    _ => {}
  }
  match config.number_of_channels {
    None => return Err(type_error("numberOfChannels is required")),
    Some(0) => return Err(type_error("numberOfChannels must be greater than 0")),
    _ => {}
  }
  if let Some(bitrate) = config.bitrate {
    if !bitrate.is_finite() || bitrate <= 0.0 {
      return Err(type_error("bitrate must be greater than 0"));
    }
  }
  Ok(())
}

/// Engine settings for a validated config; NotSupportedError for unknown codecs
fn encoder_settings(config: &AudioEncoderConfig) -> Result<EncoderSettings> {
  let codec = config.codec.clone().unwrap_or_default();
  let codec_id = parse_audio_codec_string(&codec)
    .ok_or_else(|| not_supported_error(&format!("Unsupported audio codec: {}", codec)))?;
  let sample_rate = config.sample_rate.unwrap_or_default();
  if sample_rate.fract() != 0.0 || sample_rate > u32::MAX as f64 {
    return Err(not_supported_error(&format!(
      "Unsupported sample rate: {}",
      sample_rate
    )));
  }
  let flac = config.flac.clone().unwrap_or_default();

  Ok(EncoderSettings {
    codec,
    codec_id,
    media: MediaSettings::Audio(AudioSettings {
      sample_rate: sample_rate as u32,
      channels: config.number_of_channels.unwrap_or_default(),
      bitrate: config.bitrate.map(|b| b as u64),
      block_size: flac.block_size.filter(|&b| b > 0),
      compression_level: flac.compress_level,
      bits_per_sample: None,
    }),
  })
}

fn audio_input_format(engine: &dyn EncoderEngine) -> Result<AudioSampleFormat> {
  match engine.input_format() {
    MediaFormat::Audio(format) => Ok(format),
    MediaFormat::Video(_) => Err(not_supported_error("Engine does not accept audio")),
  }
}

// ============================================================================
// Worker-side pipeline
// ============================================================================

pub(crate) struct AudioEncodeProcessor {
  registry: Arc<CodecRegistry>,
  settings: EncoderSettings,
  engine: Box<dyn EncoderEngine>,
  input_format: AudioSampleFormat,
  sample_rate: u32,
  channels: u32,
  resampler: Option<Resampler>,
  sample_buffer: Option<AudioSampleBuffer>,
  base_timestamp: Option<i64>,
  samples_emitted: u64,
  description_sent: bool,
}

impl AudioEncodeProcessor {
  fn open(registry: Arc<CodecRegistry>, settings: EncoderSettings) -> Result<Self> {
    let engine = registry
      .create_encoder(&settings)
      .map_err(|e| not_supported_error(&e.to_string()))?;
    let input_format = audio_input_format(engine.as_ref())?;
    let (sample_rate, channels) = settings
      .audio()
      .map(|a| (a.sample_rate, a.channels))
      .ok_or_else(|| not_supported_error("Missing audio settings"))?;

    let mut processor = Self {
      registry,
      settings,
      engine,
      input_format,
      sample_rate,
      channels,
      resampler: None,
      sample_buffer: None,
      base_timestamp: None,
      samples_emitted: 0,
      description_sent: false,
    };
    processor.rebuild_sample_buffer();
    Ok(processor)
  }

  fn rebuild_sample_buffer(&mut self) {
    self.sample_buffer = self.engine.frame_size().map(|frame_size| {
      AudioSampleBuffer::new(frame_size, self.channels, self.sample_rate, self.input_format)
    });
  }

  /// 32-bit integer input asks for a deeper engine when one is available
  fn match_input_depth(&mut self, source: AudioSampleFormat) {
    if self.settings.codec_id != CodecId::Flac || source.sample_type() != AudioSampleFormat::S32 {
      return;
    }
    let mut settings = self.settings.clone();
    if let MediaSettings::Audio(audio) = &mut settings.media {
      audio.bits_per_sample = Some(24);
    }
    let Ok(engine) = self.registry.create_encoder(&settings) else {
      return;
    };
    let Ok(format) = audio_input_format(engine.as_ref()) else {
      return;
    };
    tracing::debug!(target: "webcodecs", codec = %settings.codec, format = %format, "switching encoder input depth");
    self.engine.close();
    self.engine = engine;
    self.input_format = format;
    self.settings = settings;
    self.rebuild_sample_buffer();
  }

  fn convert(&mut self, frame: &Frame) -> Result<Frame> {
    let source = frame
      .sample_format()
      .ok_or_else(|| type_error("AudioData has no sample format"))?;
    let stale = self.resampler.as_ref().map_or(true, |r| {
      r.src_format() != source
        || r.src_channels() != frame.channels()
        || r.src_sample_rate() != frame.sample_rate()
    });
    if stale {
      self.resampler = Some(Resampler::new(
        frame.channels(),
        frame.sample_rate(),
        source,
        self.channels,
        self.sample_rate,
        self.input_format,
      )?);
    }
    match self.resampler.as_mut() {
      Some(resampler) => Ok(resampler.convert_alloc(frame)?),
      None => Ok(frame.clone()),
    }
  }

  fn encode_block(
    &mut self,
    mut block: Frame,
    out: &mut Vec<(EncodedAudioChunk, EncodedAudioChunkMetadata)>,
  ) -> Result<()> {
    let samples = block.nb_samples() as u64;
    if samples == 0 {
      return Ok(());
    }
    let rate = self.sample_rate as u64;
    let base = self.base_timestamp.unwrap_or(0);
    let timestamp = base + (self.samples_emitted * 1_000_000 / rate) as i64;
    block.set_pts(timestamp);
    block.set_duration((samples * 1_000_000 / rate) as i64);
    self.samples_emitted += samples;

    for packet in self.engine.encode(&block)? {
      let chunk = EncodedAudioChunk::from_packet(packet, None);
      let metadata = self.next_metadata();
      out.push((chunk, metadata));
    }
    Ok(())
  }

  /// Re-block into engine-sized frames
  fn encode_buffered(
    &mut self,
    buffer: &mut AudioSampleBuffer,
    frame: &Frame,
    out: &mut Vec<(EncodedAudioChunk, EncodedAudioChunkMetadata)>,
  ) -> Result<()> {
    buffer.add_frame(frame)?;
    while let Some(block) = buffer.take_frame()? {
      self.encode_block(block, out)?;
    }
    Ok(())
  }

  fn next_metadata(&mut self) -> EncodedAudioChunkMetadata {
    if self.description_sent {
      return EncodedAudioChunkMetadata::default();
    }
    self.description_sent = true;
    EncodedAudioChunkMetadata {
      decoder_config: Some(AudioDecoderConfigOutput {
        codec: self.settings.codec.clone(),
        sample_rate: self.sample_rate as f64,
        number_of_channels: self.channels,
        description: self.engine.extradata(),
      }),
    }
  }
}

impl Processor for AudioEncodeProcessor {
  type Input = Frame;
  type Output = (EncodedAudioChunk, EncodedAudioChunkMetadata);

  fn process(&mut self, frame: Frame) -> Result<Vec<Self::Output>> {
    if self.base_timestamp.is_none() {
      self.base_timestamp = Some(frame.pts());
      if let Some(source) = frame.sample_format() {
        self.match_input_depth(source);
      }
    }

    let converted = self.convert(&frame)?;
    let mut out = Vec::new();
    match self.sample_buffer.take() {
      Some(mut buffer) => {
        let result = self.encode_buffered(&mut buffer, &converted, &mut out);
        self.sample_buffer = Some(buffer);
        result?;
      }
      None => self.encode_block(converted, &mut out)?,
    }
    Ok(out)
  }

  fn flush(&mut self) -> Result<Vec<Self::Output>> {
    let mut out = Vec::new();
    let padded = match self.sample_buffer.as_mut() {
      Some(buffer) => buffer.flush_padded()?,
      None => None,
    };
    if let Some((block, real)) = padded {
      tracing::trace!(target: "webcodecs", real, padded = block.nb_samples(), "padding final block");
      self.encode_block(block, &mut out)?;
    }
    for packet in self.engine.flush()? {
      let chunk = EncodedAudioChunk::from_packet(packet, None);
      let metadata = self.next_metadata();
      out.push((chunk, metadata));
    }
    if let Some(resampler) = self.resampler.as_mut() {
      resampler.reset();
    }
    Ok(out)
  }

  fn close(&mut self) {
    if let Some(buffer) = self.sample_buffer.as_mut() {
      buffer.clear();
    }
    self.engine.close();
  }
}

// ============================================================================
// AudioEncoder
// ============================================================================

/// AudioEncoder - WebCodecs-compliant audio encoder
///
/// ```ignore
/// let encoder = AudioEncoder::new(AudioEncoderInit::new(
///   |chunk, metadata| println!("chunk {} bytes", chunk.byte_length()),
///   |error| eprintln!("{}", error),
/// ))?;
/// encoder.configure(AudioEncoderConfig {
///   codec: Some("flac".into()),
///   sample_rate: Some(48000.0),
///   number_of_channels: Some(2),
///   ..Default::default()
/// })?;
/// encoder.encode(&audio_data)?;
/// encoder.flush().await?;
/// ```
pub struct AudioEncoder {
  core: CodecCore<AudioEncodeProcessor>,
  registry: Arc<CodecRegistry>,
}

impl AudioEncoder {
  /// Create an encoder backed by the built-in engines
  pub fn new(init: AudioEncoderInit) -> Result<Self> {
    Self::with_registry(init, Arc::new(CodecRegistry::builtin()))
  }

  pub fn with_registry(init: AudioEncoderInit, registry: Arc<CodecRegistry>) -> Result<Self> {
    let mut output = init
      .output
      .ok_or_else(|| type_error("output callback is required"))?;
    let error = init
      .error
      .ok_or_else(|| type_error("error callback is required"))?;
    let core = CodecCore::<AudioEncodeProcessor>::new(
      "AudioEncoder",
      Box::new(move |(chunk, metadata): (EncodedAudioChunk, EncodedAudioChunkMetadata)| {
        output(chunk, metadata)
      }),
      error,
    )?;
    Ok(Self { core, registry })
  }

  pub fn state(&self) -> CodecState {
    self.core.state()
  }

  /// Number of pending encode operations
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

  pub fn configure(&self, config: AudioEncoderConfig) -> Result<()> {
    self.core.check_open()?;
    validate_config(&config)?;

    let processor = encoder_settings(&config)
      .and_then(|settings| AudioEncodeProcessor::open(self.registry.clone(), settings));
    match processor {
      Ok(processor) => self.core.configure(processor),
      Err(e) => Err(self.core.fail_configure(e)),
    }
  }

  /// Queue `data` for encoding; the caller keeps ownership and closes it
  pub fn encode(&self, data: &AudioData) -> Result<()> {
    self.core.check_configured()?;
    let frame = data.frame_snapshot()?;
    self.core.enqueue(frame)
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

  /// Check whether `config` can be encoded with the built-in engines
  pub async fn is_config_supported(config: AudioEncoderConfig) -> Result<AudioEncoderSupport> {
    Self::config_support(&CodecRegistry::builtin(), config)
  }

  pub(crate) fn config_support(
    registry: &CodecRegistry,
    config: AudioEncoderConfig,
  ) -> Result<AudioEncoderSupport> {
    validate_config(&config)?;
    let supported = encoder_settings(&config)
      .map(|settings| registry.find_encoder(&settings).is_some())
      .unwrap_or(false);
    Ok(AudioEncoderSupport { supported, config })
  }
}

impl std::fmt::Debug for AudioEncoder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AudioEncoder")
      .field("state", &self.state())
      .field("encode_queue_size", &self.encode_queue_size())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::webcodecs::error::DOMExceptionName;
  use crate::webcodecs::{samples_to_bytes, AudioDataInit, FlacEncoderConfig};
  use std::sync::mpsc;

  fn config(codec: &str) -> AudioEncoderConfig {
    AudioEncoderConfig {
      codec: Some(codec.to_string()),
      sample_rate: Some(48000.0),
      number_of_channels: Some(2),
      ..Default::default()
    }
  }

  fn audio(frames: u32, timestamp: i64) -> AudioData {
    let samples: Vec<i16> = (0..frames * 2).map(|i| (i % 200) as i16 * 50).collect();
    AudioData::new(AudioDataInit {
      format: Some(AudioSampleFormat::S16),
      sample_rate: Some(48000),
      number_of_frames: Some(frames),
      number_of_channels: Some(2),
      timestamp: Some(timestamp),
      data: Some(samples_to_bytes(&samples)),
    })
    .unwrap()
  }

  fn encoder() -> (
    AudioEncoder,
    mpsc::Receiver<(EncodedAudioChunk, EncodedAudioChunkMetadata)>,
    mpsc::Receiver<Error>,
  ) {
    let (out_tx, out_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    let encoder = AudioEncoder::new(AudioEncoderInit::new(
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
  fn test_missing_callbacks() {
    let err = AudioEncoder::new(AudioEncoderInit::default()).unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
  }

  #[test]
  fn test_configure_validation() {
    let (encoder, _, errors) = encoder();
    let mut missing_rate = config("flac");
    missing_rate.sample_rate = None;
    let err = encoder.configure(missing_rate).unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
    // TypeError leaves the encoder usable
    assert_eq!(encoder.state(), CodecState::Unconfigured);
    assert!(errors.try_recv().is_err());

    let err = encoder.configure(config("opus")).unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::NotSupportedError);
    assert_eq!(errors.try_recv().unwrap().name(), DOMExceptionName::NotSupportedError);
    assert_eq!(encoder.state(), CodecState::Closed);
  }

  #[test]
  fn test_pcm_timestamps_follow_samples() {
    let (encoder, outputs, _) = encoder();
    encoder.configure(config("pcm-s16")).unwrap();
    for i in 0..3 {
      let data = audio(480, 1_000 + i * 10_000);
      encoder.encode(&data).unwrap();
      data.close();
    }
    futures::executor::block_on(encoder.flush()).unwrap();
    let chunks: Vec<_> = outputs.try_iter().collect();
    assert_eq!(chunks.len(), 3);
    let timestamps: Vec<i64> = chunks.iter().map(|(c, _)| c.timestamp()).collect();
    assert_eq!(timestamps, vec![1_000, 11_000, 21_000]);
    assert!(chunks[0].1.decoder_config.is_some());
    assert!(chunks[1].1.decoder_config.is_none());
    assert_eq!(chunks[0].0.byte_length(), 480 * 2 * 2);
  }

  #[test]
  fn test_flac_description_and_padding() {
    let (encoder, outputs, _) = encoder();
    let mut cfg = config("flac");
    cfg.flac = Some(FlacEncoderConfig {
      block_size: Some(1024),
      compress_level: None,
    });
    encoder.configure(cfg).unwrap();
    encoder.encode(&audio(1500, 0)).unwrap();
    futures::executor::block_on(encoder.flush()).unwrap();

    let chunks: Vec<_> = outputs.try_iter().collect();
    assert_eq!(chunks.len(), 2);
    let decoder_config = chunks[0].1.decoder_config.clone().unwrap();
    let description = decoder_config.description.unwrap();
    assert_eq!(&description[..4], b"fLaC");
    assert_eq!(chunks[1].0.timestamp(), 1024 * 1_000_000 / 48000);
  }

  #[test]
  fn test_closed_audio_data_is_type_error() {
    let (encoder, _, _) = encoder();
    encoder.configure(config("pcm-f32")).unwrap();
    let data = audio(128, 0);
    data.close();
    let err = encoder.encode(&data).unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::TypeError);
    assert_eq!(encoder.encode_queue_size(), 0);
  }

  #[test]
  fn test_config_support() {
    let registry = CodecRegistry::builtin();
    assert!(AudioEncoder::config_support(&registry, config("flac")).unwrap().supported);
    assert!(!AudioEncoder::config_support(&registry, config("unknown-codec")).unwrap().supported);
    let mut zero_channels = config("flac");
    zero_channels.number_of_channels = Some(0);
    assert!(AudioEncoder::config_support(&registry, zero_channels).is_err());
  }
}
