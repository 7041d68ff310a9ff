//! AudioDecoder - WebCodecs API implementation
//!
//! Decodes EncodedAudioChunks into AudioData through a registered engine.
//! See: https://w3c.github.io/webcodecs/#audiodecoder-interface

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{
  AudioSettings, CodecRegistry, DecoderEngine, DecoderSettings, MediaSettings, Packet,
};
use crate::webcodecs::codec_core::{
  CodecCore, CodecState, DequeueCallback, DequeueEvents, ErrorCallback, Processor,
};
use crate::webcodecs::codec_string::parse_audio_codec_string;
use crate::webcodecs::error::{data_error, not_supported_error, type_error, Error, Result};
use crate::webcodecs::{AudioData, AudioDecoderConfig, AudioDecoderSupport, EncodedAudioChunk};

pub type AudioDecoderOutputCallback = Box<dyn FnMut(AudioData) + Send>;

/// AudioDecoder init dictionary; both callbacks are required
#[derive(Default)]
pub struct AudioDecoderInit {
  pub output: Option<AudioDecoderOutputCallback>,
  pub error: Option<ErrorCallback>,
}

impl AudioDecoderInit {
  pub fn new(
    output: impl FnMut(AudioData) + Send + 'static,
    error: impl FnMut(Error) + Send + 'static,
  ) -> Self {
    Self {
      output: Some(Box::new(output)),
      error: Some(Box::new(error)),
    }
  }
}

fn validate_config(config: &AudioDecoderConfig) -> Result<()> {
  match config.codec.as_deref() {
    Some(codec) if !codec.trim().is_empty() => {}
    _ => return Err(type_error("codec is required")),
  }
  match config.sample_rate {
    Some(rate) if rate.is_finite() && rate > 0.0 => {}
    Some(_) => return Err(type_error("sampleRate must be greater than 0")),
    None => return Err(type_error("sampleRate is required")),
  }
  match config.number_of_channels {
    Some(channels) if channels > 0 => Ok(()),
    Some(_) => Err(type_error("numberOfChannels must be greater than 0")),
    None => Err(type_error("numberOfChannels is required")),
  }
}

fn decoder_settings(config: &AudioDecoderConfig) -> Result<DecoderSettings> {
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

  Ok(DecoderSettings {
    codec,
    codec_id,
    media: MediaSettings::Audio(AudioSettings {
      sample_rate: sample_rate as u32,
      channels: config.number_of_channels.unwrap_or_default(),
      bitrate: None,
      block_size: None,
      compression_level: None,
      bits_per_sample: None,
    }),
    extradata: config.description.clone(),
  })
}

pub(crate) struct AudioDecodeProcessor {
  engine: Box<dyn DecoderEngine>,
}

impl AudioDecodeProcessor {
  fn wrap(frames: Vec<crate::codec::Frame>, start: Option<i64>) -> Result<Vec<AudioData>> {
    let mut next_pts = start;
    frames
      .into_iter()
      .map(|mut frame| {
        if let Some(pts) = next_pts {
          frame.set_pts(pts);
          let duration = frame.duration().unwrap_or_else(|| {
            frame.nb_samples() as i64 * 1_000_000 / frame.sample_rate().max(1) as i64
          });
          next_pts = Some(pts + duration);
        }
        AudioData::from_frame(frame)
      })
      .collect()
  }
}

impl Processor for AudioDecodeProcessor {
  type Input = Packet;
  type Output = AudioData;

  fn process(&mut self, packet: Packet) -> Result<Vec<AudioData>> {
    let frames = self.engine.decode(&packet).map_err(Error::from_decode)?;
    Self::wrap(frames, Some(packet.pts()))
  }

  fn flush(&mut self) -> Result<Vec<AudioData>> {
    let frames = self.engine.flush().map_err(Error::from_decode)?;
    Self::wrap(frames, None)
  }

  fn close(&mut self) {
    self.engine.close();
  }
}

/// AudioDecoder - WebCodecs-compliant audio decoder
pub struct AudioDecoder {
  core: CodecCore<AudioDecodeProcessor>,
  registry: Arc<CodecRegistry>,
  /// Set after configure, flush and reset until a key chunk arrives
  key_required: AtomicBool,
}

impl AudioDecoder {
  pub fn new(init: AudioDecoderInit) -> Result<Self> {
    Self::with_registry(init, Arc::new(CodecRegistry::builtin()))
  }

  pub fn with_registry(init: AudioDecoderInit, registry: Arc<CodecRegistry>) -> Result<Self> {
    let output = init
      .output
      .ok_or_else(|| type_error("output callback is required"))?;
    let error = init
      .error
      .ok_or_else(|| type_error("error callback is required"))?;
    Ok(Self {
      core: CodecCore::new("AudioDecoder", output, error)?,
      registry,
      key_required: AtomicBool::new(true),
    })
  }

  pub fn state(&self) -> CodecState {
    self.core.state()
  }

  /// Number of pending decode operations
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

  pub fn configure(&self, config: AudioDecoderConfig) -> Result<()> {
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
        self.core.configure(AudioDecodeProcessor { engine })?;
        self.key_required.store(true, Ordering::SeqCst);
        Ok(())
      }
      Err(e) => Err(self.core.fail_configure(e)),
    }
  }

  pub fn decode(&self, chunk: &EncodedAudioChunk) -> Result<()> {
    self.core.check_configured()?;
    if self.key_required.load(Ordering::SeqCst) && !chunk.is_key() {
      return Err(data_error("A key chunk is required after configure, flush or reset"));
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

  /// Check whether `config` can be decoded with the built-in engines
  pub async fn is_config_supported(config: AudioDecoderConfig) -> Result<AudioDecoderSupport> {
    Self::config_support(&CodecRegistry::builtin(), config)
  }

  pub(crate) fn config_support(
    registry: &CodecRegistry,
    config: AudioDecoderConfig,
  ) -> Result<AudioDecoderSupport> {
    validate_config(&config)?;
    let supported = decoder_settings(&config)
      .map(|settings| registry.find_decoder(&settings).is_some())
      .unwrap_or(false);
    Ok(AudioDecoderSupport { supported, config })
  }
}

impl std::fmt::Debug for AudioDecoder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AudioDecoder")
      .field("state", &self.state())
      .field("decode_queue_size", &self.decode_queue_size())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::webcodecs::error::DOMExceptionName;
  use crate::webcodecs::{
    bytes_to_samples, samples_to_bytes, AudioDataCopyToOptions, AudioSampleFormat,
    EncodedAudioChunkInit, EncodedAudioChunkType,
  };
  use std::sync::mpsc;

  fn config(codec: &str) -> AudioDecoderConfig {
    AudioDecoderConfig {
      codec: Some(codec.to_string()),
      sample_rate: Some(8000.0),
      number_of_channels: Some(1),
      description: None,
    }
  }

  fn chunk(chunk_type: EncodedAudioChunkType, timestamp: i64, samples: &[i16]) -> EncodedAudioChunk {
    EncodedAudioChunk::new(EncodedAudioChunkInit {
      chunk_type: Some(chunk_type),
      timestamp: Some(timestamp),
      duration: None,
      data: Some(samples_to_bytes(samples)),
    })
    .unwrap()
  }

  fn decoder() -> (AudioDecoder, mpsc::Receiver<AudioData>, mpsc::Receiver<Error>) {
    let (out_tx, out_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    let decoder = AudioDecoder::new(AudioDecoderInit::new(
      move |data| {
        let _ = out_tx.send(data);
      },
      move |e| {
        let _ = err_tx.send(e);
      },
    ))
    .unwrap();
    (decoder, out_rx, err_rx)
  }

  #[test]
  fn test_decode_before_configure() {
    let (decoder, _, _) = decoder();
    let err = decoder
      .decode(&chunk(EncodedAudioChunkType::Key, 0, &[0; 8]))
      .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::InvalidStateError);
  }

  #[test]
  fn test_missing_sample_rate() {
    let (decoder, _, _) = decoder();
    let mut cfg = config("pcm-s16");
    cfg.sample_rate = None;
    assert_eq!(
      decoder.configure(cfg).unwrap_err().name(),
      DOMExceptionName::TypeError
    );
  }

  #[test]
  fn test_pcm_decode() {
    let (decoder, outputs, _) = decoder();
    decoder.configure(config("pcm-s16")).unwrap();
    let samples: Vec<i16> = (0..80).map(|i| i * 100).collect();
    decoder
      .decode(&chunk(EncodedAudioChunkType::Key, 5_000, &samples))
      .unwrap();
    futures::executor::block_on(decoder.flush()).unwrap();

    let data = outputs.try_recv().unwrap();
    assert_eq!(data.format(), Some(AudioSampleFormat::S16));
    assert_eq!(data.number_of_frames(), 80);
    assert_eq!(data.timestamp(), 5_000);
    assert_eq!(data.duration(), 10_000);
    let mut bytes = vec![0u8; 160];
    data.copy_to(&mut bytes, &AudioDataCopyToOptions::default()).unwrap();
    assert_eq!(bytes_to_samples::<i16>(&bytes), samples);
  }

  #[test]
  fn test_delta_first_is_data_error() {
    let (decoder, _, errors) = decoder();
    decoder.configure(config("pcm-s16")).unwrap();
    let err = decoder
      .decode(&chunk(EncodedAudioChunkType::Delta, 0, &[0; 4]))
      .unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::DataError);
    assert_eq!(decoder.state(), CodecState::Configured);

    decoder
      .decode(&chunk(EncodedAudioChunkType::Key, 0, &[0; 4]))
      .unwrap();
    decoder
      .decode(&chunk(EncodedAudioChunkType::Delta, 500, &[0; 4]))
      .unwrap();
    futures::executor::block_on(decoder.flush()).unwrap();
    assert!(decoder
      .decode(&chunk(EncodedAudioChunkType::Delta, 1000, &[0; 4]))
      .is_err());
    assert!(errors.try_recv().is_err());
  }

  #[test]
  fn test_corrupt_chunk_reports_error() {
    let (decoder, _, errors) = decoder();
    decoder.configure(config("pcm-s16")).unwrap();
    let bad = EncodedAudioChunk::new(EncodedAudioChunkInit {
      chunk_type: Some(EncodedAudioChunkType::Key),
      timestamp: Some(0),
      duration: None,
      data: Some(vec![1, 2, 3]),
    })
    .unwrap();
    decoder.decode(&bad).unwrap();
    let err = futures::executor::block_on(decoder.flush()).unwrap_err();
    assert_eq!(err.name(), DOMExceptionName::DataError);
    assert_eq!(errors.try_recv().unwrap().name(), DOMExceptionName::DataError);
    assert_eq!(decoder.state(), CodecState::Closed);
  }

  #[test]
  fn test_config_support() {
    let registry = CodecRegistry::builtin();
    assert!(AudioDecoder::config_support(&registry, config("ulaw")).unwrap().supported);
    assert!(!AudioDecoder::config_support(&registry, config("vorbis")).unwrap().supported);
  }
}
