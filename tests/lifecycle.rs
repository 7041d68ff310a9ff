use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;
use webcodec_runtime::codec::{
  CodecId, CodecResult, EncoderEngine, EncoderFactory, EncoderSettings, Frame, MediaFormat,
  Packet,
};
use webcodec_runtime::webcodecs::DOMExceptionName;
use webcodec_runtime::{
  AudioData, AudioDataInit, AudioDecoder, AudioDecoderConfig, AudioDecoderInit, AudioEncoder,
  AudioEncoderConfig, AudioEncoderInit, AudioSampleFormat, CodecRegistry, CodecState,
  EncodedAudioChunk, EncodedAudioChunkInit, EncodedAudioChunkType, VideoDecoder,
  VideoDecoderConfig, VideoEncoder, VideoEncoderConfig, WebCodecs,
};

const WAIT: Duration = Duration::from_secs(10);

fn s16_data(frames: u32, timestamp: i64) -> AudioData {
  AudioData::new(AudioDataInit {
    format: Some(AudioSampleFormat::S16),
    sample_rate: Some(48000),
    number_of_frames: Some(frames),
    number_of_channels: Some(1),
    timestamp: Some(timestamp),
    data: Some((0..frames).flat_map(|i| ((i as i16) * 3).to_le_bytes()).collect()),
  })
  .unwrap()
}

fn pcm_config(codec: &str) -> AudioEncoderConfig {
  AudioEncoderConfig {
    codec: Some(codec.to_string()),
    sample_rate: Some(48000.0),
    number_of_channels: Some(1),
    ..Default::default()
  }
}

/// Holds every frame until the test lets it through
struct GatedEncoder {
  gate: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl EncoderEngine for GatedEncoder {
  fn encode(&mut self, frame: &Frame) -> CodecResult<Vec<Packet>> {
    let _ = self.gate.lock().unwrap().recv();
    Ok(vec![Packet::with_timing(vec![1], frame.pts(), frame.duration(), true)])
  }
  fn flush(&mut self) -> CodecResult<Vec<Packet>> {
    Ok(Vec::new())
  }
  fn reset(&mut self) {}
  fn input_format(&self) -> MediaFormat {
    MediaFormat::Audio(AudioSampleFormat::S16)
  }
}

struct GatedFactory {
  gate: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl EncoderFactory for GatedFactory {
  fn name(&self) -> &'static str {
    "gated"
  }
  fn supports(&self, settings: &EncoderSettings) -> bool {
    settings.codec_id == CodecId::Opus
  }
  fn create(&self, _settings: &EncoderSettings) -> CodecResult<Box<dyn EncoderEngine>> {
    Ok(Box::new(GatedEncoder {
      gate: self.gate.clone(),
    }))
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_size_tracks_pending_work() {
  let (release, gate) = mpsc::channel();
  let mut registry = CodecRegistry::builtin();
  registry.register_encoder(Arc::new(GatedFactory {
    gate: Arc::new(Mutex::new(gate)),
  }));
  let context = WebCodecs::with_registry(registry);

  let outputs = Arc::new(Mutex::new(Vec::new()));
  let sink = outputs.clone();
  let encoder = context
    .audio_encoder(AudioEncoderInit::new(
      move |chunk: EncodedAudioChunk, _| sink.lock().unwrap().push(chunk.timestamp()),
      |_| {},
    ))
    .unwrap();
  assert_eq!(encoder.state(), CodecState::Unconfigured);
  assert_eq!(encoder.encode_queue_size(), 0);

  encoder.configure(pcm_config("opus")).unwrap();
  for i in 0..3 {
    encoder.encode(&s16_data(480, i * 10_000)).unwrap();
  }
  assert_eq!(encoder.encode_queue_size(), 3);

  for _ in 0..3 {
    release.send(()).unwrap();
  }
  timeout(WAIT, encoder.flush()).await.unwrap().unwrap();
  assert_eq!(encoder.encode_queue_size(), 0);
  assert_eq!(outputs.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn decoder_outputs_keep_submission_order() {
  let (tx, rx) = mpsc::channel();
  let decoder = AudioDecoder::new(AudioDecoderInit::new(
    move |data: AudioData| {
      let _ = tx.send((data.timestamp(), data.number_of_frames()));
    },
    |_| {},
  ))
  .unwrap();
  decoder
    .configure(AudioDecoderConfig {
      codec: Some("pcm-s16".into()),
      sample_rate: Some(48000.0),
      number_of_channels: Some(1),
      description: None,
    })
    .unwrap();

  for timestamp in [0, 1024, 2048] {
    let chunk = EncodedAudioChunk::new(EncodedAudioChunkInit {
      chunk_type: Some(EncodedAudioChunkType::Key),
      timestamp: Some(timestamp),
      duration: None,
      data: Some(vec![0u8; 1024 * 2]),
    })
    .unwrap();
    decoder.decode(&chunk).unwrap();
  }
  timeout(WAIT, decoder.flush()).await.unwrap().unwrap();

  let outputs: Vec<_> = rx.try_iter().collect();
  assert_eq!(outputs, vec![(0, 1024), (1024, 1024), (2048, 1024)]);
}

#[tokio::test]
async fn encoder_timestamps_strictly_increase() {
  let (tx, rx) = mpsc::channel();
  let encoder = AudioEncoder::new(AudioEncoderInit::new(
    move |chunk: EncodedAudioChunk, _| {
      let _ = tx.send(chunk.timestamp());
    },
    |_| {},
  ))
  .unwrap();
  encoder.configure(pcm_config("pcm-s16")).unwrap();
  for i in 0..3 {
    encoder.encode(&s16_data(1024, i * 21_333)).unwrap();
  }
  timeout(WAIT, encoder.flush()).await.unwrap().unwrap();

  let timestamps: Vec<i64> = rx.try_iter().collect();
  assert_eq!(timestamps.len(), 3);
  assert_eq!(timestamps[0], 0);
  assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn operations_before_configure_and_after_close() {
  let encoder = AudioEncoder::new(AudioEncoderInit::new(|_, _| {}, |_| {})).unwrap();
  let err = encoder.encode(&s16_data(16, 0)).unwrap_err();
  assert_eq!(err.name(), DOMExceptionName::InvalidStateError);

  encoder.close();
  assert_eq!(encoder.state(), CodecState::Closed);
  let err = encoder.configure(pcm_config("pcm-s16")).unwrap_err();
  assert_eq!(err.name(), DOMExceptionName::InvalidStateError);
  let err = timeout(WAIT, encoder.flush()).await.unwrap().unwrap_err();
  assert_eq!(err.name(), DOMExceptionName::InvalidStateError);
}

#[tokio::test]
async fn reset_aborts_pending_flush() {
  let (release, gate) = mpsc::channel();
  let mut registry = CodecRegistry::builtin();
  registry.register_encoder(Arc::new(GatedFactory {
    gate: Arc::new(Mutex::new(gate)),
  }));
  let encoder = AudioEncoder::with_registry(
    AudioEncoderInit::new(|_, _| {}, |_| {}),
    Arc::new(registry),
  )
  .unwrap();
  encoder.configure(pcm_config("opus")).unwrap();
  encoder.encode(&s16_data(480, 0)).unwrap();

  let flush = encoder.flush();
  encoder.reset().unwrap();
  release.send(()).unwrap();
  let err = timeout(WAIT, flush).await.unwrap().unwrap_err();
  assert_eq!(err.name(), DOMExceptionName::AbortError);
  assert_eq!(encoder.state(), CodecState::Unconfigured);
  assert_eq!(encoder.encode_queue_size(), 0);
}

#[tokio::test]
async fn unknown_codecs_are_not_supported() {
  let audio_encoder = AudioEncoder::is_config_supported(pcm_config("unknown-codec"))
    .await
    .unwrap();
  assert!(!audio_encoder.supported);
  assert_eq!(audio_encoder.config.codec.as_deref(), Some("unknown-codec"));

  let audio_decoder = AudioDecoder::is_config_supported(AudioDecoderConfig {
    codec: Some("unknown-codec".into()),
    sample_rate: Some(48000.0),
    number_of_channels: Some(2),
    description: None,
  })
  .await
  .unwrap();
  assert!(!audio_decoder.supported);

  let video_encoder = VideoEncoder::is_config_supported(VideoEncoderConfig {
    codec: Some("unknown-codec".into()),
    width: Some(640),
    height: Some(480),
    ..Default::default()
  })
  .await
  .unwrap();
  assert!(!video_encoder.supported);

  let video_decoder = VideoDecoder::is_config_supported(VideoDecoderConfig {
    codec: Some("unknown-codec".into()),
    ..Default::default()
  })
  .await
  .unwrap();
  assert!(!video_decoder.supported);

  let err = AudioEncoder::is_config_supported(AudioEncoderConfig {
    codec: Some("pcm-s16".into()),
    sample_rate: Some(0.0),
    number_of_channels: Some(1),
    ..Default::default()
  })
  .await
  .unwrap_err();
  assert_eq!(err.name(), DOMExceptionName::TypeError);
}
