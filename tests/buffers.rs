use webcodec_runtime::webcodecs::DOMExceptionName;
use webcodec_runtime::{
  AudioData, AudioDataCopyToOptions, AudioDataInit, AudioSampleFormat, EncodedAudioChunk,
  EncodedAudioChunkInit, EncodedAudioChunkType, VideoFrame, VideoFrameBufferInit,
  VideoFrameCopyToOptions, VideoPixelFormat,
};

fn audio() -> AudioData {
  AudioData::new(AudioDataInit {
    format: Some(AudioSampleFormat::F32Planar),
    sample_rate: Some(48000),
    number_of_frames: Some(4),
    number_of_channels: Some(2),
    timestamp: Some(1_000),
    data: Some(vec![0u8; 4 * 2 * 4]),
  })
  .unwrap()
}

#[test]
fn closed_audio_data_reads_as_empty() {
  let data = audio();
  let copy = data.try_clone().unwrap();
  data.close();
  data.close();

  assert!(data.is_closed());
  assert_eq!(data.format(), None);
  assert_eq!(data.sample_rate(), 0);
  assert_eq!(data.number_of_frames(), 0);
  assert_eq!(data.number_of_channels(), 0);
  assert_eq!(data.duration(), 0);

  let options = AudioDataCopyToOptions::default();
  assert_eq!(
    data.try_clone().unwrap_err().name(),
    DOMExceptionName::InvalidStateError
  );
  assert_eq!(
    data.allocation_size(&options).unwrap_err().name(),
    DOMExceptionName::InvalidStateError
  );
  let mut buffer = vec![0u8; 64];
  assert_eq!(
    data.copy_to(&mut buffer, &options).unwrap_err().name(),
    DOMExceptionName::InvalidStateError
  );

  // the clone owns its own samples
  assert_eq!(copy.number_of_frames(), 4);
  assert_eq!(copy.allocation_size(&options).unwrap(), 16);
}

#[test]
fn closed_video_frame_reads_as_empty() {
  let frame = VideoFrame::new(
    &[7u8; 4 * 2 * 4],
    VideoFrameBufferInit {
      format: Some(VideoPixelFormat::RGBA),
      coded_width: Some(4),
      coded_height: Some(2),
      timestamp: Some(5),
      ..Default::default()
    },
  )
  .unwrap();
  let copy = frame.try_clone().unwrap();
  frame.close();

  assert!(frame.is_closed());
  assert_eq!(frame.format(), None);
  assert_eq!(frame.coded_width(), 0);
  let options = VideoFrameCopyToOptions::default();
  assert_eq!(
    frame.allocation_size(&options).unwrap_err().name(),
    DOMExceptionName::InvalidStateError
  );
  assert_eq!(
    frame.try_clone().unwrap_err().name(),
    DOMExceptionName::InvalidStateError
  );

  let mut pixels = vec![0u8; 32];
  copy.copy_to(&mut pixels, &options).unwrap();
  assert!(pixels.iter().all(|&b| b == 7));
}

#[test]
fn chunk_copy_checks_destination() {
  let chunk = EncodedAudioChunk::new(EncodedAudioChunkInit {
    chunk_type: Some(EncodedAudioChunkType::Delta),
    timestamp: Some(-20),
    duration: Some(10),
    data: Some(vec![1, 2, 3]),
  })
  .unwrap();
  assert_eq!(chunk.byte_length(), 3);
  assert!(!chunk.is_key());

  let mut small = [0u8; 2];
  assert_eq!(
    chunk.copy_to(&mut small).unwrap_err().name(),
    DOMExceptionName::TypeError
  );
  let mut exact = [0u8; 3];
  chunk.copy_to(&mut exact).unwrap();
  assert_eq!(exact, [1, 2, 3]);
}
