//! WebCodecs API implementation
//!
//! Encoder and decoder state machines, the media buffer types they consume and
//! produce, and the runtime context they are created from.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/WebCodecs_API

mod async_mutex;
mod audio_data;
mod audio_decoder;
mod audio_encoder;
mod codec_core;
pub mod codec_string;
mod encoded_audio_chunk;
mod encoded_video_chunk;
pub mod error;
mod runtime;
mod video_decoder;
mod video_encoder;
mod video_frame;

pub use async_mutex::{serialize_async, AsyncMutex, AsyncMutexLock};
pub use audio_data::{
  bytes_to_samples, samples_to_bytes, AudioData, AudioDataCopyToOptions, AudioDataInit,
  AudioSampleFormat, Sample,
};
pub use audio_decoder::{AudioDecoder, AudioDecoderInit, AudioDecoderOutputCallback};
pub use audio_encoder::{
  AudioDecoderConfigOutput, AudioEncoder, AudioEncoderInit, AudioEncoderOutputCallback,
  EncodedAudioChunkMetadata,
};
pub use codec_core::{CodecState, DequeueCallback, DequeueEvents, ErrorCallback};
pub use encoded_audio_chunk::{
  AudioDecoderConfig, AudioDecoderSupport, AudioEncoderConfig, AudioEncoderSupport, BitrateMode,
  EncodedAudioChunk, EncodedAudioChunkInit, EncodedAudioChunkType, FlacEncoderConfig,
};
pub use encoded_video_chunk::{
  AlphaOption, EncodedVideoChunk, EncodedVideoChunkInit, EncodedVideoChunkType,
  HardwareAcceleration, LatencyMode, VideoDecoderConfig, VideoDecoderSupport,
  VideoEncoderBitrateMode, VideoEncoderConfig, VideoEncoderSupport,
};
pub use error::{DOMExceptionName, Error, Result};
pub use runtime::WebCodecs;
pub use video_decoder::{VideoDecoder, VideoDecoderInit, VideoDecoderOutputCallback};
pub use video_encoder::{
  EncodedVideoChunkMetadata, VideoDecoderConfigOutput, VideoEncoder, VideoEncoderEncodeOptions,
  VideoEncoderInit, VideoEncoderOutputCallback,
};
pub use video_frame::{
  DOMRectInit, DOMRectReadOnly, PlaneLayout, VideoColorPrimaries, VideoColorSpace,
  VideoColorSpaceInit, VideoFrame, VideoFrameBufferInit, VideoFrameCopyToOptions, VideoFrameInit,
  VideoMatrixCoefficients, VideoPixelFormat, VideoTransferCharacteristics,
};
