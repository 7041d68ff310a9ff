#![deny(clippy::all)]

//! WebCodecs-style media codec runtime
//!
//! Audio and video encoders and decoders with the WebCodecs lifecycle, driven
//! by native engines that are looked up through a `CodecRegistry`.

// Native engines, frames, packets and conversion helpers
pub mod codec;

// WebCodecs API surface
pub mod webcodecs;

pub use codec::{CodecRegistry, DecoderEngine, DecoderFactory, EncoderEngine, EncoderFactory};
pub use webcodecs::{
  // Runtime
  CodecState, Error, Result, WebCodecs,
  // Video types
  EncodedVideoChunk, EncodedVideoChunkInit, EncodedVideoChunkMetadata, EncodedVideoChunkType,
  VideoColorSpace, VideoDecoder, VideoDecoderConfig, VideoDecoderConfigOutput, VideoDecoderInit,
  VideoDecoderSupport, VideoEncoder, VideoEncoderConfig, VideoEncoderEncodeOptions,
  VideoEncoderInit, VideoEncoderSupport, VideoFrame, VideoFrameBufferInit,
  VideoFrameCopyToOptions, VideoFrameInit, VideoPixelFormat,
  // Audio types
  AudioData, AudioDataCopyToOptions, AudioDataInit, AudioDecoder, AudioDecoderConfig,
  AudioDecoderConfigOutput, AudioDecoderInit, AudioDecoderSupport, AudioEncoder,
  AudioEncoderConfig, AudioEncoderInit, AudioEncoderSupport, AudioSampleFormat,
  EncodedAudioChunk, EncodedAudioChunkInit, EncodedAudioChunkMetadata, EncodedAudioChunkType,
};
