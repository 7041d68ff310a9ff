//! VideoFrame - WebCodecs API implementation
//!
//! Represents a frame of video data that can be displayed or encoded.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/VideoFrame

use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::codec::{Frame, Scaler};

use super::error::{invalid_state_error, type_error, Error, Result};

/// Video pixel format (WebCodecs spec)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoPixelFormat {
  /// Planar YUV 4:2:0, 12bpp, (1 Cr & Cb sample per 2x2 Y samples)
  I420,
  /// Planar YUV 4:2:0, 12bpp, with alpha plane
  I420A,
  /// Planar YUV 4:2:2, 16bpp
  I422,
  /// Planar YUV 4:4:4, 24bpp
  I444,
  /// Semi-planar YUV 4:2:0, 12bpp (Y plane + interleaved UV)
  NV12,
  /// Semi-planar YUV 4:2:0, 12bpp (Y plane + interleaved VU)
  NV21,
  /// RGBA 32bpp
  RGBA,
  /// RGBX 32bpp (alpha ignored)
  RGBX,
  /// BGRA 32bpp
  BGRA,
  /// BGRX 32bpp (alpha ignored)
  BGRX,
}

impl VideoPixelFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      VideoPixelFormat::I420 => "I420",
      VideoPixelFormat::I420A => "I420A",
      VideoPixelFormat::I422 => "I422",
      VideoPixelFormat::I444 => "I444",
      VideoPixelFormat::NV12 => "NV12",
      VideoPixelFormat::NV21 => "NV21",
      VideoPixelFormat::RGBA => "RGBA",
      VideoPixelFormat::RGBX => "RGBX",
      VideoPixelFormat::BGRA => "BGRA",
      VideoPixelFormat::BGRX => "BGRX",
    }
  }

  /// `(stride, rows)` of every plane for a tightly packed frame
  ///
  /// Chroma planes round up, so odd sizes keep a sample for the last column
  /// and row.
  pub fn plane_sizes(&self, width: u32, height: u32) -> Vec<(u32, u32)> {
    let (w, h) = (width, height);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    match self {
      VideoPixelFormat::I420 => vec![(w, h), (cw, ch), (cw, ch)],
      VideoPixelFormat::I420A => vec![(w, h), (cw, ch), (cw, ch), (w, h)],
      VideoPixelFormat::I422 => vec![(w, h), (cw, h), (cw, h)],
      VideoPixelFormat::I444 => vec![(w, h), (w, h), (w, h)],
      VideoPixelFormat::NV12 | VideoPixelFormat::NV21 => vec![(w, h), (cw * 2, ch)],
      VideoPixelFormat::RGBA
      | VideoPixelFormat::RGBX
      | VideoPixelFormat::BGRA
      | VideoPixelFormat::BGRX => vec![(w * 4, h)],
    }
  }

  /// Horizontal and vertical chroma subsampling factors
  pub fn chroma_subsampling(&self) -> (usize, usize) {
    match self {
      VideoPixelFormat::I420
      | VideoPixelFormat::I420A
      | VideoPixelFormat::NV12
      | VideoPixelFormat::NV21 => (2, 2),
      VideoPixelFormat::I422 => (2, 1),
      _ => (1, 1),
    }
  }

  /// Subsampled formats need rects with an even origin
  pub fn is_subsampled(&self) -> bool {
    self.chroma_subsampling() != (1, 1)
  }

  /// Byte size of a tightly packed frame
  pub fn allocation_size(&self, width: u32, height: u32) -> usize {
    self
      .plane_sizes(width, height)
      .iter()
      .map(|(stride, rows)| *stride as usize * *rows as usize)
      .sum()
  }
}

impl std::fmt::Display for VideoPixelFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for VideoPixelFormat {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "I420" => Ok(VideoPixelFormat::I420),
      "I420A" => Ok(VideoPixelFormat::I420A),
      "I422" => Ok(VideoPixelFormat::I422),
      "I444" => Ok(VideoPixelFormat::I444),
      "NV12" => Ok(VideoPixelFormat::NV12),
      "NV21" => Ok(VideoPixelFormat::NV21),
      "RGBA" => Ok(VideoPixelFormat::RGBA),
      "RGBX" => Ok(VideoPixelFormat::RGBX),
      "BGRA" => Ok(VideoPixelFormat::BGRA),
      "BGRX" => Ok(VideoPixelFormat::BGRX),
      other => Err(type_error(&format!("Invalid VideoPixelFormat: {}", other))),
    }
  }
}

// ============================================================================
// Color space
// ============================================================================

macro_rules! string_enum {
  ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum $name {
      $($variant),+
    }

    impl $name {
      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $s),+
        }
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl std::str::FromStr for $name {
      type Err = $crate::webcodecs::error::Error;

      fn from_str(s: &str) -> $crate::webcodecs::error::Result<Self> {
        match s {
          $($s => Ok($name::$variant),)+
          other => Err($crate::webcodecs::error::type_error(&format!(
            concat!("Invalid ", stringify!($name), ": {}"),
            other
          ))),
        }
      }
    }
  };
}

pub(crate) use string_enum;

string_enum!(
  /// Color primaries
  VideoColorPrimaries {
    Bt709 => "bt709",
    Bt470bg => "bt470bg",
    Smpte170m => "smpte170m",
    Bt2020 => "bt2020",
    Smpte432 => "smpte432",
  }
);

string_enum!(
  /// Transfer characteristics
  VideoTransferCharacteristics {
    Bt709 => "bt709",
    Smpte170m => "smpte170m",
    Iec6196621 => "iec61966-2-1",
    Linear => "linear",
    Pq => "pq",
    Hlg => "hlg",
  }
);

string_enum!(
  /// Matrix coefficients
  VideoMatrixCoefficients {
    Rgb => "rgb",
    Bt709 => "bt709",
    Bt470bg => "bt470bg",
    Smpte170m => "smpte170m",
    Bt2020Ncl => "bt2020-ncl",
  }
);

/// VideoColorSpaceInit for constructing VideoColorSpace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoColorSpaceInit {
  pub primaries: Option<VideoColorPrimaries>,
  pub transfer: Option<VideoTransferCharacteristics>,
  pub matrix: Option<VideoMatrixCoefficients>,
  pub full_range: Option<bool>,
}

/// Video color space parameters; every field is independently nullable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoColorSpace {
  primaries: Option<VideoColorPrimaries>,
  transfer: Option<VideoTransferCharacteristics>,
  matrix: Option<VideoMatrixCoefficients>,
  full_range: Option<bool>,
}

impl VideoColorSpace {
  pub fn new(init: Option<VideoColorSpaceInit>) -> Self {
    match init {
      Some(init) => VideoColorSpace {
        primaries: init.primaries,
        transfer: init.transfer,
        matrix: init.matrix,
        full_range: init.full_range,
      },
      None => VideoColorSpace::default(),
    }
  }

  pub fn primaries(&self) -> Option<VideoColorPrimaries> {
    self.primaries
  }

  pub fn transfer(&self) -> Option<VideoTransferCharacteristics> {
    self.transfer
  }

  pub fn matrix(&self) -> Option<VideoMatrixCoefficients> {
    self.matrix
  }

  pub fn full_range(&self) -> Option<bool> {
    self.full_range
  }

  pub fn to_json(&self) -> VideoColorSpaceInit {
    VideoColorSpaceInit {
      primaries: self.primaries,
      transfer: self.transfer,
      matrix: self.matrix,
      full_range: self.full_range,
    }
  }
}

// ============================================================================
// Rects and layouts
// ============================================================================

/// DOMRectInit for specifying regions
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DOMRectInit {
  pub x: Option<f64>,
  pub y: Option<f64>,
  pub width: Option<f64>,
  pub height: Option<f64>,
}

/// Read-only rectangle used for codedRect and visibleRect
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DOMRectReadOnly {
  x: f64,
  y: f64,
  width: f64,
  height: f64,
}

impl DOMRectReadOnly {
  pub fn new(x: Option<f64>, y: Option<f64>, width: Option<f64>, height: Option<f64>) -> Self {
    DOMRectReadOnly {
      x: x.unwrap_or(0.0),
      y: y.unwrap_or(0.0),
      width: width.unwrap_or(0.0),
      height: height.unwrap_or(0.0),
    }
  }

  pub fn x(&self) -> f64 {
    self.x
  }

  pub fn y(&self) -> f64 {
    self.y
  }

  pub fn width(&self) -> f64 {
    self.width
  }

  pub fn height(&self) -> f64 {
    self.height
  }

  pub fn top(&self) -> f64 {
    self.y.min(self.y + self.height)
  }

  pub fn right(&self) -> f64 {
    self.x.max(self.x + self.width)
  }

  pub fn bottom(&self) -> f64 {
    self.y.max(self.y + self.height)
  }

  pub fn left(&self) -> f64 {
    self.x.min(self.x + self.width)
  }

  pub fn to_json(&self) -> DOMRectInit {
    DOMRectInit {
      x: Some(self.x),
      y: Some(self.y),
      width: Some(self.width),
      height: Some(self.height),
    }
  }
}

impl From<VideoFrameRect> for DOMRectReadOnly {
  fn from(rect: VideoFrameRect) -> Self {
    DOMRectReadOnly {
      x: rect.x as f64,
      y: rect.y as f64,
      width: rect.width as f64,
      height: rect.height as f64,
    }
  }
}

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl VideoFrameRect {
  fn full(width: u32, height: u32) -> Self {
    Self {
      x: 0,
      y: 0,
      width,
      height,
    }
  }

  /// Resolve a DOMRectInit against the coded size
  fn resolve(
    init: &DOMRectInit,
    coded_width: u32,
    coded_height: u32,
    format: VideoPixelFormat,
  ) -> Result<Self> {
    let field = |value: Option<f64>, name: &str| -> Result<u32> {
      let v = value.ok_or_else(|| type_error(&format!("rect.{} is required", name)))?;
      if !v.is_finite() || v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
        return Err(type_error(&format!("rect.{} must be a non-negative integer", name)));
      }
      Ok(v as u32)
    };
    let rect = Self {
      x: field(init.x, "x")?,
      y: field(init.y, "y")?,
      width: field(init.width, "width")?,
      height: field(init.height, "height")?,
    };
    if rect.width == 0 || rect.height == 0 {
      return Err(type_error("rect must not be empty"));
    }
    if rect.x as u64 + rect.width as u64 > coded_width as u64
      || rect.y as u64 + rect.height as u64 > coded_height as u64
    {
      return Err(type_error(&format!(
        "rect {:?} exceeds the coded size {}x{}",
        rect, coded_width, coded_height
      )));
    }
    if format.is_subsampled() && (rect.x % 2 != 0 || rect.y % 2 != 0) {
      return Err(type_error(&format!(
        "rect origin must be even-aligned for {}",
        format
      )));
    }
    Ok(rect)
  }
}

/// Layout information for a single plane in a `copy_to` destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
  /// Byte offset from the start of the buffer to the start of the plane
  pub offset: u32,
  /// Number of bytes per row (stride)
  pub stride: u32,
}

// ============================================================================
// Init dictionaries
// ============================================================================

/// Options for creating a VideoFrame from buffer data
#[derive(Debug, Clone, Default)]
pub struct VideoFrameBufferInit {
  pub format: Option<VideoPixelFormat>,
  pub coded_width: Option<u32>,
  pub coded_height: Option<u32>,
  /// Timestamp in microseconds
  pub timestamp: Option<i64>,
  /// Duration in microseconds
  pub duration: Option<i64>,
  /// Display width (defaults to the visible width)
  pub display_width: Option<u32>,
  /// Display height (defaults to the visible height)
  pub display_height: Option<u32>,
  pub visible_rect: Option<DOMRectInit>,
  pub color_space: Option<VideoColorSpaceInit>,
}

/// Overrides applied when creating a VideoFrame from another VideoFrame
#[derive(Debug, Clone, Default)]
pub struct VideoFrameInit {
  pub timestamp: Option<i64>,
  pub duration: Option<i64>,
  pub display_width: Option<u32>,
  pub display_height: Option<u32>,
}

/// Options for copyTo / allocationSize
#[derive(Debug, Clone, Default)]
pub struct VideoFrameCopyToOptions {
  /// Target pixel format (for format conversion)
  pub format: Option<VideoPixelFormat>,
  /// Region to copy, defaults to the visible rect
  pub rect: Option<DOMRectInit>,
}

// ============================================================================
// VideoFrame
// ============================================================================

/// Internal state for VideoFrame
struct VideoFrameInner {
  frame: Frame,
  format: VideoPixelFormat,
  timestamp_us: i64,
  duration_us: Option<i64>,
  visible_rect: VideoFrameRect,
  display_width: u32,
  display_height: u32,
  color_space: VideoColorSpace,
}

/// VideoFrame - represents a frame of video
///
/// `close()` releases the pixels; afterwards accessors read zero/default and
/// `copy_to`, `allocation_size` and `try_clone` fail with InvalidStateError.
pub struct VideoFrame {
  inner: Mutex<Option<VideoFrameInner>>,
}

impl VideoFrame {
  /// Create a new VideoFrame from tightly packed planes
  pub fn new(data: &[u8], init: VideoFrameBufferInit) -> Result<Self> {
    let format = init
      .format
      .ok_or_else(|| type_error("format is required"))?;
    let width = init
      .coded_width
      .ok_or_else(|| type_error("codedWidth is required"))?;
    let height = init
      .coded_height
      .ok_or_else(|| type_error("codedHeight is required"))?;
    let timestamp = init
      .timestamp
      .ok_or_else(|| type_error("timestamp is required"))?;

    if width == 0 || height == 0 {
      return Err(type_error("codedWidth and codedHeight must be greater than 0"));
    }
    if init.display_width.is_some() != init.display_height.is_some() {
      return Err(type_error(
        "displayWidth and displayHeight must be specified together",
      ));
    }
    if init.display_width == Some(0) || init.display_height == Some(0) {
      return Err(type_error("display size must be greater than 0"));
    }

    let expected = format.allocation_size(width, height);
    if data.len() < expected {
      return Err(type_error(&format!(
        "Input data too small: need {} bytes, got {}",
        expected,
        data.len()
      )));
    }

    let visible_rect = match &init.visible_rect {
      Some(rect) => VideoFrameRect::resolve(rect, width, height, format)?,
      None => VideoFrameRect::full(width, height),
    };

    let mut frame = Frame::from_video_data(width, height, format, data)
      .map_err(|e| type_error(&e.to_string()))?;
    frame.set_pts(timestamp);
    if let Some(duration) = init.duration {
      frame.set_duration(duration);
    }

    Ok(Self::wrap(VideoFrameInner {
      frame,
      format,
      timestamp_us: timestamp,
      duration_us: init.duration,
      visible_rect,
      display_width: init.display_width.unwrap_or(visible_rect.width),
      display_height: init.display_height.unwrap_or(visible_rect.height),
      color_space: VideoColorSpace::new(init.color_space),
    }))
  }

  /// Create a new VideoFrame from another one, applying `init` overrides
  pub fn from_frame(source: &VideoFrame, init: VideoFrameInit) -> Result<Self> {
    source.with_inner(|inner| {
      if init.display_width.is_some() != init.display_height.is_some() {
        return Err(type_error(
          "displayWidth and displayHeight must be specified together",
        ));
      }
      Ok(Self::wrap(VideoFrameInner {
        frame: inner.frame.clone(),
        format: inner.format,
        timestamp_us: init.timestamp.unwrap_or(inner.timestamp_us),
        duration_us: init.duration.or(inner.duration_us),
        visible_rect: inner.visible_rect,
        display_width: init.display_width.unwrap_or(inner.display_width),
        display_height: init.display_height.unwrap_or(inner.display_height),
        color_space: inner.color_space.clone(),
      }))
    })
  }

  /// Wrap decoder output
  pub(crate) fn from_internal(
    frame: Frame,
    display_size: Option<(u32, u32)>,
    color_space: VideoColorSpace,
  ) -> Result<Self> {
    let format = frame
      .pixel_format()
      .ok_or_else(|| invalid_state_error("Decoder produced a non-video frame"))?;
    let (width, height) = (frame.width(), frame.height());
    let (display_width, display_height) = display_size.unwrap_or((width, height));
    Ok(Self::wrap(VideoFrameInner {
      timestamp_us: frame.pts(),
      duration_us: frame.duration(),
      frame,
      format,
      visible_rect: VideoFrameRect::full(width, height),
      display_width,
      display_height,
      color_space,
    }))
  }

  fn wrap(inner: VideoFrameInner) -> Self {
    Self {
      inner: Mutex::new(Some(inner)),
    }
  }

  fn read<R>(&self, f: impl FnOnce(&VideoFrameInner) -> R) -> Option<R> {
    let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    inner.as_ref().map(f)
  }

  fn with_inner<R>(&self, f: impl FnOnce(&VideoFrameInner) -> Result<R>) -> Result<R> {
    let guard = self.inner.lock()?;
    match guard.as_ref() {
      Some(inner) => f(inner),
      None => Err(invalid_state_error("VideoFrame is closed")),
    }
  }

  // ========================================================================
  // Properties (WebCodecs spec)
  // ========================================================================

  pub fn format(&self) -> Option<VideoPixelFormat> {
    self.read(|i| i.format)
  }

  pub fn coded_width(&self) -> u32 {
    self.read(|i| i.frame.width()).unwrap_or(0)
  }

  pub fn coded_height(&self) -> u32 {
    self.read(|i| i.frame.height()).unwrap_or(0)
  }

  pub fn display_width(&self) -> u32 {
    self.read(|i| i.display_width).unwrap_or(0)
  }

  pub fn display_height(&self) -> u32 {
    self.read(|i| i.display_height).unwrap_or(0)
  }

  pub fn coded_rect(&self) -> Option<DOMRectReadOnly> {
    self.read(|i| VideoFrameRect::full(i.frame.width(), i.frame.height()).into())
  }

  pub fn visible_rect(&self) -> Option<DOMRectReadOnly> {
    self.read(|i| i.visible_rect.into())
  }

  /// Timestamp in microseconds
  pub fn timestamp(&self) -> i64 {
    self.read(|i| i.timestamp_us).unwrap_or(0)
  }

  /// Duration in microseconds
  pub fn duration(&self) -> Option<i64> {
    self.read(|i| i.duration_us).flatten()
  }

  pub fn color_space(&self) -> VideoColorSpace {
    self.read(|i| i.color_space.clone()).unwrap_or_default()
  }

  pub fn is_closed(&self) -> bool {
    self.read(|_| ()).is_none()
  }

  // ========================================================================
  // Methods (WebCodecs spec)
  // ========================================================================

  fn copy_region(
    inner: &VideoFrameInner,
    options: &VideoFrameCopyToOptions,
  ) -> Result<(VideoPixelFormat, VideoFrameRect)> {
    let format = options.format.unwrap_or(inner.format);
    let rect = match &options.rect {
      Some(rect) => {
        VideoFrameRect::resolve(rect, inner.frame.width(), inner.frame.height(), inner.format)?
      }
      None => inner.visible_rect,
    };
    Ok((format, rect))
  }

  /// Bytes `copy_to` writes for these options
  pub fn allocation_size(&self, options: &VideoFrameCopyToOptions) -> Result<usize> {
    self.with_inner(|inner| {
      let (format, rect) = Self::copy_region(inner, options)?;
      Ok(format.allocation_size(rect.width, rect.height))
    })
  }

  /// Copy planes back to back into `destination`, returning their layout
  pub fn copy_to(
    &self,
    destination: &mut [u8],
    options: &VideoFrameCopyToOptions,
  ) -> Result<Vec<PlaneLayout>> {
    self.with_inner(|inner| {
      let (format, rect) = Self::copy_region(inner, options)?;
      let size = format.allocation_size(rect.width, rect.height);
      if destination.len() < size {
        return Err(type_error(&format!(
          "Buffer too small: need {} bytes, got {}",
          size,
          destination.len()
        )));
      }

      let cropped;
      let source = if rect == VideoFrameRect::full(inner.frame.width(), inner.frame.height()) {
        &inner.frame
      } else {
        cropped = crop(&inner.frame, inner.format, rect)?;
        &cropped
      };

      let converted;
      let output = if format == inner.format {
        source
      } else {
        converted =
          Scaler::new_converter(rect.width, rect.height, inner.format, format)?.scale_alloc(source)?;
        &converted
      };

      output.copy_to_buffer(destination)?;
      Ok(plane_layouts(format, rect.width, rect.height))
    })
  }

  /// Deep copy (WebCodecs `clone()`)
  pub fn try_clone(&self) -> Result<VideoFrame> {
    self.with_inner(|inner| {
      Ok(Self::wrap(VideoFrameInner {
        frame: inner.frame.clone(),
        format: inner.format,
        timestamp_us: inner.timestamp_us,
        duration_us: inner.duration_us,
        visible_rect: inner.visible_rect,
        display_width: inner.display_width,
        display_height: inner.display_height,
        color_space: inner.color_space.clone(),
      }))
    })
  }

  /// Release the pixels; idempotent
  pub fn close(&self) {
    let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = None;
  }

  // ========================================================================
  // Internal helpers (crate-visible only)
  // ========================================================================

  /// Copy of the visible pixels for the encoder queue, plus the color space
  pub(crate) fn frame_snapshot(&self) -> Result<(Frame, VideoColorSpace)> {
    let guard = self.inner.lock()?;
    let inner = guard
      .as_ref()
      .ok_or_else(|| type_error("VideoFrame is closed"))?;
    let full = VideoFrameRect::full(inner.frame.width(), inner.frame.height());
    let mut frame = if inner.visible_rect == full {
      inner.frame.clone()
    } else {
      crop(&inner.frame, inner.format, inner.visible_rect)?
    };
    frame.set_pts(inner.timestamp_us);
    if let Some(duration) = inner.duration_us {
      frame.set_duration(duration);
    }
    Ok((frame, inner.color_space.clone()))
  }
}

/// Cut `rect` out of every plane; the rect must be aligned to the subsampling
fn crop(frame: &Frame, format: VideoPixelFormat, rect: VideoFrameRect) -> Result<Frame> {
  let full = format.plane_sizes(frame.width(), frame.height());
  let part = format.plane_sizes(rect.width, rect.height);
  let mut out = Frame::new_video(rect.width, rect.height, format)?;

  for (p, ((full_stride, full_rows), (row_bytes, rows))) in full.iter().zip(&part).enumerate() {
    let x_bytes = (rect.x as u64 * *full_stride as u64 / frame.width() as u64) as usize;
    let y_rows = (rect.y as u64 * *full_rows as u64 / frame.height() as u64) as usize;
    let src = frame
      .plane(p)
      .ok_or_else(|| invalid_state_error("Missing source plane"))?;
    let dst = out
      .plane_mut(p)
      .ok_or_else(|| invalid_state_error("Missing destination plane"))?;
    let (src_stride, row_bytes) = (*full_stride as usize, *row_bytes as usize);
    for row in 0..*rows as usize {
      let start = (y_rows + row) * src_stride + x_bytes;
      dst[row * row_bytes..(row + 1) * row_bytes].copy_from_slice(&src[start..start + row_bytes]);
    }
  }

  out.set_pts(frame.pts());
  if let Some(duration) = frame.duration() {
    out.set_duration(duration);
  }
  Ok(out)
}

fn plane_layouts(format: VideoPixelFormat, width: u32, height: u32) -> Vec<PlaneLayout> {
  let mut offset = 0;
  format
    .plane_sizes(width, height)
    .into_iter()
    .map(|(stride, rows)| {
      let layout = PlaneLayout { offset, stride };
      offset += stride * rows;
      layout
    })
    .collect()
}

impl std::fmt::Debug for VideoFrame {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self
      .read(|i| {
        f.debug_struct("VideoFrame")
          .field("format", &i.format)
          .field("coded_width", &i.frame.width())
          .field("coded_height", &i.frame.height())
          .field("timestamp", &i.timestamp_us)
          .finish()
      })
      .unwrap_or_else(|| f.debug_struct("VideoFrame").field("closed", &true).finish())
  }
}
