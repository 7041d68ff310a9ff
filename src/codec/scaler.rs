//! Pixel format conversion and scaling
//!
//! Every conversion goes through packed RGBA. YUV formats use BT.601
//! limited-range coefficients in fixed point. Scaling is nearest neighbour.

use crate::webcodecs::VideoPixelFormat;

use super::{CodecError, CodecResult, Frame};

/// Video pixel format converter and scaler
pub struct Scaler {
  src_width: u32,
  src_height: u32,
  src_format: VideoPixelFormat,
  dst_width: u32,
  dst_height: u32,
  dst_format: VideoPixelFormat,
}

impl Scaler {
  /// Create a new scaler for the given conversion
  pub fn new(
    src_width: u32,
    src_height: u32,
    src_format: VideoPixelFormat,
    dst_width: u32,
    dst_height: u32,
    dst_format: VideoPixelFormat,
  ) -> CodecResult<Self> {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
      return Err(CodecError::InvalidConfig(format!(
        "Invalid scaler dimensions: {}x{} -> {}x{}",
        src_width, src_height, dst_width, dst_height
      )));
    }
    Ok(Self {
      src_width,
      src_height,
      src_format,
      dst_width,
      dst_height,
      dst_format,
    })
  }

  /// Create a scaler for format conversion only (no scaling)
  pub fn new_converter(
    width: u32,
    height: u32,
    src_format: VideoPixelFormat,
    dst_format: VideoPixelFormat,
  ) -> CodecResult<Self> {
    Self::new(width, height, src_format, width, height, dst_format)
  }

  /// Scale/convert a frame, allocating a new destination frame
  pub fn scale_alloc(&self, src: &Frame) -> CodecResult<Frame> {
    if src.pixel_format() != Some(self.src_format)
      || src.width() != self.src_width
      || src.height() != self.src_height
    {
      return Err(CodecError::InvalidData(format!(
        "Scaler expects {}x{} {}, got {}x{}",
        self.src_width,
        self.src_height,
        self.src_format,
        src.width(),
        src.height()
      )));
    }

    let mut out = if self.src_format == self.dst_format && self.is_converter_only() {
      src.clone()
    } else {
      let rgba = to_rgba(src)?;
      let rgba = if self.is_converter_only() {
        rgba
      } else {
        resize_nearest(
          &rgba,
          self.src_width,
          self.src_height,
          self.dst_width,
          self.dst_height,
        )
      };
      from_rgba(&rgba, self.dst_width, self.dst_height, self.dst_format)?
    };
    out.set_pts(src.pts());
    if let Some(duration) = src.duration() {
      out.set_duration(duration);
    }
    Ok(out)
  }

  // ========================================================================
  // Accessors
  // ========================================================================

  pub fn src_width(&self) -> u32 {
    self.src_width
  }

  pub fn src_height(&self) -> u32 {
    self.src_height
  }

  pub fn src_format(&self) -> VideoPixelFormat {
    self.src_format
  }

  pub fn dst_width(&self) -> u32 {
    self.dst_width
  }

  pub fn dst_height(&self) -> u32 {
    self.dst_height
  }

  pub fn dst_format(&self) -> VideoPixelFormat {
    self.dst_format
  }

  /// Check if this is a format-only conversion (no scaling)
  pub fn is_converter_only(&self) -> bool {
    self.src_width == self.dst_width && self.src_height == self.dst_height
  }
}

impl std::fmt::Debug for Scaler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Scaler")
      .field("src", &(self.src_width, self.src_height, self.src_format))
      .field("dst", &(self.dst_width, self.dst_height, self.dst_format))
      .finish()
  }
}

// ============================================================================
// Color conversion
// ============================================================================

fn clamp_u8(v: i32) -> u8 {
  v.clamp(0, 255) as u8
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let c = y as i32 - 16;
  let d = u as i32 - 128;
  let e = v as i32 - 128;
  [
    clamp_u8((298 * c + 409 * e + 128) >> 8),
    clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
    clamp_u8((298 * c + 516 * d + 128) >> 8),
  ]
}

fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
  clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

fn rgb_to_uv(r: i32, g: i32, b: i32) -> (u8, u8) {
  (
    clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128),
    clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128),
  )
}

fn plane<'a>(frame: &'a Frame, index: usize) -> CodecResult<&'a [u8]> {
  frame
    .plane(index)
    .ok_or_else(|| CodecError::InvalidData(format!("Missing plane {}", index)))
}

/// Convert any supported frame to packed RGBA
pub fn to_rgba(frame: &Frame) -> CodecResult<Vec<u8>> {
  let format = frame
    .pixel_format()
    .ok_or_else(|| CodecError::InvalidData("Frame is not video".into()))?;
  let w = frame.width() as usize;
  let h = frame.height() as usize;
  let mut out = vec![0u8; w * h * 4];

  match format {
    VideoPixelFormat::RGBA | VideoPixelFormat::RGBX => {
      out.copy_from_slice(&plane(frame, 0)?[..w * h * 4]);
      if format == VideoPixelFormat::RGBX {
        out.chunks_exact_mut(4).for_each(|px| px[3] = 255);
      }
    }
    VideoPixelFormat::BGRA | VideoPixelFormat::BGRX => {
      let src = plane(frame, 0)?;
      for (dst, px) in out.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        dst[0] = px[2];
        dst[1] = px[1];
        dst[2] = px[0];
        dst[3] = if format == VideoPixelFormat::BGRA {
          px[3]
        } else {
          255
        };
      }
    }
    VideoPixelFormat::NV12 | VideoPixelFormat::NV21 => {
      let y_plane = plane(frame, 0)?;
      let uv_plane = plane(frame, 1)?;
      let (u_idx, v_idx) = if format == VideoPixelFormat::NV12 {
        (0, 1)
      } else {
        (1, 0)
      };
      let uv_stride = w.div_ceil(2) * 2;
      for row in 0..h {
        for col in 0..w {
          let uv = (row / 2) * uv_stride + (col / 2) * 2;
          let rgb = yuv_to_rgb(
            y_plane[row * w + col],
            uv_plane[uv + u_idx],
            uv_plane[uv + v_idx],
          );
          let o = (row * w + col) * 4;
          out[o..o + 3].copy_from_slice(&rgb);
          out[o + 3] = 255;
        }
      }
    }
    VideoPixelFormat::I420
    | VideoPixelFormat::I420A
    | VideoPixelFormat::I422
    | VideoPixelFormat::I444 => {
      let (hsub, vsub) = format.chroma_subsampling();
      let cw = w.div_ceil(hsub);
      let y_plane = plane(frame, 0)?;
      let u_plane = plane(frame, 1)?;
      let v_plane = plane(frame, 2)?;
      let a_plane = if format == VideoPixelFormat::I420A {
        Some(plane(frame, 3)?)
      } else {
        None
      };
      for row in 0..h {
        for col in 0..w {
          let c = (row / vsub) * cw + col / hsub;
          let rgb = yuv_to_rgb(y_plane[row * w + col], u_plane[c], v_plane[c]);
          let o = (row * w + col) * 4;
          out[o..o + 3].copy_from_slice(&rgb);
          out[o + 3] = a_plane.map(|a| a[row * w + col]).unwrap_or(255);
        }
      }
    }
  }
  Ok(out)
}

/// Build a frame of `format` from packed RGBA
pub fn from_rgba(rgba: &[u8], width: u32, height: u32, format: VideoPixelFormat) -> CodecResult<Frame> {
  let w = width as usize;
  let h = height as usize;
  if rgba.len() < w * h * 4 {
    return Err(CodecError::InvalidData("RGBA buffer too short".into()));
  }
  let mut frame = Frame::new_video(width, height, format)?;

  match format {
    VideoPixelFormat::RGBA | VideoPixelFormat::RGBX => {
      if let Some(dst) = frame.plane_mut(0) {
        dst.copy_from_slice(&rgba[..w * h * 4]);
      }
    }
    VideoPixelFormat::BGRA | VideoPixelFormat::BGRX => {
      if let Some(dst) = frame.plane_mut(0) {
        for (out, px) in dst.chunks_exact_mut(4).zip(rgba.chunks_exact(4)) {
          out[0] = px[2];
          out[1] = px[1];
          out[2] = px[0];
          out[3] = px[3];
        }
      }
    }
    _ => {
      let (hsub, vsub) = format.chroma_subsampling();
      let cw = w.div_ceil(hsub);
      let ch = h.div_ceil(vsub);
      let mut y_plane = vec![0u8; w * h];
      let mut u_plane = vec![0u8; cw * ch];
      let mut v_plane = vec![0u8; cw * ch];

      for (i, px) in rgba.chunks_exact(4).take(w * h).enumerate() {
        y_plane[i] = rgb_to_y(px[0] as i32, px[1] as i32, px[2] as i32);
      }
      for crow in 0..ch {
        for ccol in 0..cw {
          let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
          // the last row and column of an odd frame cover a single pixel
          for y in (crow * vsub..(crow + 1) * vsub).take_while(|&y| y < h) {
            for x in (ccol * hsub..(ccol + 1) * hsub).take_while(|&x| x < w) {
              let o = (y * w + x) * 4;
              r += rgba[o] as i32;
              g += rgba[o + 1] as i32;
              b += rgba[o + 2] as i32;
              n += 1;
            }
          }
          let (u, v) = rgb_to_uv(r / n, g / n, b / n);
          u_plane[crow * cw + ccol] = u;
          v_plane[crow * cw + ccol] = v;
        }
      }

      match format {
        VideoPixelFormat::NV12 | VideoPixelFormat::NV21 => {
          let mut uv = Vec::with_capacity(cw * ch * 2);
          for (u, v) in u_plane.iter().zip(v_plane.iter()) {
            if format == VideoPixelFormat::NV12 {
              uv.extend_from_slice(&[*u, *v]);
            } else {
              uv.extend_from_slice(&[*v, *u]);
            }
          }
          write_plane(&mut frame, 0, &y_plane);
          write_plane(&mut frame, 1, &uv);
        }
        _ => {
          write_plane(&mut frame, 0, &y_plane);
          write_plane(&mut frame, 1, &u_plane);
          write_plane(&mut frame, 2, &v_plane);
          if format == VideoPixelFormat::I420A {
            let alpha: Vec<u8> = rgba.chunks_exact(4).take(w * h).map(|px| px[3]).collect();
            write_plane(&mut frame, 3, &alpha);
          }
        }
      }
    }
  }
  Ok(frame)
}

fn write_plane(frame: &mut Frame, index: usize, data: &[u8]) {
  if let Some(dst) = frame.plane_mut(index) {
    let len = dst.len().min(data.len());
    dst[..len].copy_from_slice(&data[..len]);
  }
}

fn resize_nearest(rgba: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
  let (sw, sh, dw, dh) = (sw as usize, sh as usize, dw as usize, dh as usize);
  let mut out = vec![0u8; dw * dh * 4];
  for y in 0..dh {
    let sy = y * sh / dh;
    for x in 0..dw {
      let sx = x * sw / dw;
      let s = (sy * sw + sx) * 4;
      let d = (y * dw + x) * 4;
      out[d..d + 4].copy_from_slice(&rgba[s..s + 4]);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn solid_rgba(w: u32, h: u32, px: [u8; 4]) -> Frame {
    let data: Vec<u8> = (0..w * h).flat_map(|_| px).collect();
    Frame::from_video_data(w, h, VideoPixelFormat::RGBA, &data).unwrap()
  }

  #[test]
  fn test_rgba_to_bgra() {
    let scaler =
      Scaler::new_converter(2, 2, VideoPixelFormat::RGBA, VideoPixelFormat::BGRA).unwrap();
    let out = scaler.scale_alloc(&solid_rgba(2, 2, [10, 20, 30, 40])).unwrap();
    assert_eq!(&out.plane(0).unwrap()[..4], &[30, 20, 10, 40]);
  }

  #[test]
  fn test_i420_round_trip_is_close() {
    let src = solid_rgba(4, 4, [200, 100, 50, 255]);
    let to_yuv =
      Scaler::new_converter(4, 4, VideoPixelFormat::RGBA, VideoPixelFormat::I420).unwrap();
    let yuv = to_yuv.scale_alloc(&src).unwrap();
    assert_eq!(yuv.data_size(), 24);

    let back = to_rgba(&yuv).unwrap();
    for (a, b) in back[..3].iter().zip([200u8, 100, 50].iter()) {
      assert!((*a as i32 - *b as i32).abs() <= 3, "{} vs {}", a, b);
    }
  }

  #[test]
  fn test_black_white_luma_range() {
    let black = Scaler::new_converter(2, 2, VideoPixelFormat::RGBA, VideoPixelFormat::NV12)
      .unwrap()
      .scale_alloc(&solid_rgba(2, 2, [0, 0, 0, 255]))
      .unwrap();
    assert_eq!(black.plane(0).unwrap()[0], 16);
    let white = Scaler::new_converter(2, 2, VideoPixelFormat::RGBA, VideoPixelFormat::I444)
      .unwrap()
      .scale_alloc(&solid_rgba(2, 2, [255, 255, 255, 255]))
      .unwrap();
    assert_eq!(white.plane(0).unwrap()[0], 235);
  }

  #[test]
  fn test_upscale_nearest() {
    let scaler = Scaler::new(2, 2, VideoPixelFormat::RGBA, 4, 4, VideoPixelFormat::RGBA).unwrap();
    let out = scaler.scale_alloc(&solid_rgba(2, 2, [1, 2, 3, 4])).unwrap();
    assert_eq!(out.width(), 4);
    assert_eq!(out.plane(0).unwrap().len(), 64);
    assert_eq!(&out.plane(0).unwrap()[60..64], &[1, 2, 3, 4]);
  }

  #[test]
  fn test_odd_dimensions_round_chroma_up() {
    let src = solid_rgba(3, 3, [200, 100, 50, 255]);
    for format in [VideoPixelFormat::I420, VideoPixelFormat::NV12] {
      let yuv = Scaler::new_converter(3, 3, VideoPixelFormat::RGBA, format)
        .unwrap()
        .scale_alloc(&src)
        .unwrap();
      // 3x3 luma plus 2x2 chroma for each of U and V
      assert_eq!(yuv.data_size(), 17, "{}", format);

      let back = to_rgba(&yuv).unwrap();
      assert_eq!(back.len(), 36);
      let corner = &back[32..35];
      for (a, b) in corner.iter().zip([200u8, 100, 50].iter()) {
        assert!((*a as i32 - *b as i32).abs() <= 3, "{}: {} vs {}", format, a, b);
      }
    }
  }
}
