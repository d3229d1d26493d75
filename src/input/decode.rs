// 该文件是 Jiance （见测） 项目的一部分。
// src/input/decode.rs - 编码图像解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::debug;

use crate::frame::BgrFrame;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像数据为空")]
  Empty,
  #[error("无法识别的图像格式")]
  UnknownFormat,
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("图像尺寸为零: {0}x{1}")]
  ZeroSized(u32, u32),
}

/// 将编码图像解码为 (H, W, 3) 的 BGR 像素网格，保持原始分辨率
pub fn decode_bgr(bytes: &[u8]) -> Result<BgrFrame, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }

  let format = image::guess_format(bytes).map_err(|_| DecodeError::UnknownFormat)?;
  debug!("图像格式: {:?}, 大小: {} 字节", format, bytes.len());

  let image = image::load_from_memory_with_format(bytes, format)?.to_rgb8();
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(DecodeError::ZeroSized(width, height));
  }

  let frame = BgrFrame::from(&image);
  debug!("解码完成: {}x{}", width, height);
  Ok(frame)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage};
  use std::io::Cursor;

  fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
  }

  #[test]
  fn png_keeps_resolution_and_swaps_to_bgr() {
    let mut image = RgbImage::new(7, 3);
    image.put_pixel(4, 2, Rgb([255, 0, 0]));
    let frame = decode_bgr(&encode(&image, ImageFormat::Png)).unwrap();

    assert_eq!(frame.shape(), (3, 7, 3));
    assert_eq!(frame.pixel(2, 4), [0, 0, 255]);
    assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
  }

  #[test]
  fn jpeg_keeps_resolution() {
    let image = RgbImage::from_pixel(33, 17, Rgb([90, 120, 200]));
    let frame = decode_bgr(&encode(&image, ImageFormat::Jpeg)).unwrap();
    assert_eq!(frame.shape(), (17, 33, 3));
  }

  #[test]
  fn empty_buffer_is_decode_error() {
    assert!(matches!(decode_bgr(&[]), Err(DecodeError::Empty)));
  }

  #[test]
  fn garbage_is_decode_error() {
    assert!(matches!(
      decode_bgr(b"definitely not an image"),
      Err(DecodeError::UnknownFormat)
    ));
  }

  #[test]
  fn truncated_png_is_decode_error() {
    let image = RgbImage::from_fn(64, 64, |x, y| Rgb([x as u8, y as u8, (x ^ y) as u8]));
    let bytes = encode(&image, ImageFormat::Png);
    let truncated = &bytes[..bytes.len() / 3];
    assert!(decode_bgr(truncated).is_err());
  }
}
