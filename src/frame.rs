// 该文件是 Jiance （见测） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct FrameShapeError {
  pub expected: usize,
  pub actual: usize,
}

/// 解码后的像素网格，形状为 (H, W, 3)，通道顺序为 BGR，按行交错存储
#[derive(Debug, Clone, PartialEq)]
pub struct BgrFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let data = vec![0u8; height * width * BGR_CHANNELS].into_boxed_slice();
    Self {
      height,
      width,
      data,
    }
  }

  pub fn from_raw(height: usize, width: usize, data: Vec<u8>) -> Result<Self, FrameShapeError> {
    let expected = height * width * BGR_CHANNELS;
    if data.len() != expected {
      return Err(FrameShapeError {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      height,
      width,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn shape(&self) -> (usize, usize, usize) {
    (self.height, self.width, BGR_CHANNELS)
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_bgr(&self) -> &[u8] {
    &self.data
  }

  /// 返回 (y, x) 处的 [B, G, R] 像素
  pub fn pixel(&self, y: usize, x: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * BGR_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width;
    let data = &self.data;

    // BGR 交错转 RGB 图像
    ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      let idx = (y as usize * width + x as usize) * BGR_CHANNELS;
      Rgb([data[idx + 2], data[idx + 1], data[idx]])
    })
  }
}

impl AsMut<[u8]> for BgrFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<&RgbImage> for BgrFrame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut frame = BgrFrame::with_shape(height as usize, width as usize);
    let slice = frame.as_mut();

    for (dst, pixel) in slice.chunks_exact_mut(BGR_CHANNELS).zip(image.pixels()) {
      dst[0] = pixel[2];
      dst[1] = pixel[1];
      dst[2] = pixel[0];
    }
    frame
  }
}
