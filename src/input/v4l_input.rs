// 该文件是 Jiance （见测） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头单帧采集
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

use crate::{FromUrl, FromUrlWithScheme, input::EncodedImage, url_path};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;
use v4l::{FourCC, buffer::Type, io::traits::CaptureStream, prelude::MmapStream, video::Capture};

// 摄像头刚打开时的前几帧曝光通常不稳定
const V4L_WARMUP_FRAMES: usize = 3;
const V4L_BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

/// 每次迭代打开设备并抓取一张 MJPEG 静态图像
pub struct V4lInput {
  device_path: String,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0
    let device_path = match url_path(url) {
      path if path.is_empty() || path == "/" => "/dev/video0".to_string(),
      path => path,
    };

    // 打开一次设备以尽早暴露权限或路径问题
    let device = v4l::Device::with_path(&device_path)?;
    let format = device.format()?;
    info!(
      "摄像头 {}: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    Ok(V4lInput { device_path })
  }
}

impl V4lInput {
  fn capture_still(&self) -> Result<Vec<u8>, V4lInputError> {
    let device = v4l::Device::with_path(&self.device_path)?;

    let mut format = device.format()?;
    format.fourcc = FourCC::new(b"MJPG");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"MJPG") {
      return Err(V4lInputError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    }

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)?;
    for _ in 0..V4L_WARMUP_FRAMES {
      stream.next()?;
    }

    let (buf, meta) = stream.next()?;
    let used = (meta.bytesused as usize).min(buf.len());
    debug!("采集到 {} 字节 MJPEG 数据", used);
    Ok(buf[..used].to_vec())
  }
}

impl Iterator for V4lInput {
  type Item = Result<EncodedImage, V4lInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let item = self.capture_still().map(|bytes| EncodedImage {
      source: self.device_path.clone(),
      bytes,
    });
    if let Err(e) = &item {
      error!("Failed to capture frame: {}", e);
    }
    Some(item)
  }
}
