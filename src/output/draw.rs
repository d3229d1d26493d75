// 该文件是 Jiance （见测） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{parse::Detection, pipeline::FrameReport};

const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 80;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("字体文件无效 {path}: {detail}")]
  InvalidFont { path: String, detail: String },
}

/// 在图像上绘制检测框；提供字体时在框上方标注类别和置信度
pub struct Draw {
  thickness: i32,
  colors: Vec<Rgb<u8>>,
  font: Option<FontVec>,
  font_scale: PxScale,
}

impl Default for Draw {
  fn default() -> Self {
    // 按色相均匀取色，每个类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      thickness: BOX_THICKNESS,
      colors,
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h as u32 {
    0..60 => (c, x, 0.0),
    60..120 => (x, c, 0.0),
    120..180 => (0.0, c, x),
    180..240 => (0.0, x, c),
    240..300 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  pub fn from_font_file(path: &Path) -> Result<Self, DrawError> {
    let bytes = std::fs::read(path).map_err(|source| DrawError::IoError {
      path: path.display().to_string(),
      source,
    })?;
    let font = FontVec::try_from_vec(bytes).map_err(|e| DrawError::InvalidFont {
      path: path.display().to_string(),
      detail: e.to_string(),
    })?;
    info!("加载标注字体: {}", path.display());
    Ok(Self::default().with_font(font))
  }

  /// 读取输出 URL 中的 `font=/path/font.ttf`，没有时只画框
  pub fn from_url_query(url: &Url) -> Result<Self, DrawError> {
    match url.query_pairs().find(|(key, _)| key == "font") {
      Some((_, path)) => Self::from_font_file(Path::new(path.as_ref())),
      None => Ok(Self::default()),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color_of(&self, category: u32) -> Rgb<u8> {
    self.colors[category as usize % self.colors.len()]
  }

  // bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox(&self, image: &mut RgbImage, detection: &Detection, label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (detection.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (detection.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (detection.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (detection.bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = self.color_of(detection.category);
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    if let Some(font) = &self.font {
      let text = format!("{} {:.2}", label, detection.score);
      let (text_w, text_h) = text_size(self.font_scale, font, &text);
      let label_h = text_h as i32 + 2 * LABEL_PADDING;
      let label_w = (text_w as i32 + 2 * LABEL_PADDING).min(w - x_min);
      // 框上方放不下时放进框内顶部
      let label_y = if y_min >= label_h { y_min - label_h } else { y_min };

      if label_w > 0 {
        let rect = Rect::at(x_min, label_y).of_size(label_w as u32, label_h as u32);
        draw_filled_rect_mut(image, rect, color);
        draw_text_mut(
          image,
          LABEL_TEXT_COLOR,
          x_min + LABEL_PADDING,
          label_y + LABEL_PADDING,
          self.font_scale,
          font,
          &text,
        );
      }
    }
  }

  pub fn annotate(&self, report: &FrameReport) -> RgbImage {
    let mut image = report.frame.to_rgb_image();
    for detection in report.detections.iter() {
      let label = report.label_of(detection.category);
      self.draw_bbox(&mut image, &detection, &label);
    }
    image
  }
}
