// 该文件是 Jiance （见测） 项目的一部分。
// src/parse.rs - 结构化检测结果解析
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

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{CategoryValue, RawDetections};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedResultError {
  #[error("检测结果列长度不一致: boxes={boxes}, scores={scores}, categories={categories}")]
  LengthMismatch {
    boxes: usize,
    scores: usize,
    categories: usize,
  },
  #[error("第 {index} 个检测的类别值 {value} 不是非负整数")]
  InvalidCategory { index: usize, value: String },
  #[error("第 {index} 个检测的类别包装含有 {len} 个元素, 期望 1 个")]
  WrappedLength { index: usize, len: usize },
  #[error("第 {index} 个检测的置信度 {score} 不在 [0, 1] 区间")]
  InvalidScore { index: usize, score: f32 },
}

/// 单个检测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub score: f32,
  pub category: u32,
}

/// 对齐的三列检测结果，长度相同
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detections {
  boxes: Vec<[f32; 4]>,
  scores: Vec<f32>,
  categories: Vec<u32>,
}

impl Detections {
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn boxes(&self) -> &[[f32; 4]] {
    &self.boxes
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn categories(&self) -> &[u32] {
    &self.categories
  }

  pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
    self
      .boxes
      .iter()
      .zip(&self.scores)
      .zip(&self.categories)
      .map(|((bbox, score), category)| Detection {
        bbox: *bbox,
        score: *score,
        category: *category,
      })
  }
}

impl FromIterator<Detection> for Detections {
  fn from_iter<T: IntoIterator<Item = Detection>>(iter: T) -> Self {
    let mut detections = Detections::default();
    for Detection {
      bbox,
      score,
      category,
    } in iter
    {
      detections.boxes.push(bbox);
      detections.scores.push(score);
      detections.categories.push(category);
    }
    detections
  }
}

/// 将类别值转换为非负整数索引
///
/// 整数值的浮点数（如 `2.0`）直接转换；带小数部分的值记录警告并拒绝。
pub fn coerce_category(index: usize, value: &CategoryValue) -> Result<u32, MalformedResultError> {
  let invalid = |value: String| MalformedResultError::InvalidCategory { index, value };

  match value {
    CategoryValue::Integer(v) => u32::try_from(*v).map_err(|_| invalid(v.to_string())),
    CategoryValue::Float(v) => {
      if !v.is_finite() || *v < 0.0 || *v > u32::MAX as f64 {
        return Err(invalid(v.to_string()));
      }
      if v.fract() != 0.0 {
        warn!("第 {} 个检测的类别值 {} 带有小数部分", index, v);
        return Err(invalid(v.to_string()));
      }
      Ok(*v as u32)
    }
    CategoryValue::Wrapped(inner) => match inner.as_slice() {
      [single] => coerce_category(index, single),
      _ => Err(MalformedResultError::WrappedLength {
        index,
        len: inner.len(),
      }),
    },
  }
}

/// 从结构化结果中提取对齐的框、分数与类别
pub fn parse_detections(raw: &RawDetections) -> Result<Detections, MalformedResultError> {
  if !raw.is_aligned() {
    return Err(MalformedResultError::LengthMismatch {
      boxes: raw.boxes.len(),
      scores: raw.scores.len(),
      categories: raw.categories.len(),
    });
  }

  let categories = raw
    .categories
    .iter()
    .enumerate()
    .map(|(index, value)| coerce_category(index, value))
    .collect::<Result<Vec<_>, _>>()?;

  if let Some((index, &score)) = raw
    .scores
    .iter()
    .enumerate()
    .find(|(_, score)| !(0.0..=1.0).contains(*score))
  {
    return Err(MalformedResultError::InvalidScore { index, score });
  }

  debug!("解析得到 {} 个检测结果", categories.len());
  Ok(Detections {
    boxes: raw.boxes.clone(),
    scores: raw.scores.clone(),
    categories,
  })
}
