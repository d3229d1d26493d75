// 该文件是 Jiance （见测） 项目的一部分。
// src/model.rs - 检测模型适配
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{config::DetectionConfig, frame::BgrFrame, labels::LabelTable};

/// 检测模型
///
/// 检测参数随每次调用传入，模型在加载后保持不变。
pub trait Model {
  type Error;

  fn labels(&self) -> &LabelTable;
  fn infer(&self, frame: &BgrFrame, config: &DetectionConfig)
  -> Result<RawDetections, Self::Error>;
}

/// 模型给出的类别值，可能是整数、浮点数，或只含一个元素的张量包装
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryValue {
  Integer(i64),
  Float(f64),
  Wrapped(Vec<CategoryValue>),
}

impl From<u32> for CategoryValue {
  fn from(value: u32) -> Self {
    CategoryValue::Integer(value as i64)
  }
}

impl From<f32> for CategoryValue {
  fn from(value: f32) -> Self {
    CategoryValue::Float(value as f64)
  }
}

/// 模型的结构化输出，三列各自独立，是否对齐由解析阶段检查
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetections {
  pub boxes: Vec<[f32; 4]>, // [x_min, y_min, x_max, y_max]
  pub scores: Vec<f32>,
  pub categories: Vec<CategoryValue>,
}

impl RawDetections {
  /// 由 `[x1, y1, x2, y2, score, category]` 行构造
  pub fn from_rows<'a, I>(rows: I) -> Self
  where
    I: IntoIterator<Item = &'a [f32; 6]>,
  {
    let mut raw = RawDetections::default();
    for row in rows {
      raw.boxes.push([row[0], row[1], row[2], row[3]]);
      raw.scores.push(row[4]);
      raw.categories.push(CategoryValue::Float(row[5] as f64));
    }
    raw
  }

  pub fn is_aligned(&self) -> bool {
    self.boxes.len() == self.scores.len() && self.scores.len() == self.categories.len()
  }
}

/// 模型加载协商结果，在启动时决定一次
#[derive(Debug)]
pub enum LoadOutcome<M> {
  Loaded(M),
  WeightsMissing { path: String },
  IncompatibleVersion { detail: String },
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("找不到模型权重文件: {path}，请检查权重路径")]
  WeightsMissing { path: String },
  #[error("模型与推理库版本不兼容: {detail}，请检查模型导出格式与库版本")]
  Incompatible { detail: String },
}

impl<M> LoadOutcome<M> {
  pub fn incompatible(detail: impl Into<String>) -> Self {
    LoadOutcome::IncompatibleVersion {
      detail: detail.into(),
    }
  }

  pub fn map<N>(self, f: impl FnOnce(M) -> N) -> LoadOutcome<N> {
    match self {
      LoadOutcome::Loaded(model) => LoadOutcome::Loaded(f(model)),
      LoadOutcome::WeightsMissing { path } => LoadOutcome::WeightsMissing { path },
      LoadOutcome::IncompatibleVersion { detail } => LoadOutcome::IncompatibleVersion { detail },
    }
  }

  pub fn into_result(self) -> Result<M, ModelLoadError> {
    match self {
      LoadOutcome::Loaded(model) => Ok(model),
      LoadOutcome::WeightsMissing { path } => Err(ModelLoadError::WeightsMissing { path }),
      LoadOutcome::IncompatibleVersion { detail } => Err(ModelLoadError::Incompatible { detail }),
    }
  }
}

mod replay;
pub use self::replay::{ReplayError, ReplayModel};

#[cfg(feature = "model_yolov5")]
mod yolov5;
#[cfg(feature = "model_yolov5")]
pub use self::yolov5::{Letterbox, Yolov5, Yolov5Error};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("回放模型错误: {0}")]
  Replay(#[from] ReplayError),
  #[cfg(feature = "model_yolov5")]
  #[error("YOLOv5 推理错误: {0}")]
  Yolov5(#[from] Yolov5Error),
}

pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "model_yolov5")]
  Yolov5(Box<Yolov5>),
}

/// 根据 URL 方案选择并加载模型
pub fn negotiate_model(url: &Url) -> LoadOutcome<ModelWrapper> {
  info!("加载模型: {}", url);
  let outcome = match url.scheme() {
    ReplayModel::SCHEME => ReplayModel::negotiate(url).map(ModelWrapper::Replay),
    #[cfg(feature = "model_yolov5")]
    Yolov5::SCHEME => Yolov5::negotiate(url).map(|model| ModelWrapper::Yolov5(Box::new(model))),
    scheme => LoadOutcome::incompatible(format!("不支持的模型方案 '{}'", scheme)),
  };

  match &outcome {
    LoadOutcome::Loaded(model) => info!("模型加载完成, 类别数: {}", model.labels().len()),
    LoadOutcome::WeightsMissing { path } => error!("模型权重不存在: {}", path),
    LoadOutcome::IncompatibleVersion { detail } => error!("模型不兼容: {}", detail),
  }
  outcome
}

impl Model for ModelWrapper {
  type Error = InferenceError;

  fn labels(&self) -> &LabelTable {
    match self {
      ModelWrapper::Replay(model) => model.labels(),
      #[cfg(feature = "model_yolov5")]
      ModelWrapper::Yolov5(model) => model.labels(),
    }
  }

  fn infer(
    &self,
    frame: &BgrFrame,
    config: &DetectionConfig,
  ) -> Result<RawDetections, Self::Error> {
    match self {
      ModelWrapper::Replay(model) => model.infer(frame, config).map_err(InferenceError::from),
      #[cfg(feature = "model_yolov5")]
      ModelWrapper::Yolov5(model) => model.infer(frame, config).map_err(InferenceError::from),
    }
  }
}
