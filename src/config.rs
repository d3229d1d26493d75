// 该文件是 Jiance （见测） 项目的一部分。
// src/config.rs - 检测参数配置
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

pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.45;
pub const DEFAULT_MAX_DETECTIONS: usize = 1000;

pub const MAX_DETECTIONS_MIN: usize = 10;
pub const MAX_DETECTIONS_MAX: usize = 2000;
pub const MAX_DETECTIONS_STEP: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须位于 [0, 1] 区间, 实际为 {0}")]
  Confidence(f32),
  #[error("IoU 阈值必须位于 [0, 1] 区间, 实际为 {0}")]
  Iou(f32),
  #[error("最大检测数必须位于 [10, 2000] 区间且为 10 的倍数, 实际为 {0}")]
  MaxDetections(usize),
  #[error("无法识别的配置项: {0}")]
  UnknownSetting(String),
}

/// 单次推理使用的检测参数
///
/// 配置是不可变的值，每次推理时随帧一起传给模型，模型本身不保存任何阈值。
/// 修改参数只能通过 `with_*` 方法得到一份新的、重新校验过的配置。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionConfig {
  confidence: f32,
  iou: f32,
  agnostic: bool,
  multi_label: bool,
  max_detections: usize,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
      agnostic: false,
      multi_label: false,
      max_detections: DEFAULT_MAX_DETECTIONS,
    }
  }
}

fn check_unit(value: f32) -> bool {
  value.is_finite() && (0.0..=1.0).contains(&value)
}

impl DetectionConfig {
  pub fn new(
    confidence: f32,
    iou: f32,
    agnostic: bool,
    multi_label: bool,
    max_detections: usize,
  ) -> Result<Self, ConfigError> {
    Self::default()
      .with_confidence(confidence)?
      .with_iou(iou)?
      .with_max_detections(max_detections)
      .map(|config| config.with_agnostic(agnostic).with_multi_label(multi_label))
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn iou(&self) -> f32 {
    self.iou
  }

  pub fn agnostic(&self) -> bool {
    self.agnostic
  }

  pub fn multi_label(&self) -> bool {
    self.multi_label
  }

  pub fn max_detections(&self) -> usize {
    self.max_detections
  }

  pub fn with_confidence(mut self, confidence: f32) -> Result<Self, ConfigError> {
    if !check_unit(confidence) {
      return Err(ConfigError::Confidence(confidence));
    }
    self.confidence = confidence;
    Ok(self)
  }

  pub fn with_iou(mut self, iou: f32) -> Result<Self, ConfigError> {
    if !check_unit(iou) {
      return Err(ConfigError::Iou(iou));
    }
    self.iou = iou;
    Ok(self)
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Result<Self, ConfigError> {
    if !(MAX_DETECTIONS_MIN..=MAX_DETECTIONS_MAX).contains(&max_detections)
      || (max_detections - MAX_DETECTIONS_MIN) % MAX_DETECTIONS_STEP != 0
    {
      return Err(ConfigError::MaxDetections(max_detections));
    }
    self.max_detections = max_detections;
    Ok(self)
  }

  pub fn with_agnostic(mut self, agnostic: bool) -> Self {
    self.agnostic = agnostic;
    self
  }

  pub fn with_multi_label(mut self, multi_label: bool) -> Self {
    self.multi_label = multi_label;
    self
  }

  /// 应用一条交互式配置指令，例如 `conf=0.4`、`iou=0.5`、`max-det=300`、
  /// `agnostic`、`no-agnostic`、`multi-label`、`no-multi-label`。
  pub fn apply_setting(self, setting: &str) -> Result<Self, ConfigError> {
    let setting = setting.trim();
    let unknown = || ConfigError::UnknownSetting(setting.to_string());

    match setting.split_once('=') {
      Some((key, value)) => {
        let value = value.trim();
        match key.trim() {
          "conf" | "confidence" => self.with_confidence(value.parse().map_err(|_| unknown())?),
          "iou" => self.with_iou(value.parse().map_err(|_| unknown())?),
          "max-det" | "max_det" => self.with_max_detections(value.parse().map_err(|_| unknown())?),
          _ => Err(unknown()),
        }
      }
      None => match setting {
        "agnostic" => Ok(self.with_agnostic(true)),
        "no-agnostic" => Ok(self.with_agnostic(false)),
        "multi-label" => Ok(self.with_multi_label(true)),
        "no-multi-label" => Ok(self.with_multi_label(false)),
        _ => Err(unknown()),
      },
    }
  }
}

impl std::fmt::Display for DetectionConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "置信度: {:.2} | IoU: {:.2} | 类别无关 NMS: {} | 多标签: {} | 最大检测数: {}",
      self.confidence, self.iou, self.agnostic, self.multi_label, self.max_detections
    )
  }
}
