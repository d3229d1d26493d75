// 该文件是 Jiance （见测） 项目的一部分。
// src/model/replay.rs - 回放已记录的检测结果
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  config::DetectionConfig,
  frame::BgrFrame,
  labels::{LabelTable, LabelTableError},
  model::{LoadOutcome, Model, RawDetections},
  url_path,
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("输入帧为空")]
  EmptyFrame,
}

/// 回放文件：标签表加上一份结构化检测结果
#[derive(Deserialize)]
struct ReplayFile {
  names: serde_json::Value,
  #[serde(flatten)]
  detections: RawDetections,
}

/// 不做真实推理，按检测参数过滤并返回预先记录的结果
pub struct ReplayModel {
  labels: LabelTable,
  recorded: RawDetections,
}

impl ReplayModel {
  pub const SCHEME: &'static str = "replay";

  pub fn new(labels: LabelTable, recorded: RawDetections) -> Self {
    Self { labels, recorded }
  }

  pub fn negotiate(url: &Url) -> LoadOutcome<Self> {
    let path = url_path(url);
    let content = match std::fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return LoadOutcome::WeightsMissing { path };
      }
      Err(e) => return LoadOutcome::incompatible(format!("无法读取回放文件 {}: {}", path, e)),
    };

    match Self::from_json(&content) {
      Ok(model) => LoadOutcome::Loaded(model),
      Err(e) => LoadOutcome::incompatible(format!("回放文件 {} 格式错误: {}", path, e)),
    }
  }

  pub fn from_json(content: &str) -> Result<Self, LabelTableError> {
    let file: ReplayFile = serde_json::from_str(content)?;
    let labels = LabelTable::from_json(&file.names.to_string())?;
    debug!(
      "回放结果: {} 个框, {} 个类别标签",
      file.detections.boxes.len(),
      labels.len()
    );
    Ok(Self::new(labels, file.detections))
  }
}

impl Model for ReplayModel {
  type Error = ReplayError;

  fn labels(&self) -> &LabelTable {
    &self.labels
  }

  fn infer(
    &self,
    frame: &BgrFrame,
    config: &DetectionConfig,
  ) -> Result<RawDetections, Self::Error> {
    if frame.is_empty() {
      return Err(ReplayError::EmptyFrame);
    }

    // 列长度不一致时原样交给解析阶段处理
    if !self.recorded.is_aligned() {
      warn!("回放结果列长度不一致, 跳过过滤");
      return Ok(self.recorded.clone());
    }

    let mut keep: Vec<usize> = (0..self.recorded.scores.len())
      .filter(|&idx| self.recorded.scores[idx] >= config.confidence())
      .collect();
    keep.sort_by(|&a, &b| self.recorded.scores[b].total_cmp(&self.recorded.scores[a]));
    keep.truncate(config.max_detections());
    // 保持记录中的原始顺序
    keep.sort_unstable();

    let result = RawDetections {
      boxes: keep.iter().map(|&idx| self.recorded.boxes[idx]).collect(),
      scores: keep.iter().map(|&idx| self.recorded.scores[idx]).collect(),
      categories: keep
        .iter()
        .map(|&idx| self.recorded.categories[idx].clone())
        .collect(),
    };
    debug!("回放 {} / {} 个检测结果", keep.len(), self.recorded.scores.len());
    Ok(result)
  }
}
