// 该文件是 Jiance （见测） 项目的一部分。
// src/labels.rs - 类别标签表
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

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelTableError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("标签索引无效: {0}")]
  InvalidIndex(String),
}

/// 标签文件可以是 `["person", ...]` 或 `{"0": "person", ...}`
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
  List(Vec<String>),
  Map(BTreeMap<String, String>),
}

/// 类别索引到显示名称的映射，随模型加载而创建，之后不再修改
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable {
  names: BTreeMap<u32, String>,
}

impl LabelTable {
  pub fn coco() -> Self {
    Self::from_names(COCO_CLASSES)
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let names = names
      .into_iter()
      .enumerate()
      .map(|(idx, name)| (idx as u32, name.into()))
      .collect();
    Self { names }
  }

  /// 从文件加载：`.json` 按 JSON 解析，其余按每行一个名称解析
  pub fn load(path: &Path) -> Result<Self, LabelTableError> {
    let content = std::fs::read_to_string(path)?;
    let table = if path.extension().is_some_and(|ext| ext == "json") {
      Self::from_json(&content)?
    } else {
      Self::from_names(
        content
          .lines()
          .map(str::trim)
          .filter(|line| !line.is_empty()),
      )
    };
    debug!("从 {} 加载 {} 个类别标签", path.display(), table.len());
    Ok(table)
  }

  pub fn from_json(content: &str) -> Result<Self, LabelTableError> {
    match serde_json::from_str::<LabelFile>(content)? {
      LabelFile::List(names) => Ok(Self::from_names(names)),
      LabelFile::Map(map) => {
        let names = map
          .into_iter()
          .map(|(key, name)| {
            key
              .trim()
              .parse::<u32>()
              .map(|idx| (idx, name))
              .map_err(|_| LabelTableError::InvalidIndex(key))
          })
          .collect::<Result<_, _>>()?;
        Ok(Self { names })
      }
    }
  }

  pub fn get(&self, category: u32) -> Option<&str> {
    self.names.get(&category).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self.names.iter().map(|(idx, name)| (*idx, name.as_str()))
  }
}

/// 标签表中不存在的类别使用的占位名称
pub fn placeholder_label(category: u32) -> String {
  format!("class_{}", category)
}
