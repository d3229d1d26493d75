// 该文件是 Jiance （见测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{
    Render,
    draw::{Draw, DrawError},
    json_report::{JsonReportError, write_report},
  },
  pipeline::FrameReport,
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标注字体错误: {0}")]
  FontError(#[from] DrawError),
  #[error("报告写入错误: {0}")]
  JsonReportError(#[from] JsonReportError),
}

/// 每帧保存一张标注图和一份 JSON 报告，文件名以 UTC 时间戳和帧序号区分。
///
/// URL 查询参数 `always` 表示没有检测结果的帧也保存，`font` 指定标注字体。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(url_path(uri)),
      draw: Draw::from_url_query(uri)?,
      always,
    })
  }
}

impl DirectoryRecordOutput {
  // 时间戳中含有小数点，不能用 with_extension
  fn frame_paths(&self, index: usize) -> (PathBuf, PathBuf) {
    let stem = format!("{}-{:04}", Utc::now().format("%Y%m%d-%H%M%S%.3f"), index);
    (
      self.directory.join(format!("{stem}.jpg")),
      self.directory.join(format!("{stem}.json")),
    )
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_report(&self, report: &FrameReport) -> Result<(), Self::Error> {
    if !self.always && report.detections.is_empty() {
      debug!("第 {} 帧没有检测结果，跳过记录", report.index);
      return Ok(());
    }

    std::fs::create_dir_all(&self.directory)?;
    let (image_path, report_path) = self.frame_paths(report.index);

    self.draw.annotate(report).save(&image_path)?;
    write_report(&report_path, report)?;
    info!("记录第 {} 帧到: {}", report.index, image_path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    aggregate::summarize,
    config::DetectionConfig,
    frame::BgrFrame,
    labels::LabelTable,
    parse::{Detection, Detections},
  };
  use std::time::Duration;
  use url::Url;

  fn report(detections: Detections) -> FrameReport {
    let labels = LabelTable::coco();
    let summary = summarize(&detections, &labels);
    FrameReport {
      index: 3,
      source: "test".to_string(),
      frame: BgrFrame::with_shape(16, 16),
      config: DetectionConfig::default(),
      labels,
      detections,
      summary,
      inference_time: Duration::ZERO,
    }
  }

  fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
      .unwrap()
      .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  #[test]
  fn records_image_and_report_pair() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("capture records");
    let url = Url::parse(&format!("folder://{}", dir.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let detections: Detections = [Detection {
      bbox: [1.0, 1.0, 8.0, 8.0],
      score: 0.9,
      category: 0,
    }]
    .into_iter()
    .collect();
    output.render_report(&report(detections)).unwrap();

    let names = files_in(&dir);
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with("-0003.jpg"));
    assert!(names[1].ends_with("-0003.json"));

    let json = std::fs::read_to_string(dir.join(&names[1])).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["summary"]["rows"][0]["label"], "person");
  }

  #[test]
  fn empty_frames_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    DirectoryRecordOutput::from_url(&url)
      .unwrap()
      .render_report(&report(Detections::default()))
      .unwrap();
    assert!(files_in(dir.path()).is_empty());

    let url = Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    DirectoryRecordOutput::from_url(&url)
      .unwrap()
      .render_report(&report(Detections::default()))
      .unwrap();
    assert_eq!(files_in(dir.path()).len(), 2);
  }
}
