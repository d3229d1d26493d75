// 该文件是 Jiance （见测） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  aggregate::{Summary, summarize},
  config::DetectionConfig,
  frame::BgrFrame,
  input::{DecodeError, EncodedImage, decode_bgr},
  labels::LabelTable,
  model::Model,
  output::Render,
  parse::{Detections, MalformedResultError, parse_detections},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("图像解码失败, 请重新拍摄: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(#[source] BoxError),
  #[error("模型输出格式不符, 可能是模型库版本不匹配: {0}")]
  MalformedResult(#[from] MalformedResultError),
  #[error("结果输出失败: {0}")]
  Render(#[source] BoxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Idle,
  Decoding,
  Inferring,
  Aggregating,
  Presenting,
}

/// 一帧处理完成后的全部结果，交给输出端展示
#[derive(Debug, Clone)]
pub struct FrameReport {
  pub index: usize,
  pub source: String,
  pub frame: BgrFrame,
  pub config: DetectionConfig,
  pub labels: LabelTable,
  pub detections: Detections,
  pub summary: Summary,
  pub inference_time: Duration,
}

impl FrameReport {
  pub fn label_of(&self, category: u32) -> String {
    self
      .labels
      .get(category)
      .map(str::to_string)
      .unwrap_or_else(|| crate::labels::placeholder_label(category))
  }
}

/// 串行执行 解码 → 推理 → 解析 → 汇总 → 输出，每次只处理一帧
pub struct Pipeline<M> {
  model: M,
  config: DetectionConfig,
  stage: Stage,
  processed: usize,
}

impl<M> Pipeline<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M, config: DetectionConfig) -> Self {
    Self {
      model,
      config,
      stage: Stage::Idle,
      processed: 0,
    }
  }

  pub fn config(&self) -> &DetectionConfig {
    &self.config
  }

  /// 新配置从下一帧开始生效
  pub fn set_config(&mut self, config: DetectionConfig) {
    info!("更新检测参数: {}", config);
    self.config = config;
  }

  pub fn stage(&self) -> Stage {
    self.stage
  }

  pub fn processed(&self) -> usize {
    self.processed
  }

  fn enter(&mut self, stage: Stage) {
    debug!("{:?} -> {:?}", self.stage, stage);
    self.stage = stage;
  }

  /// 只做解码、推理、解析和汇总，不输出
  pub fn analyze(&mut self, capture: &EncodedImage) -> Result<FrameReport, FrameError> {
    let result = self.analyze_inner(capture);
    self.enter(Stage::Idle);
    result
  }

  fn analyze_inner(&mut self, capture: &EncodedImage) -> Result<FrameReport, FrameError> {
    let index = self.processed;
    self.processed += 1;
    // 配置在整帧处理期间保持不变
    let config = self.config;

    self.enter(Stage::Decoding);
    let frame = decode_bgr(&capture.bytes)?;
    info!(
      "第 {} 帧 ({}): {}x{}",
      index,
      capture.source,
      frame.width(),
      frame.height()
    );

    self.enter(Stage::Inferring);
    let now = Instant::now();
    let raw = self
      .model
      .infer(&frame, &config)
      .map_err(|e| FrameError::Inference(Box::new(e)))?;
    let inference_time = now.elapsed();
    info!("推理完成，耗时: {:.2?}", inference_time);

    self.enter(Stage::Aggregating);
    let detections = parse_detections(&raw)?;
    let labels = self.model.labels().clone();
    let summary = summarize(&detections, &labels);
    info!(
      "检测到 {} 个物体, {} 个类别",
      detections.len(),
      summary.rows.len()
    );

    Ok(FrameReport {
      index,
      source: capture.source.clone(),
      frame,
      config,
      labels,
      detections,
      summary,
      inference_time,
    })
  }

  /// 处理一帧并交给输出端；任何错误只中止当前帧，流水线回到空闲状态
  pub fn process<O>(&mut self, capture: &EncodedImage, output: &O) -> Result<FrameReport, FrameError>
  where
    O: Render,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let report = self.analyze_inner(capture);
    let result = report.and_then(|report| {
      self.enter(Stage::Presenting);
      output
        .render_report(&report)
        .map_err(|e| FrameError::Render(Box::new(e)))?;
      Ok(report)
    });
    self.enter(Stage::Idle);
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{CategoryValue, RawDetections, ReplayModel};
  use image::{ImageFormat, Rgb, RgbImage};
  use std::cell::RefCell;
  use std::io::Cursor;

  fn capture() -> EncodedImage {
    let image = RgbImage::from_pixel(16, 8, Rgb([1, 2, 3]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    EncodedImage {
      source: "test".to_string(),
      bytes: buffer.into_inner(),
    }
  }

  fn replay(scores: Vec<f32>, categories: Vec<CategoryValue>) -> ReplayModel {
    let recorded = RawDetections {
      boxes: vec![[1.0, 1.0, 4.0, 4.0]; scores.len()],
      scores,
      categories,
    };
    ReplayModel::new(LabelTable::coco(), recorded)
  }

  #[derive(Default)]
  struct Collect {
    reports: RefCell<Vec<usize>>,
  }

  impl Render for Collect {
    type Error = std::io::Error;

    fn render_report(&self, report: &FrameReport) -> Result<(), Self::Error> {
      self.reports.borrow_mut().push(report.summary.total());
      Ok(())
    }
  }

  struct Failing;

  impl Render for Failing {
    type Error = std::io::Error;

    fn render_report(&self, _report: &FrameReport) -> Result<(), Self::Error> {
      Err(std::io::Error::other("display gone"))
    }
  }

  #[test]
  fn full_frame_reaches_output() {
    let model = replay(
      vec![0.9, 0.8, 0.95],
      vec![
        CategoryValue::Integer(0),
        CategoryValue::Integer(0),
        CategoryValue::Integer(2),
      ],
    );
    let mut pipeline = Pipeline::new(model, DetectionConfig::default());
    let output = Collect::default();

    let report = pipeline.process(&capture(), &output).unwrap();
    assert_eq!(report.frame.shape(), (8, 16, 3));
    assert_eq!(report.summary.rows[0].label, "person");
    assert_eq!(report.label_of(2), "car");
    assert_eq!(*output.reports.borrow(), vec![3]);
    assert_eq!(pipeline.stage(), Stage::Idle);
  }

  #[test]
  fn decode_failure_returns_to_idle() {
    let mut pipeline = Pipeline::new(replay(vec![], vec![]), DetectionConfig::default());
    let broken = EncodedImage {
      source: "broken".to_string(),
      bytes: vec![0xff, 0xd8, 0x00],
    };

    let output = Collect::default();
    assert!(matches!(
      pipeline.process(&broken, &output),
      Err(FrameError::Decode(_))
    ));
    assert_eq!(pipeline.stage(), Stage::Idle);
    assert!(output.reports.borrow().is_empty());

    // 下一帧照常处理
    assert!(pipeline.process(&capture(), &output).is_ok());
    assert_eq!(pipeline.processed(), 2);
  }

  #[test]
  fn malformed_result_is_reported_distinctly() {
    let model = replay(vec![0.9], vec![CategoryValue::Float(1.5)]);
    let mut pipeline = Pipeline::new(model, DetectionConfig::default());
    assert!(matches!(
      pipeline.analyze(&capture()),
      Err(FrameError::MalformedResult(_))
    ));
    assert_eq!(pipeline.stage(), Stage::Idle);
  }

  #[test]
  fn zero_detections_is_not_an_error() {
    let model = replay(vec![0.1], vec![CategoryValue::Integer(0)]);
    let mut pipeline = Pipeline::new(model, DetectionConfig::default());
    let report = pipeline.analyze(&capture()).unwrap();
    assert!(report.detections.is_empty());
    assert!(report.summary.is_empty());
  }

  #[test]
  fn config_change_applies_to_next_frame() {
    let model = replay(vec![0.1], vec![CategoryValue::Integer(0)]);
    let mut pipeline = Pipeline::new(model, DetectionConfig::default());
    assert!(pipeline.analyze(&capture()).unwrap().detections.is_empty());

    pipeline.set_config(DetectionConfig::default().with_confidence(0.05).unwrap());
    let report = pipeline.analyze(&capture()).unwrap();
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.config.confidence(), 0.05);
  }

  #[test]
  fn render_failure_is_frame_error() {
    let mut pipeline = Pipeline::new(replay(vec![], vec![]), DetectionConfig::default());
    assert!(matches!(
      pipeline.process(&capture(), &Failing),
      Err(FrameError::Render(_))
    ));
    assert_eq!(pipeline.stage(), Stage::Idle);
  }
}
