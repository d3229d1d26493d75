// 该文件是 Jiance （见测） 项目的一部分。
// src/output.rs - 输出定义
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
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  aggregate::Summary,
  config::DetectionConfig,
  pipeline::FrameReport,
};

pub trait Render: Sized {
  type Error;
  fn render_report(&self, report: &FrameReport) -> Result<(), Self::Error>;
}

mod console;
pub use self::console::{ConsoleOutput, format_report};

mod json_report;
pub use self::json_report::{JsonReportError, JsonReportOutput};

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("控制台输出错误: {0}")]
  ConsoleError(#[from] std::io::Error),
  #[error("JSON 报告输出错误: {0}")]
  JsonReportError(#[from] JsonReportError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 单个检测的可序列化记录
#[derive(Debug, Serialize)]
pub struct DetectionRecord {
  pub bbox: [f32; 4],
  pub score: f32,
  pub category: u32,
  pub label: String,
}

/// 一帧结果的可序列化记录
#[derive(Debug, Serialize)]
pub struct ReportRecord<'a> {
  pub index: usize,
  pub source: &'a str,
  pub width: usize,
  pub height: usize,
  pub config: &'a DetectionConfig,
  pub inference_ms: f64,
  pub detections: Vec<DetectionRecord>,
  pub summary: &'a Summary,
}

impl<'a> From<&'a FrameReport> for ReportRecord<'a> {
  fn from(report: &'a FrameReport) -> Self {
    ReportRecord {
      index: report.index,
      source: &report.source,
      width: report.frame.width(),
      height: report.frame.height(),
      config: &report.config,
      inference_ms: report.inference_time.as_secs_f64() * 1000.0,
      detections: report
        .detections
        .iter()
        .map(|d| DetectionRecord {
          bbox: d.bbox,
          score: d.score,
          category: d.category,
          label: report.label_of(d.category),
        })
        .collect(),
      summary: &report.summary,
    }
  }
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  JsonReport(JsonReportOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput::from_url(url)?)),
      JsonReportOutput::SCHEME => Ok(OutputWrapper::JsonReport(JsonReportOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordOutput::from_url(url)?,
      )),
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_report(&self, report: &FrameReport) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => output.render_report(report).map_err(OutputError::from),
      OutputWrapper::JsonReport(output) => output.render_report(report).map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => {
        output.render_report(report).map_err(OutputError::from)
      }
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => {
        output.render_report(report).map_err(OutputError::from)
      }
    }
  }
}

/// 多个输出端依次渲染；某个输出失败不影响其余输出，返回第一个错误
pub struct Outputs(pub Vec<OutputWrapper>);

impl Outputs {
  pub fn from_urls(urls: &[Url]) -> Result<Self, OutputError> {
    urls
      .iter()
      .map(OutputWrapper::from_url)
      .collect::<Result<Vec<_>, _>>()
      .map(Outputs)
  }
}

impl Render for Outputs {
  type Error = OutputError;

  fn render_report(&self, report: &FrameReport) -> Result<(), Self::Error> {
    let mut first_error = None;
    for output in &self.0 {
      if let Err(e) = output.render_report(report) {
        error!("输出失败: {}", e);
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }
}
