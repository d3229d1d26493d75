// 该文件是 Jiance （见测） 项目的一部分。
// src/output/console.rs - 控制台汇总表与条形图
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

use std::fmt::Write as _;
use std::io::Write;

use crate::{FromUrl, FromUrlWithScheme, output::Render, pipeline::FrameReport};

const BAR_WIDTH: usize = 30;
const BAR_CHAR: char = '█';

#[derive(Default)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = std::io::Error;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(ConsoleOutput)
  }
}

/// 生成汇总表和条形图文本
pub fn format_report(report: &FrameReport) -> String {
  let mut text = String::new();
  let summary = &report.summary;

  let _ = writeln!(
    text,
    "第 {} 帧 ({}) | {} | 推理耗时 {:.2?}",
    report.index, report.source, report.config, report.inference_time
  );

  if summary.is_empty() {
    let _ = writeln!(text, "未检测到目标。");
    let _ = writeln!(text, "提示: 可以尝试降低置信度阈值。");
    return text;
  }

  let label_width = summary
    .rows
    .iter()
    .map(|row| row.label.chars().count())
    .max()
    .unwrap_or(0)
    .max("category".len());

  let _ = writeln!(
    text,
    "{:<label_width$}  {:>6}  {:>10}",
    "category", "count", "confidence"
  );
  for row in &summary.rows {
    let _ = writeln!(
      text,
      "{:<label_width$}  {:>6}  {:>10.2}",
      row.label, row.count, row.mean_confidence
    );
  }

  let _ = writeln!(text);
  let max_count = summary.rows.first().map(|row| row.count).unwrap_or(1).max(1);
  for row in &summary.rows {
    let bar_len = (row.count * BAR_WIDTH).div_ceil(max_count);
    let bar: String = std::iter::repeat_n(BAR_CHAR, bar_len).collect();
    let _ = writeln!(text, "{:<label_width$} | {} {}", row.label, bar, row.count);
  }

  for unknown in &summary.unknown {
    let _ = writeln!(text, "警告: {}", unknown);
  }
  text
}

impl Render for ConsoleOutput {
  type Error = std::io::Error;

  fn render_report(&self, report: &FrameReport) -> Result<(), Self::Error> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(format_report(report).as_bytes())?;
    stdout.flush()
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

  fn report(items: &[(f32, u32)]) -> FrameReport {
    let labels = LabelTable::from_names(["person", "bicycle", "car"]);
    let detections: Detections = items
      .iter()
      .map(|&(score, category)| Detection {
        bbox: [0.0, 0.0, 1.0, 1.0],
        score,
        category,
      })
      .collect();
    let summary = summarize(&detections, &labels);
    FrameReport {
      index: 0,
      source: "test".to_string(),
      frame: BgrFrame::with_shape(2, 2),
      config: DetectionConfig::default(),
      labels,
      detections,
      summary,
      inference_time: Duration::from_millis(5),
    }
  }

  #[test]
  fn table_lists_rows_in_summary_order() {
    let text = format_report(&report(&[(0.9, 0), (0.8, 0), (0.95, 2)]));
    let person = text.find("person").unwrap();
    let car = text.find("car").unwrap();
    assert!(person < car);
    assert!(text.contains("0.85"));
    assert!(text.contains("0.95"));
    assert!(text.contains(&"█".repeat(BAR_WIDTH)));
  }

  #[test]
  fn empty_summary_is_informational() {
    let text = format_report(&report(&[]));
    assert!(text.contains("未检测到目标"));
    assert!(!text.contains("警告"));
  }

  #[test]
  fn unknown_categories_are_flagged() {
    let text = format_report(&report(&[(0.5, 9)]));
    assert!(text.contains("class_9"));
    assert!(text.contains("警告"));
  }
}
