// 该文件是 Jiance （见测） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, ValueEnum};
use url::Url;

use jiance::config::{ConfigError, DetectionConfig};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
  /// 处理一帧后退出
  Oneshot,
  /// 持续处理直到输入结束、达到帧数或 Ctrl-C
  Continuous,
  /// 从终端读取指令，回车拍摄一帧
  Interactive,
}

/// Jiance 单帧目标检测与分类计数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// - yolov5:///path/model.onnx[?labels=/path/names.txt]
  /// - replay:///path/result.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - image:///path/photo.jpg
  /// - stdin:
  /// - v4l:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出，可指定多次
  /// - console:
  /// - json:///path/report.json
  /// - image:///path/annotated.png
  /// - folder:///path/records[?always]
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Vec<Url>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 类别无关 NMS
  #[arg(long)]
  pub agnostic: bool,

  /// 每个框允许多个类别
  #[arg(long)]
  pub multi_label: bool,

  /// 每帧最大检测数 (10 - 2000, 步长 10)
  #[arg(long, default_value_t = 1000, value_name = "COUNT")]
  pub max_det: usize,

  #[arg(long, value_enum, default_value_t = Mode::Oneshot)]
  pub mode: Mode,

  /// 连续模式下最多处理的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frames: Option<usize>,
}

impl Args {
  pub fn detection_config(&self) -> Result<DetectionConfig, ConfigError> {
    DetectionConfig::new(
      self.conf,
      self.iou,
      self.agnostic,
      self.multi_label,
      self.max_det,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_build_default_config() {
    let args = Args::parse_from(["jiance", "--model", "replay:///r.json", "--input", "stdin:"]);
    assert_eq!(args.mode, Mode::Oneshot);
    assert_eq!(args.output, vec![Url::parse("console:").unwrap()]);
    assert_eq!(args.detection_config().unwrap(), DetectionConfig::default());
  }

  #[test]
  fn invalid_thresholds_are_rejected() {
    let args = Args::parse_from([
      "jiance",
      "--model",
      "replay:///r.json",
      "--input",
      "stdin:",
      "--max-det",
      "15",
    ]);
    assert_eq!(
      args.detection_config(),
      Err(ConfigError::MaxDetections(15))
    );
  }

  #[test]
  fn several_outputs() {
    let args = Args::parse_from([
      "jiance",
      "--model",
      "replay:///r.json",
      "--input",
      "image:///a.jpg",
      "--output",
      "console:",
      "--output",
      "json:///tmp/r.json",
      "--mode",
      "interactive",
      "--agnostic",
    ]);
    assert_eq!(args.output.len(), 2);
    assert_eq!(args.mode, Mode::Interactive);
    assert!(args.detection_config().unwrap().agnostic());
  }
}
