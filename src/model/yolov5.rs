// 该文件是 Jiance （见测） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 ONNX 模型
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

use std::path::Path;

use anyhow::{Context, anyhow};
use image::imageops::FilterType;
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  config::DetectionConfig,
  frame::BgrFrame,
  labels::{LabelTable, LabelTableError},
  model::{LoadOutcome, Model, RawDetections},
  url_path,
};

const YOLOV5_INPUT_SIZE: u32 = 640;
const YOLOV5_PAD_VALUE: f32 = 114.0;
// 每行: cx, cy, w, h, objectness, 各类别分数
const YOLOV5_ROW_HEAD: usize = 5;
// 进入 NMS 的最大候选框数
const YOLOV5_MAX_NMS: usize = 30000;
// 非类别无关 NMS 时每个类别的坐标偏移
const YOLOV5_MAX_WH: f32 = 7680.0;

type Yolov5Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum Yolov5Error {
  #[error("输入帧为空")]
  EmptyFrame,
  #[error("推理失败: {0}")]
  Run(String),
  #[error("模型没有输出")]
  NoOutput,
  #[error("输出长度 {len} 不是行宽 {row_len} 的整数倍")]
  OutputShape { len: usize, row_len: usize },
}

/// 等比缩放并填充到模型的正方形输入，记录还原坐标所需的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub src_w: u32,
  pub src_h: u32,
  pub new_w: u32,
  pub new_h: u32,
  pub pad_left: u32,
  pub pad_top: u32,
  pub scale: f32,
}

impl Letterbox {
  pub fn fit(src_w: u32, src_h: u32, target: u32) -> Self {
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, target);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, target);
    Self {
      src_w,
      src_h,
      new_w,
      new_h,
      pad_left: (target - new_w) / 2,
      pad_top: (target - new_h) / 2,
      scale,
    }
  }

  /// 将模型输入坐标系下的框还原到原图坐标系并裁剪到图像范围
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (w, h) = (self.src_w as f32, self.src_h as f32);
    let x = |v: f32| ((v - self.pad_left as f32) / self.scale).clamp(0.0, w);
    let y = |v: f32| ((v - self.pad_top as f32) / self.scale).clamp(0.0, h);
    [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
  }
}

pub struct Yolov5 {
  plan: Yolov5Plan,
  row_len: usize,
  labels: LabelTable,
}

impl Yolov5 {
  pub const SCHEME: &'static str = "yolov5";

  /// `yolov5:///path/model.onnx[?labels=/path/names.txt]`
  pub fn negotiate(url: &Url) -> LoadOutcome<Self> {
    let path = url_path(url);
    let path = Path::new(&path);
    if !path.is_file() {
      return LoadOutcome::WeightsMissing {
        path: path.display().to_string(),
      };
    }

    let labels = match url.query_pairs().find(|(key, _)| key == "labels") {
      Some((_, labels_path)) => match LabelTable::load(Path::new(labels_path.as_ref())) {
        Ok(labels) => labels,
        Err(LabelTableError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
          return LoadOutcome::WeightsMissing {
            path: labels_path.into_owned(),
          };
        }
        Err(e) => {
          return LoadOutcome::incompatible(format!("无法加载标签文件 {}: {}", labels_path, e));
        }
      },
      None => LabelTable::coco(),
    };

    match Self::load_plan(path) {
      Ok((plan, row_len)) => {
        let num_classes = row_len - YOLOV5_ROW_HEAD;
        if num_classes != labels.len() {
          warn!(
            "模型类别数 {} 与标签数 {} 不一致, 缺失的类别将使用占位名称",
            num_classes,
            labels.len()
          );
        }
        LoadOutcome::Loaded(Yolov5 {
          plan,
          row_len,
          labels,
        })
      }
      Err(e) => LoadOutcome::incompatible(format!("{:#}", e)),
    }
  }

  fn load_plan(path: &Path) -> anyhow::Result<(Yolov5Plan, usize)> {
    info!("加载 ONNX 模型文件: {}", path.display());
    let size = YOLOV5_INPUT_SIZE as usize;
    let model = tract_onnx::onnx()
      .model_for_path(path)
      .with_context(|| format!("无法解析 ONNX 模型 {}", path.display()))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .context("无法设置模型输入形状")?
      .into_optimized()
      .context("无法优化模型")?;

    let dims = model
      .output_fact(0)
      .context("无法获取模型输出")?
      .shape
      .as_concrete()
      .map(|dims| dims.to_vec())
      .ok_or_else(|| anyhow!("模型输出形状不是常量"))?;
    debug!("模型输出形状: {:?}", dims);

    // 期望 [1, N, 5 + C]
    let row_len = match dims.as_slice() {
      [1, _, row_len] if *row_len > YOLOV5_ROW_HEAD => *row_len,
      _ => return Err(anyhow!("期望输出形状为 [1, N, 5 + 类别数], 实际为 {:?}", dims)),
    };

    let plan = model.into_runnable().context("无法构建可运行模型")?;
    Ok((plan, row_len))
  }

  fn preprocess(frame: &BgrFrame, letterbox: &Letterbox) -> Tensor {
    let resized = image::imageops::resize(
      &frame.to_rgb_image(),
      letterbox.new_w,
      letterbox.new_h,
      FilterType::Triangle,
    );

    let size = YOLOV5_INPUT_SIZE as usize;
    let (left, top) = (letterbox.pad_left as usize, letterbox.pad_top as usize);
    let (new_w, new_h) = (letterbox.new_w as usize, letterbox.new_h as usize);

    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      if x >= left && x < left + new_w && y >= top && y < top + new_h {
        let pixel = resized.get_pixel((x - left) as u32, (y - top) as u32);
        pixel[c] as f32 / 255.0
      } else {
        YOLOV5_PAD_VALUE / 255.0
      }
    })
    .into_tensor()
  }
}

impl Model for Yolov5 {
  type Error = Yolov5Error;

  fn labels(&self) -> &LabelTable {
    &self.labels
  }

  fn infer(
    &self,
    frame: &BgrFrame,
    config: &DetectionConfig,
  ) -> Result<RawDetections, Self::Error> {
    if frame.is_empty() {
      return Err(Yolov5Error::EmptyFrame);
    }

    let letterbox = Letterbox::fit(frame.width() as u32, frame.height() as u32, YOLOV5_INPUT_SIZE);
    debug!("预处理: {:?}", letterbox);
    let input = Self::preprocess(frame, &letterbox);

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(input.into_tvalue()))
      .map_err(|e| Yolov5Error::Run(format!("{:#}", e)))?;
    let output = outputs.first().ok_or(Yolov5Error::NoOutput)?;
    let data = output
      .as_slice::<f32>()
      .map_err(|e| Yolov5Error::Run(format!("{:#}", e)))?;

    if data.len() % self.row_len != 0 {
      return Err(Yolov5Error::OutputShape {
        len: data.len(),
        row_len: self.row_len,
      });
    }

    let rows: Vec<[f32; 6]> = postprocess(data, self.row_len, config)
      .into_iter()
      .map(|row| {
        let [x1, y1, x2, y2] = letterbox.restore([row[0], row[1], row[2], row[3]]);
        [x1, y1, x2, y2, row[4], row[5]]
      })
      .collect();
    debug!("检测到 {} 个物体", rows.len());

    Ok(RawDetections::from_rows(&rows))
  }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
  bbox: [f32; 4],
  score: f32,
  class_id: usize,
}

/// 解码 `[N, 5 + C]` 输出并执行 NMS，返回 `[x1, y1, x2, y2, score, class]` 行
fn postprocess(output: &[f32], row_len: usize, config: &DetectionConfig) -> Vec<[f32; 6]> {
  let conf = config.confidence();
  let mut candidates = Vec::new();

  for row in output.chunks_exact(row_len) {
    let objectness = row[4];
    if objectness <= conf {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let bbox = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
    let class_scores = &row[YOLOV5_ROW_HEAD..];

    if config.multi_label() {
      for (class_id, &class_score) in class_scores.iter().enumerate() {
        let score = class_score * objectness;
        if score > conf {
          candidates.push(Candidate {
            bbox,
            score,
            class_id,
          });
        }
      }
    } else {
      let (class_id, best) = class_scores
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |acc, (idx, &score)| {
          if score > acc.1 { (idx, score) } else { acc }
        });
      let score = best * objectness;
      if score > conf {
        candidates.push(Candidate {
          bbox,
          score,
          class_id,
        });
      }
    }
  }

  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  if candidates.len() > YOLOV5_MAX_NMS {
    warn!("候选框数 {} 超过上限 {}", candidates.len(), YOLOV5_MAX_NMS);
    candidates.truncate(YOLOV5_MAX_NMS);
  }

  nms(&candidates, config)
    .into_iter()
    .map(|c| {
      [
        c.bbox[0],
        c.bbox[1],
        c.bbox[2],
        c.bbox[3],
        c.score,
        c.class_id as f32,
      ]
    })
    .collect()
}

/// 贪心非极大值抑制，输入需按分数降序排列
fn nms(candidates: &[Candidate], config: &DetectionConfig) -> Vec<Candidate> {
  let offset = |c: &Candidate| {
    if config.agnostic() {
      c.bbox
    } else {
      let shift = c.class_id as f32 * YOLOV5_MAX_WH;
      c.bbox.map(|v| v + shift)
    }
  };

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= config.max_detections() {
      break;
    }
    let bbox = offset(candidate);
    if kept.iter().all(|k| iou(&offset(k), &bbox) <= config.iou()) {
      kept.push(*candidate);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NUM_CLASSES: usize = 3;
  const ROW_LEN: usize = YOLOV5_ROW_HEAD + NUM_CLASSES;

  fn row(cx: f32, cy: f32, w: f32, h: f32, obj: f32, classes: [f32; NUM_CLASSES]) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, obj];
    row.extend_from_slice(&classes);
    row
  }

  fn output(rows: &[Vec<f32>]) -> Vec<f32> {
    rows.concat()
  }

  #[test]
  fn filters_low_objectness_and_low_class_score() {
    let data = output(&[
      row(50.0, 50.0, 20.0, 20.0, 0.9, [0.9, 0.1, 0.0]),
      row(150.0, 50.0, 20.0, 20.0, 0.2, [1.0, 0.0, 0.0]),
      row(250.0, 50.0, 20.0, 20.0, 0.9, [0.2, 0.2, 0.1]),
    ]);
    let rows = postprocess(&data, ROW_LEN, &DetectionConfig::default());

    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][..4], &[40.0, 40.0, 60.0, 60.0]);
    assert!((rows[0][4] - 0.81).abs() < 1e-6);
    assert_eq!(rows[0][5], 0.0);
  }

  #[test]
  fn suppresses_overlaps_within_class_only() {
    let data = output(&[
      row(50.0, 50.0, 20.0, 20.0, 0.9, [0.9, 0.0, 0.0]),
      row(51.0, 51.0, 20.0, 20.0, 0.9, [0.8, 0.0, 0.0]),
      row(50.0, 50.0, 20.0, 20.0, 0.9, [0.0, 0.7, 0.0]),
    ]);

    let per_class = postprocess(&data, ROW_LEN, &DetectionConfig::default());
    let classes: Vec<f32> = per_class.iter().map(|r| r[5]).collect();
    assert_eq!(classes, vec![0.0, 1.0]);

    let agnostic = DetectionConfig::default().with_agnostic(true);
    let rows = postprocess(&data, ROW_LEN, &agnostic);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][5], 0.0);
  }

  #[test]
  fn iou_threshold_controls_suppression() {
    // 两框 IoU = 1/3
    let data = output(&[
      row(10.0, 10.0, 20.0, 20.0, 0.9, [0.9, 0.0, 0.0]),
      row(20.0, 10.0, 20.0, 20.0, 0.9, [0.8, 0.0, 0.0]),
    ]);
    let strict = DetectionConfig::default().with_iou(0.3).unwrap();
    assert_eq!(postprocess(&data, ROW_LEN, &strict).len(), 1);
    let loose = DetectionConfig::default().with_iou(0.5).unwrap();
    assert_eq!(postprocess(&data, ROW_LEN, &loose).len(), 2);
  }

  #[test]
  fn multi_label_emits_one_row_per_class() {
    let data = output(&[row(50.0, 50.0, 20.0, 20.0, 1.0, [0.9, 0.6, 0.1])]);

    let single = postprocess(&data, ROW_LEN, &DetectionConfig::default());
    assert_eq!(single.len(), 1);

    let multi = DetectionConfig::default().with_multi_label(true);
    let rows = postprocess(&data, ROW_LEN, &multi);
    let classes: Vec<f32> = rows.iter().map(|r| r[5]).collect();
    assert_eq!(classes, vec![0.0, 1.0]);
  }

  #[test]
  fn max_detections_keeps_highest_scores() {
    let rows: Vec<Vec<f32>> = (0..15)
      .map(|i| {
        let score = 0.5 + i as f32 * 0.03;
        row(i as f32 * 100.0 + 50.0, 50.0, 20.0, 20.0, 1.0, [score, 0.0, 0.0])
      })
      .collect();
    let config = DetectionConfig::default().with_max_detections(10).unwrap();
    let kept = postprocess(&output(&rows), ROW_LEN, &config);

    assert_eq!(kept.len(), 10);
    assert!(kept.windows(2).all(|w| w[0][4] >= w[1][4]));
    assert!(kept.iter().all(|r| r[4] >= 0.5 + 5.0 * 0.03 - 1e-6));
  }

  #[test]
  fn letterbox_restores_original_coordinates() {
    let letterbox = Letterbox::fit(1280, 640, YOLOV5_INPUT_SIZE);
    assert_eq!(letterbox.scale, 0.5);
    assert_eq!((letterbox.new_w, letterbox.new_h), (640, 320));
    assert_eq!((letterbox.pad_left, letterbox.pad_top), (0, 160));

    let restored = letterbox.restore([100.0, 200.0, 300.0, 400.0]);
    assert_eq!(restored, [200.0, 80.0, 600.0, 480.0]);

    // 超出图像的部分被裁剪
    let clipped = letterbox.restore([-10.0, 100.0, 700.0, 500.0]);
    assert_eq!(clipped, [0.0, 0.0, 1280.0, 640.0]);
  }

  #[test]
  fn preprocess_pads_with_gray() {
    let frame = BgrFrame::from_raw(2, 4, vec![255; 24]).unwrap();
    let letterbox = Letterbox::fit(4, 2, YOLOV5_INPUT_SIZE);
    let tensor = Yolov5::preprocess(&frame, &letterbox);
    assert_eq!(tensor.shape(), &[1, 3, 640, 640]);

    let data = tensor.as_slice::<f32>().unwrap();
    // 左上角位于填充区
    assert!((data[0] - YOLOV5_PAD_VALUE / 255.0).abs() < 1e-6);
    // 中心位于图像区
    let center = 320 * 640 + 320;
    assert!((data[center] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn missing_weights_detected_before_parsing() {
    let url = Url::parse("yolov5:///nonexistent/yolov5s.onnx").unwrap();
    assert!(matches!(
      Yolov5::negotiate(&url),
      LoadOutcome::WeightsMissing { .. }
    ));
  }

  #[test]
  fn garbage_weights_are_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("yolov5s.onnx");
    std::fs::write(&path, b"not a protobuf at all").unwrap();
    let url = Url::parse(&format!("yolov5://{}", path.display())).unwrap();
    assert!(matches!(
      Yolov5::negotiate(&url),
      LoadOutcome::IncompatibleVersion { .. }
    ));
  }

  #[test]
  fn path_with_space_reaches_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("my model.onnx");
    std::fs::write(&path, b"not a protobuf at all").unwrap();
    let url = Url::parse(&format!("yolov5://{}", path.display())).unwrap();
    assert!(matches!(
      Yolov5::negotiate(&url),
      LoadOutcome::IncompatibleVersion { .. }
    ));
  }

  #[test]
  fn missing_labels_file_is_reported_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("yolov5s.onnx");
    std::fs::write(&weights, b"not a protobuf at all").unwrap();
    let labels = dir.path().join("names.txt");

    let mut url = Url::parse(&format!("yolov5://{}", weights.display())).unwrap();
    url
      .query_pairs_mut()
      .append_pair("labels", &labels.display().to_string());
    match Yolov5::negotiate(&url) {
      LoadOutcome::WeightsMissing { path } => assert_eq!(path, labels.display().to_string()),
      _ => panic!("expected missing labels file"),
    }
  }
}
