// 该文件是 Jiance （见测） 项目的一部分。
// src/aggregate.rs - 按类别汇总检测结果
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

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::{
  labels::{LabelTable, placeholder_label},
  parse::Detections,
};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("类别 {category} 不在标签表中 (共 {table_len} 个标签)")]
pub struct UnknownCategoryError {
  pub category: u32,
  pub table_len: usize,
}

/// 单个类别的汇总行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
  pub category: u32,
  pub label: String,
  pub count: usize,
  pub mean_confidence: f32,
}

/// 一帧的汇总结果；`unknown` 记录标签表中缺失的类别，对应行使用占位名称
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
  pub rows: Vec<CategorySummary>,
  pub unknown: Vec<UnknownCategoryError>,
}

impl Summary {
  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn total(&self) -> usize {
    self.rows.iter().map(|row| row.count).sum()
  }
}

/// 按类别分组计数并计算平均置信度
///
/// 排序：数量降序，数量相同时按标签字典序升序，再按类别索引升序。
pub fn summarize(detections: &Detections, labels: &LabelTable) -> Summary {
  let mut groups: BTreeMap<u32, (usize, f64)> = BTreeMap::new();
  for (&category, &score) in detections.categories().iter().zip(detections.scores()) {
    let entry = groups.entry(category).or_insert((0, 0.0));
    entry.0 += 1;
    entry.1 += score as f64;
  }

  let mut summary = Summary::default();
  for (category, (count, sum)) in groups {
    let label = match labels.get(category) {
      Some(label) => label.to_string(),
      None => {
        let err = UnknownCategoryError {
          category,
          table_len: labels.len(),
        };
        warn!("{}, 使用占位名称", err);
        summary.unknown.push(err);
        placeholder_label(category)
      }
    };

    summary.rows.push(CategorySummary {
      category,
      label,
      count,
      mean_confidence: (sum / count as f64) as f32,
    });
  }

  summary.rows.sort_by(|a, b| {
    b.count
      .cmp(&a.count)
      .then_with(|| a.label.cmp(&b.label))
      .then_with(|| a.category.cmp(&b.category))
  });
  summary
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse::Detection;

  fn detections(items: &[(f32, u32)]) -> Detections {
    items
      .iter()
      .map(|&(score, category)| Detection {
        bbox: [0.0, 0.0, 1.0, 1.0],
        score,
        category,
      })
      .collect()
  }

  fn person_car_labels() -> LabelTable {
    LabelTable::from_json(r#"{"0": "person", "2": "car"}"#).unwrap()
  }

  #[test]
  fn person_and_car_scenario() {
    let summary = summarize(
      &detections(&[(0.9, 0), (0.8, 0), (0.95, 2)]),
      &person_car_labels(),
    );

    assert!(summary.unknown.is_empty());
    assert_eq!(summary.rows.len(), 2);
    assert_eq!(summary.rows[0].label, "person");
    assert_eq!(summary.rows[0].count, 2);
    assert!((summary.rows[0].mean_confidence - 0.85).abs() < 1e-6);
    assert_eq!(summary.rows[1].label, "car");
    assert_eq!(summary.rows[1].count, 1);
    assert!((summary.rows[1].mean_confidence - 0.95).abs() < 1e-6);
  }

  #[test]
  fn empty_detections_give_empty_summary() {
    let summary = summarize(&Detections::default(), &LabelTable::coco());
    assert!(summary.is_empty());
    assert!(summary.unknown.is_empty());
    assert_eq!(summary.total(), 0);
  }

  #[test]
  fn unknown_category_uses_placeholder_and_continues() {
    let labels = LabelTable::from_names(["a", "b", "c", "d", "e"]);
    let summary = summarize(&detections(&[(0.6, 7), (0.9, 1), (0.7, 1)]), &labels);

    assert_eq!(
      summary.unknown,
      vec![UnknownCategoryError {
        category: 7,
        table_len: 5
      }]
    );
    assert_eq!(summary.rows.len(), 2);
    assert_eq!(summary.rows[0].label, "b");
    assert_eq!(summary.rows[1].label, "class_7");
    assert_eq!(summary.rows[1].count, 1);
  }

  #[test]
  fn counts_sum_to_detection_count() {
    let items: Vec<(f32, u32)> = (0..97u32)
      .map(|i| (((i * 37) % 100) as f32 / 100.0, (i * 7) % 11))
      .collect();
    let input = detections(&items);
    let summary = summarize(&input, &LabelTable::coco());

    assert_eq!(summary.total(), input.len());
    assert!(summary.rows.iter().all(|row| row.count > 0));
  }

  #[test]
  fn means_match_their_own_group_and_stay_in_range() {
    let items: Vec<(f32, u32)> = (0..60u32)
      .map(|i| (((i * 13) % 101) as f32 / 100.0, i % 4))
      .collect();
    let input = detections(&items);
    let summary = summarize(&input, &LabelTable::coco());

    for row in &summary.rows {
      let scores: Vec<f32> = items
        .iter()
        .filter(|(_, category)| *category == row.category)
        .map(|(score, _)| *score)
        .collect();
      let expected = scores.iter().map(|&s| s as f64).sum::<f64>() / scores.len() as f64;
      assert_eq!(row.count, scores.len());
      assert!((row.mean_confidence as f64 - expected).abs() < 1e-6);
      assert!((0.0..=1.0).contains(&row.mean_confidence));
    }
  }

  #[test]
  fn ties_break_by_label_then_index() {
    let labels = LabelTable::from_names(["zebra", "apple", "mango"]);
    let summary = summarize(
      &detections(&[(0.5, 0), (0.5, 2), (0.5, 1), (0.9, 2)]),
      &labels,
    );
    let order: Vec<&str> = summary.rows.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(order, vec!["mango", "apple", "zebra"]);
  }

  #[test]
  fn summarizing_twice_is_identical() {
    let input = detections(&[(0.3, 5), (0.4, 1), (0.8, 5), (0.2, 9)]);
    let labels = LabelTable::coco();
    assert_eq!(summarize(&input, &labels), summarize(&input, &labels));
  }
}
