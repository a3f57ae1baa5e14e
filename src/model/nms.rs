// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::{geometry::iou, model::Detection};

/// 按类别做贪心 NMS，不同标签之间互不抑制
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppressor {
  pub iou_threshold: f32,
}

impl Suppressor {
  pub fn new(iou_threshold: f32) -> Self {
    Self { iou_threshold }
  }

  pub fn suppress<S>(&self, mut detections: Vec<Detection<S>>) -> Vec<Detection<S>> {
    // 稳定排序，置信度相同时保持原有顺序
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    for i in 0..detections.len() {
      if suppressed[i] {
        continue;
      }
      for j in (i + 1)..detections.len() {
        if suppressed[j] || detections[i].label != detections[j].label {
          continue;
        }
        if iou(&detections[i].bbox, &detections[j].bbox) >= self.iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    let before = detections.len();
    let kept = detections
      .into_iter()
      .zip(suppressed)
      .filter_map(|(detection, dropped)| (!dropped).then_some(detection))
      .collect::<Vec<_>>();
    debug!("NMS: {} -> {}", before, kept.len());
    kept
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::{BoundingBox, ModelSpace};
  use proptest::prelude::*;
  use std::sync::Arc;

  fn det(label: &str, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection<ModelSpace> {
    Detection {
      bbox: BoundingBox::new(x, y, w, h),
      label: Arc::from(label),
      class_id: 0,
      confidence,
      color_index: 0,
    }
  }

  #[test]
  fn overlapping_same_label_keeps_the_best() {
    let kept = Suppressor::new(0.5).suppress(vec![
      det("a", 0.6, 0.0, 0.0, 10.0, 10.0),
      det("a", 0.9, 1.0, 1.0, 10.0, 10.0),
    ]);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].confidence, 0.9);
  }

  #[test]
  fn different_labels_do_not_suppress() {
    let kept = Suppressor::new(0.5).suppress(vec![
      det("a", 0.9, 0.0, 0.0, 10.0, 10.0),
      det("b", 0.8, 0.0, 0.0, 10.0, 10.0),
    ]);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn threshold_is_inclusive() {
    // IoU 恰好为 0.5
    let a = det("a", 0.9, 0.0, 0.0, 30.0, 10.0);
    let b = det("a", 0.8, 10.0, 0.0, 30.0, 10.0);
    assert_eq!(iou(&a.bbox, &b.bbox), 0.5);
    assert_eq!(Suppressor::new(0.5).suppress(vec![a, b]).len(), 1);
  }

  #[test]
  fn equal_confidence_keeps_input_order() {
    let kept = Suppressor::new(0.5).suppress(vec![
      det("a", 0.7, 0.0, 0.0, 10.0, 10.0),
      det("a", 0.7, 0.0, 0.0, 10.0, 10.0),
      det("b", 0.7, 50.0, 0.0, 10.0, 10.0),
    ]);
    assert_eq!(kept.len(), 2);
    assert_eq!(&*kept[0].label, "a");
    assert_eq!(&*kept[1].label, "b");
  }

  #[test]
  fn empty_input() {
    assert!(Suppressor::new(0.5).suppress::<ModelSpace>(vec![]).is_empty());
  }

  fn arb_detection() -> impl Strategy<Value = Detection<ModelSpace>> {
    (
      prop::sample::select(vec!["a", "b", "c"]),
      0.0f32..1.0,
      0.0f32..100.0,
      0.0f32..100.0,
      1.0f32..50.0,
      1.0f32..50.0,
    )
      .prop_map(|(label, c, x, y, w, h)| det(label, c, x, y, w, h))
  }

  proptest! {
    #[test]
    fn suppression_is_idempotent(input in prop::collection::vec(arb_detection(), 0..40)) {
      let nms = Suppressor::new(0.5);
      let once = nms.suppress(input);
      let twice = nms.suppress(once.clone());
      prop_assert_eq!(once, twice);
    }

    #[test]
    fn survivors_do_not_overlap_within_a_label(
      input in prop::collection::vec(arb_detection(), 0..40)
    ) {
      let kept = Suppressor::new(0.5).suppress(input);
      for (i, a) in kept.iter().enumerate() {
        for b in kept.iter().skip(i + 1) {
          if a.label == b.label {
            prop_assert!(iou(&a.bbox, &b.bbox) < 0.5);
          }
        }
      }
    }
  }
}
