// 该文件是 Shanan （山南西风） 项目的一部分。
// src/geometry.rs - 几何与数值工具
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

//! 检测管线用到的几何工具。
//!
//! 边界框带有坐标空间标记：[`ModelSpace`] 表示模型输入（letterbox 之后）的像素坐标，
//! [`FrameSpace`] 表示原始帧的像素坐标。两种坐标之间只能通过
//! [`crate::letterbox::LetterboxParams`] 转换。

use std::fmt::Debug;
use std::marker::PhantomData;

pub trait CoordinateSpace: Debug + Clone + Copy + PartialEq + Send + Sync + 'static {
  const NAME: &'static str;
}

/// 模型输入坐标空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelSpace;

/// 原始帧坐标空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSpace;

impl CoordinateSpace for ModelSpace {
  const NAME: &'static str = "model";
}

impl CoordinateSpace for FrameSpace {
  const NAME: &'static str = "frame";
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point<S> {
  pub x: f32,
  pub y: f32,
  _space: PhantomData<S>,
}

impl<S> Point<S> {
  pub fn new(x: f32, y: f32) -> Self {
    Self {
      x,
      y,
      _space: PhantomData,
    }
  }
}

/// 轴对齐边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox<S> {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  _space: PhantomData<S>,
}

impl<S> BoundingBox<S> {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
      _space: PhantomData,
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn top_left(&self) -> Point<S> {
    Point::new(self.x, self.y)
  }

  pub fn center(&self) -> Point<S> {
    Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn iou(&self, other: &BoundingBox<S>) -> f32 {
    iou(self, other)
  }
}

pub fn sigmoid(value: f32) -> f32 {
  1.0 / (1.0 + (-value).exp())
}

/// 原地 softmax。先减去最大值再取指数；和为 0 时保留全零结果，不做除法。
pub fn softmax_in_place(values: &mut [f32]) {
  let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let mut sum = 0.0f32;
  for v in values.iter_mut() {
    let e = (*v - max).exp();
    *v = if e.is_finite() { e } else { 0.0 };
    sum += *v;
  }

  if sum > 0.0 {
    for v in values.iter_mut() {
      *v /= sum;
    }
  }
}

pub fn softmax(values: &[f32]) -> Vec<f32> {
  let mut out = values.to_vec();
  softmax_in_place(&mut out);
  out
}

/// 最大值及其下标，相同最大值时取第一个
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
  let (first, rest) = values.split_first()?;
  let mut best = (0, *first);
  for (i, &v) in rest.iter().enumerate() {
    if v > best.1 {
      best = (i + 1, v);
    }
  }
  Some(best)
}

/// 交并比。任一边界框面积不为正时返回 0。
pub fn iou<S>(a: &BoundingBox<S>, b: &BoundingBox<S>) -> f32 {
  if !(a.width > 0.0 && a.height > 0.0 && b.width > 0.0 && b.height > 0.0) {
    return 0.0;
  }

  let area_a = (a.right() - a.x) * (a.bottom() - a.y);
  let area_b = (b.right() - b.x) * (b.bottom() - b.y);

  let inter_w = (a.right().min(b.right()) - a.x.max(b.x)).max(0.0);
  let inter_h = (a.bottom().min(b.bottom()) - a.y.max(b.y)).max(0.0);
  let intersection = inter_w * inter_h;

  let union = area_a + area_b - intersection;
  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  type B = BoundingBox<ModelSpace>;

  #[test]
  fn sigmoid_is_centered() {
    assert_eq!(sigmoid(0.0), 0.5);
    assert!(sigmoid(20.0) > 0.999);
    assert!(sigmoid(-20.0) < 0.001);
  }

  #[test]
  fn softmax_sums_to_one() {
    let p = softmax(&[1.0, 2.0, 3.0]);
    let sum: f32 = p.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert!(p[2] > p[1] && p[1] > p[0]);
  }

  #[test]
  fn softmax_survives_large_logits() {
    let p = softmax(&[1000.0, 1000.0]);
    assert!((p[0] - 0.5).abs() < 1e-6);
    assert!(p.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn softmax_of_empty_is_empty() {
    assert!(softmax(&[]).is_empty());
  }

  #[test]
  fn softmax_degenerate_sum_is_all_zero() {
    let p = softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY]);
    assert_eq!(p, vec![0.0, 0.0]);
  }

  #[test]
  fn argmax_prefers_first_on_ties() {
    assert_eq!(argmax(&[0.2, 0.7, 0.7]), Some((1, 0.7)));
    assert_eq!(argmax(&[]), None);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = B::new(0.1, 0.3, 10.7, 3.3);
    assert_eq!(a.iou(&a), 1.0);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = B::new(0.0, 0.0, 10.0, 10.0);
    let b = B::new(20.0, 20.0, 5.0, 5.0);
    assert_eq!(iou(&a, &b), 0.0);
    let touching = B::new(10.0, 0.0, 10.0, 10.0);
    assert_eq!(iou(&a, &touching), 0.0);
  }

  #[test]
  fn iou_with_empty_box_is_zero() {
    let a = B::new(0.0, 0.0, 10.0, 10.0);
    let empty = B::new(0.0, 0.0, 0.0, 10.0);
    assert_eq!(iou(&a, &empty), 0.0);
    assert_eq!(iou(&empty, &empty), 0.0);
  }

  #[test]
  fn iou_half_overlap() {
    let a = B::new(0.0, 0.0, 10.0, 10.0);
    let b = B::new(5.0, 0.0, 10.0, 10.0);
    assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
  }

  fn arb_box() -> impl Strategy<Value = B> {
    (0.0f32..500.0, 0.0f32..500.0, 0.1f32..200.0, 0.1f32..200.0)
      .prop_map(|(x, y, w, h)| B::new(x, y, w, h))
  }

  proptest! {
    #[test]
    fn iou_is_symmetric(a in arb_box(), b in arb_box()) {
      prop_assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn iou_is_bounded(a in arb_box(), b in arb_box()) {
      let v = iou(&a, &b);
      prop_assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn iou_self_is_one(a in arb_box()) {
      prop_assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }
  }
}
