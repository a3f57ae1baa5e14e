// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decoder.rs - 网格检测输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::{
  config::DetectorConfig,
  geometry::{BoundingBox, ModelSpace, argmax, sigmoid, softmax_in_place},
  model::{Detection, PALETTE_SIZE, labels::Labels},
};

/// 每个锚框除类别分数外的数值个数 (tx, ty, tw, th, to)
const BOX_VALUES: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("模型输出长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  OutputLength { expected: usize, actual: usize },
}

/// YOLOv2 风格的网格输出解码器。
///
/// 输入是按 (通道, 行, 列) 展开的一维数组，
/// 其中通道 = 锚框序号 * (5 + 类别数) + 分量序号。
#[derive(Debug, Clone)]
pub struct GridDecoder {
  rows: usize,
  cols: usize,
  anchors: Vec<(f32, f32)>,
  labels: Labels,
  score_threshold: f32,
  cell_width: f32,
  cell_height: f32,
}

impl GridDecoder {
  pub fn new(config: &DetectorConfig, labels: Labels, input_width: u32, input_height: u32) -> Self {
    // 单元尺寸沿用整数除法
    let cell_width = (input_width as usize / config.grid_cols) as f32;
    let cell_height = (input_height as usize / config.grid_rows) as f32;

    Self {
      rows: config.grid_rows,
      cols: config.grid_cols,
      anchors: config.anchors.clone(),
      labels,
      score_threshold: config.score_threshold,
      cell_width,
      cell_height,
    }
  }

  pub fn class_count(&self) -> usize {
    self.labels.len()
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  /// 每个网格单元的通道数 `B * (5 + 类别数)`
  pub fn channel_count(&self) -> usize {
    self.anchors.len() * (BOX_VALUES + self.class_count())
  }

  pub fn expected_len(&self) -> usize {
    self.channel_count() * self.rows * self.cols
  }

  pub fn decode(&self, output: &[f32]) -> Result<Vec<Detection<ModelSpace>>, DecodeError> {
    let expected = self.expected_len();
    if output.len() != expected {
      return Err(DecodeError::OutputLength {
        expected,
        actual: output.len(),
      });
    }

    let classes = self.class_count();
    let stride = BOX_VALUES + classes;
    let plane = self.rows * self.cols;
    let value = |channel: usize, row: usize, col: usize| output[channel * plane + row * self.cols + col];

    let mut scores = vec![0.0f32; classes];
    let mut detections = Vec::new();

    for row in 0..self.rows {
      for col in 0..self.cols {
        for (anchor, &(anchor_w, anchor_h)) in self.anchors.iter().enumerate() {
          let base = anchor * stride;

          let objectness = sigmoid(value(base + 4, row, col));
          for (k, score) in scores.iter_mut().enumerate() {
            *score = value(base + BOX_VALUES + k, row, col);
          }
          softmax_in_place(&mut scores);

          let Some((class_id, class_score)) = argmax(&scores) else {
            continue;
          };

          let confidence = objectness * class_score;
          if confidence < self.score_threshold {
            continue;
          }

          let x = (col as f32 + sigmoid(value(base, row, col))) * self.cell_width;
          let y = (row as f32 + sigmoid(value(base + 1, row, col))) * self.cell_height;
          let width = value(base + 2, row, col).exp() * anchor_w * self.cell_width;
          let height = value(base + 3, row, col).exp() * anchor_h * self.cell_height;

          detections.push(Detection {
            bbox: BoundingBox::new(
              (x - width / 2.0).max(0.0),
              (y - height / 2.0).max(0.0),
              width,
              height,
            ),
            label: self.labels.get(class_id),
            class_id,
            confidence,
            color_index: class_id % PALETTE_SIZE,
          });
        }
      }
    }

    debug!("解码得到 {} 个候选框", detections.len());
    Ok(detections)
  }
}

/// 把 (行, 列, 通道) 排列的输出转置为 (通道, 行, 列)。
///
/// 长度必须正好是 `rows * cols * channels`。
pub fn channel_last_to_first(
  data: &[f32],
  rows: usize,
  cols: usize,
  channels: usize,
) -> Result<Vec<f32>, DecodeError> {
  let plane = rows * cols;
  let expected = plane * channels;
  if data.len() != expected {
    return Err(DecodeError::OutputLength {
      expected,
      actual: data.len(),
    });
  }

  let mut out = vec![0.0f32; expected];
  for (position, values) in data.chunks_exact(channels.max(1)).enumerate() {
    for (channel, &value) in values.iter().enumerate() {
      out[channel * plane + position] = value;
    }
  }
  Ok(out)
}
