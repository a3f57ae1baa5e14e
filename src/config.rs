// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 检测与采集参数
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

use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;
const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
const DEFAULT_GRID_SIZE: usize = 13;
const DEFAULT_INPUT_SIZE: u32 = 416;
const DEFAULT_INPUT_NAME: &str = "image";
const DEFAULT_OUTPUT_NAME: &str = "grid";
const DEFAULT_ANCHORS: [(f32, f32); 5] = [
  (1.08, 1.19),
  (3.42, 4.41),
  (6.63, 11.38),
  (9.42, 5.11),
  (16.62, 10.52),
];

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("参数 {key} 的取值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("阈值 {key} 必须位于 [0, 1] 区间, 实际为 {value}")]
  ThresholdOutOfRange { key: &'static str, value: f32 },
  #[error("锚框参数必须是非空的宽高对, 实际数量 {0}")]
  InvalidAnchors(usize),
  #[error("网格尺寸不能为 0")]
  EmptyGrid,
}

/// 网格检测器的可调参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 低于该置信度的候选框被丢弃
  pub score_threshold: f32,
  /// NMS 使用的 IoU 阈值
  pub iou_threshold: f32,
  pub grid_rows: usize,
  pub grid_cols: usize,
  /// 每个锚框的 (宽, 高) 先验，单位是网格单元
  pub anchors: Vec<(f32, f32)>,
  pub input_name: String,
  pub output_name: String,
  /// 模型元数据缺少输入尺寸时使用
  pub default_input_width: u32,
  pub default_input_height: u32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      grid_rows: DEFAULT_GRID_SIZE,
      grid_cols: DEFAULT_GRID_SIZE,
      anchors: DEFAULT_ANCHORS.to_vec(),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      default_input_width: DEFAULT_INPUT_SIZE,
      default_input_height: DEFAULT_INPUT_SIZE,
    }
  }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

fn parse_anchors(value: &str) -> Result<Vec<(f32, f32)>, ConfigError> {
  let numbers = value
    .split(',')
    .map(|s| parse_value::<f32>("anchors", s.trim()))
    .collect::<Result<Vec<f32>, _>>()?;

  if numbers.is_empty() || numbers.len() % 2 != 0 {
    return Err(ConfigError::InvalidAnchors(numbers.len()));
  }

  Ok(numbers.chunks_exact(2).map(|c| (c[0], c[1])).collect())
}

impl DetectorConfig {
  pub fn anchors_per_cell(&self) -> usize {
    self.anchors.len()
  }

  /// 从 URL 查询参数覆盖默认值。
  ///
  /// 支持的键：`score`、`iou`、`grid`（行列相同）、`rows`、`cols`、`anchors`
  /// （逗号分隔的宽高序列）、`input`、`output`、`width`、`height`。
  /// 其他键被忽略，留给调用方自己解释。
  pub fn from_url(url: &Url) -> Result<Self, ConfigError> {
    let mut config = Self::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "score" => config.score_threshold = parse_value(&key, &value)?,
        "iou" => config.iou_threshold = parse_value(&key, &value)?,
        "grid" => {
          let size = parse_value(&key, &value)?;
          config.grid_rows = size;
          config.grid_cols = size;
        }
        "rows" => config.grid_rows = parse_value(&key, &value)?,
        "cols" => config.grid_cols = parse_value(&key, &value)?,
        "anchors" => config.anchors = parse_anchors(&value)?,
        "input" => config.input_name = value.into_owned(),
        "output" => config.output_name = value.into_owned(),
        "width" => config.default_input_width = parse_value(&key, &value)?,
        "height" => config.default_input_height = parse_value(&key, &value)?,
        _ => debug!("忽略检测器参数: {}={}", key, value),
      }
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for (key, value) in [
      ("score", self.score_threshold),
      ("iou", self.iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { key, value });
      }
    }

    if self.anchors.is_empty() {
      return Err(ConfigError::InvalidAnchors(0));
    }

    if self.grid_rows == 0 || self.grid_cols == 0 {
      return Err(ConfigError::EmptyGrid);
    }

    Ok(())
  }
}

/// 采集循环的节奏参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
  /// 两次取帧之间的等待，也用于"暂时没有帧"时的重试
  pub poll_interval: Duration,
  /// 单次迭代出错后的额外等待
  pub error_backoff: Duration,
}

impl Default for LoopConfig {
  fn default() -> Self {
    Self {
      poll_interval: DEFAULT_POLL_INTERVAL,
      error_backoff: DEFAULT_ERROR_BACKOFF,
    }
  }
}

impl LoopConfig {
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
    self.error_backoff = error_backoff;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_tiny_yolo_v2() {
    let config = DetectorConfig::default();
    assert_eq!(config.anchors_per_cell(), 5);
    assert_eq!((config.grid_rows, config.grid_cols), (13, 13));
    assert_eq!(config.score_threshold, 0.3);
    assert_eq!(config.iou_threshold, 0.5);
    assert_eq!(LoopConfig::default().poll_interval, Duration::from_millis(50));
  }

  #[test]
  fn query_overrides_defaults() {
    let url = Url::parse(
      "onnx:///models/model.onnx?labels=/models/labels.txt&score=0.25&grid=7&anchors=1,2,3,4&output=out",
    )
    .unwrap();
    let config = DetectorConfig::from_url(&url).unwrap();
    assert_eq!(config.score_threshold, 0.25);
    assert_eq!((config.grid_rows, config.grid_cols), (7, 7));
    assert_eq!(config.anchors, vec![(1.0, 2.0), (3.0, 4.0)]);
    assert_eq!(config.output_name, "out");
    assert_eq!(config.input_name, "image");
  }

  #[test]
  fn odd_anchor_count_is_rejected() {
    let url = Url::parse("onnx:///m.onnx?anchors=1,2,3").unwrap();
    assert_eq!(
      DetectorConfig::from_url(&url),
      Err(ConfigError::InvalidAnchors(3))
    );
  }

  #[test]
  fn threshold_out_of_range_is_rejected() {
    let url = Url::parse("onnx:///m.onnx?iou=1.5").unwrap();
    assert!(matches!(
      DetectorConfig::from_url(&url),
      Err(ConfigError::ThresholdOutOfRange { key: "iou", .. })
    ));
  }

  #[test]
  fn malformed_number_is_reported() {
    let url = Url::parse("onnx:///m.onnx?score=high").unwrap();
    assert_eq!(
      DetectorConfig::from_url(&url),
      Err(ConfigError::InvalidValue {
        key: "score".to_string(),
        value: "high".to_string()
      })
    );
  }
}
