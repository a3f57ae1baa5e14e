// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Arc;

use crate::{
  geometry::{BoundingBox, CoordinateSpace, FrameSpace, ModelSpace},
  letterbox::LetterboxParams,
};

/// 绘制调色板的颜色数量
pub const PALETTE_SIZE: usize = 10;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 单个检测结果，坐标空间由 `S` 标记
#[derive(Debug, Clone, PartialEq)]
pub struct Detection<S> {
  pub bbox: BoundingBox<S>,
  pub label: Arc<str>,
  pub class_id: usize,
  pub confidence: f32,
  pub color_index: usize,
}

impl Detection<ModelSpace> {
  /// 投影回原始帧坐标，生成新的检测结果
  pub fn reproject(
    &self,
    params: &LetterboxParams,
    original_width: u32,
    original_height: u32,
  ) -> Detection<FrameSpace> {
    Detection {
      bbox: params.inverse(&self.bbox, original_width, original_height),
      label: Arc::clone(&self.label),
      class_id: self.class_id,
      confidence: self.confidence,
      color_index: self.color_index,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<S = FrameSpace> {
  pub items: Box<[Detection<S>]>,
}

impl<S> Default for DetectResult<S> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<S: CoordinateSpace> DetectResult<S> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection<S>> {
    self.items.iter()
  }
}

impl<S> From<Vec<Detection<S>>> for DetectResult<S> {
  fn from(items: Vec<Detection<S>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub mod decoder;
pub mod engine;
pub mod labels;
pub mod nms;
pub mod pipeline;
pub mod tensor;

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxEngine, OnnxError, OnnxModelBuilder};

pub use self::decoder::{DecodeError, GridDecoder};
pub use self::engine::{EngineError, InferenceEngine, ModelBinding, OutputTensor, TensorSpec};
pub use self::labels::{LabelError, Labels};
pub use self::nms::Suppressor;
pub use self::pipeline::{DetectionPipeline, PipelineError};
pub use self::tensor::{Tensor, TensorLayout};
