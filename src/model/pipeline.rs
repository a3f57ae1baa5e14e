// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/pipeline.rs - 单帧检测管线
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
use tracing::{debug, error, warn};

use crate::{
  config::{ConfigError, DetectorConfig},
  frame::BgrFrame,
  letterbox::{LetterboxError, LetterboxParams},
  model::{
    DetectResult, Model,
    decoder::{DecodeError, GridDecoder, channel_last_to_first},
    engine::{EngineError, InferenceEngine, ModelBinding, OutputTensor},
    labels::Labels,
    nms::Suppressor,
    tensor::{Tensor, TensorLayout},
  },
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("检测参数错误: {0}")]
  Config(#[from] ConfigError),
  #[error("letterbox 失败: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("模型绑定失败: {0}")]
  Binding(#[from] EngineError),
  #[error("推理引擎错误: {0}")]
  Engine(Box<dyn std::error::Error + Send + Sync>),
  #[error("推理结果中没有输出张量 {0}")]
  OutputMissing(String),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

/// letterbox -> 张量 -> 推理 -> 解码 -> NMS -> 反投影
pub struct DetectionPipeline<E> {
  engine: E,
  binding: ModelBinding,
  decoder: GridDecoder,
  suppressor: Suppressor,
}

impl<E: InferenceEngine> DetectionPipeline<E> {
  pub fn new(engine: E, config: &DetectorConfig, labels: Labels) -> Result<Self, PipelineError> {
    config.validate()?;

    let binding = ModelBinding::resolve(&engine, config, labels.len())?;
    let decoder = GridDecoder::new(config, labels, binding.input_width, binding.input_height);
    debug!(
      "检测管线: 网格 {}x{}, 通道 {}, 类别 {}",
      decoder.rows(),
      decoder.cols(),
      decoder.channel_count(),
      decoder.class_count()
    );

    Ok(Self {
      engine,
      binding,
      decoder,
      suppressor: Suppressor::new(config.iou_threshold),
    })
  }

  pub fn binding(&self) -> &ModelBinding {
    &self.binding
  }

  /// 按通道在前的顺序取出输出数据，返回实际使用的布局
  fn channel_major(&self, output: OutputTensor) -> Result<(Vec<f32>, TensorLayout), DecodeError> {
    let expected = self.decoder.expected_len();
    if output.data.len() != expected {
      return Err(DecodeError::OutputLength {
        expected,
        actual: output.data.len(),
      });
    }

    let layout = match self.binding.output_layout {
      Some(layout) => layout,
      None => {
        let (layout, guessed) = TensorLayout::from_output_shape(
          &output.shape,
          self.decoder.channel_count(),
          self.decoder.rows(),
          self.decoder.cols(),
        );
        if guessed {
          warn!("无法从输出形状 {:?} 判断通道顺序, 按通道在前处理", output.shape);
        }
        layout
      }
    };

    let data = match layout {
      TensorLayout::ChannelFirst => output.data,
      TensorLayout::ChannelLast => channel_last_to_first(
        &output.data,
        self.decoder.rows(),
        self.decoder.cols(),
        self.decoder.channel_count(),
      )?,
    };
    Ok((data, layout))
  }

  pub fn try_detect(&mut self, frame: &BgrFrame) -> Result<DetectResult, PipelineError> {
    let params = LetterboxParams::compute(
      frame.width(),
      frame.height(),
      self.binding.input_width,
      self.binding.input_height,
    )?;
    let image = params.apply(frame);
    let tensor = Tensor::from_rgb_image(&image, self.binding.input_layout);

    let outputs = self
      .engine
      .run(&self.binding.input_name, tensor)
      .map_err(|e| PipelineError::Engine(Box::new(e)))?;
    let output = outputs
      .into_iter()
      .find(|output| output.name == self.binding.output_name)
      .ok_or_else(|| PipelineError::OutputMissing(self.binding.output_name.clone()))?;

    let (data, layout) = self.channel_major(output)?;
    let candidates = self.decoder.decode(&data)?;

    // 动态形状的模型在第一次成功解码后固定布局
    if self.binding.output_layout.is_none() {
      debug!("输出通道顺序确定为 {:?}", layout);
      self.binding.output_layout = Some(layout);
    }

    let kept = self.suppressor.suppress(candidates);
    let items = kept
      .iter()
      .map(|detection| detection.reproject(&params, frame.width(), frame.height()))
      .collect::<Vec<_>>();

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }

  /// 出错时记录日志并返回空结果
  pub fn detect(&mut self, frame: &BgrFrame) -> DetectResult {
    self.try_detect(frame).unwrap_or_else(|e| {
      error!("检测失败: {}", e);
      DetectResult::default()
    })
  }
}

impl<E: InferenceEngine> Model for DetectionPipeline<E> {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.try_detect(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::engine::TensorSpec;

  struct Failing;

  impl InferenceEngine for Failing {
    type Error = EngineError;

    fn inputs(&self) -> &[TensorSpec] {
      static INPUTS: std::sync::OnceLock<Vec<TensorSpec>> = std::sync::OnceLock::new();
      INPUTS.get_or_init(|| vec![TensorSpec::new("image", [1, 3, 32, 32])])
    }

    fn outputs(&self) -> &[TensorSpec] {
      static OUTPUTS: std::sync::OnceLock<Vec<TensorSpec>> = std::sync::OnceLock::new();
      OUTPUTS.get_or_init(|| vec![TensorSpec::new("grid", [1, 30, 1, 1])])
    }

    fn run(&mut self, _: &str, _: Tensor) -> Result<Vec<OutputTensor>, Self::Error> {
      Err(EngineError::Inference("设备忙".to_string()))
    }
  }

  #[test]
  fn engine_failure_yields_empty_result() {
    let labels = Labels::parse("a").unwrap();
    let mut pipeline = DetectionPipeline::new(Failing, &DetectorConfig::default(), labels).unwrap();
    let frame = BgrFrame::black(64, 48).unwrap();

    assert!(matches!(
      pipeline.try_detect(&frame),
      Err(PipelineError::Engine(_))
    ));
    assert!(pipeline.detect(&frame).is_empty());
  }

  #[test]
  fn invalid_config_is_rejected_before_binding() {
    for config in [
      DetectorConfig {
        grid_cols: 0,
        ..DetectorConfig::default()
      },
      DetectorConfig {
        grid_rows: 0,
        ..DetectorConfig::default()
      },
      DetectorConfig {
        anchors: Vec::new(),
        ..DetectorConfig::default()
      },
    ] {
      let labels = Labels::parse("a").unwrap();
      assert!(matches!(
        DetectionPipeline::new(Failing, &config, labels),
        Err(PipelineError::Config(_))
      ));
    }
  }
}
