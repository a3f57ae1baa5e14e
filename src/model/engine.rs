// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/engine.rs - 推理引擎接口
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
use tracing::{debug, info, warn};

use crate::{
  config::DetectorConfig,
  model::tensor::{Tensor, TensorLayout},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineError {
  #[error("模型没有声明任何输入")]
  NoInput,
  #[error("模型没有声明任何输出")]
  NoOutput,
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 模型声明的张量，非正数维度表示动态尺寸
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
  pub name: String,
  pub shape: Vec<i64>,
}

impl TensorSpec {
  pub fn new(name: impl Into<String>, shape: impl Into<Vec<i64>>) -> Self {
    Self {
      name: name.into(),
      shape: shape.into(),
    }
  }
}

/// 一次推理产生的输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub name: String,
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

/// 推理后端。输入一个张量，返回全部命名输出。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  fn inputs(&self) -> &[TensorSpec];
  fn outputs(&self) -> &[TensorSpec];
  fn run(&mut self, input_name: &str, input: Tensor) -> Result<Vec<OutputTensor>, Self::Error>;
}

/// 初始化时解析一次的输入输出绑定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBinding {
  pub input_name: String,
  pub output_name: String,
  pub input_layout: TensorLayout,
  pub input_width: u32,
  pub input_height: u32,
  /// 模型声明了完整的输出形状时在这里确定，否则为 `None`
  pub output_layout: Option<TensorLayout>,
}

impl ModelBinding {
  /// 优先使用配置中的名称，模型里找不到时退回到第一个声明的张量。
  ///
  /// `class_count` 用来计算输出的通道数 `锚框数 * (5 + 类别数)`。
  pub fn resolve<E: InferenceEngine>(
    engine: &E,
    config: &DetectorConfig,
    class_count: usize,
  ) -> Result<Self, EngineError> {
    let input = pick(engine.inputs(), &config.input_name, "输入").ok_or(EngineError::NoInput)?;
    let output = pick(engine.outputs(), &config.output_name, "输出").ok_or(EngineError::NoOutput)?;

    let (input_layout, input_width, input_height) = TensorLayout::from_input_shape(
      &input.shape,
      config.default_input_width,
      config.default_input_height,
    );

    let channels = config.anchors_per_cell() * (5 + class_count);
    let output_layout = match TensorLayout::from_declared_output(
      &output.shape,
      channels,
      config.grid_rows,
      config.grid_cols,
    ) {
      Some((layout, guessed)) => {
        if guessed {
          warn!("无法从输出形状 {:?} 判断通道顺序, 按通道在前处理", output.shape);
        }
        Some(layout)
      }
      None => {
        debug!("输出 {} 的形状 {:?} 含动态维度, 推理时再判断通道顺序", output.name, output.shape);
        None
      }
    };

    info!(
      "模型绑定: 输入 {} {:?} {}x{}, 输出 {} {:?}",
      input.name, input_layout, input_width, input_height, output.name, output_layout
    );

    Ok(Self {
      input_name: input.name.clone(),
      output_name: output.name.clone(),
      input_layout,
      input_width,
      input_height,
      output_layout,
    })
  }
}

fn pick<'a>(specs: &'a [TensorSpec], wanted: &str, kind: &str) -> Option<&'a TensorSpec> {
  if let Some(spec) = specs.iter().find(|spec| spec.name == wanted) {
    debug!("使用配置的{}张量: {}", kind, wanted);
    return Some(spec);
  }

  let first = specs.first()?;
  warn!("模型中没有名为 {} 的{}张量, 改用 {}", wanted, kind, first.name);
  Some(first)
}
