// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::path::{Path, PathBuf};

use ort::{session::Session, value::Tensor as OrtTensor};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, DetectorConfig},
  model::{
    engine::{InferenceEngine, OutputTensor, TensorSpec},
    labels::{LabelError, Labels},
    pipeline::{DetectionPipeline, PipelineError},
    tensor::Tensor,
  },
  url_path,
};

const DEFAULT_LABEL_FILE: &str = "labels.txt";

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("检测参数错误: {0}")]
  Config(#[from] ConfigError),
  #[error("标签错误: {0}")]
  Labels(#[from] LabelError),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(String),
  #[error("检测管线错误: {0}")]
  Pipeline(#[from] PipelineError),
}

impl From<ort::Error> for OnnxError {
  fn from(err: ort::Error) -> Self {
    OnnxError::Ort(err.to_string())
  }
}

/// ONNX Runtime 会话
pub struct OnnxEngine {
  session: Session,
  inputs: Vec<TensorSpec>,
  outputs: Vec<TensorSpec>,
}

impl OnnxEngine {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, OnnxError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());
    let session = Session::builder()
      .map_err(|e| OnnxError::Ort(e.to_string()))?
      .commit_from_file(path)
      .map_err(|e| OnnxError::Ort(e.to_string()))?;

    let inputs = session
      .inputs
      .iter()
      .map(|input| {
        let shape = input
          .input_type
          .tensor_shape()
          .map(|shape| shape.to_vec())
          .unwrap_or_default();
        TensorSpec::new(input.name.as_str(), shape)
      })
      .collect::<Vec<_>>();
    let outputs = session
      .outputs
      .iter()
      .map(|output| {
        let shape = output
          .output_type
          .tensor_shape()
          .map(|shape| shape.to_vec())
          .unwrap_or_default();
        TensorSpec::new(output.name.as_str(), shape)
      })
      .collect::<Vec<_>>();

    debug!("模型输入: {:?}", inputs);
    debug!("模型输出: {:?}", outputs);
    info!("模型加载完成");

    Ok(Self {
      session,
      inputs,
      outputs,
    })
  }
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxError;

  fn inputs(&self) -> &[TensorSpec] {
    &self.inputs
  }

  fn outputs(&self) -> &[TensorSpec] {
    &self.outputs
  }

  fn run(&mut self, input_name: &str, input: Tensor) -> Result<Vec<OutputTensor>, Self::Error> {
    let value = OrtTensor::from_array((input.shape, input.data.into_boxed_slice()))?;
    let outputs = self.session.run(ort::inputs![input_name => value])?;

    let mut tensors = Vec::new();
    for (name, value) in outputs.iter() {
      let (shape, data) = match value.try_extract_tensor::<f32>() {
        Ok(extracted) => extracted,
        Err(e) => {
          debug!("跳过非 f32 输出 {}: {}", name, e);
          continue;
        }
      };
      tensors.push(OutputTensor {
        name: name.to_string(),
        shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
        data: data.to_vec(),
      });
    }

    Ok(tensors)
  }
}

/// 由 `onnx:///path/model.onnx?labels=/path/labels.txt&score=0.3` 构造检测管线。
///
/// 未指定 `labels` 时读取模型同目录下的 `labels.txt`。
pub struct OnnxModelBuilder {
  model_path: PathBuf,
  labels_path: PathBuf,
  config: DetectorConfig,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let model_path = PathBuf::from(url_path(url));
    if model_path.as_os_str().is_empty() || model_path == Path::new("/") {
      return Err(OnnxError::ModelPath(url.to_string()));
    }

    let labels_path = url
      .query_pairs()
      .find(|(k, _)| k == "labels")
      .map(|(_, v)| PathBuf::from(v.as_ref()))
      .unwrap_or_else(|| model_path.with_file_name(DEFAULT_LABEL_FILE));

    Ok(Self {
      model_path,
      labels_path,
      config: DetectorConfig::from_url(url)?,
    })
  }
}

impl OnnxModelBuilder {
  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn labels_path(&self) -> &Path {
    &self.labels_path
  }

  pub fn build(self) -> Result<DetectionPipeline<OnnxEngine>, OnnxError> {
    let labels = Labels::from_file(&self.labels_path).inspect_err(|e| {
      error!("加载标签文件 {} 失败: {}", self.labels_path.display(), e);
    })?;
    let engine = OnnxEngine::load(&self.model_path)?;
    Ok(DetectionPipeline::new(engine, &self.config, labels)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_url() {
    let url = Url::parse("onnx:///opt/models/model.onnx?score=0.4").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/opt/models/model.onnx"));
    assert_eq!(builder.labels_path(), Path::new("/opt/models/labels.txt"));
    assert_eq!(builder.config.score_threshold, 0.4);
  }

  #[test]
  fn explicit_labels_path() {
    let url = Url::parse("onnx:///m/model.onnx?labels=/etc/lookout/labels.txt").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.labels_path(), Path::new("/etc/lookout/labels.txt"));
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("yolo:///m/model.onnx").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn missing_labels_fail_before_loading_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.onnx");
    let url = Url::parse(&format!("onnx://{}", model.display())).unwrap();
    let result = OnnxModelBuilder::from_url(&url).unwrap().build();
    assert!(matches!(result, Err(OnnxError::Labels(LabelError::Io(_)))));
  }
}
