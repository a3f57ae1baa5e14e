// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/lookout_camera.rs - 摄像头实时检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_lookout::{
  FromUrl,
  config::LoopConfig,
  input::InputWrapper,
  model::OnnxModelBuilder,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Shanan Lookout 摄像头检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 onnx:///opt/models/model.onnx?labels=/opt/models/labels.txt
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 v4l:///dev/video0 或 image:///tmp/a.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 folder:///var/lib/lookout 或 image:///tmp/out.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 两次取帧之间的等待（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 50)]
  pub poll_interval: u64,
  /// 出错后的等待（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 200)]
  pub error_backoff: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let model = OnnxModelBuilder::from_url(&args.model)?.build()?;
  let output = OutputWrapper::from_url(&args.output)?;

  let config = LoopConfig::default()
    .with_poll_interval(Duration::from_millis(args.poll_interval))
    .with_error_backoff(Duration::from_millis(args.error_backoff));

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_config(config)
    .run_task(input, model, output)?;

  Ok(())
}
