// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/still_image.rs - 静态图像输入
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

use std::path::PathBuf;

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{BgrFrame, FrameError},
  input::CameraSource,
  url_path,
};

#[derive(Error, Debug)]
pub enum StillImageError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("图像无效: {0}")]
  Frame(#[from] FrameError),
  #[error("设备未打开")]
  NotOpen,
}

enum Source {
  File(PathBuf),
  Frame(BgrFrame),
}

/// 把一张图片当作摄像头使用。
///
/// 默认每次读取都返回同一帧；URL 带 `once` 参数时只返回一次，之后一直是"暂无新帧"。
pub struct StillImageCamera {
  source: Source,
  once: bool,
  frame: Option<BgrFrame>,
  served: bool,
}

impl FromUrlWithScheme for StillImageCamera {
  const SCHEME: &'static str = "image";
}

impl FromUrl for StillImageCamera {
  type Error = StillImageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(StillImageError::SchemeMismatch);
    }

    let once = url.query_pairs().any(|(k, _)| k == "once");
    Ok(Self {
      source: Source::File(PathBuf::from(url_path(url))),
      once,
      frame: None,
      served: false,
    })
  }
}

impl StillImageCamera {
  /// 直接使用内存中的帧
  pub fn from_frame(frame: BgrFrame) -> Self {
    Self {
      source: Source::Frame(frame),
      once: false,
      frame: None,
      served: false,
    }
  }

  pub fn once(mut self, once: bool) -> Self {
    self.once = once;
    self
  }
}

impl CameraSource for StillImageCamera {
  type Error = StillImageError;

  fn open(&mut self) -> Result<(), Self::Error> {
    let frame = match &self.source {
      Source::File(path) => {
        info!("读取图像文件: {}", path.display());
        let image = ImageReader::open(path)?.decode()?.to_rgb8();
        BgrFrame::try_from(&image)?
      }
      Source::Frame(frame) => frame.clone(),
    };
    debug!("图像尺寸: {}x{}", frame.width(), frame.height());

    self.frame = Some(frame);
    self.served = false;
    Ok(())
  }

  fn read_frame(&mut self) -> Result<Option<BgrFrame>, Self::Error> {
    let frame = self.frame.as_ref().ok_or(StillImageError::NotOpen)?;
    if self.once && self.served {
      return Ok(None);
    }
    self.served = true;
    Ok(Some(frame.clone()))
  }

  fn close(&mut self) {
    self.frame = None;
  }

  fn is_open(&self) -> bool {
    self.frame.is_some()
  }
}
