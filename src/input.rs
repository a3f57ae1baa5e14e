// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 摄像头输入
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

use crate::{FromUrl, frame::BgrFrame};

/// 采集设备。
///
/// `read_frame` 返回最新的一帧，暂时没有新帧时返回 `Ok(None)`。
/// 实现不需要缓存历史帧。
pub trait CameraSource: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn open(&mut self) -> Result<(), Self::Error>;
  fn read_frame(&mut self) -> Result<Option<BgrFrame>, Self::Error>;
  fn close(&mut self);
  fn is_open(&self) -> bool;
}

#[cfg(feature = "read_image_file")]
mod still_image;
#[cfg(feature = "read_image_file")]
pub use self::still_image::{StillImageCamera, StillImageError};

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::{V4lCamera, V4lCameraError};

#[derive(Error, Debug)]
pub enum CameraError {
  #[cfg(feature = "read_image_file")]
  #[error("静态图像输入错误: {0}")]
  StillImage(#[from] StillImageError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 摄像头错误: {0}")]
  V4l(#[from] V4lCameraError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  StillImage(StillImageCamera),
  #[cfg(feature = "v4l_input")]
  V4l(V4lCamera),
}

impl FromUrl for InputWrapper {
  type Error = CameraError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == StillImageCamera::SCHEME {
        return Ok(InputWrapper::StillImage(StillImageCamera::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lCamera::SCHEME {
        return Ok(InputWrapper::V4l(V4lCamera::from_url(url)?));
      }
    }
    Err(CameraError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl CameraSource for InputWrapper {
  type Error = CameraError;

  fn open(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(camera) => camera.open().map_err(CameraError::from),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(camera) => camera.open().map_err(CameraError::from),
    }
  }

  fn read_frame(&mut self) -> Result<Option<BgrFrame>, Self::Error> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(camera) => camera.read_frame().map_err(CameraError::from),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(camera) => camera.read_frame().map_err(CameraError::from),
    }
  }

  fn close(&mut self) {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(camera) => camera.close(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(camera) => camera.close(),
    }
  }

  fn is_open(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::StillImage(camera) => camera.is_open(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(camera) => camera.is_open(),
    }
  }
}
