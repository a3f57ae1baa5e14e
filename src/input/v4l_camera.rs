// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头输入
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

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::{Capture, capture::Parameters},
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{BgrFrame, FrameError},
  input::CameraSource,
  url_path,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FPS: u32 = 30;
const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lCameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {0} 的取值无效: {1}")]
  InvalidParameter(String, String),
  #[error("V4L 错误: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("MJPG 解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("帧数据长度不足: 期望 {expected}, 实际 {actual}")]
  ShortBuffer { expected: usize, actual: usize },
  #[error("帧无效: {0}")]
  Frame(#[from] FrameError),
  #[error("设备未打开")]
  NotOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
  Rgb3,
  Bgr3,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Result<Self, V4lCameraError> {
    match &fourcc.repr {
      b"YUYV" => Ok(PixelFormat::Yuyv),
      b"MJPG" => Ok(PixelFormat::Mjpg),
      b"RGB3" => Ok(PixelFormat::Rgb3),
      b"BGR3" => Ok(PixelFormat::Bgr3),
      _ => Err(V4lCameraError::UnsupportedPixelFormat(fourcc.to_string())),
    }
  }
}

// 字段顺序保证 stream 先于 device 释放
struct Opened {
  stream: Stream<'static>,
  _device: Device,
  format: PixelFormat,
  width: u32,
  height: u32,
}

/// `v4l:///dev/video0?width=1920&height=1080&fps=30`
pub struct V4lCamera {
  device_path: String,
  width: u32,
  height: u32,
  fps: u32,
  opened: Option<Opened>,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

fn parse_u32(key: &str, value: &str) -> Result<u32, V4lCameraError> {
  value
    .parse()
    .map_err(|_| V4lCameraError::InvalidParameter(key.to_string(), value.to_string()))
}

impl FromUrl for V4lCamera {
  type Error = V4lCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lCameraError::SchemeMismatch);
    }

    let path = url_path(url);
    let device_path = if path.is_empty() || path == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      path
    };

    let mut camera = Self {
      device_path,
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
      fps: DEFAULT_FPS,
      opened: None,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => camera.width = parse_u32(&key, &value)?,
        "height" => camera.height = parse_u32(&key, &value)?,
        "fps" => camera.fps = parse_u32(&key, &value)?,
        _ => {}
      }
    }

    Ok(camera)
  }
}

impl V4lCamera {
  pub fn device_path(&self) -> &str {
    &self.device_path
  }

  fn open_device(&self) -> Result<Opened, V4lCameraError> {
    info!("打开摄像头设备: {}", self.device_path);
    let device = Device::with_path(&self.device_path)?;

    let mut format = device.format()?;
    format.width = self.width;
    format.height = self.height;
    format.fourcc = FourCC::new(b"MJPG");
    let format = device.set_format(&format)?;
    let pixel_format = PixelFormat::from_fourcc(format.fourcc)?;

    if (format.width, format.height) != (self.width, self.height) {
      warn!(
        "摄像头不支持 {}x{}, 实际分辨率 {}x{}",
        self.width, self.height, format.width, format.height
      );
    }

    if let Err(e) = device.set_params(&Parameters::with_fps(self.fps)) {
      warn!("设置帧率 {} 失败: {}", self.fps, e);
    }

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
    debug!(
      "摄像头格式: {} {}x{}",
      format.fourcc, format.width, format.height
    );

    Ok(Opened {
      stream,
      _device: device,
      format: pixel_format,
      width: format.width,
      height: format.height,
    })
  }
}

fn yuyv_to_bgr(yuyv: &[u8], width: u32, height: u32) -> Result<BgrFrame, V4lCameraError> {
  let expected = width as usize * height as usize * 2;
  if yuyv.len() < expected {
    return Err(V4lCameraError::ShortBuffer {
      expected,
      actual: yuyv.len(),
    });
  }

  let mut bgr = Vec::with_capacity(width as usize * height as usize * 3);
  for chunk in yuyv[..expected].chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      bgr.extend_from_slice(&[b, g, r]);
    }
  }

  BgrFrame::from_packed(width, height, bgr).map_err(|_| V4lCameraError::ShortBuffer {
    expected,
    actual: yuyv.len(),
  })
}

fn packed_to_bgr(data: &[u8], width: u32, height: u32, swap: bool) -> Result<BgrFrame, V4lCameraError> {
  let expected = width as usize * height as usize * 3;
  if data.len() < expected {
    return Err(V4lCameraError::ShortBuffer {
      expected,
      actual: data.len(),
    });
  }

  let mut bgr = data[..expected].to_vec();
  if swap {
    for pixel in bgr.chunks_exact_mut(3) {
      pixel.swap(0, 2);
    }
  }

  BgrFrame::from_packed(width, height, bgr).map_err(|_| V4lCameraError::ShortBuffer {
    expected,
    actual: data.len(),
  })
}

impl CameraSource for V4lCamera {
  type Error = V4lCameraError;

  fn open(&mut self) -> Result<(), Self::Error> {
    if self.opened.is_some() {
      return Ok(());
    }
    self.opened = Some(self.open_device()?);
    Ok(())
  }

  fn read_frame(&mut self) -> Result<Option<BgrFrame>, Self::Error> {
    let opened = self.opened.as_mut().ok_or(V4lCameraError::NotOpen)?;
    let (format, width, height) = (opened.format, opened.width, opened.height);
    let (buffer, meta) = opened.stream.next()?;

    let used = match meta.bytesused as usize {
      0 => buffer.len(),
      n => n.min(buffer.len()),
    };
    let data = &buffer[..used];
    if data.is_empty() {
      return Ok(None);
    }

    let frame = match format {
      PixelFormat::Yuyv => yuyv_to_bgr(data, width, height)?,
      PixelFormat::Rgb3 => packed_to_bgr(data, width, height, true)?,
      PixelFormat::Bgr3 => packed_to_bgr(data, width, height, false)?,
      PixelFormat::Mjpg => {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8();
        BgrFrame::try_from(&image)?
      }
    };

    Ok(Some(frame))
  }

  fn close(&mut self) {
    if self.opened.take().is_some() {
      info!("关闭摄像头设备: {}", self.device_path);
    }
  }

  fn is_open(&self) -> bool {
    self.opened.is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_defaults() {
    let camera = V4lCamera::from_url(&Url::parse("v4l:///dev/video2").unwrap()).unwrap();
    assert_eq!(camera.device_path(), "/dev/video2");
    assert_eq!((camera.width, camera.height, camera.fps), (1920, 1080, 30));
    assert!(!camera.is_open());
  }

  #[test]
  fn url_overrides() {
    let url = Url::parse("v4l:///?width=640&height=480&fps=15").unwrap();
    let camera = V4lCamera::from_url(&url).unwrap();
    assert_eq!(camera.device_path(), DEFAULT_DEVICE);
    assert_eq!((camera.width, camera.height, camera.fps), (640, 480, 15));
  }

  #[test]
  fn yuyv_gray_converts_to_gray() {
    let frame = yuyv_to_bgr(&[128, 128, 128, 128], 2, 1).unwrap();
    assert_eq!(frame.pixel(0, 0), [128, 128, 128]);
    assert_eq!(frame.pixel(1, 0), [128, 128, 128]);
  }

  #[test]
  fn rgb3_is_swapped() {
    let frame = packed_to_bgr(&[1, 2, 3], 1, 1, true).unwrap();
    assert_eq!(frame.pixel(0, 0), [3, 2, 1]);
    assert!(matches!(
      packed_to_bgr(&[1, 2], 1, 1, false),
      Err(V4lCameraError::ShortBuffer { .. })
    ));
  }

  #[test]
  fn read_without_open_fails() {
    let mut camera = V4lCamera::from_url(&Url::parse("v4l:///dev/video9").unwrap()).unwrap();
    assert!(matches!(camera.read_frame(), Err(V4lCameraError::NotOpen)));
  }
}
