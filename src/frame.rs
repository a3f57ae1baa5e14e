// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidShape { width: u32, height: u32 },
  #[error("行跨度 {stride} 小于一行像素所需的 {min} 字节")]
  InvalidStride { stride: usize, min: usize },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 摄像头采集到的一帧图像，按行存储的 BGR 三通道数据。
///
/// 帧在采集、推理、渲染之间按所有权移动，不在热路径上复制。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  stride: usize,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn new(width: u32, height: u32, stride: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidShape { width, height });
    }

    let min = width as usize * BGR_CHANNELS;
    if stride < min {
      return Err(FrameError::InvalidStride { stride, min });
    }

    let expected = stride * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      stride,
      data: data.into_boxed_slice(),
    })
  }

  /// 紧凑存储（行跨度等于 `width * 3`）的帧
  pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    Self::new(width, height, width as usize * BGR_CHANNELS, data)
  }

  pub fn black(width: u32, height: u32) -> Result<Self, FrameError> {
    let size = width as usize * height as usize * BGR_CHANNELS;
    Self::from_packed(width, height, vec![0u8; size])
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  /// 第 `y` 行的有效像素（不含行尾填充）
  pub fn row(&self, y: u32) -> &[u8] {
    let start = y as usize * self.stride;
    &self.data[start..start + self.width as usize * BGR_CHANNELS]
  }

  /// (b, g, r)
  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let row = self.row(y);
    let idx = x as usize * BGR_CHANNELS;
    [row[idx], row[idx + 1], row[idx + 2]]
  }

  /// 转换为 RGB 图像（交换 B、R 通道）
  pub fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let [b, g, r] = self.pixel(x, y);
      Rgb([r, g, b])
    })
  }
}

impl TryFrom<&RgbImage> for BgrFrame {
  type Error = FrameError;

  fn try_from(image: &RgbImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(width as usize * height as usize * BGR_CHANNELS);
    for pixel in image.pixels() {
      let [r, g, b] = pixel.0;
      data.extend_from_slice(&[b, g, r]);
    }

    Self::from_packed(width, height, data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_short_stride() {
    let err = BgrFrame::new(4, 2, 8, vec![0; 16]).unwrap_err();
    assert_eq!(err, FrameError::InvalidStride { stride: 8, min: 12 });
  }

  #[test]
  fn rejects_wrong_length() {
    let err = BgrFrame::from_packed(2, 2, vec![0; 11]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn padded_rows_are_skipped() {
    // 2x2, 行跨度 8（每行 2 字节填充）
    let data = vec![
      1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
      7, 8, 9, 10, 11, 12, 0xEE, 0xEE,
    ];
    let frame = BgrFrame::new(2, 2, 8, data).unwrap();
    assert_eq!(frame.row(1), &[7, 8, 9, 10, 11, 12]);
    assert_eq!(frame.pixel(1, 0), [4, 5, 6]);

    let rgb = frame.to_rgb_image();
    assert_eq!(rgb.get_pixel(0, 0).0, [3, 2, 1]);
    assert_eq!(rgb.get_pixel(1, 1).0, [12, 11, 10]);
  }

  #[test]
  fn rgb_image_conversion_swaps_channels() {
    let image = RgbImage::from_pixel(3, 1, Rgb([10, 20, 30]));
    let frame = BgrFrame::try_from(&image).unwrap();
    assert_eq!(frame.pixel(2, 0), [30, 20, 10]);
    assert_eq!(frame.to_rgb_image(), image);
  }

  #[test]
  fn empty_rgb_image_is_rejected() {
    let image = RgbImage::new(0, 0);
    assert!(BgrFrame::try_from(&image).is_err());
    let image = RgbImage::new(5, 0);
    assert!(BgrFrame::try_from(&image).is_err());
  }
}
