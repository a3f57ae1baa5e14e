// 该文件是 Shanan （山南西风） 项目的一部分。
// src/letterbox.rs - 等比缩放加黑边
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

use image::{RgbImage, imageops};
use thiserror::Error;

use crate::{
  frame::BgrFrame,
  geometry::{BoundingBox, FrameSpace, ModelSpace, Point},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("源图像尺寸无效: {width}x{height}")]
  InvalidSource { width: u32, height: u32 },
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidTarget { width: u32, height: u32 },
}

/// 一次 letterbox 的缩放与偏移参数。
///
/// `offset_x + scaled_width <= target_width`，Y 方向同理。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
  pub scale: f32,
  pub offset_x: u32,
  pub offset_y: u32,
  pub scaled_width: u32,
  pub scaled_height: u32,
  pub target_width: u32,
  pub target_height: u32,
}

impl LetterboxParams {
  pub fn compute(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, LetterboxError> {
    if source_width == 0 || source_height == 0 {
      return Err(LetterboxError::InvalidSource {
        width: source_width,
        height: source_height,
      });
    }
    if target_width == 0 || target_height == 0 {
      return Err(LetterboxError::InvalidTarget {
        width: target_width,
        height: target_height,
      });
    }

    let scale = f32::min(
      target_width as f32 / source_width as f32,
      target_height as f32 / source_height as f32,
    );

    // 浮点误差可能让 round 结果超出目标 1 个像素
    let scaled_width = ((source_width as f32 * scale).round() as u32).clamp(1, target_width);
    let scaled_height = ((source_height as f32 * scale).round() as u32).clamp(1, target_height);

    Ok(Self {
      scale,
      offset_x: (target_width - scaled_width) / 2,
      offset_y: (target_height - scaled_height) / 2,
      scaled_width,
      scaled_height,
      target_width,
      target_height,
    })
  }

  pub fn forward(&self, point: Point<FrameSpace>) -> Point<ModelSpace> {
    Point::new(
      point.x * self.scale + self.offset_x as f32,
      point.y * self.scale + self.offset_y as f32,
    )
  }

  pub fn forward_box(&self, bbox: &BoundingBox<FrameSpace>) -> BoundingBox<ModelSpace> {
    let top_left = self.forward(bbox.top_left());
    BoundingBox::new(
      top_left.x,
      top_left.y,
      bbox.width * self.scale,
      bbox.height * self.scale,
    )
  }

  /// 把模型坐标映射回原始帧坐标。
  ///
  /// 位置限制在 `[0, dim - 1]`，宽高限制在 `[0, dim - position]`，
  /// 因此结果一定落在原始帧内部。
  pub fn inverse(
    &self,
    bbox: &BoundingBox<ModelSpace>,
    original_width: u32,
    original_height: u32,
  ) -> BoundingBox<FrameSpace> {
    let frame_w = original_width as f32;
    let frame_h = original_height as f32;

    let x = ((bbox.x - self.offset_x as f32) / self.scale).clamp(0.0, (frame_w - 1.0).max(0.0));
    let y = ((bbox.y - self.offset_y as f32) / self.scale).clamp(0.0, (frame_h - 1.0).max(0.0));
    let width = (bbox.width / self.scale).clamp(0.0, frame_w - x);
    let height = (bbox.height / self.scale).clamp(0.0, frame_h - y);

    BoundingBox::new(x, y, width, height)
  }

  /// 缩放帧并贴到黑色画布上，同时完成 BGR 到 RGB 的转换
  pub fn apply(&self, frame: &BgrFrame) -> RgbImage {
    let source = frame.to_rgb_image();
    let resized = if source.dimensions() == (self.scaled_width, self.scaled_height) {
      source
    } else {
      imageops::resize(
        &source,
        self.scaled_width,
        self.scaled_height,
        imageops::FilterType::Triangle,
      )
    };

    if resized.dimensions() == (self.target_width, self.target_height) {
      return resized;
    }

    let mut canvas = RgbImage::new(self.target_width, self.target_height);
    imageops::replace(
      &mut canvas,
      &resized,
      self.offset_x as i64,
      self.offset_y as i64,
    );
    canvas
  }
}
