// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tensor.rs - 输入张量
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 张量的维度顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  /// (1, C, H, W)
  ChannelFirst,
  /// (1, H, W, C)
  ChannelLast,
}

impl TensorLayout {
  /// 根据模型声明的输入形状判断布局以及输入尺寸 (宽, 高)。
  ///
  /// 形如 `[1, 3, H, W]` 视为通道在前；`[1, H, W, 3]` 且第二维不是 3 时视为通道在后；
  /// 无法区分时按通道在前处理。非正数（动态）维度用默认尺寸代替。
  pub fn from_input_shape(shape: &[i64], default_width: u32, default_height: u32) -> (Self, u32, u32) {
    let dim = |value: i64, fallback: u32| -> u32 {
      if value > 0 {
        u32::try_from(value).unwrap_or(fallback)
      } else {
        fallback
      }
    };

    if shape.len() != 4 {
      return (Self::ChannelFirst, default_width, default_height);
    }

    let channel_last = shape[3] == RGB_CHANNELS as i64 && shape[1] != RGB_CHANNELS as i64;
    if channel_last {
      (
        Self::ChannelLast,
        dim(shape[2], default_width),
        dim(shape[1], default_height),
      )
    } else {
      (
        Self::ChannelFirst,
        dim(shape[3], default_width),
        dim(shape[2], default_height),
      )
    }
  }
}

impl TensorLayout {
  /// 根据输出形状的最后三维判断通道位置，返回布局以及是否只能按默认值猜测。
  ///
  /// 首尾两维都等于通道数时，由网格的行列数决定；仍无法区分时按通道在前处理。
  pub fn from_output_shape(shape: &[usize], channels: usize, rows: usize, cols: usize) -> (Self, bool) {
    let Some(dims) = shape.len().checked_sub(3).map(|start| &shape[start..]) else {
      return (Self::ChannelFirst, true);
    };

    match (dims[0] == channels, dims[2] == channels) {
      (true, false) => (Self::ChannelFirst, false),
      (false, true) => (Self::ChannelLast, false),
      (true, true) => {
        let first = (dims[1], dims[2]) == (rows, cols);
        let last = (dims[0], dims[1]) == (rows, cols);
        match (first, last) {
          (true, false) => (Self::ChannelFirst, false),
          (false, true) => (Self::ChannelLast, false),
          _ => (Self::ChannelFirst, true),
        }
      }
      (false, false) => (Self::ChannelFirst, true),
    }
  }

  /// 模型声明的输出形状。最后三维中有动态维度时返回 `None`，留到推理时再判断。
  pub fn from_declared_output(
    shape: &[i64],
    channels: usize,
    rows: usize,
    cols: usize,
  ) -> Option<(Self, bool)> {
    let start = shape.len().checked_sub(3)?;
    let dims = shape[start..]
      .iter()
      .map(|&d| usize::try_from(d).ok().filter(|&d| d > 0))
      .collect::<Option<Vec<_>>>()?;
    Some(Self::from_output_shape(&dims, channels, rows, cols))
  }
}

/// 稠密的 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  pub shape: [usize; 4],
  pub layout: TensorLayout,
  pub data: Vec<f32>,
}

impl Tensor {
  /// 按给定布局把 RGB 图像转换为 `[0, 1]` 区间的浮点张量
  pub fn from_rgb_image(image: &RgbImage, layout: TensorLayout) -> Self {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; plane * RGB_CHANNELS];

    for (x, y, pixel) in image.enumerate_pixels() {
      let (x, y) = (x as usize, y as usize);
      for c in 0..RGB_CHANNELS {
        let value = pixel.0[c] as f32 / 255.0;
        let index = match layout {
          TensorLayout::ChannelFirst => c * plane + y * w + x,
          TensorLayout::ChannelLast => (y * w + x) * RGB_CHANNELS + c,
        };
        data[index] = value;
      }
    }

    let shape = match layout {
      TensorLayout::ChannelFirst => [1, RGB_CHANNELS, h, w],
      TensorLayout::ChannelLast => [1, h, w, RGB_CHANNELS],
    };

    Self {
      shape,
      layout,
      data,
    }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}
