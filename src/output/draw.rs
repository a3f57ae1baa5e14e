// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::BgrFrame,
  geometry::FrameSpace,
  model::{DetectResult, Detection, PALETTE_SIZE},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
const BOX_THICKNESS: i32 = 3;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
// 标签底色: 红色, 不透明度 200/255
const LABEL_BACKGROUND: [u8; 3] = [255, 0, 0];
const LABEL_BACKGROUND_ALPHA: u8 = 200;

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// 按类别编号取色
pub const PALETTE: [[u8; 3]; PALETTE_SIZE] = [
  [255, 0, 0],     // Red
  [0, 0, 255],     // Blue
  [0, 255, 0],     // Lime
  [255, 165, 0],   // Orange
  [128, 0, 128],   // Purple
  [0, 255, 255],   // Cyan
  [255, 0, 255],   // Magenta
  [154, 205, 50],  // YellowGreen
  [255, 20, 147],  // DeepPink
  [255, 215, 0],   // Gold
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub fn palette_color(color_index: usize) -> Rgb<u8> {
  Rgb(PALETTE[color_index % PALETTE_SIZE])
}

/// `"{label} {置信度百分比}%"`
pub fn caption(detection: &Detection<FrameSpace>) -> String {
  format!(
    "{} {:.0}%",
    detection.label,
    detection.confidence * 100.0
  )
}

/// 在帧上绘制检测框和标签。字体加载失败时只画框。
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
}

impl Default for Draw {
  /// 使用内置的 DejaVu Sans 字体
  fn default() -> Self {
    let font = FontArc::try_from_slice(DEFAULT_FONT)
      .map_err(|e| warn!("内置字体无效, 不绘制标签: {}", e))
      .ok();
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  /// 只画框，不画标签
  pub fn boxes_only() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }

  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    Ok(Self {
      font: Some(font),
      font_size: LABEL_FONT_SIZE,
    })
  }

  /// URL 中 `font` 参数指定的字体，未指定时使用内置字体
  pub fn from_query(url: &url::Url) -> Result<Self, DrawError> {
    match url.query_pairs().find(|(k, _)| k == "font") {
      Some((_, path)) => Self::with_font_file(path.as_ref()),
      None => Ok(Self::default()),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detection(&self, frame: &BgrFrame, result: &DetectResult) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    image
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for detection in result.iter() {
      self.draw_bbox_with_label(image, detection);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection<FrameSpace>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let bbox = &detection.bbox;

    let x_min = (bbox.x.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.y.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.right().ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox.bottom().ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = palette_color(detection.color_index);
    for t in 0..BOX_THICKNESS {
      let (width, height) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let text = caption(detection);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &text);
    let label_w = (text_w + 2 * LABEL_PADDING).min((w - x_min) as u32);
    let label_h = text_h + 2 * LABEL_PADDING;
    // 框上方放不下时画在框内
    let label_y = if y_min >= label_h as i32 {
      y_min - label_h as i32
    } else {
      y_min
    };

    if label_w == 0 {
      return;
    }

    blend_rect(
      image,
      x_min as u32,
      label_y.max(0) as u32,
      label_w,
      label_h,
      LABEL_BACKGROUND,
      LABEL_BACKGROUND_ALPHA,
    );
    draw_text_mut(
      image,
      Rgb(TEXT_COLOR),
      x_min + LABEL_PADDING as i32,
      label_y + LABEL_PADDING as i32,
      scale,
      font,
      &text,
    );
  }
}

/// 以 `alpha / 255` 的不透明度把 `color` 叠加到矩形区域，超出图像的部分忽略
fn blend_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: [u8; 3], alpha: u8) {
  let a = alpha as u32;
  let x_end = x.saturating_add(w).min(image.width());
  let y_end = y.saturating_add(h).min(image.height());
  for py in y..y_end {
    for px in x..x_end {
      let pixel = image.get_pixel_mut(px, py);
      for (dst, src) in pixel.0.iter_mut().zip(color) {
        *dst = ((src as u32 * a + *dst as u32 * (255 - a) + 127) / 255) as u8;
      }
    }
  }
}
