// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/output/draw.rs - 检测结果与 ROI 可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::roi::PixelBox;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BANNER_FONT_SIZE: f32 = 48.0;
const BANNER_MARGIN: i32 = 30;
const STATUS_STRIP_HEIGHT: u32 = 8;
const ROI_LINE_WIDTH: u32 = 5;

const ROI_COLOR: [u8; 3] = [0, 255, 0];
const BOX_COLOR: [u8; 3] = [0, 255, 10];
const LABEL_BACKGROUND: [u8; 3] = [255, 255, 255];
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];
const NODE_COLOR: [u8; 3] = [110, 255, 255];
const INVALID_COLOR: [u8; 3] = [255, 0, 0];

pub const NODE_DETECTED_TEXT: &str = "NODE  DETECTED";
pub const NOT_NODE_TEXT: &str = "INVALID!  NOT NODE";

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

/// 帧标注工具
///
/// 未配置字体时只绘制几何图形，判定结果改用画面底部的色条表示。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  fn vertical_line(image: &mut RgbImage, x: u32, color: [u8; 3]) {
    let (w, h) = image.dimensions();
    if x >= w {
      return;
    }
    let left = x.saturating_sub(ROI_LINE_WIDTH / 2);
    let width = (ROI_LINE_WIDTH).min(w - left);
    let rect = Rect::at(left as i32, 0).of_size(width, h);
    draw_filled_rect_mut(image, rect, Rgb(color));
  }

  /// ROI 带的左右两条竖线
  pub fn draw_roi_band(&self, image: &mut RgbImage, roi_start: u32, roi_end: u32) {
    Self::vertical_line(image, roi_start, ROI_COLOR);
    Self::vertical_line(image, roi_end, ROI_COLOR);
  }

  pub fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &PixelBox, label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    let x_min = bbox.xmin.clamp(0, w - 1);
    let y_min = bbox.ymin.clamp(0, h - 1);
    let x_max = bbox.xmax.clamp(0, w - 1);
    let y_max = bbox.ymax.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 绘制边框（加粗为2像素）
    for thickness in 0..2 {
      let width = (x_max - x_min - 2 * thickness).max(1) as u32;
      let height = (y_max - y_min - 2 * thickness).max(1) as u32;
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width, height);
      draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    // 估算文本大小，标签放在框的上方，贴近顶部时下移
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);

    let label_width = text_width.min(w - label_x).max(0) as u32;
    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, text_height as u32);
      draw_filled_rect_mut(image, rect, Rgb(LABEL_BACKGROUND));
      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }

  /// 画面底部的有效性提示
  pub fn draw_verdict(&self, image: &mut RgbImage, present: bool) {
    let (text, color) = if present {
      (NODE_DETECTED_TEXT, NODE_COLOR)
    } else {
      (NOT_NODE_TEXT, INVALID_COLOR)
    };

    let (w, h) = image.dimensions();
    match self.font.as_ref() {
      Some(font) => {
        let y = (h as i32 - BANNER_MARGIN - BANNER_FONT_SIZE as i32).max(0);
        draw_text_mut(
          image,
          Rgb(color),
          BANNER_MARGIN,
          y,
          PxScale::from(BANNER_FONT_SIZE),
          font,
          text,
        );
      }
      None => {
        let strip = STATUS_STRIP_HEIGHT.min(h);
        if strip > 0 && w > 0 {
          let rect = Rect::at(0, (h - strip) as i32).of_size(w, strip);
          draw_filled_rect_mut(image, rect, Rgb(color));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_strip_reflects_verdict_without_font() {
    let draw = Draw::default();
    let mut image = RgbImage::new(64, 64);
    draw.draw_verdict(&mut image, true);
    assert_eq!(*image.get_pixel(10, 63), Rgb(NODE_COLOR));
    draw.draw_verdict(&mut image, false);
    assert_eq!(*image.get_pixel(10, 63), Rgb(INVALID_COLOR));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let draw = Draw::default();
    let mut image = RgbImage::new(32, 32);
    let bbox = PixelBox {
      ymin: 10,
      xmin: 10,
      ymax: 10,
      xmax: 20,
    };
    draw.draw_bbox_with_label(&mut image, &bbox, "node: 90%");
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn band_lines_outside_frame_are_ignored() {
    let draw = Draw::default();
    let mut image = RgbImage::new(32, 8);
    draw.draw_roi_band(&mut image, 4, 40);
    assert_eq!(*image.get_pixel(4, 0), Rgb(ROI_COLOR));
    assert_eq!(*image.get_pixel(31, 0), Rgb([0, 0, 0]));
  }
}
