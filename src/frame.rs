// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/frame.rs - 帧与 NHWC 张量定义
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

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

/// 模型输入张量，NHWC 排列，batch 固定为 1
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  /// 将任意尺寸的图像缩放到模型输入尺寸
  pub fn from_image(image: &RgbImage, width: u32, height: u32) -> Self {
    let resized = if image.dimensions() == (width, height) {
      image.clone()
    } else {
      image::imageops::resize(image, width, height, FilterType::Triangle)
    };

    Self {
      width: width as usize,
      height: height as usize,
      data: resized.into_raw().into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 浮点模型的归一化输入：`(pixel - 127.5) / 127.5`
  pub fn to_normalized_f32(&self) -> Vec<f32> {
    self
      .data
      .iter()
      .map(|&p| (p as f32 - INPUT_MEAN) / INPUT_STD)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn resizes_to_model_shape() {
    let image = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
    let frame = RgbNhwcFrame::from_image(&image, 32, 32);
    assert_eq!(frame.width(), 32);
    assert_eq!(frame.height(), 32);
    assert_eq!(frame.as_nhwc().len(), 32 * 32 * 3);
    assert_eq!(&frame.as_nhwc()[..3], &[10, 20, 30]);
  }

  #[test]
  fn normalizes_around_mid_grey() {
    let image = RgbImage::from_pixel(2, 1, Rgb([0, 255, 128]));
    let frame = RgbNhwcFrame::from_image(&image, 2, 1);
    let values = frame.to_normalized_f32();
    assert_eq!(values[0], -1.0);
    assert_eq!(values[1], 1.0);
    assert!((values[2] - 0.5 / 127.5).abs() < 1e-6);
  }
}
