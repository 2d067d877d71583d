// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/roi.rs - ROI 过线检测
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

//! 判断一帧中是否恰好有一个节点位于竖直 ROI 带内。
//!
//! 零个或多个候选都视为"非有效节点"：多个候选通常意味着遮挡或粘连，
//! 此时拒绝计数而不是猜测。

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  model::{DetectResult, LabelMap},
  output::draw::Draw,
};

/// 默认 ROI 带宽（像素）
pub const DEFAULT_BAND_WIDTH: u32 = 100;

#[derive(Error, Debug, PartialEq)]
pub enum RoiError {
  #[error("ROI 区间无效: 需要 0 < {start} < {end} < {width}")]
  InvalidBand { start: u32, end: u32, width: u32 },
  #[error("置信度阈值无效: {0}")]
  InvalidConfidence(f32),
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidFrame(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiConfig {
  roi_start: u32,
  roi_end: u32,
  frame_width: u32,
  frame_height: u32,
  confidence_threshold: f32,
}

impl RoiConfig {
  pub fn new(
    roi_start: u32,
    roi_end: u32,
    frame_width: u32,
    frame_height: u32,
    confidence_threshold: f32,
  ) -> Result<Self, RoiError> {
    if frame_width == 0 || frame_height == 0 {
      return Err(RoiError::InvalidFrame(frame_width, frame_height));
    }
    if !(0 < roi_start && roi_start < roi_end && roi_end < frame_width) {
      return Err(RoiError::InvalidBand {
        start: roi_start,
        end: roi_end,
        width: frame_width,
      });
    }
    if !(0.0..=1.0).contains(&confidence_threshold) {
      return Err(RoiError::InvalidConfidence(confidence_threshold));
    }

    Ok(Self {
      roi_start,
      roi_end,
      frame_width,
      frame_height,
      confidence_threshold,
    })
  }

  /// 以画面中线为中心、宽 100 像素的 ROI 带
  pub fn centered(
    frame_width: u32,
    frame_height: u32,
    confidence_threshold: f32,
  ) -> Result<Self, RoiError> {
    let roi_start = (frame_width / 2).saturating_sub(DEFAULT_BAND_WIDTH / 2);
    Self::new(
      roi_start,
      roi_start + DEFAULT_BAND_WIDTH,
      frame_width,
      frame_height,
      confidence_threshold,
    )
  }

  pub fn roi_start(&self) -> u32 {
    self.roi_start
  }

  pub fn roi_end(&self) -> u32 {
    self.roi_end
  }

  pub fn frame_width(&self) -> u32 {
    self.frame_width
  }

  pub fn frame_height(&self) -> u32 {
    self.frame_height
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  /// 严格位于 (roi_start, roi_end) 内
  pub fn contains_x(&self, x: i32) -> bool {
    x > self.roi_start as i32 && x < self.roi_end as i32
  }

  pub fn accepts_score(&self, score: f32) -> bool {
    score > self.confidence_threshold && score <= 1.0
  }

  /// 归一化 `[ymin, xmin, ymax, xmax]` 转像素坐标并裁剪到画面内
  pub fn clip(&self, bbox: &[f32; 4]) -> PixelBox {
    let w = self.frame_width as f32;
    let h = self.frame_height as f32;
    PixelBox {
      ymin: (bbox[0] * h).max(1.0) as i32,
      xmin: (bbox[1] * w).max(1.0) as i32,
      ymax: (bbox[2] * h).min(h) as i32,
      xmax: (bbox[3] * w).min(w) as i32,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub ymin: i32,
  pub xmin: i32,
  pub ymax: i32,
  pub xmax: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: PixelBox,
}

/// 单帧判定结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiVerdict {
  /// 恰好一个候选位于 ROI 带内
  pub present: bool,
  /// 通过置信度筛选且位于 ROI 带内的候选
  pub candidates: Vec<Candidate>,
}

pub struct RoiDetector {
  config: RoiConfig,
  draw: Draw,
}

impl RoiDetector {
  pub fn new(config: RoiConfig, draw: Draw) -> Self {
    Self { config, draw }
  }

  pub fn config(&self) -> &RoiConfig {
    &self.config
  }

  pub fn classify(&self, result: &DetectResult) -> RoiVerdict {
    let candidates: Vec<Candidate> = result
      .items
      .iter()
      .filter(|item| self.config.accepts_score(item.score))
      .filter_map(|item| {
        let bbox = self.config.clip(&item.bbox);
        self.config.contains_x(bbox.xmin).then_some(Candidate {
          class_id: item.class_id,
          score: item.score,
          bbox,
        })
      })
      .collect();

    debug!("ROI 带内候选数: {}", candidates.len());
    RoiVerdict {
      present: candidates.len() == 1,
      candidates,
    }
  }

  pub fn annotate(&self, image: &mut RgbImage, verdict: &RoiVerdict, labels: &LabelMap) {
    self
      .draw
      .draw_roi_band(image, self.config.roi_start, self.config.roi_end);
    for candidate in &verdict.candidates {
      let label = format!(
        "{}: {}%",
        labels.to_label_str(candidate.class_id),
        (candidate.score * 100.0) as i32
      );
      self.draw.draw_bbox_with_label(image, &candidate.bbox, &label);
    }
    self.draw.draw_verdict(image, verdict.present);
  }

  /// 判定并在帧上绘制标注
  pub fn evaluate(
    &self,
    image: &mut RgbImage,
    result: &DetectResult,
    labels: &LabelMap,
  ) -> RoiVerdict {
    let verdict = self.classify(result);
    self.annotate(image, &verdict, labels);
    verdict
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use image::Rgb;

  // 512 为 2 的幂，像素坐标与归一化坐标可以精确互换
  const SIZE: u32 = 512;

  fn detector() -> RoiDetector {
    let config = RoiConfig::new(200, 300, SIZE, SIZE, 0.5).unwrap();
    RoiDetector::new(config, Draw::default())
  }

  fn item_at(xmin_px: u32, score: f32) -> DetectItem {
    let x = xmin_px as f32 / SIZE as f32;
    DetectItem {
      class_id: 0,
      score,
      bbox: [0.25, x, 0.75, (x + 0.1).min(1.0)],
    }
  }

  #[test]
  fn rejects_invalid_bands() {
    assert!(RoiConfig::new(0, 100, 640, 480, 0.5).is_err());
    assert!(RoiConfig::new(300, 300, 640, 480, 0.5).is_err());
    assert!(RoiConfig::new(300, 640, 640, 480, 0.5).is_err());
    assert!(RoiConfig::new(100, 200, 640, 480, 1.5).is_err());
  }

  #[test]
  fn centered_band_matches_default_layout() {
    let config = RoiConfig::centered(640, 480, 0.5).unwrap();
    assert_eq!((config.roi_start(), config.roi_end()), (270, 370));
  }

  #[test]
  fn band_edges_are_exclusive() {
    let detector = detector();
    let on_edge = DetectResult::from(vec![item_at(200, 0.9)]);
    assert!(!detector.classify(&on_edge).present);

    let inside = DetectResult::from(vec![item_at(201, 0.9)]);
    assert!(detector.classify(&inside).present);

    let far_edge = DetectResult::from(vec![item_at(300, 0.9)]);
    assert!(!detector.classify(&far_edge).present);
  }

  #[test]
  fn multiple_nodes_in_band_are_ambiguous() {
    let detector = detector();
    let result = DetectResult::from(vec![item_at(220, 0.9), item_at(260, 0.8)]);
    let verdict = detector.classify(&result);
    assert_eq!(verdict.candidates.len(), 2);
    assert!(!verdict.present);
  }

  #[test]
  fn confidence_filter_is_strict_and_capped() {
    let detector = detector();
    let result = DetectResult::from(vec![item_at(250, 0.5), item_at(250, 1.2)]);
    assert!(detector.classify(&result).candidates.is_empty());

    let result = DetectResult::from(vec![item_at(250, 0.5), item_at(250, 1.0)]);
    assert!(detector.classify(&result).present);
  }

  #[test]
  fn low_confidence_outside_band_does_not_spoil_single_node() {
    let detector = detector();
    let result = DetectResult::from(vec![
      item_at(250, 0.9),
      item_at(400, 0.95),
      item_at(260, 0.3),
    ]);
    assert!(detector.classify(&result).present);
  }

  #[test]
  fn clip_keeps_boxes_inside_frame() {
    let config = RoiConfig::new(200, 300, SIZE, SIZE, 0.5).unwrap();
    let clipped = config.clip(&[-0.2, -0.1, 1.3, 1.1]);
    assert_eq!(
      clipped,
      PixelBox {
        ymin: 1,
        xmin: 1,
        ymax: SIZE as i32,
        xmax: SIZE as i32
      }
    );
  }

  #[test]
  fn evaluate_always_draws_the_band() {
    let detector = detector();
    let mut image = RgbImage::from_pixel(SIZE, SIZE, Rgb([0, 0, 0]));
    let verdict = detector.evaluate(&mut image, &DetectResult::default(), &LabelMap::default());
    assert!(!verdict.present);
    assert_eq!(*image.get_pixel(200, 10), Rgb([0, 255, 0]));
    assert_eq!(*image.get_pixel(300, 10), Rgb([0, 255, 0]));
  }
}
