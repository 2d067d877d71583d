// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/model/ssd.rs - SSD 检测头后处理
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

use tracing::{debug, warn};
use url::Url;

use super::{DetectItem, DetectResult};
use crate::query_value;

/// SSD 模型四个输出张量的索引
///
/// 默认顺序与 TF2 导出的检测模型一致：分数、框、数量、类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsdLayout {
  pub scores: usize,
  pub boxes: usize,
  pub count: usize,
  pub classes: usize,
}

impl Default for SsdLayout {
  fn default() -> Self {
    Self {
      scores: 0,
      boxes: 1,
      count: 2,
      classes: 3,
    }
  }
}

impl SsdLayout {
  /// 从 `?scores=0&boxes=1&count=2&classes=3` 读取，缺省项保持默认
  pub fn from_url(url: &Url) -> Self {
    let default = Self::default();
    Self {
      scores: query_value(url, "scores").unwrap_or(default.scores),
      boxes: query_value(url, "boxes").unwrap_or(default.boxes),
      count: query_value(url, "count").unwrap_or(default.count),
      classes: query_value(url, "classes").unwrap_or(default.classes),
    }
  }

  pub fn outputs(&self) -> usize {
    [self.scores, self.boxes, self.count, self.classes]
      .into_iter()
      .max()
      .map_or(0, |m| m + 1)
  }
}

/// 将 SSD 输出解码为检测结果
///
/// `boxes` 每 4 个数为一个 `[ymin, xmin, ymax, xmax]`；`count` 为模型报告的
/// 有效检测数，缺省时以三个张量中最短者为准。
pub fn decode_ssd(
  boxes: &[f32],
  classes: &[f32],
  scores: &[f32],
  count: Option<f32>,
) -> DetectResult {
  let available = scores.len().min(classes.len()).min(boxes.len() / 4);
  let n = match count {
    Some(c) if c.is_finite() && c >= 0.0 => (c as usize).min(available),
    Some(c) => {
      warn!("模型报告的检测数量无效: {}", c);
      available
    }
    None => available,
  };

  let items: Vec<DetectItem> = (0..n)
    .map(|i| DetectItem {
      class_id: classes[i].max(0.0) as u32,
      score: scores[i],
      bbox: [
        boxes[i * 4],
        boxes[i * 4 + 1],
        boxes[i * 4 + 2],
        boxes[i * 4 + 3],
      ],
    })
    .collect();

  debug!("解码得到 {} 个候选框", items.len());
  DetectResult::from(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_up_to_reported_count() {
    let boxes = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
    let classes = [0.0, 2.0];
    let scores = [0.9, 0.4];
    let result = decode_ssd(&boxes, &classes, &scores, Some(1.0));
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].bbox, [0.1, 0.2, 0.3, 0.4]);
    assert_eq!(result.items[0].class_id, 0);
  }

  #[test]
  fn truncates_to_shortest_tensor() {
    let boxes = [0.0; 8];
    let classes = [1.0, 1.0, 1.0];
    let scores = [0.5, 0.6, 0.7];
    let result = decode_ssd(&boxes, &classes, &scores, Some(10.0));
    assert_eq!(result.len(), 2);
  }

  #[test]
  fn layout_reads_query_overrides() {
    let url = Url::parse("onnx:///m.onnx?boxes=0&scores=1").unwrap();
    let layout = SsdLayout::from_url(&url);
    assert_eq!(layout.boxes, 0);
    assert_eq!(layout.scores, 1);
    assert_eq!(layout.classes, 3);
    assert_eq!(layout.outputs(), 4);
  }
}
