// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/model/labels.rs - 标签映射
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

use tracing::{debug, info};

use super::ModelError;

/// 标签文件，每行一个类别名，行号即类别索引
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  labels: Vec<String>,
}

impl LabelMap {
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let labels = Self::parse(&content);
    if labels.is_empty() {
      return Err(ModelError::ModelInvalid(format!(
        "标签文件为空: {}",
        path.display()
      )));
    }
    debug!("标签数量: {}", labels.len());
    Ok(Self { labels })
  }

  pub fn parse(content: &str) -> Vec<String> {
    content.lines().map(|line| line.trim().to_string()).collect()
  }

  pub fn to_label_str(&self, class_id: u32) -> String {
    self
      .labels
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("class {}", class_id))
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

impl From<Vec<String>> for LabelMap {
  fn from(labels: Vec<String>) -> Self {
    Self { labels }
  }
}
