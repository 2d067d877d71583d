// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/model.rs - 推理引擎
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
use thiserror::Error;
use url::Url;

use crate::FromUrl;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [y_min, x_min, y_max, x_max]，归一化坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

mod labels;
mod ssd;
pub use self::labels::LabelMap;
pub use self::ssd::{SsdLayout, decode_ssd};

#[cfg(not(any(feature = "model_tract", feature = "model_rknn")))]
compile_error!("至少需要启用一个推理后端: model_tract 或 model_rknn");

#[cfg(feature = "model_tract")]
mod tract_ssd;
#[cfg(feature = "model_tract")]
pub use self::tract_ssd::{TractSsd, TractSsdBuilder};

#[cfg(feature = "model_rknn")]
mod rknn_ssd;
#[cfg(feature = "model_rknn")]
pub use self::rknn_ssd::{RknnSsd, RknnSsdBuilder};

/// 根据 URL 方案选择推理后端
pub enum ModelWrapper {
  #[cfg(feature = "model_tract")]
  Tract(TractSsd),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnSsd),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_tract")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == TractSsdBuilder::SCHEME {
        return Ok(ModelWrapper::Tract(TractSsdBuilder::from_url(url)?.build()?));
      }
    }
    #[cfg(feature = "model_rknn")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnSsdBuilder::SCHEME {
        return Ok(ModelWrapper::Rknn(RknnSsdBuilder::from_url(url)?.build()?));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Model for ModelWrapper {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_tract")]
      ModelWrapper::Tract(model) => model.infer(input),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input),
    }
  }
}
