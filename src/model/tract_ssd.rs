// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/model/tract_ssd.rs - 基于 tract 的 SSD 推理后端
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

use image::RgbImage;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use super::{DetectResult, Model, ModelError, SsdLayout, decode_ssd};
use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame, query_value};

const DEFAULT_INPUT_SIZE: u32 = 320;

/// 输入张量的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
  /// 量化模型，直接输入 0..255 像素
  Quantized,
  /// 浮点模型，输入经过 `(p - 127.5) / 127.5` 归一化
  Float,
}

pub struct TractSsdBuilder {
  model_path: String,
  width: u32,
  height: u32,
  input_kind: InputKind,
  layout: SsdLayout,
}

impl FromUrlWithScheme for TractSsdBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractSsdBuilder {
  type Error = ModelError;

  /// `onnx:///path/detect.onnx?size=320&input=f32`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let size = query_value(url, "size").unwrap_or(DEFAULT_INPUT_SIZE);
    let input_kind = match url.query_pairs().find(|(k, _)| k == "input") {
      Some((_, v)) if v == "f32" || v == "float" => InputKind::Float,
      _ => InputKind::Quantized,
    };

    Ok(TractSsdBuilder {
      model_path: url.path().to_string(),
      width: query_value(url, "width").unwrap_or(size),
      height: query_value(url, "height").unwrap_or(size),
      input_kind,
      layout: SsdLayout::from_url(url),
    })
  }
}

impl TractSsdBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Self {
    Self {
      model_path: model_path.as_ref().display().to_string(),
      width,
      height,
      input_kind: InputKind::Quantized,
      layout: SsdLayout::default(),
    }
  }

  pub fn build(self) -> Result<TractSsd, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    if !Path::new(&self.model_path).is_file() {
      return Err(ModelError::ModelLoadError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("模型文件不存在: {}", self.model_path),
      )));
    }

    let datum_type = match self.input_kind {
      InputKind::Quantized => u8::datum_type(),
      InputKind::Float => f32::datum_type(),
    };

    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(
            datum_type,
            tvec!(1, self.height as usize, self.width as usize, 3),
          ),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::ModelInvalid(format!("{}: {:#}", self.model_path, e)))?;

    info!(
      "模型加载完成，输入 {}x{} ({:?})",
      self.width, self.height, self.input_kind
    );
    debug!("输出张量布局: {:?}", self.layout);

    Ok(TractSsd {
      plan,
      width: self.width,
      height: self.height,
      input_kind: self.input_kind,
      layout: self.layout,
    })
  }
}

pub struct TractSsd {
  plan: TypedRunnableModel<TypedModel>,
  width: u32,
  height: u32,
  input_kind: InputKind,
  layout: SsdLayout,
}

fn inference_error(e: impl std::fmt::Display) -> ModelError {
  ModelError::InferenceError(e.to_string())
}

impl TractSsd {
  fn build_input(&self, image: &RgbImage) -> Result<Tensor, ModelError> {
    let frame = RgbNhwcFrame::from_image(image, self.width, self.height);
    let shape = (1, frame.height(), frame.width(), frame.channels());
    let tensor = match self.input_kind {
      InputKind::Quantized => {
        tract_ndarray::Array4::from_shape_vec(shape, frame.as_nhwc().to_vec())
          .map_err(inference_error)?
          .into_tensor()
      }
      InputKind::Float => tract_ndarray::Array4::from_shape_vec(shape, frame.to_normalized_f32())
        .map_err(inference_error)?
        .into_tensor(),
    };
    Ok(tensor)
  }

  fn output_f32(outputs: &TVec<TValue>, index: usize) -> Result<Vec<f32>, ModelError> {
    let tensor = outputs
      .get(index)
      .ok_or_else(|| ModelError::InferenceError(format!("模型缺少第 {} 个输出", index)))?;
    let tensor = tensor.cast_to::<f32>().map_err(inference_error)?;
    Ok(tensor.as_slice::<f32>().map_err(inference_error)?.to_vec())
  }
}

impl Model for TractSsd {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = self.build_input(input)?;

    debug!("执行模型推理");
    let outputs = self.plan.run(tvec!(tensor.into())).map_err(inference_error)?;
    if outputs.len() < self.layout.outputs() {
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        self.layout.outputs(),
        outputs.len()
      )));
    }

    let boxes = Self::output_f32(&outputs, self.layout.boxes)?;
    let classes = Self::output_f32(&outputs, self.layout.classes)?;
    let scores = Self::output_f32(&outputs, self.layout.scores)?;
    let count = Self::output_f32(&outputs, self.layout.count)?
      .first()
      .copied();

    Ok(decode_ssd(&boxes, &classes, &scores, count))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_url_options() {
    let url = Url::parse("onnx:///models/detect.onnx?size=300&input=f32").unwrap();
    let builder = TractSsdBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/detect.onnx");
    assert_eq!((builder.width, builder.height), (300, 300));
    assert_eq!(builder.input_kind, InputKind::Float);
  }

  #[test]
  fn missing_model_is_a_load_error() {
    let result = TractSsdBuilder::new("/nonexistent/detect.onnx", 320, 320).build();
    assert!(matches!(result, Err(ModelError::ModelLoadError(_))));
  }
}
