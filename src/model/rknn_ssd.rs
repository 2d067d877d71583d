// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/model/rknn_ssd.rs - 基于 RKNPU 的量化 SSD 推理后端
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
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use super::{DetectResult, Model, ModelError, SsdLayout, decode_ssd};
use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame, query_value};

const RKNN_NUM_INPUTS: u32 = 1;
const DEFAULT_INPUT_SIZE: u32 = 320;

impl From<rknpu::Error> for ModelError {
  fn from(err: rknpu::Error) -> Self {
    ModelError::InferenceError(format!("RKNN 错误: {}", err))
  }
}

pub struct RknnSsdBuilder {
  model_path: String,
  width: u32,
  height: u32,
  layout: SsdLayout,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnSsdBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnSsdBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let size = query_value(url, "size").unwrap_or(DEFAULT_INPUT_SIZE);
    Ok(RknnSsdBuilder {
      model_path: url.path().to_string(),
      width: query_value(url, "width").unwrap_or(size),
      height: query_value(url, "height").unwrap_or(size),
      layout: SsdLayout::from_url(url),
      flags: InitFlags::default(),
    })
  }
}

impl RknnSsdBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnSsd, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ModelError::ModelInvalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    debug!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);

    if num_inputs != RKNN_NUM_INPUTS {
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if (num_outputs as usize) < self.layout.outputs() {
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        self.layout.outputs(),
        num_outputs
      )));
    }

    info!("模型加载完成");
    Ok(RknnSsd {
      context,
      width: self.width,
      height: self.height,
      layout: self.layout,
    })
  }
}

pub struct RknnSsd {
  context: Context,
  width: u32,
  height: u32,
  layout: SsdLayout,
}

impl Model for RknnSsd {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    // 量化模型的输入归一化由 RKNN 运行时完成
    let frame = RgbNhwcFrame::from_image(input, self.width, self.height);

    debug!("设置模型输入");
    self
      .context
      .set_input(0, frame.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let boxes = output.get_f32(self.layout.boxes)?;
    let classes = output.get_f32(self.layout.classes)?;
    let scores = output.get_f32(self.layout.scores)?;
    let count = output.get_f32(self.layout.count)?.first().copied();

    Ok(decode_ssd(boxes, classes, scores, count))
  }
}
