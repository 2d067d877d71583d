// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/output/save_image_file.rs - 实时画面文件
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

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{FrameStatus, Render},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 每帧覆盖同一个文件，供外部查看器轮询
///
/// 先写临时文件再重命名，读取方不会看到写了一半的图像。
pub struct SaveImageFileOutput {
  path: PathBuf,
  format: ImageFormat,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    Self::new(uri.path())
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, SaveImageFileError> {
    let path = path.as_ref().to_path_buf();
    let format = ImageFormat::from_path(&path)?;
    Ok(Self { path, format })
  }

  fn staging_path(&self) -> PathBuf {
    let mut name = self
      .path
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_default();
    name.push(".partial");
    self.path.with_file_name(name)
  }

  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let staging = self.staging_path();
    image.save_with_format(&staging, self.format)?;
    std::fs::rename(&staging, &self.path)?;
    debug!("更新实时画面: {}", self.path.display());
    Ok(())
  }
}

impl Render<RgbImage, FrameStatus> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbImage, _status: &FrameStatus) -> Result<(), Self::Error> {
    self.save_image(frame)
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;

  #[test]
  fn overwrites_latest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live").join("frame.png");
    let output = SaveImageFileOutput::new(&path).unwrap();
    let status = FrameStatus::default();

    output
      .render_result(&RgbImage::from_pixel(4, 4, Rgb([10, 0, 0])), &status)
      .unwrap();
    output
      .render_result(&RgbImage::from_pixel(4, 4, Rgb([20, 0, 0])), &status)
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(0, 0)[0], 20);
    assert!(!output.staging_path().exists());
  }

  #[test]
  fn unknown_extension_is_rejected() {
    assert!(SaveImageFileOutput::new("/tmp/frame.unknown").is_err());
  }
}
