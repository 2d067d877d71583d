// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/input/image_folder.rs - 图像目录回放
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

use std::{
  path::{Path, PathBuf},
  thread,
  time::{Duration, Instant},
};

use image::ImageReader;
use tracing::{debug, info};
use url::Url;

use super::InputError;
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_flag, query_value};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// 按文件名顺序回放目录中的图像
///
/// `folder:///path/to/frames?loop&fps=10`：`loop` 表示播完后从头开始，
/// `fps` 限制回放速率，省略时尽快读取。
pub struct ImageFolderInput {
  files: Vec<PathBuf>,
  position: usize,
  looping: bool,
  frame_interval: Option<Duration>,
  frame_index: u64,
  start_time: Instant,
  last_frame: Option<Instant>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut input = Self::open(url.path())?;
    input.looping = query_flag(url, "loop");
    input.frame_interval = match query_value::<f64>(url, "fps") {
      Some(fps) if fps > 0.0 => Some(
        Duration::try_from_secs_f64(1.0 / fps)
          .map_err(|e| InputError::InvalidParameter(format!("fps={}: {}", fps, e)))?,
      ),
      Some(fps) => return Err(InputError::InvalidParameter(format!("fps={}", fps))),
      None => None,
    };
    Ok(input)
  }
}

impl ImageFolderInput {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, InputError> {
    let directory = directory.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(InputError::EmptyDirectory(directory.display().to_string()));
    }
    files.sort();
    info!("从 {} 回放 {} 张图像", directory.display(), files.len());

    Ok(Self {
      files,
      position: 0,
      looping: false,
      frame_interval: None,
      frame_index: 0,
      start_time: Instant::now(),
      last_frame: None,
    })
  }

  pub fn with_loop(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn pace(&mut self) {
    if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
      let elapsed = last.elapsed();
      if elapsed < interval {
        thread::sleep(interval - elapsed);
      }
    }
    self.last_frame = Some(Instant::now());
  }
}

impl Iterator for ImageFolderInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.position >= self.files.len() {
      if !self.looping {
        return None;
      }
      debug!("目录回放结束，从头开始");
      self.position = 0;
    }

    self.pace();
    let path = &self.files[self.position];
    self.position += 1;

    let index = self.frame_index;
    self.frame_index += 1;

    let image = match ImageReader::open(path).map_err(InputError::from).and_then(|reader| {
      reader
        .with_guessed_format()
        .map_err(InputError::from)?
        .decode()
        .map_err(InputError::from)
    }) {
      Ok(image) => image.to_rgb8(),
      Err(e) => {
        return Some(Err(InputError::FrameDecode(format!(
          "{}: {}",
          path.display(),
          e
        ))));
      }
    };

    Some(Ok(Frame {
      image,
      index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    }))
  }
}
