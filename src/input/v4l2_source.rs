// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::{pin::Pin, time::Instant};

use image::RgbImage;
use tracing::info;
use url::Url;
use v4l::{
  FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  prelude::*,
  video::Capture,
};

use super::InputError;
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_value};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// V4L2 摄像头输入源，`v4l2:///dev/video0?width=640&height=480`
///
/// v4l 的 Stream 需要引用 Device，Device 用 Pin<Box> 固定在堆上，
/// 使引用它的 Stream 可以存放在同一个结构体中。
pub struct V4l2Source {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Source {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    let width = query_value(url, "width").unwrap_or(DEFAULT_WIDTH);
    let height = query_value(url, "height").unwrap_or(DEFAULT_HEIGHT);
    Self::new(url.path(), width, height)
  }
}

impl V4l2Source {
  pub fn new(device_path: &str, width: u32, height: u32) -> Result<Self, InputError> {
    let device_error = |e: std::io::Error| InputError::DeviceError(format!("{}: {}", device_path, e));
    let device = Box::pin(Device::with_path(device_path).map_err(device_error)?);

    let mut format = device.format().map_err(device_error)?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(device_error)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(InputError::DeviceError(format!(
        "{} 不支持 YUYV，协商结果为 {}",
        device_path, format.fourcc
      )));
    }
    info!(
      "打开摄像头 {}: {}x{}",
      device_path, format.width, format.height
    );

    let mut source = Self {
      device,
      stream: None,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    let device_ref: &Device = &source.device;
    // SAFETY: device 被 Pin<Box> 固定，不会移动；stream 在 Drop 中先于 device 释放
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)
        .map_err(device_error)?
    };

    source.stream = Some(stream);
    Ok(source)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

/// YUYV 4:2:2 转 RGB
pub(crate) fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb = yuyv_to_rgb(buffer, self.width, self.height);
        let Some(image) = RgbImage::from_raw(self.width, self.height, rgb) else {
          return Some(Err(InputError::FrameDecode(format!(
            "帧数据长度与 {}x{} 不符",
            self.width, self.height
          ))));
        };

        let frame = Frame {
          image,
          index: self.frame_index,
          timestamp_ms: self.start_time.elapsed().as_millis() as u64,
        };
        self.frame_index += 1;
        Some(Ok(frame))
      }
      Err(e) => Some(Err(InputError::DeviceError(format!("无法捕获帧: {}", e)))),
    }
  }
}
