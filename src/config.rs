// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/config.rs - 配置文件
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
  time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  counter::DEFAULT_RESET_INTERVAL,
  roi::{RoiConfig, RoiError},
  serial::DEFAULT_BAUD_RATE,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("ROI 配置错误: {0}")]
  RoiError(#[from] RoiError),
  #[error("配置项 {key} 无效: {reason}")]
  InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  pub name: PathBuf,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      name: PathBuf::from("nodes.db"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
  pub port: String,
  pub baud_rate: u32,
}

impl Default for SerialConfig {
  fn default() -> Self {
    Self {
      port: "/dev/ttyUSB0".to_string(),
      baud_rate: DEFAULT_BAUD_RATE,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
  /// 帧来源，如 `v4l2:///dev/video0`
  pub input: String,
  pub count_thresh: u32,
  pub confidence: f32,
  pub reset_interval_secs: f64,
  /// 未设置时使用画面中央宽 100 像素的 ROI 带
  pub roi_start: Option<u32>,
  pub roi_end: Option<u32>,
  pub frame_width: u32,
  pub frame_height: u32,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      input: "v4l2:///dev/video0".to_string(),
      count_thresh: 2,
      confidence: 0.5,
      reset_interval_secs: DEFAULT_RESET_INTERVAL.as_secs_f64(),
      roi_start: None,
      roi_end: None,
      frame_width: 640,
      frame_height: 480,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
  pub url: String,
  pub labels: PathBuf,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      url: "onnx:///usr/share/jiedian/nodes/detect.onnx?size=300".to_string(),
      labels: PathBuf::from("/usr/share/jiedian/nodes/labelmap.txt"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
  /// TrueType 字体，输出画面时必须设置
  pub font: Option<PathBuf>,
  pub output: String,
}

impl Default for DisplayConfig {
  fn default() -> Self {
    Self {
      font: None,
      output: "null://".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub database: DatabaseConfig,
  pub serial: SerialConfig,
  pub detection: DetectionConfig,
  pub model: ModelConfig,
  pub display: DisplayConfig,
}

impl Config {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("读取配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  /// 文件不存在时使用默认配置
  pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
      warn!("配置文件 {} 不存在，使用默认配置", path.display());
      return Ok(Self::default());
    }
    Self::load(path)
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(self)?;
    std::fs::write(path, content)?;
    info!("配置已保存: {}", path.display());
    Ok(())
  }

  /// 更新串口并写回配置文件
  pub fn set_port<P: AsRef<Path>>(&mut self, port: &str, path: P) -> Result<(), ConfigError> {
    self.serial.port = port.to_string();
    self.save(path)
  }

  pub fn reset_interval(&self) -> Result<Duration, ConfigError> {
    let secs = self.detection.reset_interval_secs;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
      key: "detection.reset_interval_secs",
      reason: format!("{} 不是有效时长: {}", secs, e),
    })
  }

  pub fn roi_config(&self) -> Result<RoiConfig, ConfigError> {
    let d = &self.detection;
    let config = match (d.roi_start, d.roi_end) {
      (Some(start), Some(end)) => {
        RoiConfig::new(start, end, d.frame_width, d.frame_height, d.confidence)?
      }
      (None, None) => RoiConfig::centered(d.frame_width, d.frame_height, d.confidence)?,
      _ => {
        return Err(ConfigError::InvalidValue {
          key: "detection.roi_start/roi_end",
          reason: "需要同时设置或同时省略".to_string(),
        });
      }
    };
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.detection.count_thresh == 0 {
      return Err(ConfigError::InvalidValue {
        key: "detection.count_thresh",
        reason: "必须至少为 1".to_string(),
      });
    }
    self.reset_interval()?;
    // 输出画面时需要字体绘制标签与状态文字
    if self.display.font.is_none() && !self.display.output.starts_with("null:") {
      return Err(ConfigError::InvalidValue {
        key: "display.font",
        reason: format!("输出到 {} 时必须设置字体", self.display.output),
      });
    }
    for (key, value) in [
      ("detection.input", &self.detection.input),
      ("model.url", &self.model.url),
      ("display.output", &self.display.output),
    ] {
      url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        key,
        reason: format!("{}: {}", value, e),
      })?;
    }
    self.roi_config()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = Config::default();
    config.validate().unwrap();
    let roi = config.roi_config().unwrap();
    assert_eq!((roi.roi_start(), roi.roi_end()), (270, 370));
    assert_eq!(config.reset_interval().unwrap(), Duration::from_secs(5));
  }

  #[test]
  fn partial_file_falls_back_to_defaults() {
    let config: Config =
      serde_json::from_str(r#"{ "serial": { "port": "COM4" }, "detection": { "count_thresh": 4 } }"#)
        .unwrap();
    assert_eq!(config.serial.port, "COM4");
    assert_eq!(config.serial.baud_rate, DEFAULT_BAUD_RATE);
    assert_eq!(config.detection.count_thresh, 4);
    assert_eq!(config.detection.confidence, 0.5);
  }

  #[test]
  fn set_port_writes_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let mut config = Config::default();
    config.save(&path).unwrap();

    config.set_port("/dev/ttyACM0", &path).unwrap();
    let reloaded = Config::load(&path).unwrap();
    assert_eq!(reloaded.serial.port, "/dev/ttyACM0");
    assert_eq!(reloaded, config);
  }

  #[test]
  fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_or_default(dir.path().join("absent.json")).unwrap();
    assert_eq!(config, Config::default());
  }

  #[test]
  fn rejects_invalid_values() {
    let mut config = Config::default();
    config.detection.count_thresh = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.detection.roi_start = Some(100);
    assert!(config.roi_config().is_err());

    let mut config = Config::default();
    config.detection.roi_start = Some(400);
    config.detection.roi_end = Some(300);
    assert!(matches!(config.validate(), Err(ConfigError::RoiError(_))));
  }

  #[test]
  fn rejects_reset_interval_out_of_range() {
    for secs in [1e20, -1.0, f64::NAN, f64::INFINITY] {
      let mut config = Config::default();
      config.detection.reset_interval_secs = secs;
      assert!(config.reset_interval().is_err(), "{}", secs);
      assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue {
          key: "detection.reset_interval_secs",
          ..
        })
      ));
    }
  }

  #[test]
  fn rendered_output_requires_font() {
    let mut config = Config::default();
    config.display.output = "image:///tmp/live.png".to_string();
    assert!(matches!(
      config.validate(),
      Err(ConfigError::InvalidValue {
        key: "display.font",
        ..
      })
    ));

    config.display.font = Some(PathBuf::from("/usr/share/fonts/node.ttf"));
    config.validate().unwrap();
  }
}
