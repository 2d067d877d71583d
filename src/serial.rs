// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/serial.rs - 串口单字节协议
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

use std::fmt;

use thiserror::Error;

pub(crate) mod link;
mod listener;

pub use self::link::{
  Connector, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT, Duplex, SerialLink, SerialPortConnector,
};
pub use self::listener::{DEFAULT_POLL_INTERVAL, ResponseListener};

/// 下发给机器的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
  /// 切割 / 阀门动作
  Cut = 1,
  ConveyorOn = 2,
  ConveyorOff = 3,
}

impl Command {
  pub fn as_byte(self) -> u8 {
    self as u8
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Command::Cut => "CUT",
      Command::ConveyorOn => "CONVEYOR ON",
      Command::ConveyorOff => "CONVEYOR OFF",
    };
    write!(f, "{} (0x{:02X})", name, self.as_byte())
  }
}

/// 机器回传的状态码
///
/// `Error` 只在本地产生，表示读取或解码失败，不会出现在线路上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineResponse {
  None,
  Cut,
  ConveyorOn,
  ConveyorOff,
  Error,
}

impl MachineResponse {
  pub fn code(self) -> i32 {
    match self {
      MachineResponse::None => 0,
      MachineResponse::Cut => 1,
      MachineResponse::ConveyorOn => 2,
      MachineResponse::ConveyorOff => 3,
      MachineResponse::Error => -1,
    }
  }

  /// 未知字节视为解码失败
  pub fn from_byte(byte: u8) -> Self {
    match byte {
      0 => MachineResponse::None,
      1 => MachineResponse::Cut,
      2 => MachineResponse::ConveyorOn,
      3 => MachineResponse::ConveyorOff,
      _ => MachineResponse::Error,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      MachineResponse::None => "NULL",
      MachineResponse::Cut => "CUT",
      MachineResponse::ConveyorOn => "CONVEYOR ON",
      MachineResponse::ConveyorOff => "CONVEYOR OFF",
      MachineResponse::Error => "ERROR",
    }
  }
}

impl fmt::Display for MachineResponse {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Error, Debug)]
pub enum SerialError {
  #[error("串口未打开")]
  PortUnavailable,
  #[error("串口设备错误: {0}")]
  DeviceError(#[from] std::io::Error),
  #[error("无法打开串口 {port}: {source}")]
  Open {
    port: String,
    #[source]
    source: serialport::Error,
  },
}
