// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/serial/link.rs - 共享串口链路
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
  io::{ErrorKind, Read, Write},
  sync::{Mutex, PoisonError, RwLock},
  time::Duration,
};

use tracing::{debug, error, info, warn};

use super::{Command, SerialError};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// 一个已打开设备的读写两端
pub struct Duplex {
  pub reader: Box<dyn Read + Send>,
  pub writer: Box<dyn Write + Send>,
}

/// 打开串口设备
pub trait Connector: Send + Sync {
  fn connect(&self, port: &str) -> Result<Duplex, SerialError>;

  /// 当前可用的端口名，无法枚举时返回空列表
  fn available_ports(&self) -> Vec<String> {
    Vec::new()
  }
}

/// 基于 `serialport` 的真实串口
#[derive(Debug, Clone)]
pub struct SerialPortConnector {
  baud_rate: u32,
  timeout: Duration,
}

impl Default for SerialPortConnector {
  fn default() -> Self {
    Self {
      baud_rate: DEFAULT_BAUD_RATE,
      timeout: DEFAULT_TIMEOUT,
    }
  }
}

impl SerialPortConnector {
  pub fn new(baud_rate: u32, timeout: Duration) -> Self {
    Self { baud_rate, timeout }
  }
}

impl Connector for SerialPortConnector {
  fn connect(&self, port: &str) -> Result<Duplex, SerialError> {
    let open_error = |source| SerialError::Open {
      port: port.to_string(),
      source,
    };
    let writer = serialport::new(port, self.baud_rate)
      .timeout(self.timeout)
      .open()
      .map_err(open_error)?;
    let reader = writer.try_clone().map_err(open_error)?;
    Ok(Duplex {
      reader: Box::new(PortIo(reader)),
      writer: Box::new(PortIo(writer)),
    })
  }

  fn available_ports(&self) -> Vec<String> {
    match serialport::available_ports() {
      Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
      Err(e) => {
        warn!("无法枚举串口: {}", e);
        Vec::new()
      }
    }
  }
}

struct PortIo(Box<dyn serialport::SerialPort>);

impl Read for PortIo {
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    self.0.read(buf)
  }
}

impl Write for PortIo {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.write(buf)
  }

  fn flush(&mut self) -> std::io::Result<()> {
    self.0.flush()
  }
}

struct OpenPort {
  name: String,
  reader: Mutex<Box<dyn Read + Send>>,
  writer: Mutex<Box<dyn Write + Send>>,
}

/// 监听线程与指令发送方共享的串口
///
/// 读、写两个方向各自加锁，可以同时进行；打开、关闭与重新配置需要独占，
/// 会等待进行中的读写完成，并在打开新端口之前先释放旧句柄。
pub struct SerialLink {
  connector: Box<dyn Connector>,
  port: RwLock<Option<OpenPort>>,
}

impl SerialLink {
  pub fn new(connector: impl Connector + 'static) -> Self {
    Self {
      connector: Box::new(connector),
      port: RwLock::new(None),
    }
  }

  /// 配置的端口不在可用列表中时改用第一个可用端口
  pub fn resolve_port(&self, preferred: &str) -> String {
    let ports = self.connector.available_ports();
    if ports.is_empty() || ports.iter().any(|p| p == preferred) {
      return preferred.to_string();
    }
    warn!("串口 {} 不可用，改用 {}", preferred, ports[0]);
    ports[0].clone()
  }

  pub fn available_ports(&self) -> Vec<String> {
    self.connector.available_ports()
  }

  /// 关闭当前端口（如有）后打开 `port`
  pub fn open(&self, port: &str) -> Result<(), SerialError> {
    let mut guard = self.port.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(old) = guard.take() {
      info!("关闭串口: {}", old.name);
      drop(old);
    }

    let duplex = self.connector.connect(port)?;
    info!("串口已连接: {}", port);
    *guard = Some(OpenPort {
      name: port.to_string(),
      reader: Mutex::new(duplex.reader),
      writer: Mutex::new(duplex.writer),
    });
    Ok(())
  }

  /// 打开失败时链路保持关闭状态，只记录日志
  pub fn reconfigure(&self, port: &str) -> bool {
    match self.open(port) {
      Ok(()) => true,
      Err(e) => {
        error!("串口重新配置失败: {}", e);
        false
      }
    }
  }

  pub fn close(&self) {
    let mut guard = self.port.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(old) = guard.take() {
      info!("关闭串口: {}", old.name);
    }
  }

  pub fn is_open(&self) -> bool {
    self
      .port
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  pub fn port_name(&self) -> Option<String> {
    self
      .port
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .map(|p| p.name.clone())
  }

  pub fn write_command(&self, command: Command) -> Result<usize, SerialError> {
    let guard = self.port.read().unwrap_or_else(PoisonError::into_inner);
    let port = guard.as_ref().ok_or(SerialError::PortUnavailable)?;
    let mut writer = port.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.write_all(&[command.as_byte()])?;
    writer.flush()?;
    Ok(1)
  }

  /// 发送指令，失败只记录日志
  pub fn send(&self, command: Command) -> bool {
    match self.write_command(command) {
      Ok(_) => {
        debug!("已发送指令: {}", command);
        true
      }
      Err(SerialError::PortUnavailable) => {
        warn!("未检测到串口，指令 {} 未发送", command);
        false
      }
      Err(e) => {
        error!("指令 {} 发送失败: {}", command, e);
        false
      }
    }
  }

  /// 读取一个字节，`Ok(None)` 表示在超时内没有数据
  pub fn read_byte(&self) -> Result<Option<u8>, SerialError> {
    let guard = self.port.read().unwrap_or_else(PoisonError::into_inner);
    let port = guard.as_ref().ok_or(SerialError::PortUnavailable)?;
    let mut reader = port.reader.lock().unwrap_or_else(PoisonError::into_inner);
    let mut buf = [0u8; 1];
    match reader.read(&mut buf) {
      Ok(1) => Ok(Some(buf[0])),
      Ok(_) => Err(SerialError::DeviceError(std::io::Error::new(
        ErrorKind::UnexpectedEof,
        "串口读取为空",
      ))),
      Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
      Err(e) => Err(SerialError::DeviceError(e)),
    }
  }
}

impl Drop for SerialLink {
  fn drop(&mut self) {
    self.close();
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::{
    collections::VecDeque,
    io,
    sync::{
      Arc, Mutex,
      atomic::{AtomicUsize, Ordering},
    },
  };

  use super::*;

  /// 内存中的模拟设备：`incoming` 为设备发来的字节，`outgoing` 记录写入的字节
  #[derive(Clone, Default)]
  pub struct MockDevice {
    pub incoming: Arc<Mutex<VecDeque<io::Result<u8>>>>,
    pub outgoing: Arc<Mutex<Vec<u8>>>,
    pub ports: Vec<String>,
    pub fail_connect: bool,
    pub connects: Arc<Mutex<Vec<String>>>,
    /// 尚未释放的读写句柄数
    pub live_handles: Arc<AtomicUsize>,
    /// 每次 `connect` 时仍存活的句柄数
    pub live_at_connect: Arc<Mutex<Vec<usize>>>,
  }

  /// 释放时减少存活计数
  struct HandleGuard(Arc<AtomicUsize>);

  impl HandleGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
      live.fetch_add(1, Ordering::SeqCst);
      Self(live.clone())
    }
  }

  impl Drop for HandleGuard {
    fn drop(&mut self) {
      self.0.fetch_sub(1, Ordering::SeqCst);
    }
  }

  struct MockReader {
    queue: Arc<Mutex<VecDeque<io::Result<u8>>>>,
    _handle: HandleGuard,
  }

  struct MockWriter {
    sink: Arc<Mutex<Vec<u8>>>,
    _handle: HandleGuard,
  }

  impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      match self.queue.lock().unwrap().pop_front() {
        Some(Ok(b)) => {
          buf[0] = b;
          Ok(1)
        }
        Some(Err(e)) => Err(e),
        None => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
      }
    }
  }

  impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.sink.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  impl Connector for MockDevice {
    fn connect(&self, port: &str) -> Result<Duplex, SerialError> {
      if self.fail_connect {
        return Err(SerialError::Open {
          port: port.to_string(),
          source: serialport::Error::new(serialport::ErrorKind::NoDevice, "no device"),
        });
      }
      self.connects.lock().unwrap().push(port.to_string());
      self
        .live_at_connect
        .lock()
        .unwrap()
        .push(self.live_handles.load(Ordering::SeqCst));
      Ok(Duplex {
        reader: Box::new(MockReader {
          queue: self.incoming.clone(),
          _handle: HandleGuard::new(&self.live_handles),
        }),
        writer: Box::new(MockWriter {
          sink: self.outgoing.clone(),
          _handle: HandleGuard::new(&self.live_handles),
        }),
      })
    }

    fn available_ports(&self) -> Vec<String> {
      self.ports.clone()
    }
  }
}
