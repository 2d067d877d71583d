// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/serial/listener.rs - 机器回传监听
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
  sync::{Arc, mpsc::Sender},
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, info, warn};

use super::{MachineResponse, SerialError, SerialLink};
use crate::task::ShutdownToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 后台轮询串口并发布机器回传状态
pub struct ResponseListener {
  link: Arc<SerialLink>,
  poll_interval: Duration,
}

impl ResponseListener {
  pub fn new(link: Arc<SerialLink>) -> Self {
    Self {
      link,
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }

  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  /// 单次轮询；返回 `None` 表示本轮没有可发布的状态（读取超时）
  pub fn poll_once(&self) -> Option<MachineResponse> {
    match self.link.read_byte() {
      Ok(Some(byte)) => {
        let response = MachineResponse::from_byte(byte);
        if response == MachineResponse::Error {
          warn!("无法解析的回传字节: 0x{:02X}", byte);
        }
        Some(response)
      }
      Ok(None) => None,
      Err(SerialError::PortUnavailable) => Some(MachineResponse::None),
      Err(e) => {
        warn!("串口读取失败: {}", e);
        Some(MachineResponse::Error)
      }
    }
  }

  /// 启动监听线程，直到 `token` 被触发才退出
  pub fn spawn(
    self,
    responses: Sender<MachineResponse>,
    token: ShutdownToken,
  ) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
      .name("serial-listener".to_string())
      .spawn(move || {
        info!("串口监听线程启动，轮询间隔 {:.2?}", self.poll_interval);
        loop {
          if let Some(response) = self.poll_once() {
            // 接收端关闭时继续轮询，只有停止信号能结束监听
            if responses.send(response).is_err() {
              debug!("回传接收端已关闭，丢弃: {}", response);
            }
          }
          if token.wait_timeout(self.poll_interval) {
            break;
          }
        }
        info!("串口监听线程退出");
      })
  }
}

#[cfg(test)]
mod tests {
  use std::{io, sync::mpsc};

  use super::*;
  use crate::{serial::link::testing::MockDevice, task::Shutdown};

  fn open_link(device: &MockDevice) -> Arc<SerialLink> {
    let link = SerialLink::new(device.clone());
    link.open("/dev/ttyMOCK0").unwrap();
    Arc::new(link)
  }

  #[test]
  fn decodes_conveyor_on() {
    let device = MockDevice::default();
    device.incoming.lock().unwrap().push_back(Ok(2));
    let listener = ResponseListener::new(open_link(&device));
    assert_eq!(listener.poll_once(), Some(MachineResponse::ConveyorOn));
  }

  #[test]
  fn read_failure_is_reported_as_error() {
    let device = MockDevice::default();
    device
      .incoming
      .lock()
      .unwrap()
      .push_back(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
    let listener = ResponseListener::new(open_link(&device));
    assert_eq!(listener.poll_once(), Some(MachineResponse::Error));
    // 失败后继续轮询，超时不发布任何状态
    assert_eq!(listener.poll_once(), None);
  }

  #[test]
  fn unknown_byte_is_reported_as_error() {
    let device = MockDevice::default();
    device.incoming.lock().unwrap().push_back(Ok(0x42));
    let listener = ResponseListener::new(open_link(&device));
    assert_eq!(listener.poll_once(), Some(MachineResponse::Error));
  }

  #[test]
  fn closed_link_publishes_none() {
    let link = Arc::new(SerialLink::new(MockDevice::default()));
    let listener = ResponseListener::new(link);
    assert_eq!(listener.poll_once(), Some(MachineResponse::None));
  }

  #[test]
  fn spawned_listener_publishes_until_shutdown() {
    let device = MockDevice::default();
    {
      let mut incoming = device.incoming.lock().unwrap();
      incoming.push_back(Ok(1));
      incoming.push_back(Ok(3));
    }
    let shutdown = Shutdown::new();
    let (tx, rx) = mpsc::channel();
    let handle = ResponseListener::new(open_link(&device))
      .with_poll_interval(Duration::from_millis(5))
      .spawn(tx, shutdown.token())
      .unwrap();

    let timeout = Duration::from_secs(2);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), MachineResponse::Cut);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), MachineResponse::ConveyorOff);

    shutdown.trigger();
    handle.join().unwrap();
  }

  #[test]
  fn listener_survives_reconfigure() {
    let device = MockDevice::default();
    let link = open_link(&device);
    let shutdown = Shutdown::new();
    let (tx, rx) = mpsc::channel();
    let handle = ResponseListener::new(link.clone())
      .with_poll_interval(Duration::from_millis(2))
      .spawn(tx, shutdown.token())
      .unwrap();

    let timeout = Duration::from_secs(2);
    device.incoming.lock().unwrap().push_back(Ok(2));
    assert_eq!(rx.recv_timeout(timeout).unwrap(), MachineResponse::ConveyorOn);

    for i in 0..20 {
      assert!(link.reconfigure(&format!("/dev/ttyMOCK{}", i % 2)));
      thread::sleep(Duration::from_millis(1));
    }
    assert!(!handle.is_finished());

    device.incoming.lock().unwrap().push_back(Ok(3));
    assert_eq!(rx.recv_timeout(timeout).unwrap(), MachineResponse::ConveyorOff);
    assert_eq!(device.connects.lock().unwrap().len(), 21);

    shutdown.trigger();
    handle.join().unwrap();
  }

  #[test]
  fn dropped_receiver_does_not_stop_listener() {
    let shutdown = Shutdown::new();
    let (tx, rx) = mpsc::channel();
    drop(rx);
    let handle = ResponseListener::new(Arc::new(SerialLink::new(MockDevice::default())))
      .with_poll_interval(Duration::from_millis(5))
      .spawn(tx, shutdown.token())
      .unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(!handle.is_finished());
    shutdown.trigger();
    handle.join().unwrap();
  }
}
