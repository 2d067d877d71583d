// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/actuation.rs - 切割与传送带动作协调
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

//! 每帧根据计数值决定是否下发指令。
//!
//! 状态只有两个标志：
//! - `conveyor_running`：计数首次变为正数时启动传送带，首次回到零时停止；
//! - `saved_once`：计数到达 `threshold + 1` 的正整数倍时触发一次切割，
//!   在取模条件变为假之前不会再次触发。
//!
//! 触发后计数重置为 1 而不是 0。

use chrono::Local;
use tracing::{error, info, warn};

use crate::{
  counter::CrossingCounter,
  serial::{Command, SerialLink},
  store::{ActuationEvent, EventStore},
};

pub const DEFAULT_THRESHOLD: u32 = 2;

/// 指令发送端，发送失败由实现方自行记录
pub trait CommandSink {
  fn send(&self, command: Command) -> bool;
}

impl CommandSink for SerialLink {
  fn send(&self, command: Command) -> bool {
    SerialLink::send(self, command)
  }
}

/// 单帧动作结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
  /// 本帧下发的传送带指令
  pub conveyor: Option<Command>,
  /// 本帧触发了切割
  pub fired: bool,
  /// 已写入存储的事件
  pub event: Option<ActuationEvent>,
}

#[derive(Debug, Clone)]
pub struct ActuationCoordinator {
  threshold: u32,
  saved_once: bool,
  conveyor_running: bool,
}

impl Default for ActuationCoordinator {
  fn default() -> Self {
    Self::new(DEFAULT_THRESHOLD)
  }
}

impl ActuationCoordinator {
  /// `threshold` 为 0 时按 1 处理
  pub fn new(threshold: u32) -> Self {
    Self {
      threshold: threshold.max(1),
      saved_once: false,
      conveyor_running: false,
    }
  }

  pub fn threshold(&self) -> u32 {
    self.threshold
  }

  pub fn set_threshold(&mut self, threshold: u32) {
    if threshold == 0 {
      warn!("计数阈值必须至少为 1，保持 {}", self.threshold);
      return;
    }
    info!("计数阈值: {} -> {}", self.threshold, threshold);
    self.threshold = threshold;
  }

  pub fn is_latched(&self) -> bool {
    self.saved_once
  }

  fn period(&self) -> u32 {
    self.threshold.saturating_add(1)
  }

  pub fn step(
    &mut self,
    count: u32,
    counter: &mut CrossingCounter,
    sink: &dyn CommandSink,
    store: &mut dyn EventStore,
  ) -> StepOutcome {
    let mut outcome = StepOutcome::default();

    if count > 0 && !self.conveyor_running {
      sink.send(Command::ConveyorOn);
      self.conveyor_running = true;
      outcome.conveyor = Some(Command::ConveyorOn);
    } else if count == 0 && self.conveyor_running {
      sink.send(Command::ConveyorOff);
      self.conveyor_running = false;
      outcome.conveyor = Some(Command::ConveyorOff);
    }

    if count == 0 || count % self.period() != 0 {
      self.saved_once = false;
      return outcome;
    }
    if self.saved_once {
      return outcome;
    }

    info!("计数 {} 达到阈值 {}，执行切割", count, self.threshold);
    sink.send(Command::Cut);
    outcome.fired = true;
    outcome.event = self.persist(store);
    self.saved_once = true;
    counter.reset_to(1);
    outcome
  }

  fn persist(&self, store: &mut dyn EventStore) -> Option<ActuationEvent> {
    let total = match store.count() {
      Ok(total) => total,
      Err(e) => {
        error!("读取记录总数失败，本次事件未保存: {}", e);
        return None;
      }
    };
    let event = ActuationEvent {
      serial_number: total + 1,
      timestamp: Local::now().naive_local(),
      threshold: self.threshold,
    };
    match store.add(event.serial_number, event.timestamp, event.threshold) {
      Ok(()) => Some(event),
      Err(e) => {
        error!("保存切割事件失败: {}", e);
        None
      }
    }
  }
}
