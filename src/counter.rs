// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/counter.rs - 去抖计数状态机
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

//! 节点过线计数。
//!
//! 计数按"出现"的上升沿累加：一个节点停留多帧只计一次。连续无节点的时间
//! 达到复位间隔后计数归零，避免产线停顿时残留的部分计数一直保留。

use std::time::{Duration, Instant};

use tracing::{debug, info};

pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(5);

/// 检测模式，`Inactive` 时帧只用于推进时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMode {
  #[default]
  Inactive,
  Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
  /// ROI 内没有有效节点
  Idle,
  /// 有节点且本次停留已计数
  Present,
}

/// 单帧更新结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountUpdate {
  pub count: u32,
  /// 本帧产生了一次新的计数
  pub counted: bool,
  /// 本帧因空闲超时而归零
  pub expired: bool,
}

#[derive(Debug, Clone)]
pub struct CrossingCounter {
  count: u32,
  occupancy: Occupancy,
  elapsed_idle: Duration,
  // 超时归零后停止累计，直到下一次进入空闲
  idle_expired: bool,
  last_frame: Option<Instant>,
  reset_interval: Duration,
}

impl Default for CrossingCounter {
  fn default() -> Self {
    Self::new(DEFAULT_RESET_INTERVAL)
  }
}

impl CrossingCounter {
  pub fn new(reset_interval: Duration) -> Self {
    Self {
      count: 0,
      occupancy: Occupancy::Idle,
      elapsed_idle: Duration::ZERO,
      idle_expired: false,
      last_frame: None,
      reset_interval,
    }
  }

  pub fn count(&self) -> u32 {
    self.count
  }

  pub fn occupancy(&self) -> Occupancy {
    self.occupancy
  }

  pub fn elapsed_idle(&self) -> Duration {
    self.elapsed_idle
  }

  pub fn reset_interval(&self) -> Duration {
    self.reset_interval
  }

  pub fn set_reset_interval(&mut self, reset_interval: Duration) {
    self.reset_interval = reset_interval;
  }

  /// 直接设置计数值，不改变占用状态与空闲计时
  pub fn reset_to(&mut self, count: u32) {
    debug!("计数重置为 {}", count);
    self.count = count;
  }

  pub fn observe(&mut self, present: bool, now: Instant, mode: DetectionMode) -> CountUpdate {
    let dt = self
      .last_frame
      .map(|last| now.saturating_duration_since(last))
      .unwrap_or_default();
    self.last_frame = Some(now);

    let mut update = CountUpdate {
      count: self.count,
      counted: false,
      expired: false,
    };

    if mode == DetectionMode::Inactive {
      return update;
    }

    match (self.occupancy, present) {
      (Occupancy::Idle, true) => {
        self.count = self.count.saturating_add(1);
        self.occupancy = Occupancy::Present;
        self.elapsed_idle = Duration::ZERO;
        self.idle_expired = false;
        update.counted = true;
        debug!("节点进入 ROI，计数: {}", self.count);
      }
      (Occupancy::Present, true) => {
        self.elapsed_idle = Duration::ZERO;
      }
      (Occupancy::Present, false) => {
        self.occupancy = Occupancy::Idle;
        self.idle_expired = false;
        self.elapsed_idle = dt;
      }
      (Occupancy::Idle, false) => {
        if !self.idle_expired {
          self.elapsed_idle += dt;
        }
      }
    }

    if !present && !self.idle_expired && self.elapsed_idle >= self.reset_interval {
      info!(
        "空闲 {:.2?} 超过复位间隔 {:.2?}，计数 {} 归零",
        self.elapsed_idle, self.reset_interval, self.count
      );
      self.count = 0;
      self.elapsed_idle = Duration::ZERO;
      self.idle_expired = true;
      update.expired = true;
    }

    update.count = self.count;
    update
  }
}
