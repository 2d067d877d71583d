// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/task.rs - 计数任务与控制
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
  fmt::Display,
  str::FromStr,
  sync::{
    Arc, Mutex, PoisonError,
    mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
  },
  time::{Duration, Instant},
};

use image::{RgbImage, imageops::FilterType};
use tracing::{debug, error, info, warn};

use crate::{
  actuation::ActuationCoordinator,
  counter::{CrossingCounter, DetectionMode},
  frame::Frame,
  input::InputError,
  model::{DetectResult, LabelMap, Model},
  output::{FrameStatus, PipelineEvent, Render},
  roi::RoiDetector,
  serial::{Command, SerialLink},
  store::EventStore,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 停止信号的接收端
///
/// 信号通过关闭通道传递：`Shutdown::trigger` 释放全部发送端后，
/// 所有 token 立即观察到断开。
pub struct ShutdownToken {
  rx: Receiver<()>,
}

impl ShutdownToken {
  pub fn is_triggered(&self) -> bool {
    !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
  }

  /// 最多等待 `timeout`，期间收到停止信号时返回 `true`
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
  }
}

#[derive(Clone)]
pub struct Shutdown {
  // `None` 表示已触发
  senders: Arc<Mutex<Option<Vec<Sender<()>>>>>,
}

impl Default for Shutdown {
  fn default() -> Self {
    Self::new()
  }
}

impl Shutdown {
  pub fn new() -> Self {
    Self {
      senders: Arc::new(Mutex::new(Some(Vec::new()))),
    }
  }

  pub fn token(&self) -> ShutdownToken {
    let (tx, rx) = mpsc::channel();
    let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
    // 已触发时直接丢弃发送端，token 创建即断开
    if let Some(senders) = senders.as_mut() {
      senders.push(tx);
    }
    ShutdownToken { rx }
  }

  pub fn trigger(&self) {
    let taken = self
      .senders
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if taken.is_some() {
      info!("停止信号已发出");
    }
  }

  pub fn is_triggered(&self) -> bool {
    self
      .senders
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_none()
  }
}

/// 界面发出的控制指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
  Start,
  Stop,
  Cut,
  ConveyorOn,
  ConveyorOff,
  SetThreshold(u32),
  SetResetInterval(Duration),
  SetPort(String),
}

impl FromStr for ControlCommand {
  type Err = String;

  /// 控制台文本指令，如 `start`、`threshold 3`、`port /dev/ttyUSB1`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.split_whitespace();
    let name = parts.next().ok_or_else(|| "空指令".to_string())?;
    let arg = parts.next();
    let command = match (name.to_ascii_lowercase().as_str(), arg) {
      ("start", None) => ControlCommand::Start,
      ("stop", None) => ControlCommand::Stop,
      ("cut", None) => ControlCommand::Cut,
      ("on", None) => ControlCommand::ConveyorOn,
      ("off", None) => ControlCommand::ConveyorOff,
      ("threshold", Some(v)) => match v.parse::<u32>() {
        Ok(n) if n > 0 => ControlCommand::SetThreshold(n),
        _ => return Err(format!("无效的计数阈值: {}", v)),
      },
      ("interval", Some(v)) => match v.parse::<f64>().map(Duration::try_from_secs_f64) {
        Ok(Ok(interval)) => ControlCommand::SetResetInterval(interval),
        _ => return Err(format!("无效的复位间隔: {}", v)),
      },
      ("port", Some(v)) => ControlCommand::SetPort(v.to_string()),
      _ => return Err(format!("未知指令: {}", s.trim())),
    };
    if parts.next().is_some() {
      return Err(format!("多余的参数: {}", s.trim()));
    }
    Ok(command)
  }
}

/// 经通道交给帧循环的状态指令
#[derive(Debug)]
enum LoopCommand {
  Start,
  Stop,
  SetThreshold(u32),
  SetResetInterval(Duration),
}

/// 界面线程持有的控制句柄
///
/// 手动串口指令与换端口直接作用于共享的串口；改变计数状态的指令经通道
/// 交给帧循环执行。
#[derive(Clone)]
pub struct Controller {
  commands: Sender<LoopCommand>,
  link: Arc<SerialLink>,
}

impl Controller {
  pub fn send(&self, command: ControlCommand) -> bool {
    let command = match command {
      ControlCommand::Cut => return self.link.send(Command::Cut),
      ControlCommand::ConveyorOn => return self.link.send(Command::ConveyorOn),
      ControlCommand::ConveyorOff => return self.link.send(Command::ConveyorOff),
      ControlCommand::SetPort(port) => return self.link.reconfigure(&port),
      ControlCommand::Start => LoopCommand::Start,
      ControlCommand::Stop => LoopCommand::Stop,
      ControlCommand::SetThreshold(threshold) => LoopCommand::SetThreshold(threshold),
      ControlCommand::SetResetInterval(interval) => LoopCommand::SetResetInterval(interval),
    };
    match self.commands.send(command) {
      Ok(()) => true,
      Err(e) => {
        warn!("计数任务已退出，指令 {:?} 被丢弃", e.0);
        false
      }
    }
  }

  pub fn start(&self) -> bool {
    self.send(ControlCommand::Start)
  }

  pub fn stop(&self) -> bool {
    self.send(ControlCommand::Stop)
  }

  pub fn link(&self) -> &Arc<SerialLink> {
    &self.link
  }
}

/// 帧循环：采集、推理、ROI 判定、计数、动作、输出
///
/// 计数状态只在这里被修改。
pub struct CountingTask {
  roi: RoiDetector,
  labels: LabelMap,
  counter: CrossingCounter,
  coordinator: ActuationCoordinator,
  mode: DetectionMode,
  link: Arc<SerialLink>,
  store: Box<dyn EventStore>,
  commands: Receiver<LoopCommand>,
  events: Option<Sender<PipelineEvent>>,
  shutdown: Option<ShutdownToken>,
  frame_limit: Option<u64>,
}

impl CountingTask {
  pub fn new(
    roi: RoiDetector,
    labels: LabelMap,
    counter: CrossingCounter,
    coordinator: ActuationCoordinator,
    link: Arc<SerialLink>,
    store: Box<dyn EventStore>,
  ) -> (Self, Controller) {
    let (tx, rx) = mpsc::channel();
    let controller = Controller {
      commands: tx,
      link: link.clone(),
    };
    let task = Self {
      roi,
      labels,
      counter,
      coordinator,
      mode: DetectionMode::Inactive,
      link,
      store,
      commands: rx,
      events: None,
      shutdown: None,
      frame_limit: None,
    };
    (task, controller)
  }

  pub fn with_events(mut self, events: Sender<PipelineEvent>) -> Self {
    self.events = Some(events);
    self
  }

  pub fn with_shutdown(mut self, token: ShutdownToken) -> Self {
    self.shutdown = Some(token);
    self
  }

  pub fn with_mode(mut self, mode: DetectionMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn mode(&self) -> DetectionMode {
    self.mode
  }

  pub fn counter(&self) -> &CrossingCounter {
    &self.counter
  }

  fn publish(&self, event: PipelineEvent) {
    if let Some(events) = &self.events {
      // 界面可能先于帧循环退出
      let _ = events.send(event);
    }
  }

  fn apply_commands(&mut self) {
    loop {
      let command = match self.commands.try_recv() {
        Ok(command) => command,
        Err(_) => return,
      };
      debug!("执行控制指令: {:?}", command);
      match command {
        LoopCommand::Start => {
          info!("开始检测");
          self.mode = DetectionMode::Active;
        }
        LoopCommand::Stop => {
          info!("停止检测，计数清零");
          self.mode = DetectionMode::Inactive;
          self.counter.reset_to(0);
        }
        LoopCommand::SetThreshold(threshold) => self.coordinator.set_threshold(threshold),
        LoopCommand::SetResetInterval(interval) => {
          info!("复位间隔: {:.2?}", interval);
          self.counter.set_reset_interval(interval);
        }
      }
    }
  }

  fn fit_frame(&self, image: RgbImage) -> RgbImage {
    let config = self.roi.config();
    let size = (config.frame_width(), config.frame_height());
    if image.dimensions() == size {
      return image;
    }
    debug!("帧尺寸 {:?} 缩放到 {:?}", image.dimensions(), size);
    image::imageops::resize(&image, size.0, size.1, FilterType::Triangle)
  }

  /// 处理一帧，推理失败时跳过该帧
  pub fn process_frame<M, O>(&mut self, frame: Frame, model: &M, output: &O) -> Option<FrameStatus>
  where
    M: Model<Input = RgbImage, Output = DetectResult>,
    M::Error: Display,
    O: Render<RgbImage, FrameStatus>,
    O::Error: Display,
  {
    let started = Instant::now();
    let mut image = self.fit_frame(frame.image);

    let result = match model.infer(&image) {
      Ok(result) => result,
      Err(e) => {
        error!("第 {} 帧推理失败: {}", frame.index, e);
        return None;
      }
    };
    let inferred = started.elapsed();

    let verdict = self.roi.evaluate(&mut image, &result, &self.labels);
    let update = self.counter.observe(verdict.present, Instant::now(), self.mode);
    let outcome = self.coordinator.step(
      update.count,
      &mut self.counter,
      self.link.as_ref(),
      self.store.as_mut(),
    );

    let status = FrameStatus {
      index: frame.index,
      count: self.counter.count(),
      present: verdict.present,
    };
    if let Err(e) = output.render_result(&image, &status) {
      warn!("第 {} 帧输出失败: {}", frame.index, e);
    }

    self.publish(PipelineEvent::Status(status));
    if let Some(command) = outcome.conveyor {
      self.publish(PipelineEvent::Conveyor(command));
    }
    if let Some(event) = outcome.event {
      self.publish(PipelineEvent::Actuated(event));
    }

    debug!(
      "第 {} 帧: 检测 {} 个, 有效 {}, 计数 {}, 耗时 {:.2?} / {:.2?}",
      frame.index,
      result.len(),
      verdict.present,
      status.count,
      inferred,
      started.elapsed()
    );
    Some(status)
  }

  fn should_stop(&self) -> bool {
    self
      .shutdown
      .as_ref()
      .map(ShutdownToken::is_triggered)
      .unwrap_or(false)
  }
}

impl<I, M, O> Task<I, M, O> for CountingTask
where
  I: Iterator<Item = Result<Frame, InputError>>,
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
  O: Render<RgbImage, FrameStatus>,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(mut self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始计数任务...");
    let mut processed: u64 = 0;
    for frame in input {
      if self.should_stop() {
        warn!("收到停止信号，退出帧循环");
        break;
      }
      self.apply_commands();

      let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
          warn!("跳过无法读取的帧: {}", e);
          continue;
        }
      };
      self.process_frame(frame, &model, &output);

      processed += 1;
      if self.frame_limit.map(|n| processed >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出帧循环", processed);
        break;
      }
    }

    info!(
      "计数任务结束，共处理 {} 帧，最终计数 {}",
      processed,
      self.counter.count()
    );
    Ok(())
  }
}
