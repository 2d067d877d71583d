// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/bin/node_counter.rs - 节点计数与切割控制主程序
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
  io::BufRead,
  path::PathBuf,
  sync::{Arc, mpsc},
  thread,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use url::Url;

use jiedian::{
  FromUrl,
  actuation::ActuationCoordinator,
  config::Config,
  counter::{CrossingCounter, DetectionMode},
  input::InputWrapper,
  model::{LabelMap, ModelWrapper},
  output::{OutputWrapper, PipelineEvent, draw::Draw},
  roi::RoiDetector,
  serial::{DEFAULT_TIMEOUT, MachineResponse, ResponseListener, SerialLink, SerialPortConnector},
  store::{EventStore, MemoryEventStore, SqliteEventStore},
  task::{ControlCommand, Controller, CountingTask, Shutdown, Task},
};

/// 节点计数参数配置，命令行参数优先于配置文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径
  #[arg(long, value_name = "FILE", default_value = "config.json")]
  pub config: PathBuf,
  /// 模型，如 onnx:///path/detect.onnx?size=300
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  /// 标签文件
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 串口
  #[arg(long, value_name = "PORT")]
  pub port: Option<String>,
  /// 计数阈值
  #[arg(long, value_name = "COUNT")]
  pub threshold: Option<u32>,
  /// 标注用字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 启动后立即开始检测
  #[arg(long)]
  pub start: bool,
  /// 不写数据库，事件只保存在内存中
  #[arg(long)]
  pub dry_run: bool,
  /// 最大处理帧数，0 表示无限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,
}

impl Args {
  fn apply(&self, config: &mut Config) {
    if let Some(model) = &self.model {
      config.model.url = model.to_string();
    }
    if let Some(labels) = &self.labels {
      config.model.labels = labels.clone();
    }
    if let Some(input) = &self.input {
      config.detection.input = input.to_string();
    }
    if let Some(output) = &self.output {
      config.display.output = output.to_string();
    }
    if let Some(port) = &self.port {
      config.serial.port = port.clone();
    }
    if let Some(threshold) = self.threshold {
      config.detection.count_thresh = threshold;
    }
    if let Some(font) = &self.font {
      config.display.font = Some(font.clone());
    }
  }
}

/// 把机器回传并入界面事件流
fn spawn_response_forwarder(
  responses: mpsc::Receiver<MachineResponse>,
  events: mpsc::Sender<PipelineEvent>,
) -> Result<()> {
  thread::Builder::new()
    .name("response-forwarder".to_string())
    .spawn(move || {
      for response in responses {
        if events.send(PipelineEvent::Response(response)).is_err() {
          break;
        }
      }
    })?;
  Ok(())
}

/// 只记录状态变化，避免每帧、每次轮询都刷一条日志
fn spawn_event_logger(events: mpsc::Receiver<PipelineEvent>) -> Result<()> {
  thread::Builder::new()
    .name("event-logger".to_string())
    .spawn(move || {
      let mut last_count = None;
      let mut last_response = None;
      for event in events {
        match event {
          PipelineEvent::Status(status) => {
            if last_count != Some(status.count) {
              info!("计数: {}", status.count);
              last_count = Some(status.count);
            }
          }
          PipelineEvent::Actuated(event) => info!(
            "切割 #{}，时间 {}，阈值 {}",
            event.serial_number, event.timestamp, event.threshold
          ),
          PipelineEvent::Conveyor(command) => info!("传送带: {}", command),
          PipelineEvent::Response(response) => {
            if last_response != Some(response) {
              info!("机器状态: {} ({})", response, response.code());
              last_response = Some(response);
            } else {
              debug!("机器状态: {}", response);
            }
          }
        }
      }
    })?;
  Ok(())
}

/// 标准输入控制台，充当界面线程
fn spawn_console(
  controller: Controller,
  shutdown: Shutdown,
  mut config: Config,
  config_path: PathBuf,
) -> Result<()> {
  thread::Builder::new()
    .name("console".to_string())
    .spawn(move || {
      info!("控制台指令: start | stop | cut | on | off | threshold N | interval S | port P | quit");
      for line in std::io::stdin().lock().lines() {
        let line = match line {
          Ok(line) => line,
          Err(e) => {
            warn!("读取控制台失败: {}", e);
            break;
          }
        };
        let line = line.trim();
        if line.is_empty() {
          continue;
        }
        if line == "quit" || line == "exit" {
          shutdown.trigger();
          break;
        }
        match line.parse::<ControlCommand>() {
          Ok(command) => {
            let port = match &command {
              ControlCommand::SetPort(port) => Some(port.clone()),
              _ => None,
            };
            if controller.send(command)
              && let Some(port) = port
              && let Err(e) = config.set_port(&port, &config_path)
            {
              error!("串口配置写回失败: {}", e);
            }
          }
          Err(e) => warn!("{}", e),
        }
      }
    })?;
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut config = Config::load_or_default(&args.config)?;
  args.apply(&mut config);
  config.validate()?;

  info!("模型: {}", config.model.url);
  info!("输入来源: {}", config.detection.input);
  info!("输出路径: {}", config.display.output);

  // 模型或标签加载失败时不进入帧循环
  let model = ModelWrapper::from_url(&Url::parse(&config.model.url)?).context("模型加载失败")?;
  let labels = LabelMap::from_file(&config.model.labels).context("标签文件加载失败")?;
  let input = InputWrapper::from_url(&Url::parse(&config.detection.input)?)?;
  let output = OutputWrapper::from_url(&Url::parse(&config.display.output)?)?;

  let draw = match &config.display.font {
    Some(font) => Draw::with_font_file(font)?,
    None => {
      warn!("未设置字体，画面不绘制标签与状态文字");
      Draw::default()
    }
  };
  let roi = RoiDetector::new(config.roi_config()?, draw);

  let link = Arc::new(SerialLink::new(SerialPortConnector::new(
    config.serial.baud_rate,
    DEFAULT_TIMEOUT,
  )));
  let port = link.resolve_port(&config.serial.port);
  if !link.reconfigure(&port) {
    warn!("未连接机器，继续以无串口模式运行");
  }

  let store: Box<dyn EventStore> = if args.dry_run {
    Box::new(MemoryEventStore::default())
  } else {
    Box::new(SqliteEventStore::open(&config.database.name)?)
  };
  info!("已记录切割事件: {}", store.count()?);

  let shutdown = Shutdown::new();
  {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      shutdown.trigger();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
  }

  let (event_tx, event_rx) = mpsc::channel();
  spawn_event_logger(event_rx)?;

  let (response_tx, response_rx) = mpsc::channel();
  spawn_response_forwarder(response_rx, event_tx.clone())?;
  let listener = ResponseListener::new(link.clone()).spawn(response_tx, shutdown.token())?;

  let counter = CrossingCounter::new(config.reset_interval()?);
  let coordinator = ActuationCoordinator::new(config.detection.count_thresh);
  let (task, controller) = CountingTask::new(roi, labels, counter, coordinator, link, store);
  let mode = if args.start {
    DetectionMode::Active
  } else {
    DetectionMode::Inactive
  };
  let task = task
    .with_events(event_tx)
    .with_shutdown(shutdown.token())
    .with_mode(mode)
    .with_frame_limit((args.frame_number > 0).then_some(args.frame_number));

  spawn_console(controller, shutdown.clone(), config, args.config.clone())?;

  let result = task.run_task(input, model, output);
  shutdown.trigger();
  if listener.join().is_err() {
    error!("串口监听线程异常退出");
  }
  info!("任务完成，退出");
  result
}
