// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/bin/serial_console.rs - 串口调试工具
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
  path::PathBuf,
  sync::{Arc, mpsc},
  thread,
  time::{Duration, Instant},
};

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use jiedian::{
  config::Config,
  serial::{
    Command, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, ResponseListener, SerialLink,
    SerialPortConnector,
  },
  task::Shutdown,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ManualCommand {
  Cut,
  On,
  Off,
}

impl From<ManualCommand> for Command {
  fn from(command: ManualCommand) -> Self {
    match command {
      ManualCommand::Cut => Command::Cut,
      ManualCommand::On => Command::ConveyorOn,
      ManualCommand::Off => Command::ConveyorOff,
    }
  }
}

/// 列出串口、发送手动指令并观察机器回传
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径
  #[arg(long, value_name = "FILE", default_value = "config.json")]
  pub config: PathBuf,
  /// 串口，默认取配置文件中的 serial.port
  #[arg(long, value_name = "PORT")]
  pub port: Option<String>,
  /// 列出可用串口后退出
  #[arg(long)]
  pub list: bool,
  /// 依次发送的指令
  #[arg(long, value_enum, value_name = "COMMAND")]
  pub send: Vec<ManualCommand>,
  /// 观察回传的时长（秒）
  #[arg(long, value_name = "SECONDS", default_value_t = 5)]
  pub watch: u64,
  /// 把使用的串口写回配置文件
  #[arg(long)]
  pub save: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut config = Config::load_or_default(&args.config)?;
  let link = Arc::new(SerialLink::new(SerialPortConnector::new(
    config.serial.baud_rate,
    DEFAULT_TIMEOUT,
  )));

  if args.list {
    let ports = link.available_ports();
    if ports.is_empty() {
      warn!("没有可用串口");
    }
    for port in ports {
      println!("{}", port);
    }
    return Ok(());
  }

  let port = match &args.port {
    Some(port) => port.clone(),
    None => link.resolve_port(&config.serial.port),
  };
  if !link.reconfigure(&port) {
    bail!("无法打开串口 {}", port);
  }
  if args.save && port != config.serial.port {
    config.set_port(&port, &args.config)?;
  }

  let shutdown = Shutdown::new();
  let (tx, rx) = mpsc::channel();
  let listener = ResponseListener::new(link.clone()).spawn(tx, shutdown.token())?;

  for command in args.send.iter().copied().map(Command::from) {
    if link.send(command) {
      info!("已发送: {}", command);
    }
    thread::sleep(DEFAULT_POLL_INTERVAL);
  }

  let Some(deadline) = Instant::now().checked_add(Duration::from_secs(args.watch)) else {
    bail!("观察时长过长: {} 秒", args.watch);
  };
  while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
    match rx.recv_timeout(remaining) {
      Ok(response) => println!("{:>2}  {}", response.code(), response),
      Err(_) => break,
    }
  }

  shutdown.trigger();
  if listener.join().is_err() {
    warn!("串口监听线程异常退出");
  }
  Ok(())
}
