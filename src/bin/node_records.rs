// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/bin/node_records.rs - 切割记录查询
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use jiedian::{
  config::Config,
  store::{EventStore, SqliteEventStore},
};

/// 查询已保存的切割记录
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径
  #[arg(long, value_name = "FILE", default_value = "config.json")]
  pub config: PathBuf,
  /// 数据库文件，默认取配置文件中的 database.name
  #[arg(long, value_name = "FILE")]
  pub database: Option<PathBuf>,
  /// 只输出记录总数
  #[arg(long)]
  pub count: bool,
  /// 只显示最近的 N 条
  #[arg(long, value_name = "N")]
  pub last: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let database = match args.database {
    Some(database) => database,
    None => Config::load_or_default(&args.config)?.database.name,
  };
  let store = SqliteEventStore::open(&database)?;

  if args.count {
    println!("{}", store.count()?);
    return Ok(());
  }

  let records = store.list_all()?;
  let skip = args
    .last
    .map(|n| records.len().saturating_sub(n))
    .unwrap_or(0);

  println!("{:>6}  {:>6}  {:<23}  {:>6}", "ID", "DATA", "DATE TIME", "THRESH");
  for record in records.iter().skip(skip) {
    println!(
      "{:>6}  {:>6}  {:<23}  {:>6}",
      record.id,
      record.data,
      record.date_time.format("%Y-%m-%d %H:%M:%S%.3f"),
      record.count_thresh
    );
  }
  info!("共 {} 条记录", records.len());

  Ok(())
}
