// 该文件是 Jiedian （节点计数） 项目的一部分。
// src/store.rs - 动作事件持久化
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

use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("数据库错误: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("时间格式错误: {0}")]
  Timestamp(#[from] chrono::ParseError),
}

/// 一次切割动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationEvent {
  /// 已记录总数 + 1
  pub serial_number: i64,
  pub timestamp: NaiveDateTime,
  pub threshold: u32,
}

/// 持久化后的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
  pub id: i64,
  pub data: i64,
  pub date_time: NaiveDateTime,
  pub count_thresh: u32,
}

pub trait EventStore: Send {
  /// 追加一条记录，单次插入即为原子操作
  fn add(&mut self, data: i64, timestamp: NaiveDateTime, threshold: u32) -> Result<(), StoreError>;
  /// 按插入顺序返回全部记录
  fn list_all(&self) -> Result<Vec<NodeRecord>, StoreError>;
  fn count(&self) -> Result<i64, StoreError>;
}

pub struct SqliteEventStore {
  conn: Connection,
}

impl SqliteEventStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
    let path = path.as_ref();
    info!("打开数据库: {}", path.display());
    Self::with_connection(Connection::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(
      "CREATE TABLE IF NOT EXISTS detected_node (
        detected_node_id INTEGER PRIMARY KEY AUTOINCREMENT,
        data INTEGER NOT NULL,
        date_time TEXT NOT NULL,
        count_thresh INTEGER NOT NULL
      );",
    )?;
    Ok(Self { conn })
  }
}

impl EventStore for SqliteEventStore {
  fn add(&mut self, data: i64, timestamp: NaiveDateTime, threshold: u32) -> Result<(), StoreError> {
    self.conn.execute(
      "INSERT INTO detected_node (data, date_time, count_thresh) VALUES (?1, ?2, ?3)",
      params![
        data,
        timestamp.format(TIMESTAMP_FORMAT).to_string(),
        threshold
      ],
    )?;
    debug!("已写入记录: data={}, count_thresh={}", data, threshold);
    Ok(())
  }

  fn list_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
    let mut stmt = self.conn.prepare(
      "SELECT detected_node_id, data, date_time, count_thresh
        FROM detected_node ORDER BY detected_node_id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, i64>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, u32>(3)?,
      ))
    })?;

    let mut records = Vec::new();
    for row in rows {
      let (id, data, date_time, count_thresh) = row?;
      records.push(NodeRecord {
        id,
        data,
        date_time: NaiveDateTime::parse_from_str(&date_time, TIMESTAMP_FORMAT)?,
        count_thresh,
      });
    }
    Ok(records)
  }

  fn count(&self) -> Result<i64, StoreError> {
    let count = self
      .conn
      .query_row("SELECT COUNT(*) FROM detected_node", [], |row| row.get(0))?;
    Ok(count)
  }
}

/// 内存存储，用于测试与不落盘的试运行
#[derive(Debug, Default, Clone)]
pub struct MemoryEventStore {
  records: Vec<NodeRecord>,
}

impl EventStore for MemoryEventStore {
  fn add(&mut self, data: i64, timestamp: NaiveDateTime, threshold: u32) -> Result<(), StoreError> {
    let id = self.records.len() as i64 + 1;
    self.records.push(NodeRecord {
      id,
      data,
      date_time: timestamp,
      count_thresh: threshold,
    });
    Ok(())
  }

  fn list_all(&self) -> Result<Vec<NodeRecord>, StoreError> {
    Ok(self.records.clone())
  }

  fn count(&self) -> Result<i64, StoreError> {
    Ok(self.records.len() as i64)
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 14)
      .unwrap()
      .and_hms_milli_opt(h, m, s, ms)
      .unwrap()
  }

  fn exercise(store: &mut dyn EventStore) {
    assert_eq!(store.count().unwrap(), 0);
    store.add(1, at(8, 0, 0, 250), 2).unwrap();
    store.add(2, at(8, 0, 9, 0), 3).unwrap();

    assert_eq!(store.count().unwrap(), 2);
    let records = store.list_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].data, 1);
    assert_eq!(records[0].date_time, at(8, 0, 0, 250));
    assert_eq!(records[1].count_thresh, 3);
    assert!(records[0].id < records[1].id);
  }

  #[test]
  fn sqlite_store_in_memory() {
    let mut store = SqliteEventStore::open_in_memory().unwrap();
    exercise(&mut store);
  }

  #[test]
  fn memory_store() {
    let mut store = MemoryEventStore::default();
    exercise(&mut store);
  }

  #[test]
  fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.db");
    {
      let mut store = SqliteEventStore::open(&path).unwrap();
      store.add(1, at(9, 30, 0, 0), 2).unwrap();
    }
    let store = SqliteEventStore::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.list_all().unwrap()[0].date_time, at(9, 30, 0, 0));
  }
}
