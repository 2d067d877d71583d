// 该文件是 Jiedian （节点计数） 项目的一部分。
// tests/pipeline.rs - 端到端计数流程测试
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
  collections::VecDeque,
  convert::Infallible,
  io::{self, Read, Write},
  sync::{Arc, Mutex, mpsc},
  time::Duration,
};

use image::{Rgb, RgbImage};

use jiedian::{
  actuation::ActuationCoordinator,
  counter::CrossingCounter,
  input::ImageFolderInput,
  model::{DetectItem, DetectResult, LabelMap, Model},
  output::{PipelineEvent, SaveImageFileOutput, draw::Draw},
  roi::{RoiConfig, RoiDetector},
  serial::{Connector, Duplex, MachineResponse, ResponseListener, SerialError, SerialLink},
  store::{EventStore, SqliteEventStore},
  task::{CountingTask, Shutdown, Task},
};

const WIDTH: u32 = 512;
const HEIGHT: u32 = 256;

/// 把机器回传排成队列、记录写出字节的串口
#[derive(Clone, Default)]
struct LoopbackPort {
  incoming: Arc<Mutex<VecDeque<u8>>>,
  outgoing: Arc<Mutex<Vec<u8>>>,
}

struct Reader(Arc<Mutex<VecDeque<u8>>>);
struct Writer(Arc<Mutex<Vec<u8>>>);

impl Read for Reader {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    match self.0.lock().unwrap().pop_front() {
      Some(byte) => {
        buf[0] = byte;
        Ok(1)
      }
      None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
    }
  }
}

impl Write for Writer {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl Connector for LoopbackPort {
  fn connect(&self, _port: &str) -> Result<Duplex, SerialError> {
    Ok(Duplex {
      reader: Box::new(Reader(self.incoming.clone())),
      writer: Box::new(Writer(self.outgoing.clone())),
    })
  }
}

/// 帧的红色通道编码了节点的横坐标，0 表示没有节点
struct PixelEncodedModel;

impl Model for PixelEncodedModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = Infallible;

  fn infer(&self, input: &RgbImage) -> Result<DetectResult, Infallible> {
    let marker = input.get_pixel(0, 0)[0];
    if marker == 0 {
      return Ok(DetectResult::default());
    }
    let x = marker as f32 * 2.0 / WIDTH as f32;
    Ok(DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.87,
      bbox: [0.25, x, 0.75, x + 0.05],
    }]))
  }
}

fn write_frames(dir: &std::path::Path, markers: &[u8]) {
  for (i, marker) in markers.iter().enumerate() {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([*marker, 0, 0]))
      .save(dir.join(format!("{:03}.png", i)))
      .unwrap();
  }
}

#[test]
fn replayed_line_cuts_and_records() {
  let frames = tempfile::tempdir().unwrap();
  // 125 * 2 = 250 位于 ROI 带 (200, 300) 内；50 * 2 = 100 在带外
  write_frames(frames.path(), &[0, 125, 125, 0, 50, 125, 0, 125, 0]);

  let work = tempfile::tempdir().unwrap();
  let db = work.path().join("nodes.db");
  let live = work.path().join("live.png");

  let port = LoopbackPort::default();
  let link = Arc::new(SerialLink::new(port.clone()));
  link.open("loopback").unwrap();

  let roi = RoiDetector::new(
    RoiConfig::new(200, 300, WIDTH, HEIGHT, 0.5).unwrap(),
    Draw::default(),
  );
  let (task, controller) = CountingTask::new(
    roi,
    LabelMap::from(vec!["node".to_string()]),
    CrossingCounter::new(Duration::from_secs(60)),
    ActuationCoordinator::new(1),
    link,
    Box::new(SqliteEventStore::open(&db).unwrap()),
  );
  let (tx, rx) = mpsc::channel();
  controller.start();
  task
    .with_events(tx)
    .run_task(
      ImageFolderInput::open(frames.path()).unwrap(),
      PixelEncodedModel,
      SaveImageFileOutput::new(&live).unwrap(),
    )
    .unwrap();

  // 进入带内 3 次：第 2 次计数到 2 触发并重置为 1，第 3 次再次到 2 触发
  let events: Vec<PipelineEvent> = rx.try_iter().collect();
  let actuated: Vec<i64> = events
    .iter()
    .filter_map(|e| match e {
      PipelineEvent::Actuated(a) => Some(a.serial_number),
      _ => None,
    })
    .collect();
  assert_eq!(actuated, vec![1, 2]);

  assert_eq!(*port.outgoing.lock().unwrap(), vec![2, 1, 1]);

  let store = SqliteEventStore::open(&db).unwrap();
  let records = store.list_all().unwrap();
  assert_eq!(records.len(), 2);
  assert!(records.iter().all(|r| r.count_thresh == 1));

  let annotated = image::open(&live).unwrap().to_rgb8();
  assert_eq!(*annotated.get_pixel(200, 10), Rgb([0, 255, 0]));
}

#[test]
fn listener_forwards_machine_responses() {
  let port = LoopbackPort::default();
  port.incoming.lock().unwrap().extend([2u8, 3, 9]);
  let link = Arc::new(SerialLink::new(port));
  link.open("loopback").unwrap();

  let shutdown = Shutdown::new();
  let (tx, rx) = mpsc::channel();
  let handle = ResponseListener::new(link)
    .with_poll_interval(Duration::from_millis(5))
    .spawn(tx, shutdown.token())
    .unwrap();

  let timeout = Duration::from_secs(2);
  let received: Vec<MachineResponse> = (0..3).map(|_| rx.recv_timeout(timeout).unwrap()).collect();
  assert_eq!(
    received,
    vec![
      MachineResponse::ConveyorOn,
      MachineResponse::ConveyorOff,
      MachineResponse::Error
    ]
  );

  shutdown.trigger();
  handle.join().unwrap();
}
