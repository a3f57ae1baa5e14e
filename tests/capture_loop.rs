// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/capture_loop.rs - 采集循环状态机测试
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
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use shanan_lookout::{
  config::LoopConfig,
  frame::BgrFrame,
  input::CameraSource,
  model::{DetectResult, Model},
  output::Render,
  task::{CaptureLoop, PipelineState, TaskError},
};

#[derive(Debug, thiserror::Error)]
#[error("模拟故障")]
struct StubError;

#[derive(Default)]
struct Counters {
  opens: AtomicUsize,
  closes: AtomicUsize,
  reads: AtomicUsize,
  infers: AtomicUsize,
  renders: AtomicUsize,
  non_empty_results: AtomicUsize,
  fail_open: AtomicBool,
  no_frames: AtomicBool,
}

impl Counters {
  fn get(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
  }
}

struct StubCamera {
  counters: Arc<Counters>,
  open: bool,
}

impl CameraSource for StubCamera {
  type Error = StubError;

  fn open(&mut self) -> Result<(), Self::Error> {
    self.counters.opens.fetch_add(1, Ordering::SeqCst);
    if self.counters.fail_open.load(Ordering::SeqCst) {
      return Err(StubError);
    }
    self.open = true;
    Ok(())
  }

  fn read_frame(&mut self) -> Result<Option<BgrFrame>, Self::Error> {
    self.counters.reads.fetch_add(1, Ordering::SeqCst);
    if !self.open {
      return Err(StubError);
    }
    if self.counters.no_frames.load(Ordering::SeqCst) {
      return Ok(None);
    }
    Ok(BgrFrame::black(8, 6).ok())
  }

  fn close(&mut self) {
    self.counters.closes.fetch_add(1, Ordering::SeqCst);
    self.open = false;
  }

  fn is_open(&self) -> bool {
    self.open
  }
}

struct StubModel {
  counters: Arc<Counters>,
  fail: bool,
}

impl Model for StubModel {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = StubError;

  fn infer(&mut self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.counters.infers.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      Err(StubError)
    } else {
      Ok(DetectResult::default())
    }
  }
}

struct StubOutput {
  counters: Arc<Counters>,
  panic_every_other: bool,
}

impl Render<BgrFrame, DetectResult> for StubOutput {
  type Error = StubError;

  fn render_result(&self, frame: BgrFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let call = self.counters.renders.fetch_add(1, Ordering::SeqCst);
    if !result.is_empty() {
      self.counters.non_empty_results.fetch_add(1, Ordering::SeqCst);
    }
    assert_eq!(frame.width(), 8);
    if self.panic_every_other && call % 2 == 0 {
      panic!("渲染端崩溃");
    }
    Ok(())
  }
}

fn fast_config() -> LoopConfig {
  LoopConfig::default()
    .with_poll_interval(Duration::from_millis(2))
    .with_error_backoff(Duration::from_millis(2))
}

fn build(
  counters: &Arc<Counters>,
  model_fails: bool,
  render_panics: bool,
  config: LoopConfig,
) -> CaptureLoop<StubCamera, StubModel, StubOutput> {
  CaptureLoop::new(
    StubCamera {
      counters: Arc::clone(counters),
      open: false,
    },
    StubModel {
      counters: Arc::clone(counters),
      fail: model_fails,
    },
    StubOutput {
      counters: Arc::clone(counters),
      panic_every_other: render_panics,
    },
    config,
  )
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + Duration::from_secs(5);
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  condition()
}

#[test]
fn start_stop_state_machine() {
  let counters = Arc::new(Counters::default());
  let mut capture = build(&counters, false, false, fast_config());
  assert_eq!(capture.state(), PipelineState::Idle);

  capture.start().unwrap();
  assert_eq!(capture.state(), PipelineState::Running);
  assert_eq!(Counters::get(&counters.opens), 1);

  // 运行中再次启动不会重新打开摄像头
  capture.start().unwrap();
  assert_eq!(Counters::get(&counters.opens), 1);

  assert!(wait_until(|| Counters::get(&counters.renders) >= 1));

  capture.stop();
  assert_eq!(capture.state(), PipelineState::Idle);
  assert_eq!(Counters::get(&counters.closes), 1);

  // 停止后不再取帧
  let reads = Counters::get(&counters.reads);
  thread::sleep(Duration::from_millis(20));
  assert_eq!(Counters::get(&counters.reads), reads);

  // 空闲时停止是空操作
  capture.stop();
  assert_eq!(Counters::get(&counters.closes), 1);
}

#[test]
fn frames_processed_matches_renders() {
  let counters = Arc::new(Counters::default());
  let mut capture = build(&counters, false, false, fast_config());
  capture.start().unwrap();
  assert!(wait_until(|| capture.frames_processed() >= 3));
  capture.stop();
  assert_eq!(
    capture.frames_processed() as usize,
    Counters::get(&counters.renders)
  );
}

#[test]
fn failed_open_stays_idle_and_can_retry() {
  let counters = Arc::new(Counters::default());
  counters.fail_open.store(true, Ordering::SeqCst);
  let mut capture = build(&counters, false, false, fast_config());

  assert!(matches!(capture.start(), Err(TaskError::Camera(_))));
  assert_eq!(capture.state(), PipelineState::Idle);
  assert_eq!(Counters::get(&counters.opens), 1);
  assert_eq!(Counters::get(&counters.reads), 0);

  counters.fail_open.store(false, Ordering::SeqCst);
  capture.start().unwrap();
  assert_eq!(capture.state(), PipelineState::Running);
  capture.stop();
  assert_eq!(capture.state(), PipelineState::Idle);
}

#[test]
fn model_errors_render_empty_results() {
  let counters = Arc::new(Counters::default());
  let mut capture = build(&counters, true, false, fast_config());
  capture.start().unwrap();

  assert!(wait_until(|| Counters::get(&counters.renders) >= 3));
  capture.stop();

  assert!(Counters::get(&counters.infers) >= 3);
  assert_eq!(Counters::get(&counters.non_empty_results), 0);
}

#[test]
fn render_panics_do_not_kill_the_loop() {
  let counters = Arc::new(Counters::default());
  let mut capture = build(&counters, false, true, fast_config());
  capture.start().unwrap();

  assert!(wait_until(|| Counters::get(&counters.renders) >= 4));
  assert_eq!(capture.state(), PipelineState::Running);
  capture.stop();

  // 只有没有 panic 的渲染计入已处理帧
  let renders = Counters::get(&counters.renders) as u64;
  assert!(capture.frames_processed() <= renders / 2 + 1);

  // 模型和渲染端已随 join 取回，可以再次启动
  capture.start().unwrap();
  assert_eq!(Counters::get(&counters.opens), 2);
  capture.stop();
}

#[test]
fn no_frames_yet_keeps_polling() {
  let counters = Arc::new(Counters::default());
  counters.no_frames.store(true, Ordering::SeqCst);
  let mut capture = build(&counters, false, false, fast_config());
  capture.start().unwrap();

  assert!(wait_until(|| Counters::get(&counters.reads) >= 3));
  assert_eq!(Counters::get(&counters.renders), 0);
  assert_eq!(capture.state(), PipelineState::Running);
  capture.stop();
}

#[test]
fn stop_interrupts_long_waits() {
  let counters = Arc::new(Counters::default());
  let config = LoopConfig::default()
    .with_poll_interval(Duration::from_secs(30))
    .with_error_backoff(Duration::from_secs(30));
  let mut capture = build(&counters, false, false, config);
  capture.start().unwrap();
  assert!(wait_until(|| Counters::get(&counters.renders) >= 1));

  let now = Instant::now();
  capture.stop();
  assert!(now.elapsed() < Duration::from_secs(5));
  assert_eq!(capture.state(), PipelineState::Idle);
}

#[test]
fn drop_releases_the_camera() {
  let counters = Arc::new(Counters::default());
  {
    let mut capture = build(&counters, false, false, fast_config());
    capture.start().unwrap();
    assert!(wait_until(|| Counters::get(&counters.reads) >= 1));
  }
  assert_eq!(Counters::get(&counters.closes), 1);
}

#[test]
fn observer_sees_state_from_another_thread() {
  let counters = Arc::new(Counters::default());
  let mut capture = build(&counters, false, false, fast_config());
  let observer = capture.observer();

  capture.start().unwrap();
  let seen = thread::spawn(move || observer.state()).join().unwrap();
  assert_eq!(seen, PipelineState::Running);
  capture.stop();
}
