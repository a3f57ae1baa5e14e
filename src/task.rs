// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 采集循环与任务
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

//! 采集 -> 检测 -> 渲染循环。
//!
//! [`CaptureLoop`] 在独立线程里运行循环，`start` / `stop` 可以在任意时刻调用。
//! 模型和渲染端在启动时移交给工作线程，停止时随 `join` 一起取回。

use std::{
  fmt::Display,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{config::LoopConfig, frame::BgrFrame, input::CameraSource, model::Model, output::Render};

const WORKER_NAME: &str = "lookout-capture";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Running,
  Stopping,
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("摄像头打开失败: {0}")]
  Camera(Box<dyn std::error::Error + Send + Sync>),
  #[error("无法创建采集线程: {0}")]
  Spawn(std::io::Error),
  #[error("模型与输出已随异常退出的采集线程丢失")]
  ResourcesLost,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  // 单帧内的 panic 不应让摄像头永久不可用
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 可以在其他线程读取的循环状态
#[derive(Debug, Clone)]
pub struct LoopObserver {
  state: Arc<Mutex<PipelineState>>,
  frames: Arc<AtomicU64>,
}

impl LoopObserver {
  pub fn state(&self) -> PipelineState {
    *lock(&self.state)
  }

  pub fn frames_processed(&self) -> u64 {
    self.frames.load(Ordering::Relaxed)
  }
}

struct Worker<M, O> {
  cancel: Sender<()>,
  handle: JoinHandle<(M, O)>,
}

pub struct CaptureLoop<C: CameraSource, M, O> {
  camera: Arc<Mutex<C>>,
  resources: Option<(M, O)>,
  worker: Option<Worker<M, O>>,
  observer: LoopObserver,
  config: LoopConfig,
}

impl<C: CameraSource, M, O> CaptureLoop<C, M, O> {
  pub fn new(camera: C, model: M, output: O, config: LoopConfig) -> Self {
    Self {
      camera: Arc::new(Mutex::new(camera)),
      resources: Some((model, output)),
      worker: None,
      observer: LoopObserver {
        state: Arc::new(Mutex::new(PipelineState::Idle)),
        frames: Arc::new(AtomicU64::new(0)),
      },
      config,
    }
  }

  pub fn state(&self) -> PipelineState {
    self.observer.state()
  }

  pub fn frames_processed(&self) -> u64 {
    self.observer.frames_processed()
  }

  pub fn observer(&self) -> LoopObserver {
    self.observer.clone()
  }

  fn set_state(&self, state: PipelineState) {
    *lock(&self.observer.state) = state;
  }

  /// 通知工作线程退出并等待，随后关闭摄像头。空闲时什么也不做。
  pub fn stop(&mut self) {
    if self.state() == PipelineState::Idle {
      debug!("检测管线未运行, 忽略停止请求");
      return;
    }

    info!("停止检测管线...");
    self.set_state(PipelineState::Stopping);

    if let Some(worker) = self.worker.take() {
      // 工作线程已经退出时发送会失败，直接 join 即可
      let _ = worker.cancel.send(());
      match worker.handle.join() {
        Ok(resources) => self.resources = Some(resources),
        Err(_) => error!("采集线程异常退出, 模型与输出已丢失"),
      }
    }

    lock(&self.camera).close();
    self.set_state(PipelineState::Idle);
    info!("检测管线已停止");
  }
}

impl<C, M, O> CaptureLoop<C, M, O>
where
  C: CameraSource + 'static,
  M: Model<Input = BgrFrame> + Send + 'static,
  M::Output: Default,
  M::Error: Display,
  O: Render<BgrFrame, M::Output> + Send + 'static,
  O::Error: Display,
{
  /// 打开摄像头并启动工作线程。运行中或停止中时什么也不做。
  pub fn start(&mut self) -> Result<(), TaskError> {
    let state = self.state();
    if state != PipelineState::Idle {
      debug!("检测管线处于 {:?} 状态, 忽略启动请求", state);
      return Ok(());
    }

    let (model, output) = self.resources.take().ok_or(TaskError::ResourcesLost)?;

    if let Err(e) = lock(&self.camera).open() {
      error!("打开摄像头失败: {}", e);
      self.resources = Some((model, output));
      return Err(TaskError::Camera(Box::new(e)));
    }

    let (cancel, cancelled) = mpsc::channel();
    let camera = Arc::clone(&self.camera);
    let frames = Arc::clone(&self.observer.frames);
    let config = self.config;

    let spawned = thread::Builder::new()
      .name(WORKER_NAME.to_string())
      .spawn(move || run_worker(camera, model, output, cancelled, frames, config));

    match spawned {
      Ok(handle) => {
        self.worker = Some(Worker { cancel, handle });
        self.set_state(PipelineState::Running);
        info!("检测管线已启动");
        Ok(())
      }
      Err(e) => {
        error!("创建采集线程失败: {}", e);
        lock(&self.camera).close();
        Err(TaskError::Spawn(e))
      }
    }
  }
}

impl<C: CameraSource, M, O> Drop for CaptureLoop<C, M, O> {
  fn drop(&mut self) {
    self.stop();
  }
}

/// 等待一段时间，期间收到取消信号（或发送端被丢弃）返回 `true`
fn cancelled_within(cancel: &Receiver<()>, wait: Duration) -> bool {
  match cancel.recv_timeout(wait) {
    Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
    Err(RecvTimeoutError::Timeout) => false,
  }
}

fn process_frame<C, M, O>(
  camera: &Mutex<C>,
  model: &mut M,
  output: &O,
  frames: &AtomicU64,
) -> anyhow::Result<()>
where
  C: CameraSource,
  M: Model<Input = BgrFrame>,
  M::Output: Default,
  M::Error: Display,
  O: Render<BgrFrame, M::Output>,
  O::Error: Display,
{
  let frame = lock(camera).read_frame()?;
  let Some(frame) = frame else {
    return Ok(());
  };

  let now = Instant::now();
  let result = model.infer(&frame).unwrap_or_else(|e| {
    error!("推理失败: {}", e);
    M::Output::default()
  });
  let elapsed_a = now.elapsed();

  output
    .render_result(frame, &result)
    .map_err(|e| anyhow!("渲染失败: {}", e))?;

  let index = frames.fetch_add(1, Ordering::Relaxed) + 1;
  debug!(
    "第 {} 帧处理完成，耗时: {:.2?} / {:.2?}",
    index,
    elapsed_a,
    now.elapsed()
  );
  Ok(())
}

fn run_worker<C, M, O>(
  camera: Arc<Mutex<C>>,
  mut model: M,
  output: O,
  cancel: Receiver<()>,
  frames: Arc<AtomicU64>,
  config: LoopConfig,
) -> (M, O)
where
  C: CameraSource,
  M: Model<Input = BgrFrame>,
  M::Output: Default,
  M::Error: Display,
  O: Render<BgrFrame, M::Output>,
  O::Error: Display,
{
  info!("采集线程启动");
  loop {
    match cancel.try_recv() {
      Ok(()) | Err(TryRecvError::Disconnected) => break,
      Err(TryRecvError::Empty) => {}
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      process_frame(&camera, &mut model, &output, &frames)
    }));

    let wait = match outcome {
      Ok(Ok(())) => config.poll_interval,
      Ok(Err(e)) => {
        error!("处理帧失败: {:#}", e);
        config.error_backoff
      }
      Err(_) => {
        error!("处理帧时发生 panic");
        config.error_backoff
      }
    };

    if cancelled_within(&cancel, wait) {
      break;
    }
  }

  info!("收到取消信号, 采集线程退出");
  (model, output)
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 打开摄像头，处理一帧后退出
#[derive(Debug, Clone, Copy)]
pub struct OneShotTask {
  attempts: usize,
  poll_interval: Duration,
}

impl Default for OneShotTask {
  fn default() -> Self {
    let config = LoopConfig::default();
    Self {
      attempts: 100,
      poll_interval: config.poll_interval,
    }
  }
}

impl OneShotTask {
  /// 等待第一帧时最多尝试的次数
  pub fn with_attempts(mut self, attempts: usize) -> Self {
    self.attempts = attempts.max(1);
    self
  }
}

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: CameraSource,
  M: Model<Input = BgrFrame>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<BgrFrame, M::Output>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    input.open()?;

    let mut frame = None;
    for _ in 0..self.attempts {
      frame = input.read_frame()?;
      if frame.is_some() {
        break;
      }
      thread::sleep(self.poll_interval);
    }
    input.close();

    let frame = frame.ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 在后台运行 [`CaptureLoop`]，直到 Ctrl-C 或处理完指定帧数
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  config: LoopConfig,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_config(mut self, config: LoopConfig) -> Self {
    self.config = config;
    self
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: CameraSource + 'static,
  M: Model<Input = BgrFrame> + Send + 'static,
  M::Output: Default,
  M::Error: Display,
  O: Render<BgrFrame, M::Output> + Send + 'static,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut capture = CaptureLoop::new(input, model, output, self.config);
    capture.start()?;
    let observer = capture.observer();

    loop {
      match rx.recv_timeout(self.config.poll_interval) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
          warn!("中断信号接收，退出任务循环");
          break;
        }
        Err(RecvTimeoutError::Timeout) => {}
      }

      let processed = observer.frames_processed();
      if self.frame_number.map(|n| processed >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", processed);
        break;
      }
    }

    capture.stop();
    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancellation_wakes_wait_early() {
    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let now = Instant::now();
    assert!(cancelled_within(&rx, Duration::from_secs(5)));
    assert!(now.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn dropped_sender_counts_as_cancel() {
    let (tx, rx) = mpsc::channel::<()>();
    drop(tx);
    assert!(cancelled_within(&rx, Duration::from_secs(5)));
  }

  #[test]
  fn timeout_is_not_cancel() {
    let (_tx, rx) = mpsc::channel::<()>();
    assert!(!cancelled_within(&rx, Duration::from_millis(5)));
  }

  #[test]
  fn poisoned_lock_is_recovered() {
    let mutex = Arc::new(Mutex::new(1));
    let cloned = Arc::clone(&mutex);
    let _ = thread::spawn(move || {
      let _guard = cloned.lock().unwrap();
      panic!("poison");
    })
    .join();
    assert!(mutex.is_poisoned());
    assert_eq!(*lock(&mutex), 1);
  }
}
