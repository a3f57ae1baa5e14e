// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/channel.rs - 交给界面线程的渲染通道
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
  sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel},
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{frame::BgrFrame, model::DetectResult, output::Render};

const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);
const HANDOFF_POLL: Duration = Duration::from_millis(2);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChannelOutputError {
  #[error("渲染端已关闭")]
  Disconnected,
  #[error("渲染端在 {0:?} 内没有取走上一帧")]
  Timeout(Duration),
}

/// 一帧以及它的检测结果
#[derive(Debug, Clone)]
pub struct RenderedFrame {
  pub frame: BgrFrame,
  pub result: DetectResult,
}

/// 采集线程一侧。
///
/// 通道里最多积压一帧；渲染端还没取走上一帧时，`render_result` 等待交接完成，
/// 超过交接时限返回 [`ChannelOutputError::Timeout`]。
pub struct ChannelOutput {
  sender: SyncSender<RenderedFrame>,
  handoff_timeout: Duration,
}

/// 界面线程一侧
pub struct RenderSurface {
  receiver: Receiver<RenderedFrame>,
}

impl ChannelOutput {
  pub fn new() -> (ChannelOutput, RenderSurface) {
    let (sender, receiver) = sync_channel(1);
    (
      ChannelOutput {
        sender,
        handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
      },
      RenderSurface { receiver },
    )
  }

  pub fn with_handoff_timeout(mut self, handoff_timeout: Duration) -> Self {
    self.handoff_timeout = handoff_timeout;
    self
  }
}

impl Render<BgrFrame, DetectResult> for ChannelOutput {
  type Error = ChannelOutputError;

  fn render_result(&self, frame: BgrFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut pending = RenderedFrame {
      frame,
      result: result.clone(),
    };
    let deadline = Instant::now() + self.handoff_timeout;

    loop {
      match self.sender.try_send(pending) {
        Ok(()) => return Ok(()),
        Err(TrySendError::Disconnected(_)) => return Err(ChannelOutputError::Disconnected),
        Err(TrySendError::Full(back)) => {
          if Instant::now() >= deadline {
            warn!("渲染端繁忙, 交接超时");
            return Err(ChannelOutputError::Timeout(self.handoff_timeout));
          }
          debug!("等待渲染端取走上一帧");
          pending = back;
          thread::sleep(HANDOFF_POLL);
        }
      }
    }
  }
}

impl RenderSurface {
  /// 等待下一帧，超时返回 `Ok(None)`
  pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<RenderedFrame>, ChannelOutputError> {
    match self.receiver.recv_timeout(timeout) {
      Ok(frame) => Ok(Some(frame)),
      Err(RecvTimeoutError::Timeout) => Ok(None),
      Err(RecvTimeoutError::Disconnected) => Err(ChannelOutputError::Disconnected),
    }
  }

  /// 不阻塞，取出当前可用的帧
  pub fn try_latest(&self) -> Option<RenderedFrame> {
    self.receiver.try_iter().last()
  }
}

impl Iterator for RenderSurface {
  type Item = RenderedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.receiver.recv().ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_frame_reaches_the_surface() {
    let (output, surface) = ChannelOutput::new();
    let producer = thread::spawn(move || {
      (1..=5)
        .map(|width| output.render_result(BgrFrame::black(width, 1).unwrap(), &DetectResult::default()))
        .collect::<Vec<_>>()
    });

    let widths = surface.take(5).map(|f| f.frame.width()).collect::<Vec<_>>();
    assert_eq!(widths, vec![1, 2, 3, 4, 5]);
    assert!(producer.join().unwrap().iter().all(Result::is_ok));
  }

  #[test]
  fn stalled_surface_times_out() {
    let (output, surface) = ChannelOutput::new();
    let output = output.with_handoff_timeout(Duration::from_millis(10));
    let result = DetectResult::default();

    output.render_result(BgrFrame::black(1, 1).unwrap(), &result).unwrap();
    assert_eq!(
      output.render_result(BgrFrame::black(2, 2).unwrap(), &result),
      Err(ChannelOutputError::Timeout(Duration::from_millis(10)))
    );

    assert_eq!(surface.try_latest().unwrap().frame.width(), 1);
    assert!(surface.try_latest().is_none());
  }

  #[test]
  fn closed_surface_is_an_error() {
    let (output, surface) = ChannelOutput::new();
    drop(surface);
    assert_eq!(
      output.render_result(BgrFrame::black(1, 1).unwrap(), &DetectResult::default()),
      Err(ChannelOutputError::Disconnected)
    );
  }

  #[test]
  fn timeout_yields_none() {
    let (_output, surface) = ChannelOutput::new();
    assert_eq!(
      surface.recv_timeout(Duration::from_millis(1)).map(|f| f.is_none()),
      Ok(true)
    );
  }
}
