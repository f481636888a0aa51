// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/mailbox.rs - 单槽帧邮箱
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

//! 帧来源线程与推理线程之间的单槽邮箱
//!
//! 只保留最新的一帧：推理忙碌时到达的帧会覆盖尚未取走的旧帧，
//! 因此内存占用恒定，也不会积压。

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
  #[error("帧来源已关闭")]
  Closed,
}

/// `post` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posted {
  Delivered,
  /// 覆盖了一帧尚未被取走的旧帧
  Replaced,
  Closed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
  pub delivered: u64,
  pub dropped: u64,
}

struct Slot<T> {
  item: Option<T>,
  closed: bool,
  stats: MailboxStats,
}

struct Shared<T> {
  slot: Mutex<Slot<T>>,
  ready: Condvar,
}

pub struct Mailbox<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for Mailbox<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> Default for Mailbox<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Mailbox<T> {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        slot: Mutex::new(Slot {
          item: None,
          closed: false,
          stats: MailboxStats::default(),
        }),
        ready: Condvar::new(),
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Slot<T>> {
    self
      .shared
      .slot
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn post(&self, item: T) -> Posted {
    let mut slot = self.lock();
    if slot.closed {
      return Posted::Closed;
    }

    let posted = match slot.item.replace(item) {
      Some(_) => {
        slot.stats.dropped += 1;
        Posted::Replaced
      }
      None => Posted::Delivered,
    };
    drop(slot);
    self.shared.ready.notify_one();
    posted
  }

  /// 阻塞直到有新帧或邮箱关闭
  ///
  /// 关闭后即使槽内还有帧也返回 [`RecvError::Closed`]。
  pub fn recv(&self) -> Result<T, RecvError> {
    let mut slot = self.lock();
    loop {
      if slot.closed {
        return Err(RecvError::Closed);
      }
      if let Some(item) = slot.item.take() {
        slot.stats.delivered += 1;
        return Ok(item);
      }
      slot = self
        .shared
        .ready
        .wait(slot)
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    }
  }

  pub fn close(&self) {
    let mut slot = self.lock();
    slot.closed = true;
    slot.item = None;
    drop(slot);
    self.shared.ready.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  pub fn stats(&self) -> MailboxStats {
    self.lock().stats
  }
}
