// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/watchdog.rs - 静默看门狗
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
  sync::{Arc, Condvar, Mutex, MutexGuard},
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use tracing::{debug, error};

pub const TIMEOUT_DIAGNOSTIC: &str =
  "Timeout: camera preview and/or display is not behaving as expected";

/// 看门狗到期时的处理
pub type ExpiryHook = Arc<dyn Fn() + Send + Sync>;

/// 默认处理：打印诊断信息并以状态码 1 结束进程
pub fn exit_on_expiry() -> ExpiryHook {
  Arc::new(|| {
    error!("看门狗超时，结束进程");
    println!("{}", TIMEOUT_DIAGNOSTIC);
    std::process::exit(1);
  })
}

struct State {
  deadline: Instant,
  timeout: Duration,
  stopped: bool,
}

struct Shared {
  state: Mutex<State>,
  changed: Condvar,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, State> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// 在独立线程上计时，超过 `timeout` 没有 `kick` 就调用到期处理
///
/// 到期处理至多调用一次；`disarm` 或析构后不再触发。
pub struct Watchdog {
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
}

impl Watchdog {
  pub fn arm(timeout: Duration, on_expiry: ExpiryHook) -> Self {
    let shared = Arc::new(Shared {
      state: Mutex::new(State {
        deadline: Instant::now() + timeout,
        timeout,
        stopped: false,
      }),
      changed: Condvar::new(),
    });

    let handle = {
      let shared = Arc::clone(&shared);
      thread::spawn(move || {
        let mut state = shared.lock();
        loop {
          if state.stopped {
            return;
          }
          let now = Instant::now();
          if now >= state.deadline {
            state.stopped = true;
            drop(state);
            on_expiry();
            return;
          }
          let wait = state.deadline - now;
          state = shared
            .changed
            .wait_timeout(state, wait)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
      })
    };

    debug!("看门狗启动，超时 {:?}", timeout);
    Self {
      shared,
      handle: Some(handle),
    }
  }

  pub fn kick(&self) {
    let mut state = self.shared.lock();
    state.deadline = Instant::now() + state.timeout;
    drop(state);
    self.shared.changed.notify_all();
  }

  /// 修改超时时长并重新计时
  pub fn rearm(&self, timeout: Duration) {
    let mut state = self.shared.lock();
    state.timeout = timeout;
    state.deadline = Instant::now() + timeout;
    drop(state);
    self.shared.changed.notify_all();
  }

  pub fn disarm(mut self) {
    self.stop();
  }

  fn stop(&mut self) {
    self.shared.lock().stopped = true;
    self.shared.changed.notify_all();
    if let Some(handle) = self.handle.take()
      && handle.thread().id() != thread::current().id()
    {
      let _ = handle.join();
    }
  }
}

impl Drop for Watchdog {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn counting_hook() -> (ExpiryHook, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let hook: ExpiryHook = Arc::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    (hook, fired)
  }

  #[test]
  fn fires_once_after_silence() {
    let (hook, fired) = counting_hook();
    let _watchdog = Watchdog::arm(Duration::from_millis(20), hook);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn kicks_keep_it_quiet() {
    let (hook, fired) = counting_hook();
    let watchdog = Watchdog::arm(Duration::from_millis(150), hook);
    for _ in 0..10 {
      thread::sleep(Duration::from_millis(30));
      watchdog.kick();
    }
    watchdog.disarm();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn dropping_disarms() {
    let (hook, fired) = counting_hook();
    drop(Watchdog::arm(Duration::from_millis(30), hook));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }
}
