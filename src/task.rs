// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 推理循环
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use thiserror::Error;

use crate::{input::ImageDirectoryError, model::Model};

/// 取帧 → 推理 → 发布 的循环
///
/// 同一时刻至多一次推理在进行：上一次结果发布（`render_result` 返回）之前不会取下一帧。
pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<TaskOutcome, Self::Error>;
}

mod camera;
mod repeat_shot;
mod still_image;
mod validation;
mod watchdog;

pub use self::camera::{CAMERA_VALIDATION_DRAWS, CAMERA_WARMUP_DRAWS, CAMERA_WATCHDOG, CameraTask};
pub use self::repeat_shot::RepeatShotTask;
pub use self::still_image::{Advance, STILL_WATCHDOG, StillImageTask, expected_label};
pub use self::validation::{ValidationReport, ValidationStats};
pub use self::watchdog::{ExpiryHook, TIMEOUT_DIAGNOSTIC, Watchdog, exit_on_expiry};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("推理错误: {0}")]
  Model(Box<dyn std::error::Error + Send + Sync>),
  #[error("输出错误: {0}")]
  Output(Box<dyn std::error::Error + Send + Sync>),
  #[error("图像输入错误: {0}")]
  ImageDirectory(#[from] ImageDirectoryError),
  #[error("标签索引 {0} 超出标签表范围")]
  LabelOutOfRange(usize),
  #[error("Inference result mismatch the file name: {file} (expected {expected}, got {actual})")]
  LabelMismatch {
    file: PathBuf,
    expected: String,
    actual: String,
  },
  #[error("没有输入帧")]
  NoInput,
}

impl TaskError {
  fn model<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    TaskError::Model(Box::new(e))
  }

  fn output<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    TaskError::Output(Box::new(e))
  }
}

/// 任务正常结束的方式
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
  /// 验证完成（附报告）或输入按预期用尽
  Completed(Option<ValidationReport>),
  /// 用户中断（Ctrl-C、退出指令）
  Interrupted,
  /// 帧来源关闭（流结束或管道错误）
  SourceClosed,
}

/// 由 Ctrl-C 处理函数置位的中断标志
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn trigger(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

fn label_of<M: Model>(model: &M, index: usize) -> Result<String, TaskError> {
  model
    .label(index)
    .map(String::from)
    .ok_or(TaskError::LabelOutOfRange(index))
}
