// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/still_image.rs - 静态图像推理循环
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
  path::Path,
  sync::{Arc, mpsc::Receiver},
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  input::{ImageDirectory, load_image, resize_for_display, resize_for_model},
  model::Model,
  output::{FrameOrigin, Publication, Render},
  task::{
    Interrupt, Task, TaskError, TaskOutcome, ValidationStats, label_of,
    watchdog::{ExpiryHook, Watchdog, exit_on_expiry},
  },
};

/// 解码文件比取摄像头帧慢，超时比摄像头模式长
pub const STILL_WATCHDOG: Duration = Duration::from_secs(35);

const DEFAULT_CANVAS: (u32, u32) = (800, 480);

/// 界面发出的“下一张”指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
  Next,
  Exit,
}

/// 从文件名推出期望标签：去掉扩展名，取第一个 `_` 之前的部分
pub fn expected_label(path: &Path) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy())
    .unwrap_or_default()
    .split('_')
    .next()
    .unwrap_or_default()
    .to_string()
}

/// 静态图像模式
///
/// 第一张图自动处理；之后每张图等待一次 [`Advance::Next`]。
/// 验证模式以及没有指令通道时，上一张发布后立即处理下一张，工作列表取完即结束。
pub struct StillImageTask {
  validation: bool,
  advance: Option<Receiver<Advance>>,
  canvas: (u32, u32),
  watchdog_timeout: Duration,
  on_expiry: ExpiryHook,
  interrupt: Interrupt,
}

impl Default for StillImageTask {
  fn default() -> Self {
    Self {
      validation: false,
      advance: None,
      canvas: DEFAULT_CANVAS,
      watchdog_timeout: STILL_WATCHDOG,
      on_expiry: exit_on_expiry(),
      interrupt: Interrupt::new(),
    }
  }
}

impl StillImageTask {
  pub fn with_validation(mut self, validation: bool) -> Self {
    self.validation = validation;
    self
  }

  pub fn with_advance(mut self, advance: Receiver<Advance>) -> Self {
    self.advance = Some(advance);
    self
  }

  pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
    self.canvas = (width, height);
    self
  }

  pub fn with_watchdog(mut self, timeout: Duration, on_expiry: ExpiryHook) -> Self {
    self.watchdog_timeout = timeout;
    self.on_expiry = on_expiry;
    self
  }

  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = interrupt;
    self
  }

  /// 等待下一张的指令；返回 `false` 表示退出
  fn await_advance(&self) -> bool {
    match &self.advance {
      Some(advance) if !self.validation => match advance.recv() {
        Ok(Advance::Next) => true,
        Ok(Advance::Exit) | Err(_) => false,
      },
      _ => true,
    }
  }

  /// 交互模式可以无限循环；其余模式取完一轮即结束
  fn runs_once(&self) -> bool {
    self.validation || self.advance.is_none()
  }
}

impl<ME, RE, M, O> Task<ImageDirectory, M, O> for StillImageTask
where
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
  M: Model<Error = ME>,
  O: Render<Error = RE>,
{
  type Error = TaskError;

  fn run_task(
    self,
    mut images: ImageDirectory,
    mut model: M,
    output: O,
  ) -> Result<TaskOutcome, Self::Error> {
    info!(
      "开始静态图像推理，目录 {}，共 {} 张",
      images.directory().display(),
      images.len()
    );
    let shape = model.input_shape();
    let watchdog = self
      .validation
      .then(|| Watchdog::arm(self.watchdog_timeout, Arc::clone(&self.on_expiry)));
    let mut stats = ValidationStats::new();
    let mut sequence = 0u64;

    loop {
      if sequence > 0 && !self.await_advance() {
        info!("收到退出指令");
        return Ok(TaskOutcome::Interrupted);
      }
      if self.interrupt.is_triggered() {
        warn!("中断信号接收，退出推理循环");
        return Ok(TaskOutcome::Interrupted);
      }

      let path = images.next_path();
      debug!("处理图像 {}", path.display());
      let image = load_image(&path)?;
      let preview = resize_for_display(&image, self.canvas.0, self.canvas.1);
      let frame = resize_for_model(&image, shape);
      drop(image);

      let start = Instant::now();
      model.infer(&frame).map_err(TaskError::model)?;
      let inference_time = start.elapsed();
      let prediction = model.top_result().map_err(TaskError::model)?;
      let result = prediction.timed(inference_time);
      let label = label_of(&model, result.label_index)?;
      sequence += 1;
      info!("{} -> {} ({:.2?})", path.display(), label, inference_time);

      if self.validation {
        if let Some(watchdog) = &watchdog {
          watchdog.rearm(self.watchdog_timeout);
        }
        stats.record_after_first(inference_time);

        let expected = expected_label(&path);
        println!(
          "name extract from the picture file: {:32} label {}",
          expected, label
        );
        if expected != label {
          error!("推理结果与文件名不一致: {} != {}", label, expected);
          println!("Inference result mismatch the file name");
          return Err(TaskError::LabelMismatch {
            file: path,
            expected,
            actual: label,
          });
        }
      }

      let publication = Publication {
        sequence,
        label,
        label_index: result.label_index,
        confidence: result.confidence,
        inference_time,
        inference_fps: result.inference_fps(),
        display_fps: None,
        origin: FrameOrigin::Still { path },
        preview: Some(Arc::new(preview)),
      };
      output
        .render_result(&publication)
        .map_err(TaskError::output)?;

      if self.runs_once() && images.is_exhausted() {
        info!("全部 {} 张图像处理完成", images.len());
        let report = self.validation.then(|| stats.still_report());
        if let Some(report) = &report {
          println!("{}", report);
        }
        return Ok(TaskOutcome::Completed(report));
      }
    }
  }
}
