// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/camera.rs - 摄像头推理循环
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
  sync::Arc,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  input::CameraFeed,
  model::Model,
  output::{FrameOrigin, Publication, Render},
  task::{
    Interrupt, Task, TaskError, TaskOutcome, ValidationStats, label_of,
    watchdog::{ExpiryHook, Watchdog, exit_on_expiry},
  },
};

/// 前 5 个结果视为预热，不计入统计
pub const CAMERA_WARMUP_DRAWS: u64 = 5;
pub const CAMERA_VALIDATION_DRAWS: u64 = 200;
pub const CAMERA_WATCHDOG: Duration = Duration::from_secs(10);

/// 摄像头模式：等待邮箱中的新帧，推理并发布
pub struct CameraTask {
  validation: bool,
  frame_limit: Option<u64>,
  watchdog_timeout: Duration,
  on_expiry: ExpiryHook,
  interrupt: Interrupt,
}

impl Default for CameraTask {
  fn default() -> Self {
    Self {
      validation: false,
      frame_limit: None,
      watchdog_timeout: CAMERA_WATCHDOG,
      on_expiry: exit_on_expiry(),
      interrupt: Interrupt::new(),
    }
  }
}

impl CameraTask {
  pub fn with_validation(mut self, validation: bool) -> Self {
    self.validation = validation;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
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
}

impl<ME, RE, M, O> Task<CameraFeed, M, O> for CameraTask
where
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
  M: Model<Error = ME>,
  O: Render<Error = RE>,
{
  type Error = TaskError;

  fn run_task(self, feed: CameraFeed, mut model: M, output: O) -> Result<TaskOutcome, Self::Error> {
    info!("开始摄像头推理循环，模型输入 {}", model.input_shape());
    let watchdog = self
      .validation
      .then(|| Watchdog::arm(self.watchdog_timeout, Arc::clone(&self.on_expiry)));
    let mut stats = ValidationStats::new();
    let mut sequence = 0u64;

    loop {
      let frame = match feed.frames.recv() {
        Ok(frame) => frame,
        Err(_) if self.interrupt.is_triggered() => {
          warn!("中断信号接收，退出推理循环");
          return Ok(TaskOutcome::Interrupted);
        }
        Err(_) => {
          warn!("帧来源已关闭，退出推理循环");
          return Ok(TaskOutcome::SourceClosed);
        }
      };

      let start = Instant::now();
      model.infer(&frame).map_err(TaskError::model)?;
      let prediction = model.top_result().map_err(TaskError::model)?;
      let result = prediction.timed(start.elapsed());
      sequence += 1;
      debug!("第 {} 帧推理完成，耗时: {:.2?}", sequence, result.inference_duration);

      let display_fps = feed.display_fps.get();
      let publication = Publication {
        sequence,
        label: label_of(&model, result.label_index)?,
        label_index: result.label_index,
        confidence: result.confidence,
        inference_time: result.inference_duration,
        inference_fps: result.inference_fps(),
        display_fps: Some(display_fps),
        origin: FrameOrigin::Camera,
        preview: output
          .wants_preview()
          .then(|| Arc::new(frame.to_rgb_image())),
      };
      drop(frame);
      output
        .render_result(&publication)
        .map_err(TaskError::output)?;

      if let Some(watchdog) = &watchdog {
        watchdog.kick();
      }

      if self.validation {
        let draws = stats.count_draw();
        if draws > CAMERA_WARMUP_DRAWS {
          stats.record(result.inference_duration, Some(display_fps));
        }
        if draws >= CAMERA_VALIDATION_DRAWS {
          let report = stats.camera_report();
          info!("验证完成，共 {} 个结果，统计 {} 个", draws, stats.samples());
          println!("{}", report);
          return Ok(TaskOutcome::Completed(Some(report)));
        }
      }

      if self.frame_limit.is_some_and(|limit| sequence >= limit) {
        info!("达到指定帧数 {}, 退出推理循环", sequence);
        return Ok(TaskOutcome::Completed(None));
      }
    }
  }
}
