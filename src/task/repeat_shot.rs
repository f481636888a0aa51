// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/repeat_shot.rs - 单帧重复推理基准
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

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  model::Model,
  output::{FrameOrigin, Publication, Render},
  task::{Task, TaskError, TaskOutcome, ValidationStats, label_of},
};

pub struct RepeatShotTask {
  repeats: usize,
  skip: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeats: 1000,
      skip: 2,
    }
  }
}

impl RepeatShotTask {
  /// 重复次数与不计入平均值的预热次数
  pub fn new(repeats: usize, skip: usize) -> Self {
    Self { repeats, skip }
  }
}

impl<ME, RE, I, M, O> Task<I, M, O> for RepeatShotTask
where
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = RgbNhwcFrame>,
  M: Model<Error = ME>,
  O: Render<Error = RE>,
{
  type Error = TaskError;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<TaskOutcome, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or(TaskError::NoInput)?;
    info!("输入帧获取成功，开始推理...");

    let mut stats = ValidationStats::new();
    for i in 0..self.repeats {
      let now = Instant::now();
      model.infer(&frame).map_err(TaskError::model)?;
      let elapsed = now.elapsed();
      let result = model
        .top_result()
        .map_err(TaskError::model)?
        .timed(elapsed);
      debug!("({})推理完成，耗时: {:.2?}", i, elapsed);

      let publication = Publication {
        sequence: i as u64 + 1,
        label: label_of(&model, result.label_index)?,
        label_index: result.label_index,
        confidence: result.confidence,
        inference_time: elapsed,
        inference_fps: result.inference_fps(),
        display_fps: None,
        origin: FrameOrigin::Synthetic,
        preview: None,
      };
      output
        .render_result(&publication)
        .map_err(TaskError::output)?;

      if i >= self.skip {
        stats.record(elapsed, None);
      }
    }

    let report = stats.still_report();
    warn!("平均推理时间（跳过前 {} 次）: {}", self.skip, report);
    println!("{}", report);
    Ok(TaskOutcome::Completed(Some(report)))
  }
}
