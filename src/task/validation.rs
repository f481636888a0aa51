// 该文件是 Beifeng （北风） 项目的一部分。
// src/task/validation.rs - 验证模式统计
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

use std::{fmt, time::Duration};

/// 验证模式下只追加的统计数据
#[derive(Debug, Clone)]
pub struct ValidationStats {
  inference_times: Vec<Duration>,
  display_fps: Vec<f32>,
  draw_count: u64,
  first_call: bool,
}

impl Default for ValidationStats {
  fn default() -> Self {
    Self::new()
  }
}

impl ValidationStats {
  pub fn new() -> Self {
    Self {
      inference_times: Vec::new(),
      display_fps: Vec::new(),
      draw_count: 0,
      first_call: true,
    }
  }

  /// 计数一次绘制并返回当前计数
  pub fn count_draw(&mut self) -> u64 {
    self.draw_count += 1;
    self.draw_count
  }

  pub fn draw_count(&self) -> u64 {
    self.draw_count
  }

  pub fn record(&mut self, inference_time: Duration, display_fps: Option<f32>) {
    self.inference_times.push(inference_time);
    if let Some(fps) = display_fps {
      self.display_fps.push(fps);
    }
  }

  /// 丢弃第一次推理（加速器预热），之后的耗时正常记录
  pub fn record_after_first(&mut self, inference_time: Duration) -> bool {
    if self.first_call {
      self.first_call = false;
      return false;
    }
    self.record(inference_time, None);
    true
  }

  pub fn samples(&self) -> usize {
    self.inference_times.len()
  }

  fn avg_inference_ms(&self) -> Option<f32> {
    if self.inference_times.is_empty() {
      return None;
    }
    let total = self.inference_times.iter().sum::<Duration>();
    Some(total.as_secs_f32() * 1000.0 / self.inference_times.len() as f32)
  }

  fn avg_display_fps(&self) -> Option<f32> {
    if self.display_fps.is_empty() {
      return None;
    }
    Some(self.display_fps.iter().sum::<f32>() / self.display_fps.len() as f32)
  }

  pub fn camera_report(&self) -> ValidationReport {
    let avg_inference_ms = self.avg_inference_ms();
    ValidationReport::Camera {
      avg_display_fps: self.avg_display_fps(),
      avg_inference_fps: avg_inference_ms.filter(|ms| *ms > 0.0).map(|ms| 1000.0 / ms),
      avg_inference_ms,
    }
  }

  pub fn still_report(&self) -> ValidationReport {
    ValidationReport::Still {
      avg_inference_ms: self.avg_inference_ms(),
    }
  }
}

/// 验证结束时打印的平均值；没有样本时显示 `n/a`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationReport {
  Camera {
    avg_display_fps: Option<f32>,
    avg_inference_fps: Option<f32>,
    avg_inference_ms: Option<f32>,
  },
  Still {
    avg_inference_ms: Option<f32>,
  },
}

struct Average(Option<f32>);

impl fmt::Display for Average {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0 {
      Some(value) => write!(f, "{:.4}", value),
      None => f.write_str("n/a"),
    }
  }
}

impl fmt::Display for ValidationReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      ValidationReport::Camera {
        avg_display_fps,
        avg_inference_fps,
        avg_inference_ms,
      } => {
        writeln!(f, "avg display fps= {}", Average(avg_display_fps))?;
        writeln!(f, "avg inference fps= {}", Average(avg_inference_fps))?;
        write!(f, "avg inference time= {} ms", Average(avg_inference_ms))
      }
      ValidationReport::Still { avg_inference_ms } => {
        write!(f, "avg inference time= {} ms", Average(avg_inference_ms))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_report_averages_samples() {
    let mut stats = ValidationStats::new();
    stats.record(Duration::from_millis(10), Some(15.0));
    stats.record(Duration::from_millis(30), Some(13.0));

    let report = stats.camera_report();
    assert_eq!(
      report.to_string(),
      "avg display fps= 14.0000\navg inference fps= 50.0000\navg inference time= 20.0000 ms"
    );
  }

  #[test]
  fn first_still_sample_is_skipped() {
    let mut stats = ValidationStats::new();
    assert!(!stats.record_after_first(Duration::from_millis(500)));
    assert!(stats.record_after_first(Duration::from_millis(4)));
    assert_eq!(stats.samples(), 1);
    assert_eq!(
      stats.still_report().to_string(),
      "avg inference time= 4.0000 ms"
    );
  }

  #[test]
  fn empty_stats_report_not_available() {
    let stats = ValidationStats::new();
    assert_eq!(
      stats.still_report().to_string(),
      "avg inference time= n/a ms"
    );
    assert!(stats.camera_report().to_string().contains("avg display fps= n/a"));
  }

  #[test]
  fn draw_counter_is_monotonic() {
    let mut stats = ValidationStats::new();
    assert_eq!(stats.count_draw(), 1);
    assert_eq!(stats.count_draw(), 2);
    assert_eq!(stats.draw_count(), 2);
  }
}
