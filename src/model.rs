// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 模型
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

use std::time::Duration;

use crate::frame::{InputShape, RgbNhwcFrame};

/// 同步推理模型
///
/// `infer` 写入输入并执行推理，`top_result` 读取上一次推理的输出。
/// 两者必须成对调用。
pub trait Model {
  type Error;

  fn input_shape(&self) -> InputShape;
  fn infer(&mut self, input: &RgbNhwcFrame) -> Result<(), Self::Error>;
  fn top_result(&self) -> Result<Prediction, Self::Error>;
  fn label(&self, index: usize) -> Option<&str>;
}

/// 单个类别的得分
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
  pub label_index: usize,
  /// 归一化到 [0, 1]
  pub confidence: f32,
}

impl Prediction {
  pub fn timed(self, inference_duration: Duration) -> InferenceResult {
    InferenceResult {
      label_index: self.label_index,
      confidence: self.confidence,
      inference_duration,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceResult {
  pub label_index: usize,
  pub confidence: f32,
  pub inference_duration: Duration,
}

impl InferenceResult {
  /// 由单次推理耗时换算的瞬时推理帧率
  pub fn inference_fps(&self) -> f32 {
    let secs = self.inference_duration.as_secs_f32();
    if secs > 0.0 { 1.0 / secs } else { 0.0 }
  }
}

mod backend;
mod classifier;
mod engine;
#[cfg(feature = "tflite")]
mod tflite;

pub use self::backend::{
  AcceleratorDetector, Backend, DelegatePaths, EDGE_TPU_USB_VENDORS, PerformanceTier,
  ResolvedBackend, SysfsUsbDetector, default_thread_count, resolve_backend,
};
pub use self::classifier::{Classifier, ClassifierBuilder, ClassifierError, ModelHandle};
pub use self::engine::{ElementType, Engine, OpenEngine, TensorData, TensorSpec};
#[cfg(feature = "tflite")]
pub use self::tflite::{TfliteEngine, TfliteError};
