// 该文件是 Beifeng （北风） 项目的一部分。
// tests/common/mod.rs - 集成测试用的确定性推理引擎
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

#![allow(dead_code)]

use std::{
  path::Path,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use beifeng::{
  label::LabelTable,
  model::{Classifier, ClassifierBuilder, ElementType, Engine, TensorData, TensorSpec},
};
use image::{Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum ColorEngineError {
  #[error("只接受 u8 输入")]
  UnexpectedInput,
}

/// 一次 invoke 的起止时间
#[derive(Debug, Clone, Copy)]
pub struct Span {
  pub start: Instant,
  pub end: Instant,
}

/// 共享的调用记录，引擎移交给任务后仍可检查
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
  spans: Arc<Mutex<Vec<Span>>>,
  overlapped: Arc<AtomicBool>,
}

impl EngineLog {
  pub fn spans(&self) -> Vec<Span> {
    self.spans.lock().unwrap().clone()
  }

  pub fn invocations(&self) -> usize {
    self.spans.lock().unwrap().len()
  }

  pub fn overlapped(&self) -> bool {
    self.overlapped.load(Ordering::SeqCst)
  }
}

/// 按红/绿/蓝三个通道的占比给出三类得分（u8 量化）
pub struct ColorEngine {
  input: TensorSpec,
  output: TensorSpec,
  pixels: Vec<u8>,
  scores: Vec<u8>,
  busy: Arc<AtomicBool>,
  log: EngineLog,
  work: Duration,
}

impl ColorEngine {
  pub fn new(height: usize, width: usize) -> (Self, EngineLog) {
    let log = EngineLog::default();
    let engine = Self {
      input: TensorSpec::new(vec![1, height, width, 3], ElementType::UInt8),
      output: TensorSpec::new(vec![1, 3], ElementType::UInt8),
      pixels: Vec::new(),
      scores: vec![0; 3],
      busy: Arc::new(AtomicBool::new(false)),
      log: log.clone(),
      work: Duration::from_millis(1),
    };
    (engine, log)
  }
}

impl Engine for ColorEngine {
  type Error = ColorEngineError;

  fn input_spec(&self) -> &TensorSpec {
    &self.input
  }

  fn output_spec(&self) -> &TensorSpec {
    &self.output
  }

  fn set_input(&mut self, input: TensorData<'_>) -> Result<(), Self::Error> {
    match input {
      TensorData::UInt8(data) => {
        self.pixels.clear();
        self.pixels.extend_from_slice(data);
        Ok(())
      }
      TensorData::Float32(_) => Err(ColorEngineError::UnexpectedInput),
    }
  }

  fn invoke(&mut self) -> Result<(), Self::Error> {
    if self.busy.swap(true, Ordering::SeqCst) {
      self.log.overlapped.store(true, Ordering::SeqCst);
    }
    let start = Instant::now();
    thread::sleep(self.work);

    let mut sums = [0u64; 3];
    for pixel in self.pixels.chunks(3) {
      for (sum, value) in sums.iter_mut().zip(pixel) {
        *sum += *value as u64;
      }
    }
    let total = sums.iter().sum::<u64>();
    for (score, sum) in self.scores.iter_mut().zip(sums) {
      *score = if total == 0 { 0 } else { (sum * 255 / total) as u8 };
    }

    self.busy.store(false, Ordering::SeqCst);
    self.log.spans.lock().unwrap().push(Span {
      start,
      end: Instant::now(),
    });
    Ok(())
  }

  fn output(&self) -> Result<TensorData<'_>, Self::Error> {
    Ok(TensorData::UInt8(&self.scores))
  }
}

/// 在 `dir` 中写入占位模型与标签文件，构建一个颜色分类器
pub fn color_classifier(
  dir: &Path,
  labels: [&str; 3],
  height: usize,
  width: usize,
) -> (Classifier<ColorEngine>, EngineLog) {
  let model = dir.join("model.tflite");
  std::fs::write(&model, b"").unwrap();
  let label_path = dir.join("labels.txt");
  std::fs::write(&label_path, labels.join("\n")).unwrap();

  let handle = ClassifierBuilder::new(&model, &label_path)
    .threads(Some(1))
    .resolve()
    .unwrap();
  let labels = LabelTable::load(&label_path).unwrap();
  let (engine, log) = ColorEngine::new(height, width);
  (Classifier::with_engine(handle, engine, labels).unwrap(), log)
}

pub fn write_solid(dir: &Path, name: &str, color: [u8; 3]) {
  RgbImage::from_pixel(40, 30, Rgb(color))
    .save(dir.join(name))
    .unwrap();
}
