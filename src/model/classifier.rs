// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/classifier.rs - 图像分类器
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{InputShape, RGB_CHANNELS, RgbNhwcFrame},
  label::{LabelError, LabelTable},
  model::{
    AcceleratorDetector, Backend, DelegatePaths, ElementType, Engine, Model, OpenEngine, Prediction,
    ResolvedBackend, SysfsUsbDetector, TensorData, default_thread_count, resolve_backend,
  },
};

const DEFAULT_INPUT_MEAN: f32 = 127.5;
const DEFAULT_INPUT_STD: f32 = 127.5;
const DEFAULT_RUNTIME_LIBRARY: &str = "libtensorflowlite_c.so";
const QUANTIZED_SCORE_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("标签错误: {0}")]
  Label(#[from] LabelError),
  #[error("未检测到 Edge TPU，请连接设备后重试")]
  AcceleratorNotFound,
  #[error("标签数量 {labels} 与模型输出类别数 {classes} 不一致")]
  LabelCountMismatch { labels: usize, classes: usize },
  #[error("不支持的模型输入形状: {0:?}")]
  UnsupportedInput(Vec<usize>),
  #[error("不支持的张量类型: {0:?}")]
  UnsupportedTensorType(ElementType),
  #[error("输入帧尺寸不匹配: 期望 {expected}, 实际 {actual}")]
  FrameShapeMismatch {
    expected: InputShape,
    actual: InputShape,
  },
  #[error("推理引擎错误: {0}")]
  Engine(Box<dyn std::error::Error + Send + Sync>),
}

impl ClassifierError {
  fn engine<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    ClassifierError::Engine(Box::new(e))
  }
}

/// 加载模型所需的全部参数，构建后不可变
///
/// 更换后端需要重新构建句柄与分类器。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHandle {
  pub model_path: PathBuf,
  pub label_path: PathBuf,
  pub input_mean: f32,
  pub input_std: f32,
  pub backend: ResolvedBackend,
  pub threads: usize,
  pub runtime_library: PathBuf,
}

pub struct ClassifierBuilder {
  model_path: PathBuf,
  label_path: PathBuf,
  input_mean: f32,
  input_std: f32,
  backend: Backend,
  threads: Option<usize>,
  camera_preview: bool,
  runtime_library: PathBuf,
  delegate_paths: DelegatePaths,
  detector: Box<dyn AcceleratorDetector>,
}

impl ClassifierBuilder {
  pub fn new(model_path: impl Into<PathBuf>, label_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      label_path: label_path.into(),
      input_mean: DEFAULT_INPUT_MEAN,
      input_std: DEFAULT_INPUT_STD,
      backend: Backend::Cpu,
      threads: None,
      camera_preview: false,
      runtime_library: PathBuf::from(DEFAULT_RUNTIME_LIBRARY),
      delegate_paths: DelegatePaths::default(),
      detector: Box::new(SysfsUsbDetector::default()),
    }
  }

  pub fn normalization(mut self, mean: f32, std: f32) -> Self {
    self.input_mean = mean;
    self.input_std = std;
    self
  }

  pub fn backend(mut self, backend: Backend) -> Self {
    self.backend = backend;
    self
  }

  pub fn threads(mut self, threads: Option<usize>) -> Self {
    self.threads = threads;
    self
  }

  pub fn camera_preview(mut self, camera_preview: bool) -> Self {
    self.camera_preview = camera_preview;
    self
  }

  pub fn runtime_library(mut self, path: impl Into<PathBuf>) -> Self {
    self.runtime_library = path.into();
    self
  }

  pub fn delegate_paths(mut self, paths: DelegatePaths) -> Self {
    self.delegate_paths = paths;
    self
  }

  pub fn detector(mut self, detector: impl AcceleratorDetector + 'static) -> Self {
    self.detector = Box::new(detector);
    self
  }

  /// 校验文件并解析后端与线程数
  pub fn resolve(self) -> Result<ModelHandle, ClassifierError> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(ClassifierError::ModelNotFound(self.model_path));
    }

    let backend = resolve_backend(&self.backend, self.detector.as_ref(), &self.delegate_paths)?;

    let threads = self.threads.filter(|n| *n > 0).unwrap_or_else(|| {
      let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
      default_thread_count(cores, self.camera_preview)
    });
    info!("推理线程数: {}", threads);

    Ok(ModelHandle {
      model_path: self.model_path,
      label_path: self.label_path,
      input_mean: self.input_mean,
      input_std: self.input_std,
      backend,
      threads,
      runtime_library: self.runtime_library,
    })
  }

  pub fn build<E: OpenEngine>(self) -> Result<Classifier<E>, ClassifierError> {
    let handle = self.resolve()?;
    Classifier::from_handle(handle)
  }
}

/// 持有模型、标签与后端的分类器
pub struct Classifier<E> {
  handle: ModelHandle,
  engine: E,
  labels: LabelTable,
  input_shape: InputShape,
  quantized: bool,
  normalized: Vec<f32>,
}

impl<E: OpenEngine> Classifier<E> {
  pub fn from_handle(handle: ModelHandle) -> Result<Self, ClassifierError> {
    let labels = LabelTable::load(&handle.label_path)?;
    info!("加载模型文件: {}", handle.model_path.display());
    let engine = E::open(&handle).map_err(ClassifierError::engine)?;
    Self::with_engine(handle, engine, labels)
  }
}

impl<E: Engine> Classifier<E> {
  pub fn with_engine(
    handle: ModelHandle,
    engine: E,
    labels: LabelTable,
  ) -> Result<Self, ClassifierError> {
    let input = engine.input_spec().clone();
    let output = engine.output_spec().clone();
    debug!("模型输入: {:?}", input);
    debug!("模型输出: {:?}", output);

    let input_shape = match input.dims.as_slice() {
      [1, height, width, channels] if *channels == RGB_CHANNELS => {
        InputShape::new(*height, *width, *channels)
      }
      _ => return Err(ClassifierError::UnsupportedInput(input.dims.clone())),
    };

    let quantized = match input.element {
      ElementType::UInt8 => true,
      ElementType::Float32 => {
        info!("浮点模型，输入按 (x - {}) / {} 归一化", handle.input_mean, handle.input_std);
        false
      }
      other => return Err(ClassifierError::UnsupportedTensorType(other)),
    };

    if !matches!(output.element, ElementType::UInt8 | ElementType::Float32) {
      return Err(ClassifierError::UnsupportedTensorType(output.element));
    }

    let classes = output.element_count();
    if labels.len() != classes {
      error!(
        "标签数量 {} 与模型输出类别数 {} 不一致",
        labels.len(),
        classes
      );
      return Err(ClassifierError::LabelCountMismatch {
        labels: labels.len(),
        classes,
      });
    }

    info!("模型输入尺寸: {}，类别数: {}", input_shape, classes);

    Ok(Self {
      handle,
      engine,
      labels,
      input_shape,
      quantized,
      normalized: Vec::new(),
    })
  }

  pub fn handle(&self) -> &ModelHandle {
    &self.handle
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn is_quantized(&self) -> bool {
    self.quantized
  }

  pub fn get_input_shape(&self) -> InputShape {
    self.input_shape
  }

  pub fn infer(&mut self, image: &RgbNhwcFrame) -> Result<(), ClassifierError> {
    if image.shape() != self.input_shape {
      return Err(ClassifierError::FrameShapeMismatch {
        expected: self.input_shape,
        actual: image.shape(),
      });
    }

    // 批维度为 1，NHWC 内存布局与单帧一致
    if self.quantized {
      self
        .engine
        .set_input(TensorData::UInt8(image.as_nhwc()))
        .map_err(ClassifierError::engine)?;
    } else {
      let (mean, std) = (self.handle.input_mean, self.handle.input_std);
      self.normalized.clear();
      self
        .normalized
        .extend(image.as_nhwc().iter().map(|&v| (v as f32 - mean) / std));
      self
        .engine
        .set_input(TensorData::Float32(&self.normalized))
        .map_err(ClassifierError::engine)?;
    }

    debug!("执行模型推理");
    self.engine.invoke().map_err(ClassifierError::engine)
  }

  fn scores(&self) -> Result<Vec<f32>, ClassifierError> {
    let output = self.engine.output().map_err(ClassifierError::engine)?;
    let scores = match output {
      TensorData::UInt8(raw) => raw
        .iter()
        .map(|&v| v as f32 / QUANTIZED_SCORE_SCALE)
        .collect(),
      TensorData::Float32(raw) => raw
        .iter()
        .map(|&v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
        .collect(),
    };
    Ok(scores)
  }

  /// 按得分降序返回前 `k` 个类别，同分时索引小者优先
  pub fn top_k(&self, k: usize) -> Result<Vec<Prediction>, ClassifierError> {
    let scores = self.scores()?;
    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    Ok(
      order
        .into_iter()
        .take(k)
        .map(|label_index| Prediction {
          label_index,
          confidence: scores[label_index],
        })
        .collect(),
    )
  }

  pub fn get_top_result(&self) -> Result<Prediction, ClassifierError> {
    self
      .top_k(1)?
      .into_iter()
      .next()
      .ok_or(ClassifierError::LabelCountMismatch {
        labels: self.labels.len(),
        classes: 0,
      })
  }
}

impl<E: Engine> Model for Classifier<E> {
  type Error = ClassifierError;

  fn input_shape(&self) -> InputShape {
    self.get_input_shape()
  }

  fn infer(&mut self, input: &RgbNhwcFrame) -> Result<(), Self::Error> {
    Classifier::infer(self, input)
  }

  fn top_result(&self) -> Result<Prediction, Self::Error> {
    self.get_top_result()
  }

  fn label(&self, index: usize) -> Option<&str> {
    self.labels.get(index)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::TensorSpec;

  #[derive(Debug, thiserror::Error)]
  #[error("fake engine error")]
  struct FakeError;

  /// 输出由调用方预置，记录最近一次输入
  struct FakeEngine {
    input: TensorSpec,
    output: TensorSpec,
    scores_u8: Vec<u8>,
    scores_f32: Vec<f32>,
    last_u8: Vec<u8>,
    last_f32: Vec<f32>,
  }

  impl FakeEngine {
    fn quantized(scores: Vec<u8>) -> Self {
      Self {
        input: TensorSpec::new(vec![1, 2, 2, 3], ElementType::UInt8),
        output: TensorSpec::new(vec![1, scores.len()], ElementType::UInt8),
        scores_u8: scores,
        scores_f32: Vec::new(),
        last_u8: Vec::new(),
        last_f32: Vec::new(),
      }
    }

    fn floating(scores: Vec<f32>) -> Self {
      Self {
        input: TensorSpec::new(vec![1, 2, 2, 3], ElementType::Float32),
        output: TensorSpec::new(vec![1, scores.len()], ElementType::Float32),
        scores_u8: Vec::new(),
        scores_f32: scores,
        last_u8: Vec::new(),
        last_f32: Vec::new(),
      }
    }
  }

  impl Engine for FakeEngine {
    type Error = FakeError;

    fn input_spec(&self) -> &TensorSpec {
      &self.input
    }

    fn output_spec(&self) -> &TensorSpec {
      &self.output
    }

    fn set_input(&mut self, input: TensorData<'_>) -> Result<(), Self::Error> {
      match input {
        TensorData::UInt8(data) => self.last_u8 = data.to_vec(),
        TensorData::Float32(data) => self.last_f32 = data.to_vec(),
      }
      Ok(())
    }

    fn invoke(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }

    fn output(&self) -> Result<TensorData<'_>, Self::Error> {
      match self.output.element {
        ElementType::UInt8 => Ok(TensorData::UInt8(&self.scores_u8)),
        _ => Ok(TensorData::Float32(&self.scores_f32)),
      }
    }
  }

  fn handle() -> ModelHandle {
    ModelHandle {
      model_path: PathBuf::from("model.tflite"),
      label_path: PathBuf::from("labels.txt"),
      input_mean: 127.5,
      input_std: 127.5,
      backend: ResolvedBackend::Cpu,
      threads: 1,
      runtime_library: PathBuf::from(DEFAULT_RUNTIME_LIBRARY),
    }
  }

  fn labels(n: usize) -> LabelTable {
    (0..n).map(|i| format!("class{}", i)).collect()
  }

  #[test]
  fn label_count_must_match_output_classes() {
    let err =
      Classifier::with_engine(handle(), FakeEngine::quantized(vec![0; 4]), labels(3)).err();
    assert!(matches!(
      err,
      Some(ClassifierError::LabelCountMismatch {
        labels: 3,
        classes: 4
      })
    ));
  }

  #[test]
  fn quantized_scores_are_scaled_to_unit_range() {
    let mut classifier =
      Classifier::with_engine(handle(), FakeEngine::quantized(vec![10, 255, 40]), labels(3))
        .unwrap();
    assert!(classifier.is_quantized());
    assert_eq!(classifier.get_input_shape(), InputShape::new(2, 2, 3));

    let frame = RgbNhwcFrame::filled(2, 2, [255, 0, 0]);
    classifier.infer(&frame).unwrap();
    // 量化模型直接提交原始字节
    assert_eq!(classifier.engine.last_u8, frame.as_nhwc());

    let top = classifier.get_top_result().unwrap();
    assert_eq!(top.label_index, 1);
    assert!((top.confidence - 1.0).abs() < f32::EPSILON);
  }

  #[test]
  fn float_inputs_are_normalized() {
    let mut classifier =
      Classifier::with_engine(handle(), FakeEngine::floating(vec![0.1, 0.7, 0.2]), labels(3))
        .unwrap();
    assert!(!classifier.is_quantized());

    let frame = RgbNhwcFrame::filled(2, 2, [255, 0, 127]);
    classifier.infer(&frame).unwrap();
    let input = &classifier.engine.last_f32;
    assert_eq!(input.len(), 12);
    assert!((input[0] - 1.0).abs() < 1e-6);
    assert!((input[1] + 1.0).abs() < 1e-6);
    assert!((input[2] - (-0.5 / 127.5)).abs() < 1e-6);

    let top = classifier.get_top_result().unwrap();
    assert_eq!(top.label_index, 1);
    assert!((top.confidence - 0.7).abs() < 1e-6);
  }

  #[test]
  fn ties_prefer_the_lowest_index() {
    let classifier =
      Classifier::with_engine(handle(), FakeEngine::quantized(vec![3, 9, 9, 1, 9]), labels(5))
        .unwrap();
    let top = classifier.top_k(5).unwrap();
    let order = top.iter().map(|p| p.label_index).collect::<Vec<_>>();
    assert_eq!(order, vec![1, 2, 4, 0, 3]);
    assert_eq!(classifier.get_top_result().unwrap().label_index, 1);
  }

  #[test]
  fn float_scores_stay_in_unit_range() {
    let classifier = Classifier::with_engine(
      handle(),
      FakeEngine::floating(vec![f32::NAN, 1.5, -0.3]),
      labels(3),
    )
    .unwrap();
    let top = classifier.top_k(3).unwrap();
    assert!(top.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
    assert_eq!(top[0].label_index, 1);
    assert_eq!(top[0].confidence, 1.0);
  }

  #[test]
  fn frame_shape_is_checked_before_inference() {
    let mut classifier =
      Classifier::with_engine(handle(), FakeEngine::quantized(vec![0; 2]), labels(2)).unwrap();
    let err = classifier
      .infer(&RgbNhwcFrame::with_shape(3, 2))
      .unwrap_err();
    assert!(matches!(err, ClassifierError::FrameShapeMismatch { .. }));
  }

  #[test]
  fn non_rgb_inputs_are_rejected() {
    let mut engine = FakeEngine::quantized(vec![0; 2]);
    engine.input = TensorSpec::new(vec![1, 2, 2, 1], ElementType::UInt8);
    let err = Classifier::with_engine(handle(), engine, labels(2)).err();
    assert!(matches!(err, Some(ClassifierError::UnsupportedInput(_))));
  }

  #[test]
  fn resolve_requires_model_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClassifierBuilder::new(dir.path().join("missing.tflite"), "labels.txt")
      .resolve()
      .unwrap_err();
    assert!(matches!(err, ClassifierError::ModelNotFound(_)));
  }

  #[test]
  fn resolve_honours_thread_override() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.tflite");
    std::fs::write(&model, b"tflite").unwrap();
    let handle = ClassifierBuilder::new(&model, dir.path().join("labels.txt"))
      .threads(Some(3))
      .normalization(0.0, 255.0)
      .resolve()
      .unwrap();
    assert_eq!(handle.threads, 3);
    assert_eq!(handle.backend, ResolvedBackend::Cpu);
    assert_eq!(handle.input_std, 255.0);
  }
}
