// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/tflite.rs - TensorFlow Lite 推理引擎
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

//! # TensorFlow Lite 推理引擎
//!
//! CPU 后端使用 [`tflitec`] 的解释器。
//!
//! 外部 delegate（例如 Coral Edge TPU 的 `libedgetpu-std.so.2`）需要在创建解释器前
//! 挂到解释器选项上，`tflitec` 没有开放这一步，因此 delegate 后端在运行时加载
//! `libtensorflowlite_c.so`，见 `delegate` 模块。

mod delegate;

use thiserror::Error;
use tflitec::{
  interpreter::{Interpreter, Options},
  tensor::DataType,
};
use tracing::{debug, info};

use crate::model::{
  ElementType, Engine, ModelHandle, OpenEngine, ResolvedBackend, TensorData, TensorSpec,
};

use self::delegate::DelegateEngine;

#[derive(Error, Debug)]
pub enum TfliteError {
  #[error("TFLite 错误: {0}")]
  Runtime(String),
  #[error("无法加载动态库 {path}: {source}")]
  Library {
    path: String,
    source: libloading::Error,
  },
  #[error("动态库缺少符号 {symbol}: {source}")]
  Symbol {
    symbol: &'static str,
    source: libloading::Error,
  },
  #[error("模型路径无效: {0}")]
  InvalidPath(String),
  #[error("{0} 调用失败")]
  NullHandle(&'static str),
  #[error("{call} 返回错误状态 {status}")]
  Status { call: &'static str, status: i32 },
  #[error("张量类型不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  TypeMismatch {
    expected: ElementType,
    actual: ElementType,
  },
  #[error("输入大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  SizeMismatch { expected: usize, actual: usize },
}

fn runtime(e: tflitec::Error) -> TfliteError {
  TfliteError::Runtime(e.to_string())
}

fn element_of(data_type: DataType) -> ElementType {
  match data_type {
    DataType::Uint8 => ElementType::UInt8,
    DataType::Float32 => ElementType::Float32,
    other => ElementType::Other(other as i32),
  }
}

fn element_of_input(input: &TensorData<'_>) -> ElementType {
  match input {
    TensorData::UInt8(_) => ElementType::UInt8,
    TensorData::Float32(_) => ElementType::Float32,
  }
}

/// 推理结束后拷出的输出，之后的读取不再触碰解释器
#[derive(Default)]
struct OutputBuffer {
  u8: Vec<u8>,
  f32: Vec<f32>,
}

impl OutputBuffer {
  fn view(&self, element: ElementType) -> Result<TensorData<'_>, TfliteError> {
    match element {
      ElementType::UInt8 => Ok(TensorData::UInt8(&self.u8)),
      ElementType::Float32 => Ok(TensorData::Float32(&self.f32)),
      other => Err(TfliteError::TypeMismatch {
        expected: ElementType::Float32,
        actual: other,
      }),
    }
  }
}

/// 基于 `tflitec` 解释器的 CPU 引擎
struct InterpreterEngine {
  interpreter: Interpreter,
  input_spec: TensorSpec,
  output_spec: TensorSpec,
  output: OutputBuffer,
}

impl InterpreterEngine {
  fn open(handle: &ModelHandle) -> Result<Self, TfliteError> {
    let path = handle
      .model_path
      .to_str()
      .ok_or_else(|| TfliteError::InvalidPath(handle.model_path.display().to_string()))?;

    let mut options = Options::default();
    options.thread_count = handle.threads as i32;
    let interpreter = Interpreter::with_model_path(path, Some(options)).map_err(runtime)?;
    interpreter.allocate_tensors().map_err(runtime)?;

    let input = interpreter.input(0).map_err(runtime)?;
    let input_spec = TensorSpec::new(
      input.shape().dimensions().to_vec(),
      element_of(input.data_type()),
    );
    let output = interpreter.output(0).map_err(runtime)?;
    let output_spec = TensorSpec::new(
      output.shape().dimensions().to_vec(),
      element_of(output.data_type()),
    );
    debug!("TFLite 输入张量: {:?}", input_spec);
    debug!("TFLite 输出张量: {:?}", output_spec);

    Ok(Self {
      interpreter,
      input_spec,
      output_spec,
      output: OutputBuffer::default(),
    })
  }

  fn set_input(&mut self, input: TensorData<'_>) -> Result<(), TfliteError> {
    let actual = element_of_input(&input);
    if actual != self.input_spec.element {
      return Err(TfliteError::TypeMismatch {
        expected: self.input_spec.element,
        actual,
      });
    }
    match input {
      TensorData::UInt8(data) => self.interpreter.copy(data, 0),
      TensorData::Float32(data) => self.interpreter.copy(data, 0),
    }
    .map_err(runtime)
  }

  fn invoke(&mut self) -> Result<(), TfliteError> {
    self.interpreter.invoke().map_err(runtime)?;

    let tensor = self.interpreter.output(0).map_err(runtime)?;
    match self.output_spec.element {
      ElementType::UInt8 => {
        self.output.u8.clear();
        self.output.u8.extend_from_slice(tensor.data::<u8>());
      }
      ElementType::Float32 => {
        self.output.f32.clear();
        self.output.f32.extend_from_slice(tensor.data::<f32>());
      }
      other => {
        return Err(TfliteError::TypeMismatch {
          expected: ElementType::Float32,
          actual: other,
        });
      }
    }
    Ok(())
  }
}

enum Inner {
  Cpu(InterpreterEngine),
  Delegate(DelegateEngine),
}

/// 单输入单输出的 TFLite 引擎，后端由 [`ModelHandle::backend`] 决定
pub struct TfliteEngine {
  inner: Inner,
}

impl OpenEngine for TfliteEngine {
  fn open(handle: &ModelHandle) -> Result<Self, Self::Error> {
    let inner = match &handle.backend {
      ResolvedBackend::Cpu => {
        info!("未使用 delegate，CPU 模式");
        Inner::Cpu(InterpreterEngine::open(handle)?)
      }
      ResolvedBackend::Delegate(path) => Inner::Delegate(DelegateEngine::open(handle, path)?),
    };
    Ok(Self { inner })
  }
}

impl Engine for TfliteEngine {
  type Error = TfliteError;

  fn input_spec(&self) -> &TensorSpec {
    match &self.inner {
      Inner::Cpu(engine) => &engine.input_spec,
      Inner::Delegate(engine) => engine.input_spec(),
    }
  }

  fn output_spec(&self) -> &TensorSpec {
    match &self.inner {
      Inner::Cpu(engine) => &engine.output_spec,
      Inner::Delegate(engine) => engine.output_spec(),
    }
  }

  fn set_input(&mut self, input: TensorData<'_>) -> Result<(), Self::Error> {
    match &mut self.inner {
      Inner::Cpu(engine) => engine.set_input(input),
      Inner::Delegate(engine) => engine.set_input(input),
    }
  }

  fn invoke(&mut self) -> Result<(), Self::Error> {
    match &mut self.inner {
      Inner::Cpu(engine) => engine.invoke(),
      Inner::Delegate(engine) => engine.invoke(),
    }
  }

  fn output(&self) -> Result<TensorData<'_>, Self::Error> {
    match &self.inner {
      Inner::Cpu(engine) => engine.output.view(engine.output_spec.element),
      Inner::Delegate(engine) => engine.output(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  fn handle(model_path: PathBuf, backend: ResolvedBackend) -> ModelHandle {
    ModelHandle {
      model_path,
      label_path: PathBuf::from("labels.txt"),
      input_mean: 127.5,
      input_std: 127.5,
      backend,
      threads: 1,
      runtime_library: PathBuf::from("/nonexistent/libtensorflowlite_c.so"),
    }
  }

  #[test]
  fn unreadable_model_is_a_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("broken.tflite");
    std::fs::write(&model, b"not a flatbuffer").unwrap();

    let err = TfliteEngine::open(&handle(model, ResolvedBackend::Cpu)).err();
    assert!(matches!(err, Some(TfliteError::Runtime(_))));
  }

  #[test]
  fn delegate_backend_needs_the_runtime_library() {
    let backend = ResolvedBackend::Delegate(PathBuf::from("/usr/lib/libedgetpu-std.so.2"));
    let err = TfliteEngine::open(&handle(PathBuf::from("model.tflite"), backend)).err();
    assert!(matches!(err, Some(TfliteError::Library { .. })));
  }

  #[test]
  fn output_buffer_follows_element_type() {
    let buffer = OutputBuffer {
      u8: vec![1, 2],
      f32: vec![0.5],
    };
    assert_eq!(
      buffer.view(ElementType::UInt8).unwrap(),
      TensorData::UInt8(&[1, 2])
    );
    assert_eq!(
      buffer.view(ElementType::Float32).unwrap(),
      TensorData::Float32(&[0.5])
    );
    assert!(matches!(
      buffer.view(ElementType::Other(9)),
      Err(TfliteError::TypeMismatch { .. })
    ));
  }
}
