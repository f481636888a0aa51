// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/engine.rs - 推理引擎接口
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

use crate::model::ModelHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
  UInt8,
  Float32,
  Other(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
  pub dims: Vec<usize>,
  pub element: ElementType,
}

impl TensorSpec {
  pub fn new(dims: Vec<usize>, element: ElementType) -> Self {
    Self { dims, element }
  }

  pub fn element_count(&self) -> usize {
    self.dims.iter().product()
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TensorData<'a> {
  UInt8(&'a [u8]),
  Float32(&'a [f32]),
}

impl TensorData<'_> {
  pub fn len(&self) -> usize {
    match self {
      TensorData::UInt8(data) => data.len(),
      TensorData::Float32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 单输入单输出的推理引擎
///
/// 输出在 `invoke` 之后才有效。
pub trait Engine {
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_spec(&self) -> &TensorSpec;
  fn output_spec(&self) -> &TensorSpec;
  fn set_input(&mut self, input: TensorData<'_>) -> Result<(), Self::Error>;
  fn invoke(&mut self) -> Result<(), Self::Error>;
  fn output(&self) -> Result<TensorData<'_>, Self::Error>;
}

/// 可以直接由 [`ModelHandle`] 构建的引擎
pub trait OpenEngine: Engine + Sized {
  fn open(handle: &ModelHandle) -> Result<Self, Self::Error>;
}
