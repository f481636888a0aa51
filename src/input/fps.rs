// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/fps.rs - 显示帧率计量
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

use std::sync::{
  Arc,
  atomic::{AtomicU32, Ordering},
};

/// 预览分支最近一次测得的帧率，由流水线线程写入、推理线程读取
#[derive(Debug, Clone, Default)]
pub struct FpsGauge {
  bits: Arc<AtomicU32>,
}

impl FpsGauge {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, fps: f32) {
    self.bits.store(fps.to_bits(), Ordering::Relaxed);
  }

  pub fn get(&self) -> f32 {
    f32::from_bits(self.bits.load(Ordering::Relaxed))
  }
}
