// 该文件是 Beifeng （北风） 项目的一部分。
// src/output.rs - 结果输出定义
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

use std::{path::PathBuf, sync::Arc, time::Duration};

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 显示端消费推理结果的接口
///
/// 协调器每发布一次结果调用一次 `render_result`，调用返回前不会开始下一次推理。
pub trait Render {
  type Error;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error>;

  /// 是否需要在发布中附带预览图像
  fn wants_preview(&self) -> bool {
    false
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOrigin {
  Camera,
  Still { path: PathBuf },
  /// 基准测试中重复使用的同一帧
  Synthetic,
}

/// 一次发布的全部内容，由协调器显式传给显示端
#[derive(Debug, Clone)]
pub struct Publication {
  /// 从 1 开始的发布序号
  pub sequence: u64,
  pub label: String,
  pub label_index: usize,
  pub confidence: f32,
  pub inference_time: Duration,
  pub inference_fps: f32,
  /// 仅摄像头模式下有预览帧率
  pub display_fps: Option<f32>,
  pub origin: FrameOrigin,
  pub preview: Option<Arc<RgbImage>>,
}

impl Publication {
  pub fn confidence_percent(&self) -> f32 {
    self.confidence * 100.0
  }

  pub fn inference_ms(&self) -> f32 {
    self.inference_time.as_secs_f32() * 1000.0
  }
}

mod channel_output;
mod log_output;
pub use self::channel_output::{ChannelOutput, ChannelOutputError};
pub use self::log_output::LogOutput;

#[cfg(feature = "directory_record")]
mod record_output;
#[cfg(feature = "directory_record")]
pub use self::record_output::{RecordOutput, RecordOutputError};

#[cfg(feature = "save_image_file")]
mod snapshot_output;
#[cfg(feature = "save_image_file")]
pub use self::snapshot_output::{SnapshotOutput, SnapshotOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("通道输出错误: {0}")]
  ChannelOutputError(#[from] ChannelOutputError),
  #[cfg(feature = "directory_record")]
  #[error("结果记录输出错误: {0}")]
  RecordOutputError(#[from] RecordOutputError),
  #[cfg(feature = "save_image_file")]
  #[error("快照输出错误: {0}")]
  SnapshotOutputError(#[from] SnapshotOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Log(LogOutput),
  Channel(ChannelOutput),
  #[cfg(feature = "directory_record")]
  Record(RecordOutput),
  #[cfg(feature = "save_image_file")]
  Snapshot(SnapshotOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput)),
      #[cfg(feature = "directory_record")]
      RecordOutput::SCHEME => Ok(OutputWrapper::Record(RecordOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SnapshotOutput::SCHEME => Ok(OutputWrapper::Snapshot(SnapshotOutput::from_url(url)?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.render_result(publication).map_err(|e| match e {}),
      OutputWrapper::Channel(output) => output
        .render_result(publication)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::Record(output) => output
        .render_result(publication)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output
        .render_result(publication)
        .map_err(OutputError::from),
    }
  }

  fn wants_preview(&self) -> bool {
    match self {
      OutputWrapper::Log(output) => output.wants_preview(),
      OutputWrapper::Channel(output) => output.wants_preview(),
      #[cfg(feature = "directory_record")]
      OutputWrapper::Record(output) => output.wants_preview(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Snapshot(output) => output.wants_preview(),
    }
  }
}

/// 依次交给每个输出
#[derive(Default)]
pub struct Outputs(Vec<OutputWrapper>);

impl Outputs {
  pub fn from_urls<'a>(urls: impl IntoIterator<Item = &'a Url>) -> Result<Self, OutputError> {
    urls
      .into_iter()
      .map(OutputWrapper::from_url)
      .collect::<Result<Vec<_>, _>>()
      .map(Outputs)
  }

  pub fn push(&mut self, output: OutputWrapper) {
    self.0.push(output);
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl Render for Outputs {
  type Error = OutputError;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    for output in &self.0 {
      output.render_result(publication)?;
    }
    Ok(())
  }

  fn wants_preview(&self) -> bool {
    self.0.iter().any(Render::wants_preview)
  }
}
