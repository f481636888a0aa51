// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/channel_output.rs - 向界面线程投递结果
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

use std::sync::mpsc::{SyncSender, TrySendError};

use thiserror::Error;
use tracing::debug;

use crate::output::{Publication, Render};

#[derive(Error, Debug)]
pub enum ChannelOutputError {
  #[error("界面线程已退出")]
  Disconnected,
}

/// 把结果投递到有界通道，由界面线程在下一次绘制时读取
///
/// 通道已满时丢弃本次结果，界面只关心最新值。
pub struct ChannelOutput {
  sender: SyncSender<Publication>,
  preview: bool,
}

impl ChannelOutput {
  pub fn new(sender: SyncSender<Publication>) -> Self {
    Self {
      sender,
      preview: false,
    }
  }

  pub fn with_preview(mut self, preview: bool) -> Self {
    self.preview = preview;
    self
  }
}

impl Render for ChannelOutput {
  type Error = ChannelOutputError;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    match self.sender.try_send(publication.clone()) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(_)) => {
        debug!("界面线程繁忙，丢弃第 {} 个结果", publication.sequence);
        Ok(())
      }
      Err(TrySendError::Disconnected(_)) => Err(ChannelOutputError::Disconnected),
    }
  }

  fn wants_preview(&self) -> bool {
    self.preview
  }
}
