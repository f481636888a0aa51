// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/record_output.rs - JSON Lines 结果记录
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

use std::{
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{FrameOrigin, Publication, Render},
};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("记录文件路径为空")]
  EmptyPath,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每条结果追加一行 JSON
pub struct RecordOutput {
  path: PathBuf,
  writer: Mutex<BufWriter<File>>,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    if path.is_empty() || path == "/" {
      return Err(RecordOutputError::EmptyPath);
    }
    Self::create(path)
  }
}

impl RecordOutput {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, RecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("结果记录文件: {}", path.display());
    Ok(Self {
      path,
      writer: Mutex::new(BufWriter::new(file)),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

fn record(publication: &Publication) -> serde_json::Value {
  let source = match &publication.origin {
    FrameOrigin::Camera => json!("camera"),
    FrameOrigin::Still { path } => json!(path.display().to_string()),
    FrameOrigin::Synthetic => json!("synthetic"),
  };

  json!({
    "timestamp": Utc::now().to_rfc3339(),
    "sequence": publication.sequence,
    "source": source,
    "label": publication.label,
    "label_index": publication.label_index,
    "confidence": publication.confidence,
    "inference_ms": publication.inference_ms(),
    "inference_fps": publication.inference_fps,
    "display_fps": publication.display_fps,
  })
}

impl Render for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    let line = serde_json::to_string(&record(publication))?;
    let mut writer = self
      .writer
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    Ok(())
  }
}
