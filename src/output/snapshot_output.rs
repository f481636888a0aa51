// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/snapshot_output.rs - 带标注的快照输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use ab_glyph::{FontVec, PxScale};
use chrono::{Datelike, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Publication, Render, log_output::summary_line},
};

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: u32 = 24;
const LABEL_TEXT_PADDING: i32 = 2;
const BANNER_COLOR: [u8; 3] = [3, 35, 75];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum SnapshotOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少字体参数 font=<路径>")]
  MissingFont,
  #[error("无法解析字体文件 {0}")]
  InvalidFont(PathBuf),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把结果写在预览图顶部，按日期分目录保存
///
/// `folder:///dir?font=/path/font.ttf`
pub struct SnapshotOutput {
  directory: PathBuf,
  font: FontVec,
  frame_counter: AtomicU16,
}

impl FromUrlWithScheme for SnapshotOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for SnapshotOutput {
  type Error = SnapshotOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SnapshotOutputError::SchemeMismatch);
    }

    let font = url
      .query_pairs()
      .find(|(k, _)| k == "font")
      .map(|(_, v)| PathBuf::from(v.into_owned()))
      .ok_or(SnapshotOutputError::MissingFont)?;
    let directory = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());

    Self::new(directory, &font)
  }
}

impl SnapshotOutput {
  pub fn new(directory: impl Into<PathBuf>, font: &Path) -> Result<Self, SnapshotOutputError> {
    let data = std::fs::read(font)?;
    let font = FontVec::try_from_vec(data)
      .map_err(|_| SnapshotOutputError::InvalidFont(font.to_path_buf()))?;
    Ok(Self {
      directory: directory.into(),
      font,
      frame_counter: AtomicU16::new(0),
    })
  }

  fn frame_path(&self) -> Result<PathBuf, SnapshotOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let id = self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    Ok(directory.join(format!("{}-{:04X}.png", now.format("%H-%M-%S"), id)))
  }

  fn annotate(&self, image: &mut RgbImage, publication: &Publication) {
    let lines = [
      format!(
        "{} {:.1}%",
        publication.label,
        publication.confidence_percent()
      ),
      summary_line(publication),
    ];
    let banner_height = LABEL_TEXT_HEIGHT * lines.len() as u32;
    let height = banner_height.min(image.height());
    if image.width() == 0 || height == 0 {
      return;
    }

    let rect = imageproc::rect::Rect::at(0, 0).of_size(image.width(), height);
    draw_filled_rect_mut(image, rect, Rgb(BANNER_COLOR));

    let scale = PxScale::from(LABEL_FONT_SIZE);
    for (row, line) in lines.iter().enumerate() {
      let y = row as i32 * LABEL_TEXT_HEIGHT as i32 + LABEL_TEXT_PADDING;
      draw_text_mut(image, Rgb(TEXT_COLOR), 4, y, scale, &self.font, line);
    }
  }
}

impl Render for SnapshotOutput {
  type Error = SnapshotOutputError;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    let Some(preview) = publication.preview.as_deref() else {
      debug!("第 {} 个结果没有预览图，跳过快照", publication.sequence);
      return Ok(());
    };

    let mut image = preview.clone();
    self.annotate(&mut image, publication);
    let path = self.frame_path()?;
    image.save(&path)?;
    warn!("保存快照到文件: {}", path.display());
    Ok(())
  }

  fn wants_preview(&self) -> bool {
    true
  }
}
