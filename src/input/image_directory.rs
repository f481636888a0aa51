// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage, imageops::FilterType};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputShape, RgbNhwcFrame},
};

/// 预览区域上方保留给标题栏的高度
const DISPLAY_HEADER_HEIGHT: u32 = 32;

#[derive(Error, Debug)]
pub enum ImageDirectoryError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像目录 {0} 为空")]
  Empty(PathBuf),
  #[error("无效的随机种子: {0}")]
  InvalidSeed(String),
  #[error("I/O 错误: {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像解码错误: {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 图像目录，按无放回均匀随机的顺序给出文件
///
/// 工作列表取空后，只有在继续请求时才重新填充。
pub struct ImageDirectory {
  directory: PathBuf,
  files: Vec<PathBuf>,
  remaining: Vec<PathBuf>,
  rng: StdRng,
}

impl FromUrlWithScheme for ImageDirectory {
  const SCHEME: &'static str = "images";
}

impl FromUrl for ImageDirectory {
  type Error = ImageDirectoryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageDirectoryError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    match url.query_pairs().find(|(k, _)| k == "seed") {
      Some((_, seed)) => {
        let seed = seed.parse::<u64>().map_err(|_| {
          error!("无效的随机种子: {}", seed);
          ImageDirectoryError::InvalidSeed(seed.to_string())
        })?;
        Self::with_rng(path, StdRng::seed_from_u64(seed))
      }
      None => Self::open(path),
    }
  }
}

impl ImageDirectory {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, ImageDirectoryError> {
    Self::with_rng(directory, StdRng::from_os_rng())
  }

  pub fn with_rng(directory: impl AsRef<Path>, rng: StdRng) -> Result<Self, ImageDirectoryError> {
    let directory = directory.as_ref().to_path_buf();
    let files = list_files(&directory)?;
    if files.is_empty() {
      error!("图像目录 {} 为空", directory.display());
      return Err(ImageDirectoryError::Empty(directory));
    }

    info!("图像目录 {} 中共 {} 个文件", directory.display(), files.len());
    Ok(Self {
      directory,
      remaining: files.clone(),
      files,
      rng,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  /// 本轮工作列表是否已经取完
  pub fn is_exhausted(&self) -> bool {
    self.remaining.is_empty()
  }

  pub fn remaining(&self) -> usize {
    self.remaining.len()
  }

  pub fn next_path(&mut self) -> PathBuf {
    if self.remaining.is_empty() {
      debug!("工作列表已取完，重新填充");
      self.remaining = self.files.clone();
    }
    let index = self.rng.random_range(0..self.remaining.len());
    self.remaining.swap_remove(index)
  }
}

fn list_files(directory: &Path) -> Result<Vec<PathBuf>, ImageDirectoryError> {
  let io = |source| ImageDirectoryError::Io {
    path: directory.to_path_buf(),
    source,
  };

  let mut files = Vec::new();
  for entry in std::fs::read_dir(directory).map_err(io)? {
    // 跟随符号链接
    let path = entry.map_err(io)?.path();
    if path.is_file() {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

pub fn load_image(path: &Path) -> Result<RgbImage, ImageDirectoryError> {
  let image = ImageReader::open(path)
    .and_then(|reader| reader.with_guessed_format())
    .map_err(|source| ImageDirectoryError::Io {
      path: path.to_path_buf(),
      source,
    })?
    .decode()
    .map_err(|source| ImageDirectoryError::Decode {
      path: path.to_path_buf(),
      source,
    })?;
  Ok(image.to_rgb8())
}

/// 计算预览尺寸：高度填满画布（扣除标题栏），宽度按原图比例，超出画布时截断
pub fn display_size(image_width: u32, image_height: u32, canvas_width: u32, canvas_height: u32) -> (u32, u32) {
  let height = canvas_height.saturating_sub(DISPLAY_HEADER_HEIGHT).max(1);
  let ratio = image_width as f64 / image_height.max(1) as f64;
  let width = ((ratio * height as f64) as u32).clamp(1, canvas_width.max(1));
  (width, height)
}

pub fn resize_for_display(image: &RgbImage, canvas_width: u32, canvas_height: u32) -> RgbImage {
  let (width, height) = display_size(image.width(), image.height(), canvas_width, canvas_height);
  image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// 缩放到模型输入尺寸，不保持宽高比
pub fn resize_for_model(image: &RgbImage, shape: InputShape) -> RgbNhwcFrame {
  let resized = image::imageops::resize(
    image,
    shape.width as u32,
    shape.height as u32,
    FilterType::Triangle,
  );
  RgbNhwcFrame::from(resized)
}
