// 该文件是 Beifeng （北风） 项目的一部分。
// src/label.rs - 类别标签表
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

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 标签表，第 `i` 行对应模型输出的第 `i` 类
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl LabelTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let table = Self::parse(&content);
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  pub fn parse(content: &str) -> Self {
    content.lines().map(|line| line.trim().to_string()).collect()
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl FromIterator<String> for LabelTable {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn parse_trims_each_line() {
    let table = LabelTable::parse("background\n  cat \r\ndog\n");
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(1), Some("cat"));
    assert_eq!(table.get(2), Some("dog"));
    assert_eq!(table.get(3), None);
  }

  #[test]
  fn load_reads_file_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "red").unwrap();
    writeln!(file, "green").unwrap();
    let table = LabelTable::load(file.path()).unwrap();
    assert_eq!(table.iter().collect::<Vec<_>>(), vec!["red", "green"]);
  }

  #[test]
  fn load_reports_missing_file() {
    let err = LabelTable::load("/nonexistent/labels.txt").unwrap_err();
    assert!(matches!(err, LabelError::Io { .. }));
  }
}
