// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Publication, Render},
};

/// 每条结果写一行日志，同时打印到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(LogOutput)
  }
}

pub(crate) fn summary_line(publication: &Publication) -> String {
  let mut line = format!(
    "{} {:.1}% | inference {:.2} ms ({:.1} fps)",
    publication.label,
    publication.confidence_percent(),
    publication.inference_ms(),
    publication.inference_fps
  );
  if let Some(fps) = publication.display_fps {
    line.push_str(&format!(" | display {:.1} fps", fps));
  }
  line
}

impl Render for LogOutput {
  type Error = Infallible;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    let line = summary_line(publication);
    info!("第 {} 个结果: {}", publication.sequence, line);
    println!("{}", line);
    Ok(())
  }
}
