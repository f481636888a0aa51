// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 单帧重复推理基准
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use beifeng::{
  frame::RgbNhwcFrame,
  input::{load_image, resize_for_model},
  model::{Backend, ClassifierBuilder, PerformanceTier, TfliteEngine},
  output::Outputs,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// 对同一帧重复推理，统计平均耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TFLite 模型文件
  #[arg(long, value_name = "FILE")]
  pub model_file: PathBuf,
  /// 标签文件
  #[arg(long, value_name = "FILE")]
  pub label_file: PathBuf,
  /// 输入图像；不指定时使用纯红色帧
  #[arg(long, value_name = "FILE")]
  pub image: Option<PathBuf>,
  #[arg(long, default_value_t = 1000)]
  pub repeats: usize,
  /// 不计入平均值的预热次数
  #[arg(long, default_value_t = 2)]
  pub skip: usize,
  #[arg(long, value_name = "PATH")]
  pub ext_delegate: Option<PathBuf>,
  /// 使用 Edge TPU 加速，优先于 --ext-delegate
  #[arg(long)]
  pub edgetpu: bool,
  /// Edge TPU 性能档位
  #[arg(long, value_enum, default_value_t = PerformanceTier::Standard)]
  pub perf: PerformanceTier,
  #[arg(long, value_name = "N")]
  pub num_threads: Option<usize>,
  #[arg(long, default_value = "libtensorflowlite_c.so", value_name = "PATH")]
  pub tflite_library: PathBuf,
  /// 结果输出，可重复
  #[arg(long = "output", value_name = "URL")]
  pub outputs: Vec<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model_file.display());
  info!("标签文件路径: {}", args.label_file.display());

  let backend = if args.edgetpu {
    Backend::Accelerator(args.perf)
  } else if let Some(path) = &args.ext_delegate {
    Backend::ExternalDelegate(path.clone())
  } else {
    Backend::Cpu
  };

  let classifier = ClassifierBuilder::new(&args.model_file, &args.label_file)
    .backend(backend)
    .threads(args.num_threads)
    .runtime_library(&args.tflite_library)
    .build::<TfliteEngine>()?;
  let shape = classifier.get_input_shape();

  let frame = match &args.image {
    Some(path) => resize_for_model(&load_image(path)?, shape),
    None => RgbNhwcFrame::filled(shape.height, shape.width, [255, 0, 0]),
  };
  let outputs = Outputs::from_urls(&args.outputs)?;

  RepeatShotTask::new(args.repeats, args.skip).run_task(
    std::iter::once(frame),
    classifier,
    outputs,
  )?;

  Ok(())
}
