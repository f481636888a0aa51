// 该文件是 Beifeng （北风） 项目的一部分。
// src/args.rs - 命令行参数
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

use beifeng::model::{Backend, PerformanceTier};
use clap::Parser;
use url::Url;

/// Beifeng 图像分类演示参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 静态图像目录；设置后进入静态图像模式，否则使用摄像头
  #[arg(long, value_name = "DIR")]
  pub image: Option<PathBuf>,

  /// 摄像头编号，对应 /dev/videoN
  #[arg(long, default_value_t = 0, value_name = "N")]
  pub video_device: usize,

  #[arg(long, default_value_t = 320)]
  pub frame_width: u32,

  #[arg(long, default_value_t = 240)]
  pub frame_height: u32,

  #[arg(long, default_value_t = 15)]
  pub framerate: u32,

  /// TFLite 模型文件
  #[arg(long, value_name = "FILE")]
  pub model_file: PathBuf,

  /// 标签文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub label_file: PathBuf,

  /// 外部 delegate 库
  #[arg(long, value_name = "PATH")]
  pub ext_delegate: Option<PathBuf>,

  /// Edge TPU 性能档位
  #[arg(long, value_enum, default_value_t = PerformanceTier::Standard)]
  pub perf: PerformanceTier,

  /// 使用 Edge TPU 加速，优先于 --ext-delegate
  #[arg(long)]
  pub edgetpu: bool,

  #[arg(long, default_value_t = 127.5)]
  pub input_mean: f32,

  #[arg(long, default_value_t = 127.5)]
  pub input_std: f32,

  /// 验证模式：统计并在结束时打印平均值
  #[arg(long)]
  pub validation: bool,

  /// 摄像头模式下发布指定数量的结果后退出
  #[arg(long, value_name = "N")]
  pub frame_limit: Option<u64>,

  /// 推理线程数，默认按 CPU 核心数推算
  #[arg(long, value_name = "N")]
  pub num_threads: Option<usize>,

  /// TensorFlow Lite C 运行库，仅在加载外部 delegate 时使用
  #[arg(long, default_value = "libtensorflowlite_c.so", value_name = "PATH")]
  pub tflite_library: PathBuf,

  /// 预览使用的 GStreamer sink
  #[arg(long, default_value = "autovideosink", value_name = "ELEMENT")]
  pub preview_sink: String,

  #[arg(long, default_value_t = 800)]
  pub display_width: u32,

  #[arg(long, default_value_t = 480)]
  pub display_height: u32,

  /// 结果输出，可重复：log://、record:///path.jsonl、folder:///dir?font=/path.ttf
  #[arg(long = "output", value_name = "URL", default_value = "log://")]
  pub outputs: Vec<Url>,
}

impl Args {
  pub fn backend(&self) -> Backend {
    if self.edgetpu {
      Backend::Accelerator(self.perf)
    } else if let Some(path) = &self.ext_delegate {
      Backend::ExternalDelegate(path.clone())
    } else {
      Backend::Cpu
    }
  }
}
