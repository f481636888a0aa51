// 该文件是 Beifeng （北风） 项目的一部分。
// src/main.rs - 图像分类演示程序入口
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

mod args;

use std::{
  io::BufRead,
  path::Path,
  process::ExitCode,
  sync::mpsc::{self, Sender},
  thread,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use beifeng::{
  input::ImageDirectory,
  model::{Classifier, ClassifierBuilder, TfliteEngine},
  output::Outputs,
  task::{Advance, Interrupt, StillImageTask, Task, TaskOutcome},
};

use crate::args::Args;

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  match run(&args) {
    Ok(TaskOutcome::SourceClosed) => {
      println!("ERROR: 帧来源意外关闭");
      ExitCode::FAILURE
    }
    Ok(outcome) => {
      info!("程序结束: {:?}", outcome);
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!("{:#}", e);
      println!("ERROR: {:#}", e);
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Args) -> Result<TaskOutcome> {
  info!("模型文件路径: {}", args.model_file.display());
  info!("标签文件路径: {}", args.label_file.display());
  info!("推理后端: {:?}", args.backend());

  let camera_mode = args.image.is_none();
  let classifier = ClassifierBuilder::new(&args.model_file, &args.label_file)
    .normalization(args.input_mean, args.input_std)
    .backend(args.backend())
    .threads(args.num_threads)
    .camera_preview(camera_mode)
    .runtime_library(&args.tflite_library)
    .build::<TfliteEngine>()?;
  let outputs = Outputs::from_urls(&args.outputs)?;

  let interrupt = Interrupt::new();
  match &args.image {
    Some(directory) => run_still(args, directory, classifier, outputs, interrupt),
    None => run_camera(args, classifier, outputs, interrupt),
  }
}

fn run_still(
  args: &Args,
  directory: &Path,
  classifier: Classifier<TfliteEngine>,
  outputs: Outputs,
  interrupt: Interrupt,
) -> Result<TaskOutcome> {
  let images = ImageDirectory::open(directory)?;
  let mut task = StillImageTask::default()
    .with_validation(args.validation)
    .with_canvas(args.display_width, args.display_height)
    .with_interrupt(interrupt.clone());

  let advance = if args.validation {
    None
  } else {
    let (tx, rx) = mpsc::channel();
    spawn_stdin_advance(tx.clone());
    task = task.with_advance(rx);
    Some(tx)
  };

  ctrlc::set_handler(move || {
    warn!("收到中断信号，准备退出...");
    interrupt.trigger();
    if let Some(advance) = &advance {
      let _ = advance.send(Advance::Exit);
    }
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  Ok(task.run_task(images, classifier, outputs)?)
}

/// 标准输入每读到一行就切换到下一张图，`q` 退出
fn spawn_stdin_advance(tx: Sender<Advance>) {
  thread::spawn(move || {
    println!("按回车处理下一张图像，输入 q 退出");
    for line in std::io::stdin().lock().lines() {
      let advance = match line {
        Ok(line) if matches!(line.trim(), "q" | "quit" | "exit") => Advance::Exit,
        Ok(_) => Advance::Next,
        Err(_) => Advance::Exit,
      };
      if tx.send(advance).is_err() || advance == Advance::Exit {
        return;
      }
    }
    let _ = tx.send(Advance::Exit);
  });
}

#[cfg(feature = "gstreamer_input")]
fn run_camera(
  args: &Args,
  classifier: Classifier<TfliteEngine>,
  outputs: Outputs,
  interrupt: Interrupt,
) -> Result<TaskOutcome> {
  use beifeng::{input::GStreamerCameraBuilder, task::CameraTask};

  let camera = GStreamerCameraBuilder::new(args.video_device)
    .capture(args.frame_width, args.frame_height, args.framerate)
    .preview_sink(args.preview_sink.as_str())
    .model_input(classifier.get_input_shape())
    .build()?;
  let feed = camera.feed();

  {
    let frames = feed.frames.clone();
    let interrupt = interrupt.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号，准备退出...");
      interrupt.trigger();
      frames.close();
    })
    .context("无法设置 Ctrl-C 处理函数")?;
  }

  let outcome = CameraTask::default()
    .with_validation(args.validation)
    .with_frame_limit(args.frame_limit)
    .with_interrupt(interrupt)
    .run_task(feed, classifier, outputs)?;
  drop(camera);
  Ok(outcome)
}

#[cfg(not(feature = "gstreamer_input"))]
fn run_camera(
  _args: &Args,
  _classifier: Classifier<TfliteEngine>,
  _outputs: Outputs,
  _interrupt: Interrupt,
) -> Result<TaskOutcome> {
  anyhow::bail!("摄像头模式需要启用 gstreamer_input 特性，或使用 --image 指定图像目录")
}
