// 该文件是 Beifeng （北风） 项目的一部分。
// tests/camera.rs - 摄像头模式集成测试
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

mod common;

use std::{
  convert::Infallible,
  sync::{
    Arc, mpsc,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::Duration,
};

use beifeng::{
  frame::RgbNhwcFrame,
  input::{CameraFeed, FpsGauge, Posted},
  output::{ChannelOutput, Publication, Render},
  task::{
    CAMERA_VALIDATION_DRAWS, CAMERA_WARMUP_DRAWS, CameraTask, Interrupt, Task, TaskOutcome, ValidationReport,
  },
};

use common::color_classifier;

/// 持续投递帧直到邮箱关闭，模拟比推理更快的摄像头
fn spawn_camera(feed: &CameraFeed, color: [u8; 3]) -> thread::JoinHandle<u64> {
  let frames = feed.frames.clone();
  thread::spawn(move || {
    let frame = RgbNhwcFrame::filled(8, 8, color);
    let mut posted = 0;
    while frames.post(frame.clone()) != Posted::Closed {
      posted += 1;
      thread::sleep(Duration::from_micros(200));
    }
    posted
  })
}

#[test]
fn validation_completes_after_200_results() {
  let model_dir = tempfile::tempdir().unwrap();
  let (classifier, _log) = color_classifier(model_dir.path(), ["red", "green", "blue"], 8, 8);

  let feed = CameraFeed::default();
  feed.display_fps.set(15.0);
  let camera = spawn_camera(&feed, [0, 255, 0]);

  let (tx, rx) = mpsc::sync_channel(256);
  let outcome = CameraTask::default()
    .with_validation(true)
    .with_watchdog(Duration::from_secs(10), Arc::new(|| {}))
    .run_task(feed.clone(), classifier, ChannelOutput::new(tx))
    .unwrap();

  feed.frames.close();
  let posted = camera.join().unwrap();

  match outcome {
    TaskOutcome::Completed(Some(ValidationReport::Camera {
      avg_display_fps,
      avg_inference_fps,
      avg_inference_ms,
    })) => {
      assert_eq!(avg_display_fps, Some(15.0));
      assert!(avg_inference_fps.is_some_and(|fps| fps > 0.0));
      assert!(avg_inference_ms.is_some_and(|ms| ms >= 1.0));
    }
    other => panic!("unexpected outcome {:?}", other),
  }

  let publications = rx.try_iter().collect::<Vec<_>>();
  assert_eq!(publications.len() as u64, CAMERA_VALIDATION_DRAWS);
  assert!(
    publications
      .iter()
      .enumerate()
      .all(|(i, p)| p.sequence == i as u64 + 1 && p.label == "green")
  );
  assert!(posted >= CAMERA_VALIDATION_DRAWS);
  // 推理慢于投递，部分帧在邮箱中被覆盖
  assert!(feed.frames.stats().dropped > 0);
}

/// 渲染第 `at` 个结果时把预览帧率改成 `fps`
struct FpsShift {
  gauge: FpsGauge,
  at: u64,
  fps: f32,
}

impl Render for FpsShift {
  type Error = Infallible;

  fn render_result(&self, publication: &Publication) -> Result<(), Self::Error> {
    if publication.sequence == self.at {
      self.gauge.set(self.fps);
    }
    Ok(())
  }
}

#[test]
fn warmup_results_are_left_out_of_the_averages() {
  let model_dir = tempfile::tempdir().unwrap();
  let (classifier, log) = color_classifier(model_dir.path(), ["red", "green", "blue"], 8, 8);

  let feed = CameraFeed::default();
  feed.display_fps.set(1000.0);
  let camera = spawn_camera(&feed, [0, 0, 255]);

  let output = FpsShift {
    gauge: feed.display_fps.clone(),
    at: CAMERA_WARMUP_DRAWS,
    fps: 10.0,
  };
  let outcome = CameraTask::default()
    .with_validation(true)
    .with_watchdog(Duration::from_secs(10), Arc::new(|| {}))
    .run_task(feed.clone(), classifier, output)
    .unwrap();
  feed.frames.close();
  camera.join().unwrap();

  // 前 5 个结果的 1000 fps 不计入平均
  match outcome {
    TaskOutcome::Completed(Some(ValidationReport::Camera {
      avg_display_fps, ..
    })) => assert_eq!(avg_display_fps, Some(10.0)),
    other => panic!("unexpected outcome {:?}", other),
  }
  assert_eq!(log.invocations() as u64, CAMERA_VALIDATION_DRAWS);
}

#[test]
fn at_most_one_inference_in_flight() {
  let model_dir = tempfile::tempdir().unwrap();
  let (classifier, log) = color_classifier(model_dir.path(), ["red", "green", "blue"], 8, 8);

  let feed = CameraFeed::default();
  let cameras = (0..3)
    .map(|_| spawn_camera(&feed, [255, 0, 0]))
    .collect::<Vec<_>>();

  let (tx, _rx) = mpsc::sync_channel(1);
  let outcome = CameraTask::default()
    .with_frame_limit(Some(50))
    .run_task(feed.clone(), classifier, ChannelOutput::new(tx))
    .unwrap();
  feed.frames.close();
  for camera in cameras {
    camera.join().unwrap();
  }

  assert_eq!(outcome, TaskOutcome::Completed(None));
  assert!(!log.overlapped());
  let spans = log.spans();
  assert_eq!(spans.len(), 50);
  assert!(spans.windows(2).all(|w| w[0].end <= w[1].start));
}

#[test]
fn closed_source_ends_the_loop() {
  let model_dir = tempfile::tempdir().unwrap();
  let (classifier, log) = color_classifier(model_dir.path(), ["red", "green", "blue"], 8, 8);

  let feed = CameraFeed::default();
  feed.frames.close();
  let (tx, _rx) = mpsc::sync_channel(1);
  let outcome = CameraTask::default()
    .run_task(feed, classifier, ChannelOutput::new(tx))
    .unwrap();
  assert_eq!(outcome, TaskOutcome::SourceClosed);
  assert_eq!(log.invocations(), 0);
}

#[test]
fn interrupt_is_reported_separately() {
  let model_dir = tempfile::tempdir().unwrap();
  let (classifier, _log) = color_classifier(model_dir.path(), ["red", "green", "blue"], 8, 8);

  let feed = CameraFeed::default();
  let interrupt = Interrupt::new();
  {
    let frames = feed.frames.clone();
    let interrupt = interrupt.clone();
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      interrupt.trigger();
      frames.close();
    });
  }

  let (tx, _rx) = mpsc::sync_channel(1);
  let outcome = CameraTask::default()
    .with_interrupt(interrupt)
    .run_task(feed, classifier, ChannelOutput::new(tx))
    .unwrap();
  assert_eq!(outcome, TaskOutcome::Interrupted);
}

#[test]
fn watchdog_fires_when_pipeline_stalls() {
  let model_dir = tempfile::tempdir().unwrap();
  let (classifier, _log) = color_classifier(model_dir.path(), ["red", "green", "blue"], 8, 8);

  let fired = Arc::new(AtomicUsize::new(0));
  let feed = CameraFeed::default();
  let hook = {
    let fired = Arc::clone(&fired);
    let frames = feed.frames.clone();
    Arc::new(move || {
      fired.fetch_add(1, Ordering::SeqCst);
      frames.close();
    })
  };

  let (tx, _rx) = mpsc::sync_channel(1);
  let outcome = CameraTask::default()
    .with_validation(true)
    .with_watchdog(Duration::from_millis(50), hook)
    .run_task(feed, classifier, ChannelOutput::new(tx))
    .unwrap();

  assert_eq!(outcome, TaskOutcome::SourceClosed);
  assert_eq!(fired.load(Ordering::SeqCst), 1);
}
