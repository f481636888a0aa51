// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 摄像头输入
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

//! 基于 GStreamer 的摄像头输入
//!
//! 管道在 `tee` 处分成两路：
//!
//! - 预览分支：深度为 1 的丢帧队列接 `fpsdisplaysink`，测得的帧率写入 [`FpsGauge`]
//! - 推理分支：深度为 1 的丢帧队列，转换并缩放到模型输入尺寸（RGB），
//!   由 `appsink` 回调投递到单槽 [`Mailbox`]
//!
//! 推理忙碌时到达的帧在队列和邮箱两处都会被丢弃，不会积压。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-bad
//! ```
//!
//! `fpsdisplaysink` 位于 gst-plugins-bad 中。
//!
//! ## 基本用法
//!
//! ```no_run
//! use beifeng::{frame::InputShape, input::GStreamerCameraBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera = GStreamerCameraBuilder::new(0)
//!     .capture(320, 240, 15)
//!     .model_input(InputShape::new(224, 224, 3))
//!     .build()?;
//! let feed = camera.feed();
//! while let Ok(frame) = feed.frames.recv() {
//!     println!("新帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, InputShape, RGB_CHANNELS, RgbNhwcFrame},
  input::{CameraFeed, FpsGauge, Mailbox, Posted},
};

const PREVIEW_ELEMENT: &str = "preview";
const APPSINK_ELEMENT: &str = "sink";
const TEE_ELEMENT: &str = "t";
const FPS_UPDATE_INTERVAL_MS: u32 = 2000;
const BUS_POLL_INTERVAL_MS: u64 = 100;

#[derive(Error, Debug)]
pub enum GStreamerCameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开摄像头 {path}: {source}")]
  DeviceOpen {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到元素 {0}")]
  ElementNotFound(&'static str),
  #[error("无法转换 appsink 元素")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

fn device_path(index: usize) -> String {
  format!("/dev/video{}", index)
}

/// 打开 V4L2 设备并读取其能力，尽早发现摄像头缺失
pub fn check_video_device(index: usize) -> Result<String, GStreamerCameraError> {
  let path = device_path(index);
  let device = v4l::Device::new(index).map_err(|source| GStreamerCameraError::DeviceOpen {
    path: path.clone(),
    source,
  })?;
  let caps = device
    .query_caps()
    .map_err(|source| GStreamerCameraError::DeviceOpen {
      path: path.clone(),
      source,
    })?;
  info!("摄像头 {}: {} ({})", path, caps.card, caps.driver);
  Ok(caps.card)
}

pub enum GStreamerCameraBuilderItem {
  CameraSource {
    device: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  Tee,
  PreviewBranch {
    sink: String,
  },
  InferenceBranch {
    width: usize,
    height: usize,
  },
}

impl GStreamerCameraBuilderItem {
  fn is_branch(&self) -> bool {
    matches!(
      self,
      GStreamerCameraBuilderItem::PreviewBranch { .. }
        | GStreamerCameraBuilderItem::InferenceBranch { .. }
    )
  }

  fn to_pipeline(&self) -> String {
    match self {
      GStreamerCameraBuilderItem::CameraSource {
        device,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device={} ! videorate ! video/x-raw,width={},height={},framerate={}/1",
        device, width, height, fps
      ),
      GStreamerCameraBuilderItem::Tee => format!("tee name={}", TEE_ELEMENT),
      GStreamerCameraBuilderItem::PreviewBranch { sink } => format!(
        "{}. ! queue max-size-buffers=1 leaky=downstream ! \
         fpsdisplaysink name={} video-sink={} sync=false \
         fps-update-interval={} signal-fps-measurements=true",
        TEE_ELEMENT, PREVIEW_ELEMENT, sink, FPS_UPDATE_INTERVAL_MS
      ),
      GStreamerCameraBuilderItem::InferenceBranch { width, height } => format!(
        "{}. ! queue max-size-buffers=1 leaky=downstream ! videoconvert ! videoscale ! \
         video/x-raw,format=RGB,width={},height={} ! \
         appsink name={} max-buffers=1 drop=true sync=false",
        TEE_ELEMENT, width, height, APPSINK_ELEMENT
      ),
    }
  }
}

/// 摄像头管道构建器
pub struct GStreamerCameraBuilder {
  device_index: usize,
  width: u32,
  height: u32,
  fps: u32,
  preview_sink: String,
  model_input: InputShape,
}

impl FromUrlWithScheme for GStreamerCameraBuilder {
  const SCHEME: &'static str = "camera";
}

impl FromUrl for GStreamerCameraBuilder {
  type Error = GStreamerCameraError;

  /// `camera:///dev/video0?width=320&height=240&fps=15&sink=autovideosink`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerCameraError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let index = url
      .path()
      .trim_start_matches("/dev/video")
      .parse::<usize>()
      .unwrap_or(0);
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut builder = Self::new(index).capture(parse("width", 320), parse("height", 240), parse("fps", 15));
    if let Some(sink) = query.get("sink") {
      builder = builder.preview_sink(sink.clone());
    }
    Ok(builder)
  }
}

impl GStreamerCameraBuilder {
  pub fn new(device_index: usize) -> Self {
    Self {
      device_index,
      width: 320,
      height: 240,
      fps: 15,
      preview_sink: String::from("autovideosink"),
      model_input: InputShape::new(224, 224, RGB_CHANNELS),
    }
  }

  pub fn capture(mut self, width: u32, height: u32, fps: u32) -> Self {
    self.width = width;
    self.height = height;
    self.fps = fps;
    self
  }

  pub fn preview_sink(mut self, sink: impl Into<String>) -> Self {
    self.preview_sink = sink.into();
    self
  }

  pub fn model_input(mut self, shape: InputShape) -> Self {
    self.model_input = shape;
    self
  }

  fn items(&self) -> Vec<GStreamerCameraBuilderItem> {
    vec![
      GStreamerCameraBuilderItem::CameraSource {
        device: device_path(self.device_index),
        width: self.width,
        height: self.height,
        fps: self.fps,
      },
      GStreamerCameraBuilderItem::Tee,
      GStreamerCameraBuilderItem::PreviewBranch {
        sink: self.preview_sink.clone(),
      },
      GStreamerCameraBuilderItem::InferenceBranch {
        width: self.model_input.width,
        height: self.model_input.height,
      },
    ]
  }

  /// 主干用 ` ! ` 连接，分支以 `t.` 开头，用空格分隔
  pub fn pipeline_description(&self) -> String {
    let mut description = String::new();
    for item in self.items() {
      if !description.is_empty() {
        description.push_str(if item.is_branch() { " " } else { " ! " });
      }
      description.push_str(&item.to_pipeline());
    }
    description
  }

  pub fn build(self) -> Result<GStreamerCamera, GStreamerCameraError> {
    check_video_device(self.device_index)?;
    gst::init()?;

    let description = self.pipeline_description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerCameraError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name(APPSINK_ELEMENT)
      .ok_or(GStreamerCameraError::ElementNotFound(APPSINK_ELEMENT))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerCameraError::AppSinkConversionFailed)?;
    let preview = pipeline
      .by_name(PREVIEW_ELEMENT)
      .ok_or(GStreamerCameraError::ElementNotFound(PREVIEW_ELEMENT))?;

    let feed = CameraFeed {
      frames: Mailbox::new(),
      display_fps: FpsGauge::new(),
    };

    let gauge = feed.display_fps.clone();
    preview.connect("fps-measurements", false, move |values| {
      // (element, fps, droprate, avgfps)
      if let Some(fps) = values.get(1).and_then(|v| v.get::<f64>().ok()) {
        gauge.set(fps as f32);
      }
      None
    });

    let frames = feed.frames.clone();
    appsink.set_callbacks(
      gst_app::AppSinkCallbacks::builder()
        .new_sample(move |sink| {
          let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
          match convert_sample(&sample) {
            Ok(frame) => {
              if frames.post(frame) == Posted::Closed {
                return Err(gst::FlowError::Eos);
              }
            }
            Err(e) => warn!("帧转换失败: {}", e),
          }
          Ok(gst::FlowSuccess::Ok)
        })
        .build(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let bus = pipeline
      .bus()
      .ok_or_else(|| GStreamerCameraError::PipelineError("管道没有消息总线".to_string()))?;
    let watcher = {
      let stop = Arc::clone(&stop);
      let frames = feed.frames.clone();
      thread::spawn(move || watch_bus(bus, frames, stop))
    };

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerCamera {
      pipeline,
      feed,
      stop,
      watcher: Some(watcher),
    })
  }
}

fn watch_bus(bus: gst::Bus, frames: Mailbox<RgbNhwcFrame>, stop: Arc<AtomicBool>) {
  while !stop.load(Ordering::Relaxed) {
    let Some(message) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_INTERVAL_MS)) else {
      continue;
    };
    match message.view() {
      gst::MessageView::Eos(..) => {
        info!("摄像头流结束");
        frames.close();
        break;
      }
      gst::MessageView::Error(err) => {
        error!("管道错误: {} ({:?})", err.error(), err.debug());
        frames.close();
        break;
      }
      gst::MessageView::Warning(w) => warn!("管道警告: {}", w.error()),
      _ => {}
    }
  }
  debug!("总线监听线程退出");
}

/// 正在运行的摄像头管道；析构时停止管道
pub struct GStreamerCamera {
  pipeline: gst::Pipeline,
  feed: CameraFeed,
  stop: Arc<AtomicBool>,
  watcher: Option<JoinHandle<()>>,
}

impl GStreamerCamera {
  pub fn feed(&self) -> CameraFeed {
    self.feed.clone()
  }
}

impl Drop for GStreamerCamera {
  fn drop(&mut self) {
    self.feed.frames.close();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
    self.stop.store(true, Ordering::Relaxed);
    if let Some(watcher) = self.watcher.take() {
      let _ = watcher.join();
    }
  }
}

/// 按行拷贝，去掉每行末尾的对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<RgbNhwcFrame, GStreamerCameraError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerCameraError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerCameraError::PipelineError("样本中没有 caps".to_string()))?;
  let info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerCameraError::VideoInfoError)?;

  if info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerCameraError::UnsupportedFormat(info.format()));
  }

  let width = info.width() as usize;
  let height = info.height() as usize;
  let stride = info.stride()[0] as usize;
  let row = width * RGB_CHANNELS;

  let map = buffer.map_readable()?;
  let data = map.as_slice();
  let expected = stride * height.saturating_sub(1) + row;
  if data.len() < expected {
    return Err(GStreamerCameraError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }
  Ok(RgbNhwcFrame::from_raw(width, height, pixels)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_branches_after_tee() {
    let description = GStreamerCameraBuilder::new(1)
      .capture(640, 480, 30)
      .model_input(InputShape::new(224, 224, 3))
      .pipeline_description();

    assert!(description.starts_with(
      "v4l2src device=/dev/video1 ! videorate ! video/x-raw,width=640,height=480,framerate=30/1 ! tee name=t t. ! "
    ));
    assert!(description.contains("fpsdisplaysink name=preview video-sink=autovideosink"));
    assert!(description.contains("video/x-raw,format=RGB,width=224,height=224"));
    assert!(description.ends_with("appsink name=sink max-buffers=1 drop=true sync=false"));
    assert_eq!(description.matches("leaky=downstream").count(), 2);
  }

  #[test]
  fn url_configures_capture() {
    let url = Url::parse("camera:///dev/video2?width=800&height=600&fps=5&sink=fakesink").unwrap();
    let description = GStreamerCameraBuilder::from_url(&url)
      .unwrap()
      .pipeline_description();
    assert!(description.contains("device=/dev/video2"));
    assert!(description.contains("width=800,height=600,framerate=5/1"));
    assert!(description.contains("video-sink=fakesink"));
  }
}
