// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/backend.rs - 推理后端选择
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

use clap::ValueEnum;
use tracing::{debug, error, info, warn};

use crate::model::ClassifierError;

/// Coral Edge TPU 的 USB 厂商 ID（固件加载前 / 加载后）
pub const EDGE_TPU_USB_VENDORS: [&str; 2] = ["1a6e", "18d1"];

const LIBTPU_STD_PATH: &str = "/usr/lib/libedgetpu-std.so.2";
const LIBTPU_MAX_PATH: &str = "/usr/lib/libedgetpu-max.so.2";
const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Edge TPU 性能档位，对应两种 delegate 库
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTier {
  #[value(name = "std")]
  Standard,
  Max,
}

/// 用户请求的推理后端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
  Cpu,
  Accelerator(PerformanceTier),
  ExternalDelegate(PathBuf),
}

/// 解析后的后端，至多一个 delegate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBackend {
  Cpu,
  Delegate(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatePaths {
  pub standard: PathBuf,
  pub max: PathBuf,
}

impl Default for DelegatePaths {
  fn default() -> Self {
    Self {
      standard: PathBuf::from(LIBTPU_STD_PATH),
      max: PathBuf::from(LIBTPU_MAX_PATH),
    }
  }
}

impl DelegatePaths {
  pub fn for_tier(&self, tier: PerformanceTier) -> &Path {
    match tier {
      PerformanceTier::Standard => &self.standard,
      PerformanceTier::Max => &self.max,
    }
  }
}

pub trait AcceleratorDetector {
  fn accelerator_present(&self) -> bool;
}

/// 通过 sysfs 枚举 USB 设备，匹配已知的厂商 ID
#[derive(Debug, Clone)]
pub struct SysfsUsbDetector {
  root: PathBuf,
}

impl Default for SysfsUsbDetector {
  fn default() -> Self {
    Self::with_root(SYSFS_USB_DEVICES)
  }
}

impl SysfsUsbDetector {
  pub fn with_root(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn vendor_ids(&self) -> Vec<String> {
    let entries = match std::fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) => {
        warn!("无法枚举 USB 设备 {}: {}", self.root.display(), e);
        return Vec::new();
      }
    };

    entries
      .filter_map(Result::ok)
      .filter_map(|entry| std::fs::read_to_string(entry.path().join("idVendor")).ok())
      .map(|vendor| vendor.trim().to_lowercase())
      .collect()
  }
}

impl AcceleratorDetector for SysfsUsbDetector {
  fn accelerator_present(&self) -> bool {
    let vendors = self.vendor_ids();
    debug!("USB 厂商 ID: {:?}", vendors);
    vendors
      .iter()
      .any(|vendor| EDGE_TPU_USB_VENDORS.contains(&vendor.as_str()))
  }
}

fn delegate_or_cpu(path: &Path) -> ResolvedBackend {
  if path.exists() {
    info!("使用外部 delegate: {}", path.display());
    ResolvedBackend::Delegate(path.to_path_buf())
  } else {
    warn!("未找到 delegate {}，回退到 CPU 模式", path.display());
    ResolvedBackend::Cpu
  }
}

/// 解析后端；加速器缺失是致命错误，delegate 库缺失则回退到 CPU
pub fn resolve_backend<P: AcceleratorDetector + ?Sized>(
  backend: &Backend,
  detector: &P,
  paths: &DelegatePaths,
) -> Result<ResolvedBackend, ClassifierError> {
  match backend {
    Backend::Cpu => Ok(ResolvedBackend::Cpu),
    Backend::Accelerator(tier) => {
      if !detector.accelerator_present() {
        error!("未检测到 Edge TPU 设备");
        return Err(ClassifierError::AcceleratorNotFound);
      }
      Ok(delegate_or_cpu(paths.for_tier(*tier)))
    }
    Backend::ExternalDelegate(path) => Ok(delegate_or_cpu(path)),
  }
}

/// 默认推理线程数；摄像头预览时保留一个核心给显示
pub fn default_thread_count(cores: usize, camera_preview: bool) -> usize {
  match cores {
    0 | 1 => 1,
    n if camera_preview => n - 1,
    n => n,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Present(bool);

  impl AcceleratorDetector for Present {
    fn accelerator_present(&self) -> bool {
      self.0
    }
  }

  fn paths_in(dir: &Path) -> DelegatePaths {
    DelegatePaths {
      standard: dir.join("libedgetpu-std.so.2"),
      max: dir.join("libedgetpu-max.so.2"),
    }
  }

  #[test]
  fn missing_accelerator_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve_backend(
      &Backend::Accelerator(PerformanceTier::Max),
      &Present(false),
      &paths_in(dir.path()),
    )
    .unwrap_err();
    assert!(matches!(err, ClassifierError::AcceleratorNotFound));
  }

  #[test]
  fn accelerator_tier_picks_matching_library() {
    let dir = tempfile::tempdir().unwrap();
    let paths = paths_in(dir.path());
    std::fs::write(&paths.max, b"").unwrap();

    let max = resolve_backend(
      &Backend::Accelerator(PerformanceTier::Max),
      &Present(true),
      &paths,
    )
    .unwrap();
    assert_eq!(max, ResolvedBackend::Delegate(paths.max.clone()));

    // 标准档位的库不存在时回退到 CPU
    let std = resolve_backend(
      &Backend::Accelerator(PerformanceTier::Standard),
      &Present(true),
      &paths,
    )
    .unwrap();
    assert_eq!(std, ResolvedBackend::Cpu);
  }

  #[test]
  fn external_delegate_falls_back_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("libvx_delegate.so");
    let resolved = resolve_backend(
      &Backend::ExternalDelegate(missing.clone()),
      &Present(false),
      &DelegatePaths::default(),
    )
    .unwrap();
    assert_eq!(resolved, ResolvedBackend::Cpu);

    std::fs::write(&missing, b"").unwrap();
    let resolved = resolve_backend(
      &Backend::ExternalDelegate(missing.clone()),
      &Present(false),
      &DelegatePaths::default(),
    )
    .unwrap();
    assert_eq!(resolved, ResolvedBackend::Delegate(missing));
  }

  #[test]
  fn sysfs_detector_matches_known_vendors() {
    let root = tempfile::tempdir().unwrap();
    let hub = root.path().join("1-0:1.0");
    std::fs::create_dir(&hub).unwrap();
    std::fs::write(hub.join("idVendor"), "1d6b\n").unwrap();

    let detector = SysfsUsbDetector::with_root(root.path());
    assert!(!detector.accelerator_present());

    let tpu = root.path().join("2-1");
    std::fs::create_dir(&tpu).unwrap();
    std::fs::write(tpu.join("idVendor"), "18D1\n").unwrap();
    assert!(detector.accelerator_present());
  }

  #[test]
  fn tier_names_on_the_command_line() {
    assert_eq!(
      PerformanceTier::from_str("std", false),
      Ok(PerformanceTier::Standard)
    );
    assert_eq!(PerformanceTier::from_str("max", false), Ok(PerformanceTier::Max));
    assert!(PerformanceTier::from_str("standard", false).is_err());
  }

  #[test]
  fn sysfs_detector_without_bus_finds_nothing() {
    let detector = SysfsUsbDetector::with_root("/nonexistent/usb/devices");
    assert!(!detector.accelerator_present());
  }

  #[test]
  fn thread_count_reserves_a_core_for_preview() {
    assert_eq!(default_thread_count(1, true), 1);
    assert_eq!(default_thread_count(0, false), 1);
    assert_eq!(default_thread_count(4, true), 3);
    assert_eq!(default_thread_count(4, false), 4);
  }
}
