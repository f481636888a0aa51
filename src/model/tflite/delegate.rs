// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/tflite/delegate.rs - 带外部 delegate 的 TFLite 解释器
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

//! 运行时通过 `libloading` 加载 `libtensorflowlite_c.so` 的 C API，
//! 并按 TFLite 外部 delegate 插件约定加载 delegate 库：
//!
//! ```text
//! TfLiteDelegate* tflite_plugin_create_delegate(char** keys, char** values,
//!                                               size_t num, void (*report_error)(const char*));
//! void tflite_plugin_destroy_delegate(TfLiteDelegate* delegate);
//! ```

use std::{
  ffi::{CString, c_char, c_int, c_void},
  path::Path,
  ptr,
};

use libloading::Library;
use tracing::{debug, info};

use super::{OutputBuffer, TfliteError};
use crate::model::{ElementType, ModelHandle, TensorData, TensorSpec};

const TFLITE_OK: c_int = 0;
const TFLITE_FLOAT32: c_int = 1;
const TFLITE_UINT8: c_int = 3;

fn check(call: &'static str, status: c_int) -> Result<(), TfliteError> {
  if status == TFLITE_OK {
    Ok(())
  } else {
    Err(TfliteError::Status { call, status })
  }
}

fn open_library(path: &Path) -> Result<Library, TfliteError> {
  unsafe { Library::new(path) }.map_err(|source| TfliteError::Library {
    path: path.display().to_string(),
    source,
  })
}

macro_rules! symbol {
  ($lib:expr, $name:literal) => {{
    let symbol = unsafe { $lib.get(concat!($name, "\0").as_bytes()) }
      .map_err(|source| TfliteError::Symbol {
        symbol: $name,
        source,
      })?;
    *symbol
  }};
}

/// 用到的 C API 子集
struct CApi {
  model_create_from_file: unsafe extern "C" fn(*const c_char) -> *mut c_void,
  model_delete: unsafe extern "C" fn(*mut c_void),
  options_create: unsafe extern "C" fn() -> *mut c_void,
  options_delete: unsafe extern "C" fn(*mut c_void),
  options_set_num_threads: unsafe extern "C" fn(*mut c_void, i32),
  options_add_delegate: unsafe extern "C" fn(*mut c_void, *mut c_void),
  interpreter_create: unsafe extern "C" fn(*const c_void, *const c_void) -> *mut c_void,
  interpreter_delete: unsafe extern "C" fn(*mut c_void),
  interpreter_allocate_tensors: unsafe extern "C" fn(*mut c_void) -> c_int,
  interpreter_invoke: unsafe extern "C" fn(*mut c_void) -> c_int,
  interpreter_get_input_tensor: unsafe extern "C" fn(*const c_void, i32) -> *mut c_void,
  interpreter_get_output_tensor: unsafe extern "C" fn(*const c_void, i32) -> *const c_void,
  tensor_type: unsafe extern "C" fn(*const c_void) -> c_int,
  tensor_num_dims: unsafe extern "C" fn(*const c_void) -> i32,
  tensor_dim: unsafe extern "C" fn(*const c_void, i32) -> i32,
  tensor_byte_size: unsafe extern "C" fn(*const c_void) -> usize,
  tensor_copy_from_buffer: unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> c_int,
  tensor_copy_to_buffer: unsafe extern "C" fn(*const c_void, *mut c_void, usize) -> c_int,
  _library: Library,
}

impl CApi {
  fn load(path: &Path) -> Result<Self, TfliteError> {
    info!("加载 TensorFlow Lite 运行库: {}", path.display());
    let library = open_library(path)?;

    Ok(Self {
      model_create_from_file: symbol!(library, "TfLiteModelCreateFromFile"),
      model_delete: symbol!(library, "TfLiteModelDelete"),
      options_create: symbol!(library, "TfLiteInterpreterOptionsCreate"),
      options_delete: symbol!(library, "TfLiteInterpreterOptionsDelete"),
      options_set_num_threads: symbol!(library, "TfLiteInterpreterOptionsSetNumThreads"),
      options_add_delegate: symbol!(library, "TfLiteInterpreterOptionsAddDelegate"),
      interpreter_create: symbol!(library, "TfLiteInterpreterCreate"),
      interpreter_delete: symbol!(library, "TfLiteInterpreterDelete"),
      interpreter_allocate_tensors: symbol!(library, "TfLiteInterpreterAllocateTensors"),
      interpreter_invoke: symbol!(library, "TfLiteInterpreterInvoke"),
      interpreter_get_input_tensor: symbol!(library, "TfLiteInterpreterGetInputTensor"),
      interpreter_get_output_tensor: symbol!(library, "TfLiteInterpreterGetOutputTensor"),
      tensor_type: symbol!(library, "TfLiteTensorType"),
      tensor_num_dims: symbol!(library, "TfLiteTensorNumDims"),
      tensor_dim: symbol!(library, "TfLiteTensorDim"),
      tensor_byte_size: symbol!(library, "TfLiteTensorByteSize"),
      tensor_copy_from_buffer: symbol!(library, "TfLiteTensorCopyFromBuffer"),
      tensor_copy_to_buffer: symbol!(library, "TfLiteTensorCopyToBuffer"),
      _library: library,
    })
  }

  fn tensor_spec(&self, tensor: *const c_void) -> TensorSpec {
    let (rank, code) = unsafe { ((self.tensor_num_dims)(tensor), (self.tensor_type)(tensor)) };
    let dims = (0..rank.max(0))
      .map(|i| unsafe { (self.tensor_dim)(tensor, i) }.max(0) as usize)
      .collect();
    let element = match code {
      TFLITE_UINT8 => ElementType::UInt8,
      TFLITE_FLOAT32 => ElementType::Float32,
      other => ElementType::Other(other),
    };
    TensorSpec::new(dims, element)
  }
}

/// 外部 delegate，生命周期必须覆盖使用它的解释器
struct ExternalDelegate {
  delegate: *mut c_void,
  destroy: unsafe extern "C" fn(*mut c_void),
  _library: Library,
}

impl ExternalDelegate {
  fn load(path: &Path) -> Result<Self, TfliteError> {
    info!("加载外部 delegate: {}", path.display());
    let library = open_library(path)?;
    let create: unsafe extern "C" fn(
      *const *const c_char,
      *const *const c_char,
      usize,
      Option<unsafe extern "C" fn(*const c_char)>,
    ) -> *mut c_void = symbol!(library, "tflite_plugin_create_delegate");
    let destroy: unsafe extern "C" fn(*mut c_void) =
      symbol!(library, "tflite_plugin_destroy_delegate");

    let delegate = unsafe { create(ptr::null(), ptr::null(), 0, None) };
    if delegate.is_null() {
      return Err(TfliteError::NullHandle("tflite_plugin_create_delegate"));
    }

    Ok(Self {
      delegate,
      destroy,
      _library: library,
    })
  }
}

impl Drop for ExternalDelegate {
  fn drop(&mut self) {
    unsafe { (self.destroy)(self.delegate) };
  }
}

pub(super) struct DelegateEngine {
  model: *mut c_void,
  options: *mut c_void,
  interpreter: *mut c_void,
  input_tensor: *mut c_void,
  output_tensor: *const c_void,
  input_spec: TensorSpec,
  output_spec: TensorSpec,
  output: OutputBuffer,
  // 析构顺序：先解释器（Drop::drop），再 delegate，最后卸载运行库
  delegate: Option<ExternalDelegate>,
  api: CApi,
}

impl Drop for DelegateEngine {
  fn drop(&mut self) {
    unsafe {
      if !self.interpreter.is_null() {
        (self.api.interpreter_delete)(self.interpreter);
      }
      if !self.options.is_null() {
        (self.api.options_delete)(self.options);
      }
      if !self.model.is_null() {
        (self.api.model_delete)(self.model);
      }
    }
  }
}

impl DelegateEngine {
  pub(super) fn open(handle: &ModelHandle, delegate_path: &Path) -> Result<Self, TfliteError> {
    let api = CApi::load(&handle.runtime_library)?;
    let path = CString::new(handle.model_path.to_string_lossy().as_bytes())
      .map_err(|_| TfliteError::InvalidPath(handle.model_path.display().to_string()))?;

    let empty = TensorSpec::new(Vec::new(), ElementType::Other(0));
    let mut engine = DelegateEngine {
      model: ptr::null_mut(),
      options: ptr::null_mut(),
      interpreter: ptr::null_mut(),
      input_tensor: ptr::null_mut(),
      output_tensor: ptr::null(),
      input_spec: empty.clone(),
      output_spec: empty,
      output: OutputBuffer::default(),
      delegate: None,
      api,
    };

    engine.model = unsafe { (engine.api.model_create_from_file)(path.as_ptr()) };
    if engine.model.is_null() {
      return Err(TfliteError::NullHandle("TfLiteModelCreateFromFile"));
    }

    engine.options = unsafe { (engine.api.options_create)() };
    if engine.options.is_null() {
      return Err(TfliteError::NullHandle("TfLiteInterpreterOptionsCreate"));
    }
    unsafe { (engine.api.options_set_num_threads)(engine.options, handle.threads as i32) };

    let delegate = ExternalDelegate::load(delegate_path)?;
    unsafe { (engine.api.options_add_delegate)(engine.options, delegate.delegate) };
    engine.delegate = Some(delegate);

    engine.interpreter = unsafe { (engine.api.interpreter_create)(engine.model, engine.options) };
    if engine.interpreter.is_null() {
      return Err(TfliteError::NullHandle("TfLiteInterpreterCreate"));
    }

    check("TfLiteInterpreterAllocateTensors", unsafe {
      (engine.api.interpreter_allocate_tensors)(engine.interpreter)
    })?;

    engine.input_tensor = unsafe { (engine.api.interpreter_get_input_tensor)(engine.interpreter, 0) };
    if engine.input_tensor.is_null() {
      return Err(TfliteError::NullHandle("TfLiteInterpreterGetInputTensor"));
    }
    engine.output_tensor =
      unsafe { (engine.api.interpreter_get_output_tensor)(engine.interpreter, 0) };
    if engine.output_tensor.is_null() {
      return Err(TfliteError::NullHandle("TfLiteInterpreterGetOutputTensor"));
    }

    engine.input_spec = engine.api.tensor_spec(engine.input_tensor);
    engine.output_spec = engine.api.tensor_spec(engine.output_tensor);
    debug!("TFLite 输入张量: {:?}", engine.input_spec);
    debug!("TFLite 输出张量: {:?}", engine.output_spec);

    Ok(engine)
  }

  pub(super) fn input_spec(&self) -> &TensorSpec {
    &self.input_spec
  }

  pub(super) fn output_spec(&self) -> &TensorSpec {
    &self.output_spec
  }

  pub(super) fn set_input(&mut self, input: TensorData<'_>) -> Result<(), TfliteError> {
    let (actual_type, data, size) = match input {
      TensorData::UInt8(data) => (
        ElementType::UInt8,
        data.as_ptr() as *const c_void,
        std::mem::size_of_val(data),
      ),
      TensorData::Float32(data) => (
        ElementType::Float32,
        data.as_ptr() as *const c_void,
        std::mem::size_of_val(data),
      ),
    };

    if actual_type != self.input_spec.element {
      return Err(TfliteError::TypeMismatch {
        expected: self.input_spec.element,
        actual: actual_type,
      });
    }

    let expected = unsafe { (self.api.tensor_byte_size)(self.input_tensor) };
    if expected != size {
      return Err(TfliteError::SizeMismatch {
        expected,
        actual: size,
      });
    }

    check("TfLiteTensorCopyFromBuffer", unsafe {
      (self.api.tensor_copy_from_buffer)(self.input_tensor, data, size)
    })
  }

  pub(super) fn invoke(&mut self) -> Result<(), TfliteError> {
    check("TfLiteInterpreterInvoke", unsafe {
      (self.api.interpreter_invoke)(self.interpreter)
    })?;

    let count = self.output_spec.element_count();
    let status = match self.output_spec.element {
      ElementType::UInt8 => {
        self.output.u8.resize(count, 0);
        unsafe {
          (self.api.tensor_copy_to_buffer)(
            self.output_tensor,
            self.output.u8.as_mut_ptr() as *mut c_void,
            count,
          )
        }
      }
      ElementType::Float32 => {
        self.output.f32.resize(count, 0.0);
        unsafe {
          (self.api.tensor_copy_to_buffer)(
            self.output_tensor,
            self.output.f32.as_mut_ptr() as *mut c_void,
            count * std::mem::size_of::<f32>(),
          )
        }
      }
      other => {
        return Err(TfliteError::TypeMismatch {
          expected: ElementType::Float32,
          actual: other,
        });
      }
    };
    check("TfLiteTensorCopyToBuffer", status)
  }

  pub(super) fn output(&self) -> Result<TensorData<'_>, TfliteError> {
    self.output.view(self.output_spec.element)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn non_ok_status_is_an_error() {
    assert!(check("TfLiteInterpreterInvoke", TFLITE_OK).is_ok());
    assert!(matches!(
      check("TfLiteInterpreterInvoke", 1),
      Err(TfliteError::Status { status: 1, .. })
    ));
  }

  #[cfg(all(target_os = "linux", target_env = "gnu"))]
  #[test]
  fn delegate_without_plugin_symbols_is_rejected() {
    // libc 存在但没有 tflite_plugin_* 符号
    let err = ExternalDelegate::load(Path::new("libc.so.6")).err();
    assert!(matches!(
      err,
      Some(TfliteError::Symbol {
        symbol: "tflite_plugin_create_delegate",
        ..
      })
    ));
  }
}
