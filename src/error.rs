//! 加载器错误处理系统
//!
//! 统一的错误类型与C接口结果码之间的映射

use crate::types::{DriverId, HandleType, LoaderHandle};
use std::fmt;
use thiserror::Error;

/// API结果码，与 `ze_result_t` 二进制兼容
///
/// 驱动返回的结果码原样透传；加载器自身产生的错误使用
/// `0x7A00_0000..=0x7A00_FFFF` 段，与合法驱动结果码不相交。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZeResult(pub i32);

impl ZeResult {
    pub const SUCCESS: ZeResult = ZeResult(0);
    pub const NOT_READY: ZeResult = ZeResult(1);
    pub const ERROR_DEVICE_LOST: ZeResult = ZeResult(0x7000_0001);
    pub const ERROR_OUT_OF_HOST_MEMORY: ZeResult = ZeResult(0x7000_0002);
    pub const ERROR_OUT_OF_DEVICE_MEMORY: ZeResult = ZeResult(0x7000_0003);
    pub const ERROR_UNINITIALIZED: ZeResult = ZeResult(0x7800_0001);
    pub const ERROR_UNSUPPORTED_VERSION: ZeResult = ZeResult(0x7800_0002);
    pub const ERROR_UNSUPPORTED_FEATURE: ZeResult = ZeResult(0x7800_0003);
    pub const ERROR_INVALID_ARGUMENT: ZeResult = ZeResult(0x7800_0004);
    pub const ERROR_INVALID_NULL_HANDLE: ZeResult = ZeResult(0x7800_0005);
    pub const ERROR_HANDLE_OBJECT_IN_USE: ZeResult = ZeResult(0x7800_0006);
    pub const ERROR_INVALID_NULL_POINTER: ZeResult = ZeResult(0x7800_0007);
    pub const ERROR_UNKNOWN: ZeResult = ZeResult(0x7fff_fffe);

    /// 加载器错误码段
    pub const LOADER_RANGE_START: i32 = 0x7A00_0000;
    pub const LOADER_RANGE_END: i32 = 0x7A00_FFFF;

    pub const LOADER_INVALID_HANDLE: ZeResult = ZeResult(0x7A00_0001);
    pub const LOADER_INVALID_DRIVER: ZeResult = ZeResult(0x7A00_0002);
    pub const LOADER_UNINITIALIZED: ZeResult = ZeResult(0x7A00_0003);
    pub const LOADER_NO_DRIVERS: ZeResult = ZeResult(0x7A00_0004);
    pub const LOADER_BUFFER_TOO_SMALL: ZeResult = ZeResult(0x7A00_0005);
    pub const LOADER_UNSUPPORTED_FEATURE: ZeResult = ZeResult(0x7A00_0006);
    pub const LOADER_INVALID_ARGUMENT: ZeResult = ZeResult(0x7A00_0007);
    pub const LOADER_CONFIG: ZeResult = ZeResult(0x7A00_0008);
    pub const LOADER_MODULE_LOAD: ZeResult = ZeResult(0x7A00_0009);
    pub const LOADER_IO: ZeResult = ZeResult(0x7A00_000A);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// 是否为加载器自身产生的结果码
    pub fn is_loader_origin(self) -> bool {
        (Self::LOADER_RANGE_START..=Self::LOADER_RANGE_END).contains(&self.0)
    }

    /// 驱动调用结果转换为 `Result`，非成功码原样保留
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(LoaderError::Driver(self))
        }
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "ZE_RESULT_SUCCESS",
            Self::NOT_READY => "ZE_RESULT_NOT_READY",
            Self::ERROR_DEVICE_LOST => "ZE_RESULT_ERROR_DEVICE_LOST",
            Self::ERROR_OUT_OF_HOST_MEMORY => "ZE_RESULT_ERROR_OUT_OF_HOST_MEMORY",
            Self::ERROR_OUT_OF_DEVICE_MEMORY => "ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY",
            Self::ERROR_UNINITIALIZED => "ZE_RESULT_ERROR_UNINITIALIZED",
            Self::ERROR_UNSUPPORTED_VERSION => "ZE_RESULT_ERROR_UNSUPPORTED_VERSION",
            Self::ERROR_UNSUPPORTED_FEATURE => "ZE_RESULT_ERROR_UNSUPPORTED_FEATURE",
            Self::ERROR_INVALID_ARGUMENT => "ZE_RESULT_ERROR_INVALID_ARGUMENT",
            Self::ERROR_INVALID_NULL_HANDLE => "ZE_RESULT_ERROR_INVALID_NULL_HANDLE",
            Self::ERROR_HANDLE_OBJECT_IN_USE => "ZE_RESULT_ERROR_HANDLE_OBJECT_IN_USE",
            Self::ERROR_INVALID_NULL_POINTER => "ZE_RESULT_ERROR_INVALID_NULL_POINTER",
            Self::ERROR_UNKNOWN => "ZE_RESULT_ERROR_UNKNOWN",
            Self::LOADER_INVALID_HANDLE => "ZEL_RESULT_ERROR_INVALID_HANDLE",
            Self::LOADER_INVALID_DRIVER => "ZEL_RESULT_ERROR_INVALID_DRIVER",
            Self::LOADER_UNINITIALIZED => "ZEL_RESULT_ERROR_UNINITIALIZED",
            Self::LOADER_NO_DRIVERS => "ZEL_RESULT_ERROR_NO_DRIVERS",
            Self::LOADER_BUFFER_TOO_SMALL => "ZEL_RESULT_ERROR_BUFFER_TOO_SMALL",
            Self::LOADER_UNSUPPORTED_FEATURE => "ZEL_RESULT_ERROR_UNSUPPORTED_FEATURE",
            Self::LOADER_INVALID_ARGUMENT => "ZEL_RESULT_ERROR_INVALID_ARGUMENT",
            Self::LOADER_CONFIG => "ZEL_RESULT_ERROR_CONFIG",
            Self::LOADER_MODULE_LOAD => "ZEL_RESULT_ERROR_MODULE_LOAD",
            Self::LOADER_IO => "ZEL_RESULT_ERROR_IO",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ZeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#x})", name, self.0),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

/// 加载器统一错误类型
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Invalid {handle_type} handle: {handle:#x}")]
    InvalidHandle { handle_type: HandleType, handle: LoaderHandle },

    #[error("Invalid driver {driver_id}: {reason}")]
    InvalidDriver { driver_id: DriverId, reason: String },

    #[error("Loader is not initialized or already torn down")]
    Uninitialized,

    #[error("No drivers were loaded")]
    NoDrivers,

    #[error("Buffer too small: {required} entries required, {provided} provided")]
    BufferTooSmall { required: usize, provided: usize },

    #[error("Entry point {symbol} is not exported by {driver_id}")]
    UnsupportedFeature { driver_id: DriverId, symbol: &'static str },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Driver returned {0}")]
    Driver(ZeResult),

    /// 校验层拒绝的调用，结果码与API一致但来源是加载器
    #[error("Validation rejected the call with {0}")]
    Validation(ZeResult),

    #[error("Failed to load module {path}: {message}")]
    ModuleLoad { path: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    pub fn invalid_handle(handle_type: HandleType, handle: LoaderHandle) -> Self {
        Self::InvalidHandle { handle_type, handle }
    }

    pub fn invalid_driver(driver_id: DriverId, reason: &str) -> Self {
        Self::InvalidDriver {
            driver_id,
            reason: reason.to_string(),
        }
    }

    pub fn invalid_argument(message: &str) -> Self {
        Self::InvalidArgument {
            message: message.to_string(),
        }
    }

    pub fn module_load(path: &str, message: &str) -> Self {
        Self::ModuleLoad {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    /// 对应的C接口结果码
    pub fn code(&self) -> ZeResult {
        match self {
            Self::InvalidHandle { .. } => ZeResult::LOADER_INVALID_HANDLE,
            Self::InvalidDriver { .. } => ZeResult::LOADER_INVALID_DRIVER,
            Self::Uninitialized => ZeResult::LOADER_UNINITIALIZED,
            Self::NoDrivers => ZeResult::LOADER_NO_DRIVERS,
            Self::BufferTooSmall { .. } => ZeResult::LOADER_BUFFER_TOO_SMALL,
            Self::UnsupportedFeature { .. } => ZeResult::LOADER_UNSUPPORTED_FEATURE,
            Self::InvalidArgument { .. } => ZeResult::LOADER_INVALID_ARGUMENT,
            Self::Driver(code) | Self::Validation(code) => *code,
            Self::ModuleLoad { .. } => ZeResult::LOADER_MODULE_LOAD,
            Self::Config { .. } => ZeResult::LOADER_CONFIG,
            Self::Io(_) => ZeResult::LOADER_IO,
        }
    }

    pub fn is_loader_origin(&self) -> bool {
        !matches!(self, Self::Driver(_))
    }
}

impl From<LoaderError> for ZeResult {
    fn from(error: LoaderError) -> Self {
        error.code()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, LoaderError>;

/// 将 `Result` 折叠为C接口结果码
pub fn to_ze_result<T>(result: Result<T>) -> ZeResult {
    match result {
        Ok(_) => ZeResult::SUCCESS,
        Err(e) => e.code(),
    }
}
