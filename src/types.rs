//! 加载器基础类型
//!
//! 句柄类型、API版本、驱动标识等在各组件之间共享的类型定义

use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 加载器句柄 - 返回给应用的不透明值
pub type LoaderHandle = u64;

/// 驱动原生句柄
pub type NativeHandle = u64;

/// 驱动标识（驱动在注册表中的下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverId(pub usize);

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver#{}", self.0)
    }
}

/// 句柄类型
///
/// 封闭的枚举，判别值直接作为句柄翻译表的下标。新增类型会改变
/// 翻译表的存储布局，属于破坏性变更。
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HandleType {
    Driver = 0,
    Device = 1,
    Context = 2,
    CommandQueue = 3,
    CommandList = 4,
    Fence = 5,
    EventPool = 6,
    Event = 7,
    Image = 8,
    Module = 9,
    ModuleBuildLog = 10,
    Kernel = 11,
    Sampler = 12,
    PhysicalMem = 13,
}

impl HandleType {
    /// 句柄类型数量
    pub const COUNT: usize = 14;

    /// 全部句柄类型，按判别值排列
    pub const ALL: [HandleType; Self::COUNT] = [
        HandleType::Driver,
        HandleType::Device,
        HandleType::Context,
        HandleType::CommandQueue,
        HandleType::CommandList,
        HandleType::Fence,
        HandleType::EventPool,
        HandleType::Event,
        HandleType::Image,
        HandleType::Module,
        HandleType::ModuleBuildLog,
        HandleType::Kernel,
        HandleType::Sampler,
        HandleType::PhysicalMem,
    ];

    /// 翻译表下标
    pub fn index(self) -> usize {
        self as usize
    }

    /// 从C接口的原始值转换
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            HandleType::Driver => "driver",
            HandleType::Device => "device",
            HandleType::Context => "context",
            HandleType::CommandQueue => "command_queue",
            HandleType::CommandList => "command_list",
            HandleType::Fence => "fence",
            HandleType::EventPool => "event_pool",
            HandleType::Event => "event",
            HandleType::Image => "image",
            HandleType::Module => "module",
            HandleType::ModuleBuildLog => "module_build_log",
            HandleType::Kernel => "kernel",
            HandleType::Sampler => "sampler",
            HandleType::PhysicalMem => "physical_mem",
        }
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// API规范版本，编码为 `major << 16 | minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion(u32);

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion::new(1, 0);
    pub const V1_1: ApiVersion = ApiVersion::new(1, 1);
    pub const V1_2: ApiVersion = ApiVersion::new(1, 2);
    pub const V1_3: ApiVersion = ApiVersion::new(1, 3);

    /// 加载器实现的规范版本
    pub const CURRENT: ApiVersion = ApiVersion::V1_3;

    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn minor(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// 主版本号相同即视为兼容
    pub fn is_compatible_with(self, other: ApiVersion) -> bool {
        self.major() == other.major()
    }

    /// 解析 "major.minor" 格式的版本字符串
    pub fn parse(version_str: &str) -> Result<Self> {
        let (major, minor) = version_str
            .trim()
            .split_once('.')
            .ok_or_else(|| LoaderError::config(&format!("Invalid API version: {}", version_str)))?;

        let major = major
            .parse::<u16>()
            .map_err(|_| LoaderError::config(&format!("Invalid API major version: {}", major)))?;
        let minor = minor
            .parse::<u16>()
            .map_err(|_| LoaderError::config(&format!("Invalid API minor version: {}", minor)))?;

        Ok(Self::new(major, minor))
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = LoaderError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.to_string()
    }
}

/// 组件库版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl LibraryVersion {
    pub const fn new(major: i32, minor: i32, patch: i32) -> Self {
        Self { major, minor, patch }
    }

    /// 本crate的版本
    pub fn current() -> Self {
        semver::Version::parse(crate::VERSION)
            .map(|v| Self::from(&v))
            .unwrap_or(Self::new(0, 0, 0))
    }
}

impl From<&semver::Version> for LibraryVersion {
    fn from(version: &semver::Version) -> Self {
        Self {
            major: version.major as i32,
            minor: version.minor as i32,
            patch: version.patch as i32,
        }
    }
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 组件版本记录，组件初始化时登记一次，之后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersion {
    /// 组件名称，如 "loader"、"ze_tracing"
    pub component_name: String,
    /// 组件实现的规范版本
    pub spec_version: ApiVersion,
    /// 组件库版本
    pub component_lib_version: LibraryVersion,
}

impl ComponentVersion {
    /// C结构体中名称字段的容量（含结尾的NUL）
    pub const NAME_CAPACITY: usize = 64;

    pub fn new(name: &str, spec_version: ApiVersion, component_lib_version: LibraryVersion) -> Self {
        let mut end = name.len().min(Self::NAME_CAPACITY - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        Self {
            component_name: name[..end].to_string(),
            spec_version,
            component_lib_version,
        }
    }
}
