//! 加载器配置管理
//!
//! 配置来源：环境变量、YAML/TOML/JSON 配置文件或代码构造

use crate::types::ApiVersion;
use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 加载器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// 单驱动时仍强制启用句柄翻译
    pub enable_loader_intercept: bool,
    /// 驱动发现配置
    pub drivers: DriverDiscoveryConfig,
    /// 层配置
    pub layers: LayerConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 驱动发现配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverDiscoveryConfig {
    /// 扫描驱动库的目录
    pub search_paths: Vec<PathBuf>,
    /// 替代驱动列表，非空时取代常规发现
    pub alt_drivers: Vec<PathBuf>,
    /// 交由系统搜索的默认驱动库名
    pub default_names: Vec<String>,
    /// 可接受的最低驱动API版本
    pub min_api_version: ApiVersion,
}

/// 层配置，决定初始化时启用哪些层
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub enable_tracing: bool,
    pub enable_validation: bool,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 是否安装日志订阅器
    pub enabled: bool,
    /// 日志级别
    pub level: LogLevel,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(LoaderError::config(&format!("Unknown log level: {}", other))),
        }
    }
}

impl Default for DriverDiscoveryConfig {
    fn default() -> Self {
        let (search_paths, default_names) = if cfg!(windows) {
            (Vec::new(), vec!["ze_intel_gpu64.dll".to_string()])
        } else {
            (
                vec![
                    PathBuf::from("/usr/lib/x86_64-linux-gnu"),
                    PathBuf::from("/usr/lib64"),
                    PathBuf::from("/usr/local/lib"),
                ],
                vec!["libze_intel_gpu.so.1".to_string()],
            )
        };

        Self {
            search_paths,
            alt_drivers: Vec::new(),
            default_names,
            min_api_version: ApiVersion::V1_0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: LogLevel::Warn,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enable_loader_intercept: false,
            drivers: DriverDiscoveryConfig::default(),
            layers: LayerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// 配置文件格式，由扩展名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(LoaderError::config(&format!(
                "Unsupported config file format: {}",
                path.display()
            ))),
        }
    }
}

/// 判断环境变量值是否为开启
fn env_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "on")
}

impl LoaderConfig {
    /// 从进程环境变量读取配置
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// 通过查找函数读取环境变量配置，未设置的项保持默认值
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(alt_drivers) = lookup("ZE_ENABLE_ALT_DRIVERS") {
            config.drivers.alt_drivers = alt_drivers
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(value) = lookup("ZE_ENABLE_TRACING_LAYER") {
            config.layers.enable_tracing = env_flag(&value);
        }
        if let Some(value) = lookup("ZE_ENABLE_VALIDATION_LAYER") {
            config.layers.enable_validation = env_flag(&value);
        }
        if let Some(value) = lookup("ZE_ENABLE_LOADER_INTERCEPT") {
            config.enable_loader_intercept = env_flag(&value);
        }
        if let Some(value) = lookup("ZEL_ENABLE_LOADER_LOGGING") {
            config.logging.enabled = env_flag(&value);
        }
        if let Some(value) = lookup("ZEL_LOADER_LOGGING_LEVEL") {
            match value.parse() {
                Ok(level) => config.logging.level = level,
                Err(e) => tracing::warn!("Ignoring ZEL_LOADER_LOGGING_LEVEL: {}", e),
            }
        }

        config
    }

    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LoaderError::config(&format!("Failed to read config file: {}", e)))?;

        let config: LoaderConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(&content)
                .map_err(|e| LoaderError::config(&format!("Failed to parse config file: {}", e)))?,
            ConfigFormat::Toml => toml::from_str(&content)
                .map_err(|e| LoaderError::config(&format!("Failed to parse config file: {}", e)))?,
            ConfigFormat::Json => serde_json::from_str(&content)
                .map_err(|e| LoaderError::config(&format!("Failed to parse config file: {}", e)))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| LoaderError::config(&format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| LoaderError::config(&format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| LoaderError::config(&format!("Failed to serialize config: {}", e)))?,
        };

        tokio::fs::write(path, content)
            .await
            .map_err(|e| LoaderError::config(&format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let min_version = self.drivers.min_api_version;
        if !min_version.is_compatible_with(ApiVersion::CURRENT) || min_version > ApiVersion::CURRENT {
            return Err(LoaderError::config(&format!(
                "Minimum API version {} is not supported (loader implements {})",
                min_version,
                ApiVersion::CURRENT
            )));
        }

        if self.drivers.alt_drivers.iter().any(|path| path.as_os_str().is_empty()) {
            return Err(LoaderError::config("Alternate driver paths cannot be empty"));
        }

        if self.drivers.default_names.iter().any(|name| name.trim().is_empty()) {
            return Err(LoaderError::config("Default driver names cannot be empty"));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }
}

/// 生成默认配置文件
pub async fn generate_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    LoaderConfig::default().save_to_file(path).await
}
