//! ze_loader - GPU计算API驱动加载器
//!
//! 位于应用与一个或多个厂商驱动模块之间，对外提供统一的入口点。
//!
//! # 架构分层
//!
//! - **驱动层**: 驱动发现、加载、版本检查与分派表
//! - **核心基础层**: 句柄翻译表、组件版本注册表、拆除协调器
//! - **拦截层**: 可在运行时开关的追踪层与校验层，按入口点组成拦截链
//! - **门面层**: 进程级 [`Loader`] 与C接口导出
//!
//! # 特性
//!
//! - **句柄虚拟化**: 不同驱动返回的相同原生句柄不会冲突
//! - **写时复制**: 开关层时整体替换链快照，进行中的调用不受影响
//! - **安全关闭**: 拆除后的调用返回错误而不是崩溃

pub mod types;
pub mod error;
pub mod config;
pub mod drivers;
pub mod core;
pub mod layers;
pub mod context;
pub mod loader;
#[cfg(feature = "ffi")]
pub mod ffi;

// 重新导出核心类型
pub use types::*;
pub use error::*;
pub use config::{LoaderConfig, LoggingConfig, LogLevel};
pub use drivers::{DriverRegistry, EntryPoint, ModuleLoader, StaticDriverModule, StaticModuleLoader};
pub use crate::core::{HandleTranslator, LoaderState};
pub use layers::{LayerKind, Tracer};
pub use context::LoaderContext;
pub use loader::{ApiCall, ApiOutput, Loader};

/// 加载器信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LOADER_NAME: &str = "loader";

/// 安装日志订阅器
///
/// 未启用时什么也不做；已安装过订阅器时静默返回。
pub fn init_logging(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let installed = tracing_subscriber::fmt()
        .with_max_level(config.level.as_tracing_level())
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Loader logging enabled at {:?}", config.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_info() {
        assert_eq!(LOADER_NAME, "loader");
        assert!(!VERSION.is_empty());
        assert!(semver::Version::parse(VERSION).is_ok());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        let config = LoggingConfig {
            enabled: true,
            level: LogLevel::Debug,
        };
        init_logging(&config);
        init_logging(&config);
        init_logging(&LoggingConfig::default());
    }
}
