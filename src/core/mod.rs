//! 核心基础层模块
//!
//! 句柄翻译、组件版本登记与加载器生命周期

pub mod handles;
pub mod lifecycle;
pub mod versions;

pub use handles::{select_translator, HandleRecord, HandleTable, HandleTranslator, PassthroughTranslator};
pub use lifecycle::{ContextTeardown, LoaderState, ShutdownGuard, TeardownCoordinator};
pub use versions::VersionRegistry;
