//! 驱动层
//!
//! 入口点定义、驱动模块加载与驱动注册表

pub mod entry_points;
pub mod module_loader;
pub mod registry;

pub use entry_points::{CallKind, DispatchTable, DriverCallArgs, DriverEntryFn, EntryPoint, EntryPointInfo};
pub use module_loader::{
    is_driver_file_name, DriverCandidate, DriverModule, LibraryModule, LibraryModuleLoader, ModuleLoader,
    StaticDriverModule, StaticModuleLoader,
};
pub use registry::{DispatchGuard, Driver, DriverRegistry, DriverState, DriverSummary};
