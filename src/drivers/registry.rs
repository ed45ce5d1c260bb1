//! 驱动注册表
//!
//! 负责发现、加载和版本检查驱动模块，持有每个驱动的分派表。
//! 驱动列表在初始化后不再变化，分派查询无需加锁；驱动状态用原子量记录。

use super::entry_points::{DispatchTable, DriverCallArgs, DriverEntryFn, EntryPoint};
use super::module_loader::{DriverModule, ModuleLoader};
use crate::config::DriverDiscoveryConfig;
use crate::types::{ApiVersion, DriverId};
use crate::{LoaderError, Result, ZeResult};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 驱动状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    /// 已加载，可分派
    Loaded = 0,
    /// 加载或版本检查失败
    Failed = 1,
    /// 已释放，模块已卸载或等待最后一个调用结束后卸载
    Released = 2,
}

impl DriverState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DriverState::Loaded,
            1 => DriverState::Failed,
            _ => DriverState::Released,
        }
    }
}

type ModuleRef = Arc<dyn DriverModule>;

/// 已注册的驱动
pub struct Driver {
    id: DriverId,
    name: String,
    api_version: Option<ApiVersion>,
    dispatch: DispatchTable,
    state: AtomicU8,
    /// 模块引用，释放时取走
    module: ArcSwapOption<ModuleRef>,
    failure: Option<String>,
}

impl Driver {
    /// 由已加载模块构建驱动，缺失必需符号或版本不兼容时为失败状态
    fn from_module(id: DriverId, module: Arc<dyn DriverModule>, min_api_version: ApiVersion) -> Self {
        let name = module.name().to_string();

        let dispatch = match DispatchTable::resolve(|symbol| module.symbol(symbol)) {
            Ok(dispatch) => dispatch,
            Err(missing) => {
                let reason = format!("missing required symbols: {}", missing.join(", "));
                return Self::failed(id, name, reason);
            }
        };

        let api_version = match query_api_version(&dispatch) {
            Ok(version) => version,
            Err(e) => return Self::failed(id, name, format!("version query failed: {}", e)),
        };

        if !api_version.is_compatible_with(ApiVersion::CURRENT) || api_version < min_api_version {
            let reason = format!(
                "unsupported API version {} (loader {}, minimum {})",
                api_version,
                ApiVersion::CURRENT,
                min_api_version
            );
            return Self::failed(id, name, reason);
        }

        info!(
            "Driver {} '{}' loaded: API {}, {} entry points",
            id,
            name,
            api_version,
            dispatch.resolved_count()
        );

        Self {
            id,
            name,
            api_version: Some(api_version),
            dispatch,
            state: AtomicU8::new(DriverState::Loaded as u8),
            module: ArcSwapOption::from_pointee(module),
            failure: None,
        }
    }

    fn failed(id: DriverId, name: String, reason: String) -> Self {
        warn!("Driver {} '{}' excluded: {}", id, name, reason);
        Self {
            id,
            name,
            api_version: None,
            dispatch: DispatchTable::empty(),
            state: AtomicU8::new(DriverState::Failed as u8),
            module: ArcSwapOption::empty(),
            failure: Some(reason),
        }
    }

    pub fn id(&self) -> DriverId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_version(&self) -> Option<ApiVersion> {
        self.api_version
    }

    pub fn state(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == DriverState::Loaded
    }

    /// 获取入口点的分派守卫
    pub fn dispatch(&self, entry: EntryPoint) -> Result<DispatchGuard> {
        match self.state() {
            DriverState::Loaded => {}
            DriverState::Failed => return Err(LoaderError::invalid_driver(self.id, "driver failed to load")),
            DriverState::Released => return Err(LoaderError::invalid_driver(self.id, "driver released")),
        }

        let module = self
            .module
            .load_full()
            .ok_or_else(|| LoaderError::invalid_driver(self.id, "driver released"))?;

        let function = self.dispatch.get(entry).ok_or(LoaderError::UnsupportedFeature {
            driver_id: self.id,
            symbol: entry.symbol(),
        })?;

        Ok(DispatchGuard {
            driver_id: self.id,
            entry,
            function,
            _module: module,
        })
    }

    /// 释放驱动，返回本次调用是否完成了释放
    fn release(&self) -> bool {
        if self
            .state
            .compare_exchange(
                DriverState::Loaded as u8,
                DriverState::Released as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        // 正在进行的调用持有模块引用，模块在最后一个调用结束后卸载
        let module = self.module.swap(None);
        drop(module);
        info!("Driver {} '{}' released", self.id, self.name);
        true
    }

    pub fn summary(&self) -> DriverSummary {
        DriverSummary {
            id: self.id,
            name: self.name.clone(),
            state: self.state(),
            api_version: self.api_version.map(|v| v.to_string()),
            resolved_entry_points: self.dispatch.resolved_count(),
            failure: self.failure.clone(),
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("api_version", &self.api_version)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

/// 分派守卫
///
/// 持有驱动模块引用，调用期间模块不会被卸载。
pub struct DispatchGuard {
    driver_id: DriverId,
    entry: EntryPoint,
    function: DriverEntryFn,
    _module: Arc<ModuleRef>,
}

impl DispatchGuard {
    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    /// 调用驱动入口函数
    ///
    /// # Safety
    /// `args` 中的指针必须在调用期间有效，且符合入口点的参数约定。
    pub unsafe fn call(&self, args: &mut DriverCallArgs) -> ZeResult {
        ZeResult((self.function)(args))
    }
}

/// 驱动摘要信息
#[derive(Debug, Clone, Serialize)]
pub struct DriverSummary {
    pub id: DriverId,
    pub name: String,
    pub state: DriverState,
    pub api_version: Option<String>,
    pub resolved_entry_points: usize,
    pub failure: Option<String>,
}

/// 驱动注册表
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<Driver>>,
}

impl DriverRegistry {
    /// 枚举并加载全部候选驱动
    ///
    /// 单个驱动失败不会中断其它驱动的发现。没有任何驱动加载成功时注册表
    /// 为空，错误在第一次真正的API调用时报告。
    pub fn init(loader: &dyn ModuleLoader, config: &DriverDiscoveryConfig) -> Self {
        let candidates = loader.candidates();
        let mut drivers = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let id = DriverId(drivers.len());
            debug!("Loading driver candidate {} as {}", candidate, id);

            let driver = match loader.load(&candidate) {
                Ok(module) => Driver::from_module(id, module, config.min_api_version),
                Err(e) => Driver::failed(id, candidate.to_string(), e.to_string()),
            };
            drivers.push(Arc::new(driver));
        }

        let registry = Self { drivers };
        info!(
            "Driver registry initialized: {} loaded, {} failed",
            registry.loaded_count(),
            registry.len() - registry.loaded_count()
        );
        registry
    }

    /// 获取驱动
    pub fn driver(&self, driver_id: DriverId) -> Result<&Arc<Driver>> {
        self.drivers
            .get(driver_id.0)
            .ok_or_else(|| LoaderError::invalid_driver(driver_id, "unknown driver"))
    }

    /// 获取入口点的分派守卫
    pub fn get_dispatch(&self, driver_id: DriverId, entry: EntryPoint) -> Result<DispatchGuard> {
        self.driver(driver_id)?.dispatch(entry)
    }

    /// 已加载的驱动
    pub fn loaded(&self) -> impl Iterator<Item = &Arc<Driver>> {
        self.drivers.iter().filter(|driver| driver.is_loaded())
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded().count()
    }

    /// 第一个已释放的驱动
    pub fn first_released(&self) -> Option<DriverId> {
        self.drivers
            .iter()
            .find(|driver| driver.state() == DriverState::Released)
            .map(|driver| driver.id())
    }

    /// 注册过的驱动总数（含失败的）
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// 释放单个驱动，重复释放视为成功
    pub fn release(&self, driver_id: DriverId) -> Result<()> {
        self.driver(driver_id)?.release();
        Ok(())
    }

    /// 释放全部驱动，返回本次释放的数量
    pub fn release_all(&self) -> usize {
        let released = self.drivers.iter().filter(|driver| driver.release()).count();
        if released > 0 {
            info!("Released {} drivers", released);
        }
        released
    }

    pub fn summaries(&self) -> Vec<DriverSummary> {
        self.drivers.iter().map(|driver| driver.summary()).collect()
    }
}

/// 加载时查询驱动实现的API版本
fn query_api_version(dispatch: &DispatchTable) -> Result<ApiVersion> {
    let function = dispatch
        .get(EntryPoint::DriverGetApiVersion)
        .ok_or_else(|| LoaderError::invalid_argument("zeDriverGetApiVersion not resolved"))?;

    let mut raw_version: u32 = 0;
    let mut out_count: usize = 0;
    let mut args = DriverCallArgs {
        handles: std::ptr::null(),
        handle_count: 0,
        payload: &mut raw_version as *mut u32 as *mut c_void,
        out_handles: std::ptr::null_mut(),
        out_capacity: 0,
        out_count: &mut out_count,
    };

    // SAFETY: 参数块中的指针在调用期间有效
    let result = ZeResult(unsafe { function(&mut args) });
    result.into_result()?;
    Ok(ApiVersion::from_raw(raw_version))
}
