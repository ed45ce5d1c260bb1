//! 加载器门面
//!
//! 进程级的API入口。每个操作先通过拆除协调器取得上下文，拆除后除状态探针外
//! 的操作都返回 `Uninitialized`。

use crate::config::LoaderConfig;
use crate::context::LoaderContext;
use crate::core::{LoaderState, ShutdownGuard, TeardownCoordinator};
use crate::drivers::{CallKind, DriverSummary, EntryPoint, LibraryModuleLoader, ModuleLoader};
use crate::layers::{CallFrame, EntryStats, LayerKind, LayerSet, Tracer};
use crate::types::{ComponentVersion, HandleType, LoaderHandle, NativeHandle};
use crate::{init_logging, LoaderError, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::Arc;
use tracing::info;

static GLOBAL_LOADER: Lazy<Loader> = Lazy::new(Loader::new);

/// 一次API调用请求
#[derive(Debug)]
pub struct ApiCall {
    pub entry: EntryPoint,
    pub inputs: Vec<LoaderHandle>,
    pub payload: *mut c_void,
    /// Retrieve 类调用的输出容量，`None` 表示只查询数量
    pub capacity: Option<usize>,
}

impl ApiCall {
    pub fn new(entry: EntryPoint, inputs: &[LoaderHandle]) -> Self {
        Self {
            entry,
            inputs: inputs.to_vec(),
            payload: std::ptr::null_mut(),
            capacity: None,
        }
    }

    pub fn with_payload(mut self, payload: *mut c_void) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// API调用结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiOutput {
    /// 新创建或取回的加载器句柄
    pub handles: Vec<LoaderHandle>,
    /// Retrieve 类调用的数量
    pub count: usize,
    /// 执行调用的链快照代数
    pub generation: u64,
}

/// 加载器
#[derive(Debug, Default)]
pub struct Loader {
    coordinator: TeardownCoordinator<LoaderContext>,
    /// 串行化初始化，驱动只被发现和加载一次
    init_lock: Mutex<()>,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            coordinator: TeardownCoordinator::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// 进程级加载器
    pub fn global() -> &'static Loader {
        &GLOBAL_LOADER
    }

    /// 以给定的模块加载器初始化，已初始化时保持原状
    pub fn initialize(&self, config: &LoaderConfig, module_loader: &dyn ModuleLoader) -> Result<()> {
        let _init = self.init_lock.lock();
        if self.coordinator.is_torn_down() {
            return Err(LoaderError::Uninitialized);
        }
        if self.coordinator.is_installed() {
            return Ok(());
        }
        config.validate()?;

        let context = Arc::new(LoaderContext::build(config, module_loader));
        self.coordinator.install(context)?;
        info!("🚀 Initializing {} v{}", crate::LOADER_NAME, crate::VERSION);
        Ok(())
    }

    /// 按环境变量配置，从共享库初始化
    pub fn initialize_from_env(&self) -> Result<()> {
        let config = LoaderConfig::from_env();
        init_logging(&config.logging);
        let module_loader = LibraryModuleLoader::new(config.drivers.clone());
        self.initialize(&config, &module_loader)
    }

    /// 当前上下文
    pub fn context(&self) -> Result<Arc<LoaderContext>> {
        self.coordinator.context()
    }

    pub fn state(&self) -> LoaderState {
        self.coordinator.state()
    }

    /// 进程自然关闭，已请求推迟拆除时被忽略
    pub fn process_shutdown(&self) {
        self.coordinator.process_shutdown();
    }

    /// 进程关闭守卫，被释放时按自然关闭处理
    pub fn shutdown_guard(&self) -> ShutdownGuard<'_, LoaderContext> {
        ShutdownGuard::new(&self.coordinator)
    }

    // ---- zel 接口 ----

    /// 两次调用协议查询组件版本
    pub fn get_versions(&self, versions: Option<&mut [ComponentVersion]>) -> Result<usize> {
        self.context()?.versions().get_versions(versions)
    }

    /// 翻译加载器句柄，单驱动直通时原样返回
    pub fn translate_handle(&self, handle_type: HandleType, handle: LoaderHandle) -> Result<NativeHandle> {
        self.context()?.translate_handle(handle_type, handle)
    }

    /// 强制释放全部驱动，加载器本身不拆除
    pub fn set_driver_teardown(&self) -> Result<()> {
        let released = self.context()?.registry().release_all();
        info!("Driver teardown requested, {} drivers released", released);
        Ok(())
    }

    pub fn set_delay_loader_context_teardown(&self) {
        self.coordinator.request_delay();
    }

    pub fn loader_context_teardown(&self) {
        self.coordinator.context_teardown();
    }

    pub fn enable_tracing_layer(&self) -> Result<()> {
        self.set_layer(LayerKind::Tracing, true)
    }

    pub fn disable_tracing_layer(&self) -> Result<()> {
        self.set_layer(LayerKind::Tracing, false)
    }

    pub fn enable_validation_layer(&self) -> Result<()> {
        self.set_layer(LayerKind::Validation, true)
    }

    pub fn disable_validation_layer(&self) -> Result<()> {
        self.set_layer(LayerKind::Validation, false)
    }

    fn set_layer(&self, layer: LayerKind, enabled: bool) -> Result<()> {
        let context = self.context()?;
        if enabled {
            context.layers().enable(layer);
        } else {
            context.layers().disable(layer);
        }
        Ok(())
    }

    /// 状态探针
    pub fn check_is_loader_in_teardown(&self) -> bool {
        self.coordinator.is_torn_down()
    }

    // ---- 诊断 ----

    pub fn drivers(&self) -> Result<Vec<DriverSummary>> {
        Ok(self.context()?.registry().summaries())
    }

    pub fn enabled_layers(&self) -> Result<LayerSet> {
        Ok(self.context()?.layers().enabled())
    }

    pub fn register_tracer(&self, tracer: Arc<dyn Tracer>) -> Result<()> {
        self.context()?.layers().tracing_layer().register_tracer(tracer);
        Ok(())
    }

    pub fn tracing_stats(&self) -> Result<Vec<EntryStats>> {
        Ok(self.context()?.layers().tracing_layer().stats())
    }

    // ---- ze 接口 ----

    /// 经过拦截链执行一次调用
    pub fn invoke(&self, call: ApiCall) -> Result<ApiOutput> {
        let context = self.context()?;

        let mut frame = CallFrame::new(call.entry, call.inputs).with_payload(call.payload);
        frame.capacity = call.capacity;
        context.dispatch(&mut frame)?;

        Ok(ApiOutput {
            handles: frame.outputs,
            count: frame.count,
            generation: frame.generation,
        })
    }

    /// 枚举全部驱动句柄
    pub fn driver_get(&self) -> Result<Vec<LoaderHandle>> {
        self.retrieve_all(EntryPoint::DriverGet, &[])
    }

    /// 枚举驱动下的设备句柄
    pub fn device_get(&self, driver: LoaderHandle) -> Result<Vec<LoaderHandle>> {
        self.retrieve_all(EntryPoint::DeviceGet, &[driver])
    }

    fn retrieve_all(&self, entry: EntryPoint, inputs: &[LoaderHandle]) -> Result<Vec<LoaderHandle>> {
        let count = self.invoke(ApiCall::new(entry, inputs))?.count;
        Ok(self.invoke(ApiCall::new(entry, inputs).with_capacity(count))?.handles)
    }

    pub fn context_create(&self, driver: LoaderHandle, desc: *mut c_void) -> Result<LoaderHandle> {
        self.create(ApiCall::new(EntryPoint::ContextCreate, &[driver]).with_payload(desc))
    }

    pub fn context_destroy(&self, context: LoaderHandle) -> Result<()> {
        self.destroy(EntryPoint::ContextDestroy, context)
    }

    pub fn command_queue_create(&self, context: LoaderHandle, device: LoaderHandle, desc: *mut c_void) -> Result<LoaderHandle> {
        self.create(ApiCall::new(EntryPoint::CommandQueueCreate, &[context, device]).with_payload(desc))
    }

    pub fn command_list_create(&self, context: LoaderHandle, device: LoaderHandle, desc: *mut c_void) -> Result<LoaderHandle> {
        self.create(ApiCall::new(EntryPoint::CommandListCreate, &[context, device]).with_payload(desc))
    }

    fn create(&self, call: ApiCall) -> Result<LoaderHandle> {
        let entry = call.entry;
        self.invoke(call)?
            .handles
            .first()
            .copied()
            .ok_or_else(|| LoaderError::invalid_argument(&format!("{} produced no handle", entry)))
    }

    /// 通过 Destroy 类入口点销毁对象
    pub fn destroy(&self, entry: EntryPoint, handle: LoaderHandle) -> Result<()> {
        if entry.kind() != CallKind::Destroy {
            return Err(LoaderError::invalid_argument(&format!("{} is not a destroy entry point", entry)));
        }
        self.invoke(ApiCall::new(entry, &[handle]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::module_loader::MockModuleLoader;

    fn empty_loader() -> Loader {
        let loader = Loader::new();
        loader
            .initialize(&LoaderConfig::default(), &crate::StaticModuleLoader::new())
            .unwrap();
        loader
    }

    #[test]
    fn test_concurrent_initialize_discovers_once() {
        let mut module_loader = MockModuleLoader::new();
        module_loader.expect_candidates().times(1).returning(Vec::new);

        let loader = Loader::new();
        let config = LoaderConfig::default();
        crossbeam::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|_| loader.initialize(&config, &module_loader).unwrap());
            }
        })
        .unwrap();

        assert_eq!(loader.state(), LoaderState::Active);
        assert_eq!(loader.get_versions(None).unwrap(), 3);
    }

    #[test]
    fn test_process_shutdown_tears_down_active_loader() {
        let loader = empty_loader();
        loader.process_shutdown();

        assert!(loader.check_is_loader_in_teardown());
        assert!(matches!(loader.context(), Err(LoaderError::Uninitialized)));
    }

    #[test]
    fn test_process_shutdown_respects_delay() {
        let loader = empty_loader();
        loader.set_delay_loader_context_teardown();
        loader.process_shutdown();

        assert!(!loader.check_is_loader_in_teardown());
        assert!(loader.context().is_ok());

        loader.loader_context_teardown();
        assert!(loader.check_is_loader_in_teardown());
    }
}
