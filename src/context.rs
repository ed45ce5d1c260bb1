//! 加载器上下文
//!
//! 绑定驱动注册表、句柄翻译器、层管理器和版本注册表，并实现拦截链末端的
//! 驱动调用：翻译输入句柄、调用驱动、登记输出句柄。

use crate::config::LoaderConfig;
use crate::core::{select_translator, ContextTeardown, HandleTranslator, VersionRegistry};
use crate::drivers::{CallKind, DriverCallArgs, DriverRegistry, DriverState, EntryPoint, ModuleLoader};
use crate::layers::{CallFrame, LayerKind, LayerManager, TerminalStage};
use crate::types::{ApiVersion, ComponentVersion, DriverId, HandleType, LibraryVersion, LoaderHandle, NativeHandle};
use crate::{LoaderError, Result, LOADER_NAME};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// 加载器上下文
pub struct LoaderContext {
    registry: DriverRegistry,
    translator: Arc<dyn HandleTranslator>,
    layers: LayerManager,
    versions: VersionRegistry,
}

impl LoaderContext {
    /// 发现驱动并构建上下文
    ///
    /// 没有驱动加载成功时上下文照常构建，错误在第一次API调用时报告。
    pub fn build(config: &LoaderConfig, module_loader: &dyn ModuleLoader) -> Self {
        let registry = DriverRegistry::init(module_loader, &config.drivers);
        let translator = select_translator(&registry, config.enable_loader_intercept);

        let versions = VersionRegistry::new();
        let lib_version = LibraryVersion::current();
        versions.register(ComponentVersion::new(LOADER_NAME, ApiVersion::CURRENT, lib_version));
        for layer in LayerKind::ALL {
            versions.register(ComponentVersion::new(layer.component_name(), ApiVersion::CURRENT, lib_version));
        }

        let layers = LayerManager::new();
        if config.layers.enable_tracing {
            layers.enable(LayerKind::Tracing);
        }
        if config.layers.enable_validation {
            layers.enable(LayerKind::Validation);
        }

        info!(
            "Loader context ready: {} drivers loaded, handle translation {}",
            registry.loaded_count(),
            if translator.is_passthrough() { "passthrough" } else { "enabled" }
        );

        Self {
            registry,
            translator,
            layers,
            versions,
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn translator(&self) -> &dyn HandleTranslator {
        self.translator.as_ref()
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    /// 经过拦截链执行一次调用
    pub fn dispatch(&self, frame: &mut CallFrame) -> Result<()> {
        self.layers.chain().dispatch(frame, self)
    }

    /// 汇总全部已加载驱动的驱动句柄
    fn driver_get(&self, frame: &mut CallFrame) -> Result<()> {
        let mut natives: Vec<(DriverId, NativeHandle)> = Vec::new();
        let mut total = 0;

        for driver in self.registry.loaded() {
            let guard = driver.dispatch(EntryPoint::DriverGet)?;
            // SAFETY: 参数块指针在调用期间有效
            let call = |args: &mut DriverCallArgs| unsafe { guard.call(args) }.into_result();

            match frame.capacity {
                None => total += invoke(call, &[], &mut [])?,
                Some(capacity) => {
                    let remaining = capacity.saturating_sub(natives.len());
                    let handles = retrieve(call, &[], remaining)?;
                    natives.extend(handles.into_iter().map(|native| (driver.id(), native)));
                }
            }
        }

        if frame.capacity.is_none() {
            frame.count = total;
            return Ok(());
        }

        frame.count = natives.len();
        frame.outputs = natives
            .into_iter()
            .map(|(driver_id, native)| self.translator.register_retrieved(HandleType::Driver, driver_id, native))
            .collect();
        Ok(())
    }

    /// 翻译输入句柄，调用其所属驱动
    fn forward(&self, frame: &mut CallFrame) -> Result<()> {
        let info = frame.entry.info();
        if frame.inputs.len() != info.consumes.len() || frame.inputs.is_empty() {
            return Err(LoaderError::invalid_argument(&format!(
                "{} expects {} input handles, got {}",
                frame.entry,
                info.consumes.len(),
                frame.inputs.len()
            )));
        }

        let mut driver_id = None;
        let mut natives = Vec::with_capacity(frame.inputs.len());
        for (handle_type, handle) in info.consumes.iter().zip(&frame.inputs) {
            let (owner, native) = self.translator.translate(*handle_type, *handle)?;
            match driver_id {
                None => driver_id = Some(owner),
                Some(first) if first != owner => {
                    return Err(LoaderError::invalid_argument(&format!(
                        "{} handles belong to both {} and {}",
                        frame.entry, first, owner
                    )));
                }
                Some(_) => {}
            }
            natives.push(native);
        }
        let driver_id = driver_id.ok_or_else(|| LoaderError::invalid_argument("no input handles"))?;

        let guard = self.registry.get_dispatch(driver_id, frame.entry)?;
        let payload = frame.payload;
        let call = |args: &mut DriverCallArgs| {
            args.payload = payload;
            // SAFETY: 参数块指针在调用期间有效，描述符由应用负责
            unsafe { guard.call(args) }.into_result()
        };

        match info.kind {
            CallKind::Retrieve => match frame.capacity {
                None => frame.count = invoke(call, &natives, &mut [])?,
                Some(capacity) => {
                    let handles = retrieve(call, &natives, capacity)?;
                    frame.count = handles.len();
                    frame.outputs = handles
                        .into_iter()
                        .map(|native| self.translator.register_retrieved(info.produces[0], driver_id, native))
                        .collect();
                }
            },
            CallKind::Create => {
                let mut out = vec![0 as NativeHandle; info.produces.len()];
                invoke(call, &natives, &mut out)?;
                frame.outputs = info
                    .produces
                    .iter()
                    .zip(out)
                    .map(|(handle_type, native)| match native {
                        0 => 0,
                        native => self.translator.register(*handle_type, driver_id, native),
                    })
                    .collect();
            }
            CallKind::Destroy => {
                invoke(call, &natives, &mut [])?;
                self.translator.release(info.consumes[0], frame.inputs[0])?;
            }
            CallKind::Query => {
                invoke(call, &natives, &mut [])?;
            }
        }
        Ok(())
    }

    /// 翻译加载器句柄为原生句柄，所属驱动已释放或失败时返回 `InvalidDriver`
    pub fn translate_handle(&self, handle_type: HandleType, handle: LoaderHandle) -> Result<NativeHandle> {
        let (owner, native) = self.translator.translate(handle_type, handle)?;
        match self.registry.driver(owner)?.state() {
            DriverState::Loaded => Ok(native),
            DriverState::Released => Err(LoaderError::invalid_driver(owner, "driver released")),
            DriverState::Failed => Err(LoaderError::invalid_driver(owner, "driver failed to load")),
        }
    }
}

impl TerminalStage for LoaderContext {
    fn call(&self, frame: &mut CallFrame) -> Result<()> {
        if self.registry.loaded_count() == 0 {
            // 驱动被强制释放后报告 InvalidDriver，从未加载成功才是 NoDrivers
            return Err(match self.registry.first_released() {
                Some(driver_id) => LoaderError::invalid_driver(driver_id, "driver released"),
                None => LoaderError::NoDrivers,
            });
        }

        debug!("Dispatching {} ({} inputs)", frame.entry, frame.inputs.len());
        match frame.entry {
            EntryPoint::DriverGet => self.driver_get(frame),
            _ => self.forward(frame),
        }
    }
}

impl ContextTeardown for LoaderContext {
    fn teardown(&self) {
        self.layers.disable_all();
        self.registry.release_all();
        self.translator.clear();
        info!("Loader context torn down");
    }
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("registry", &self.registry)
            .field("passthrough", &self.translator.is_passthrough())
            .field("layers", &self.layers.enabled())
            .finish()
    }
}

/// 单次驱动调用，输出写入 `out`
fn invoke<F>(mut call: F, handles: &[NativeHandle], out: &mut [NativeHandle]) -> Result<usize>
where
    F: FnMut(&mut DriverCallArgs) -> Result<()>,
{
    let mut out_count = 0usize;
    let mut args = DriverCallArgs {
        handles: handles.as_ptr(),
        handle_count: handles.len(),
        payload: std::ptr::null_mut(),
        out_handles: if out.is_empty() { std::ptr::null_mut() } else { out.as_mut_ptr() },
        out_capacity: out.len(),
        out_count: &mut out_count,
    };
    call(&mut args)?;
    Ok(out_count)
}

/// 两次调用协议：先查询数量，再最多取回 `capacity` 个句柄
fn retrieve<F>(mut call: F, handles: &[NativeHandle], capacity: usize) -> Result<Vec<NativeHandle>>
where
    F: FnMut(&mut DriverCallArgs) -> Result<()>,
{
    let available = invoke(&mut call, handles, &mut [])?;
    let wanted = capacity.min(available);
    if wanted == 0 {
        return Ok(Vec::new());
    }

    let mut out = vec![0 as NativeHandle; wanted];
    let written = invoke(&mut call, handles, &mut out)?;
    out.truncate(written.min(wanted));
    Ok(out)
}
