//! C接口导出
//!
//! 全部导出函数作用于进程级加载器。空的输出指针返回 `InvalidArgument`；
//! 函数内部的 panic 不会越过C边界，折叠为 `ERROR_UNKNOWN`。

#![allow(non_snake_case)]

use crate::loader::{ApiCall, Loader};
use crate::types::{ApiVersion, ComponentVersion, HandleType, LibraryVersion, LoaderHandle, NativeHandle};
use crate::{to_ze_result, EntryPoint, LoaderError, Result, ZeResult};
use std::ffi::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use tracing::{error, warn};

static EXIT_HOOK: Once = Once::new();

/// 库版本（C布局）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZelVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

/// 组件版本（C布局）
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ZelComponentVersion {
    pub component_name: [c_char; ComponentVersion::NAME_CAPACITY],
    pub spec_version: u32,
    pub component_lib_version: ZelVersion,
}

impl From<&ComponentVersion> for ZelComponentVersion {
    fn from(version: &ComponentVersion) -> Self {
        let mut component_name = [0 as c_char; ComponentVersion::NAME_CAPACITY];
        for (slot, byte) in component_name
            .iter_mut()
            .zip(version.component_name.bytes().take(ComponentVersion::NAME_CAPACITY - 1))
        {
            *slot = byte as c_char;
        }

        Self {
            component_name,
            spec_version: version.spec_version.raw(),
            component_lib_version: ZelVersion {
                major: version.component_lib_version.major,
                minor: version.component_lib_version.minor,
                patch: version.component_lib_version.patch,
            },
        }
    }
}

/// 在C边界执行操作
fn guarded<F>(operation: F) -> ZeResult
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => to_ze_result(result),
        Err(_) => {
            error!("Panic caught at the C boundary");
            ZeResult::ERROR_UNKNOWN
        }
    }
}

/// 进程退出时按自然关闭处理全局加载器
extern "C" fn shutdown_at_exit() {
    if panic::catch_unwind(|| Loader::global().process_shutdown()).is_err() {
        error!("Panic caught during loader shutdown at process exit");
    }
}

/// 首次初始化成功后登记退出钩子
fn register_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: 回调不捕获状态，只访问进程级加载器
        if unsafe { libc::atexit(shutdown_at_exit) } != 0 {
            warn!("Failed to register loader exit hook, teardown at exit is skipped");
        }
    });
}

fn null_output(name: &str) -> LoaderError {
    LoaderError::invalid_argument(&format!("{} is null", name))
}

/// 两次调用协议的枚举类调用
unsafe fn retrieve(entry: EntryPoint, inputs: &[LoaderHandle], count: *mut u32, handles: *mut LoaderHandle) -> Result<()> {
    if count.is_null() {
        return Err(null_output("pCount"));
    }

    let loader = Loader::global();
    if handles.is_null() {
        let output = loader.invoke(ApiCall::new(entry, inputs))?;
        *count = output.count as u32;
        return Ok(());
    }

    let output = loader.invoke(ApiCall::new(entry, inputs).with_capacity(*count as usize))?;
    for (index, handle) in output.handles.iter().enumerate() {
        *handles.add(index) = *handle;
    }
    *count = output.handles.len() as u32;
    Ok(())
}

unsafe fn create(call: ApiCall, handle_out: *mut LoaderHandle) -> Result<()> {
    if handle_out.is_null() {
        return Err(null_output("phHandle"));
    }

    let entry = call.entry;
    let output = Loader::global().invoke(call)?;
    *handle_out = output
        .handles
        .first()
        .copied()
        .ok_or_else(|| LoaderError::invalid_argument(&format!("{} produced no handle", entry)))?;
    Ok(())
}

// ---- zel 接口 ----

#[no_mangle]
pub unsafe extern "C" fn zelLoaderGetVersions(num_elems: *mut usize, versions: *mut ZelComponentVersion) -> ZeResult {
    guarded(|| {
        if num_elems.is_null() {
            return Err(null_output("num_elems"));
        }

        let loader = Loader::global();
        let count = loader.get_versions(None)?;
        if versions.is_null() {
            *num_elems = count;
            return Ok(());
        }

        if *num_elems < count {
            return Err(LoaderError::BufferTooSmall {
                required: count,
                provided: *num_elems,
            });
        }

        let placeholder = ComponentVersion::new("", ApiVersion::V1_0, LibraryVersion::new(0, 0, 0));
        let mut buffer = vec![placeholder; count];
        let written = loader.get_versions(Some(&mut buffer))?;
        for (index, version) in buffer.iter().take(written).enumerate() {
            *versions.add(index) = ZelComponentVersion::from(version);
        }
        *num_elems = written;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn zelLoaderTranslateHandle(
    handle_type: u32,
    handle_in: LoaderHandle,
    handle_out: *mut NativeHandle,
) -> ZeResult {
    guarded(|| {
        if handle_out.is_null() {
            return Err(null_output("handleOut"));
        }
        let handle_type = HandleType::from_raw(handle_type)
            .ok_or_else(|| LoaderError::invalid_argument(&format!("unknown handle type {}", handle_type)))?;

        *handle_out = Loader::global().translate_handle(handle_type, handle_in)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn zelSetDriverTeardown() -> ZeResult {
    guarded(|| Loader::global().set_driver_teardown())
}

#[no_mangle]
pub extern "C" fn zelSetDelayLoaderContextTeardown() {
    guarded(|| {
        Loader::global().set_delay_loader_context_teardown();
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn zelLoaderContextTeardown() {
    guarded(|| {
        Loader::global().loader_context_teardown();
        Ok(())
    });
}

#[no_mangle]
pub extern "C" fn zelEnableTracingLayer() -> ZeResult {
    guarded(|| Loader::global().enable_tracing_layer())
}

#[no_mangle]
pub extern "C" fn zelDisableTracingLayer() -> ZeResult {
    guarded(|| Loader::global().disable_tracing_layer())
}

#[no_mangle]
pub extern "C" fn zelEnableValidationLayer() -> ZeResult {
    guarded(|| Loader::global().enable_validation_layer())
}

#[no_mangle]
pub extern "C" fn zelDisableValidationLayer() -> ZeResult {
    guarded(|| Loader::global().disable_validation_layer())
}

#[no_mangle]
pub extern "C" fn zelCheckIsLoaderInTearDown() -> bool {
    Loader::global().check_is_loader_in_teardown()
}

// ---- ze 接口 ----

#[no_mangle]
pub extern "C" fn zeInit(_flags: u32) -> ZeResult {
    guarded(|| {
        Loader::global().initialize_from_env()?;
        register_exit_hook();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn zeDriverGet(count: *mut u32, drivers: *mut LoaderHandle) -> ZeResult {
    guarded(|| retrieve(EntryPoint::DriverGet, &[], count, drivers))
}

#[no_mangle]
pub unsafe extern "C" fn zeDeviceGet(driver: LoaderHandle, count: *mut u32, devices: *mut LoaderHandle) -> ZeResult {
    guarded(|| retrieve(EntryPoint::DeviceGet, &[driver], count, devices))
}

#[no_mangle]
pub unsafe extern "C" fn zeContextCreate(
    driver: LoaderHandle,
    desc: *const c_void,
    context_out: *mut LoaderHandle,
) -> ZeResult {
    guarded(|| {
        create(
            ApiCall::new(EntryPoint::ContextCreate, &[driver]).with_payload(desc as *mut c_void),
            context_out,
        )
    })
}

#[no_mangle]
pub extern "C" fn zeContextDestroy(context: LoaderHandle) -> ZeResult {
    guarded(|| Loader::global().destroy(EntryPoint::ContextDestroy, context))
}

#[no_mangle]
pub unsafe extern "C" fn zeCommandQueueCreate(
    context: LoaderHandle,
    device: LoaderHandle,
    desc: *const c_void,
    queue_out: *mut LoaderHandle,
) -> ZeResult {
    guarded(|| {
        create(
            ApiCall::new(EntryPoint::CommandQueueCreate, &[context, device]).with_payload(desc as *mut c_void),
            queue_out,
        )
    })
}

#[no_mangle]
pub extern "C" fn zeCommandQueueDestroy(queue: LoaderHandle) -> ZeResult {
    guarded(|| Loader::global().destroy(EntryPoint::CommandQueueDestroy, queue))
}

#[no_mangle]
pub unsafe extern "C" fn zeCommandListCreate(
    context: LoaderHandle,
    device: LoaderHandle,
    desc: *const c_void,
    list_out: *mut LoaderHandle,
) -> ZeResult {
    guarded(|| {
        create(
            ApiCall::new(EntryPoint::CommandListCreate, &[context, device]).with_payload(desc as *mut c_void),
            list_out,
        )
    })
}

#[no_mangle]
pub extern "C" fn zeCommandListDestroy(list: LoaderHandle) -> ZeResult {
    guarded(|| Loader::global().destroy(EntryPoint::CommandListDestroy, list))
}
