//! 集成测试共用的进程内假驱动
//!
//! 每个假驱动都按统一调用约定导出入口函数。不同驱动故意返回相同的原生句柄，
//! 用来检查句柄虚拟化。

#![allow(dead_code)]

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use ze_loader::drivers::{DriverCallArgs, DriverEntryFn};
use ze_loader::{ApiVersion, EntryPoint, Loader, LoaderConfig, NativeHandle, StaticDriverModule, StaticModuleLoader, ZeResult};

/// 每个驱动报告的驱动原生句柄
pub const DRIVER_NATIVE: NativeHandle = 0x1;

/// 每个驱动报告的设备原生句柄
pub const DEVICE_NATIVES: [NativeHandle; 2] = [0x1, 0x2];

/// 创建出的对象原生句柄的起始值
pub const FIRST_OBJECT_NATIVE: u64 = 0x1000;

const MAX_FAKE_DRIVERS: usize = 4;

static NEXT_NATIVE: [AtomicU64; MAX_FAKE_DRIVERS] = [
    AtomicU64::new(FIRST_OBJECT_NATIVE),
    AtomicU64::new(FIRST_OBJECT_NATIVE),
    AtomicU64::new(FIRST_OBJECT_NATIVE),
    AtomicU64::new(FIRST_OBJECT_NATIVE),
];

static DESTROYED: [AtomicUsize; MAX_FAKE_DRIVERS] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

/// 应用描述符，驱动只检查指针非空
#[repr(C)]
#[derive(Debug, Default)]
pub struct FakeDesc {
    pub stype: u32,
    pub flags: u32,
}

impl FakeDesc {
    pub fn as_ptr(&mut self) -> *mut c_void {
        self as *mut FakeDesc as *mut c_void
    }
}

/// 按两次调用协议写回句柄
unsafe fn write_outputs(args: *mut DriverCallArgs, natives: &[NativeHandle]) -> i32 {
    let args = &mut *args;
    if args.out_handles.is_null() {
        *args.out_count = natives.len();
        return ZeResult::SUCCESS.0;
    }

    let written = args.out_capacity.min(natives.len());
    for (index, native) in natives.iter().take(written).enumerate() {
        *args.out_handles.add(index) = *native;
    }
    *args.out_count = written;
    ZeResult::SUCCESS.0
}

unsafe fn first_input(args: *mut DriverCallArgs) -> Option<NativeHandle> {
    let args = &*args;
    if args.handle_count == 0 || args.handles.is_null() {
        None
    } else {
        Some(*args.handles)
    }
}

pub unsafe extern "C" fn driver_get(args: *mut DriverCallArgs) -> i32 {
    write_outputs(args, &[DRIVER_NATIVE])
}

pub unsafe extern "C" fn api_version_1_3(args: *mut DriverCallArgs) -> i32 {
    *((*args).payload as *mut u32) = ApiVersion::V1_3.raw();
    ZeResult::SUCCESS.0
}

pub unsafe extern "C" fn api_version_2_0(args: *mut DriverCallArgs) -> i32 {
    *((*args).payload as *mut u32) = ApiVersion::new(2, 0).raw();
    ZeResult::SUCCESS.0
}

pub unsafe extern "C" fn device_get(args: *mut DriverCallArgs) -> i32 {
    if first_input(args) != Some(DRIVER_NATIVE) {
        return ZeResult::ERROR_INVALID_NULL_HANDLE.0;
    }
    write_outputs(args, &DEVICE_NATIVES)
}

/// 为每个输出分配新的原生句柄，编号在驱动 `D` 内递增
pub unsafe extern "C" fn create<const D: usize>(args: *mut DriverCallArgs) -> i32 {
    let args = &mut *args;
    if args.payload.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER.0;
    }
    for index in 0..args.out_capacity {
        *args.out_handles.add(index) = NEXT_NATIVE[D].fetch_add(1, Ordering::SeqCst);
    }
    ZeResult::SUCCESS.0
}

pub unsafe extern "C" fn destroy<const D: usize>(args: *mut DriverCallArgs) -> i32 {
    if first_input(args).is_none() {
        return ZeResult::ERROR_INVALID_NULL_HANDLE.0;
    }
    DESTROYED[D].fetch_add(1, Ordering::SeqCst);
    ZeResult::SUCCESS.0
}

pub unsafe extern "C" fn out_of_memory(_args: *mut DriverCallArgs) -> i32 {
    ZeResult::ERROR_OUT_OF_DEVICE_MEMORY.0
}

/// 驱动 `D` 累计销毁的对象数
pub fn destroyed_count<const D: usize>() -> usize {
    DESTROYED[D].load(Ordering::SeqCst)
}

/// 只导出必需入口点的驱动
pub fn minimal_driver<const D: usize>(name: &str) -> StaticDriverModule {
    StaticDriverModule::new(name)
        .with_entry(EntryPoint::DriverGet, driver_get)
        .with_entry(EntryPoint::DriverGetApiVersion, api_version_1_3)
        .with_entry(EntryPoint::DeviceGet, device_get)
        .with_entry(EntryPoint::ContextCreate, create::<D>)
        .with_entry(EntryPoint::ContextDestroy, destroy::<D>)
}

/// 导出队列、命令列表和模块入口点的驱动，不导出 `zeKernelCreate`
pub fn full_driver<const D: usize>(name: &str) -> StaticDriverModule {
    let entries: [(EntryPoint, DriverEntryFn); 7] = [
        (EntryPoint::CommandQueueCreate, create::<D>),
        (EntryPoint::CommandQueueDestroy, destroy::<D>),
        (EntryPoint::CommandListCreate, create::<D>),
        (EntryPoint::CommandListDestroy, destroy::<D>),
        (EntryPoint::ModuleCreate, create::<D>),
        (EntryPoint::ModuleDestroy, destroy::<D>),
        (EntryPoint::ModuleBuildLogDestroy, destroy::<D>),
    ];

    entries
        .into_iter()
        .fold(minimal_driver::<D>(name), |module, (entry, function)| module.with_entry(entry, function))
}

/// 创建上下文总是失败的驱动
pub fn faulty_driver<const D: usize>(name: &str) -> StaticDriverModule {
    minimal_driver::<D>(name).with_entry(EntryPoint::ContextCreate, out_of_memory)
}

/// 缺少必需入口点 `zeDeviceGet` 的驱动
pub fn driver_without_device_get(name: &str) -> StaticDriverModule {
    StaticDriverModule::new(name)
        .with_entry(EntryPoint::DriverGet, driver_get)
        .with_entry(EntryPoint::DriverGetApiVersion, api_version_1_3)
        .with_entry(EntryPoint::ContextCreate, create::<3>)
        .with_entry(EntryPoint::ContextDestroy, destroy::<3>)
}

/// 报告不兼容主版本的驱动
pub fn future_driver(name: &str) -> StaticDriverModule {
    minimal_driver::<3>(name).with_entry(EntryPoint::DriverGetApiVersion, api_version_2_0)
}

/// 用给定驱动初始化一个独立的加载器
pub fn loader_with(modules: Vec<StaticDriverModule>, config: &LoaderConfig) -> Loader {
    let module_loader = modules
        .into_iter()
        .fold(StaticModuleLoader::new(), |loader, module| loader.with_module(module));

    let loader = Loader::new();
    loader
        .initialize(config, &module_loader)
        .expect("loader initialization");
    loader
}

/// 两个完整驱动，句柄翻译开启
pub fn two_driver_loader() -> Loader {
    loader_with(
        vec![full_driver::<0>("gpu_a"), full_driver::<1>("gpu_b")],
        &LoaderConfig::default(),
    )
}
