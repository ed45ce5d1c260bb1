//! API入口点定义与驱动调用约定
//!
//! 每个入口点带有静态元数据：导出符号名、消费的句柄类型、产生的句柄类型、
//! 调用种类以及驱动是否必须导出该符号。

use crate::types::{HandleType, NativeHandle};
use std::ffi::c_void;
use std::fmt;

/// 驱动入口函数的统一C调用约定
pub type DriverEntryFn = unsafe extern "C" fn(args: *mut DriverCallArgs) -> i32;

/// 传给驱动入口函数的参数块
///
/// `handles` 为已翻译的原生句柄；`payload` 为应用传入的描述符，原样透传。
/// Retrieve 类调用遵循两次调用协议：`out_handles` 为空时只写回数量。
#[repr(C)]
#[derive(Debug)]
pub struct DriverCallArgs {
    pub handles: *const NativeHandle,
    pub handle_count: usize,
    pub payload: *mut c_void,
    pub out_handles: *mut NativeHandle,
    pub out_capacity: usize,
    pub out_count: *mut usize,
}

/// 调用种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// 只读查询，不产生句柄
    Query,
    /// 枚举已有对象（驱动、设备），重复枚举得到稳定句柄
    Retrieve,
    /// 创建新对象
    Create,
    /// 销毁第一个输入句柄对应的对象
    Destroy,
}

/// 入口点静态元数据
#[derive(Debug, Clone, Copy)]
pub struct EntryPointInfo {
    pub symbol: &'static str,
    pub consumes: &'static [HandleType],
    pub produces: &'static [HandleType],
    pub kind: CallKind,
    pub required: bool,
}

macro_rules! entry_points {
    ($( $variant:ident => $symbol:literal, $kind:ident, [$($in:ident),*] -> [$($out:ident),*], $required:literal; )*) => {
        /// API入口点
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EntryPoint {
            $($variant,)*
        }

        impl EntryPoint {
            /// 全部入口点，按判别值排列
            pub const ALL: &'static [EntryPoint] = &[$(EntryPoint::$variant,)*];

            /// 入口点数量
            pub const COUNT: usize = Self::ALL.len();

            /// 入口点元数据
            pub fn info(self) -> &'static EntryPointInfo {
                match self {
                    $(EntryPoint::$variant => &EntryPointInfo {
                        symbol: $symbol,
                        consumes: &[$(HandleType::$in),*],
                        produces: &[$(HandleType::$out),*],
                        kind: CallKind::$kind,
                        required: $required,
                    },)*
                }
            }
        }
    };
}

entry_points! {
    DriverGet => "zeDriverGet", Retrieve, [] -> [Driver], true;
    DriverGetApiVersion => "zeDriverGetApiVersion", Query, [Driver] -> [], true;
    DriverGetProperties => "zeDriverGetProperties", Query, [Driver] -> [], false;
    DeviceGet => "zeDeviceGet", Retrieve, [Driver] -> [Device], true;
    DeviceGetProperties => "zeDeviceGetProperties", Query, [Device] -> [], false;
    ContextCreate => "zeContextCreate", Create, [Driver] -> [Context], true;
    ContextDestroy => "zeContextDestroy", Destroy, [Context] -> [], true;
    CommandQueueCreate => "zeCommandQueueCreate", Create, [Context, Device] -> [CommandQueue], false;
    CommandQueueDestroy => "zeCommandQueueDestroy", Destroy, [CommandQueue] -> [], false;
    CommandQueueExecuteCommandLists => "zeCommandQueueExecuteCommandLists", Query, [CommandQueue, CommandList] -> [], false;
    CommandQueueSynchronize => "zeCommandQueueSynchronize", Query, [CommandQueue] -> [], false;
    CommandListCreate => "zeCommandListCreate", Create, [Context, Device] -> [CommandList], false;
    CommandListClose => "zeCommandListClose", Query, [CommandList] -> [], false;
    CommandListDestroy => "zeCommandListDestroy", Destroy, [CommandList] -> [], false;
    FenceCreate => "zeFenceCreate", Create, [CommandQueue] -> [Fence], false;
    FenceDestroy => "zeFenceDestroy", Destroy, [Fence] -> [], false;
    EventPoolCreate => "zeEventPoolCreate", Create, [Context] -> [EventPool], false;
    EventPoolDestroy => "zeEventPoolDestroy", Destroy, [EventPool] -> [], false;
    EventCreate => "zeEventCreate", Create, [EventPool] -> [Event], false;
    EventDestroy => "zeEventDestroy", Destroy, [Event] -> [], false;
    ImageCreate => "zeImageCreate", Create, [Context, Device] -> [Image], false;
    ImageDestroy => "zeImageDestroy", Destroy, [Image] -> [], false;
    ModuleCreate => "zeModuleCreate", Create, [Context, Device] -> [Module, ModuleBuildLog], false;
    ModuleDestroy => "zeModuleDestroy", Destroy, [Module] -> [], false;
    ModuleBuildLogDestroy => "zeModuleBuildLogDestroy", Destroy, [ModuleBuildLog] -> [], false;
    KernelCreate => "zeKernelCreate", Create, [Module] -> [Kernel], false;
    KernelDestroy => "zeKernelDestroy", Destroy, [Kernel] -> [], false;
    SamplerCreate => "zeSamplerCreate", Create, [Context, Device] -> [Sampler], false;
    SamplerDestroy => "zeSamplerDestroy", Destroy, [Sampler] -> [], false;
    PhysicalMemCreate => "zePhysicalMemCreate", Create, [Context, Device] -> [PhysicalMem], false;
    PhysicalMemDestroy => "zePhysicalMemDestroy", Destroy, [PhysicalMem] -> [], false;
}

impl EntryPoint {
    /// 分派表下标
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol(self) -> &'static str {
        self.info().symbol
    }

    pub fn kind(self) -> CallKind {
        self.info().kind
    }

    /// 按导出符号名查找入口点
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|entry| entry.symbol() == symbol)
    }

    /// Destroy 类入口点对应的句柄类型
    pub fn destroyed_type(self) -> Option<HandleType> {
        match self.kind() {
            CallKind::Destroy => self.info().consumes.first().copied(),
            _ => None,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 单个驱动的分派表：入口点 → 函数指针，加载时填充一次后不再修改
#[derive(Clone)]
pub struct DispatchTable {
    entries: Box<[Option<DriverEntryFn>]>,
}

impl DispatchTable {
    /// 通过符号解析函数构建分派表
    ///
    /// 缺失必需符号时返回缺失符号列表。
    pub fn resolve<F>(mut lookup: F) -> std::result::Result<Self, Vec<&'static str>>
    where
        F: FnMut(&'static str) -> Option<DriverEntryFn>,
    {
        let mut entries = Vec::with_capacity(EntryPoint::COUNT);
        let mut missing = Vec::new();

        for entry in EntryPoint::ALL {
            let function = lookup(entry.symbol());
            if function.is_none() && entry.info().required {
                missing.push(entry.symbol());
            }
            entries.push(function);
        }

        if missing.is_empty() {
            Ok(Self {
                entries: entries.into_boxed_slice(),
            })
        } else {
            Err(missing)
        }
    }

    /// 空分派表，用于加载失败的驱动
    pub fn empty() -> Self {
        Self {
            entries: vec![None; EntryPoint::COUNT].into_boxed_slice(),
        }
    }

    pub fn get(&self, entry: EntryPoint) -> Option<DriverEntryFn> {
        self.entries[entry.index()]
    }

    /// 已解析的入口点数量
    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|function| function.is_some()).count()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("resolved", &self.resolved_count())
            .field("total", &EntryPoint::COUNT)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn noop(_args: *mut DriverCallArgs) -> i32 {
        0
    }

    #[test]
    fn test_entry_point_metadata() {
        assert_eq!(EntryPoint::COUNT, EntryPoint::ALL.len());
        for (index, entry) in EntryPoint::ALL.iter().enumerate() {
            assert_eq!(entry.index(), index);
            assert_eq!(EntryPoint::from_symbol(entry.symbol()), Some(*entry));
        }

        assert_eq!(EntryPoint::ContextDestroy.destroyed_type(), Some(HandleType::Context));
        assert_eq!(EntryPoint::ContextCreate.destroyed_type(), None);
        assert_eq!(
            EntryPoint::ModuleCreate.info().produces,
            &[HandleType::Module, HandleType::ModuleBuildLog]
        );
    }

    #[test]
    fn test_resolve_reports_missing_required() {
        let missing = DispatchTable::resolve(|symbol| {
            if symbol == "zeDeviceGet" {
                None
            } else {
                Some(noop as DriverEntryFn)
            }
        })
        .unwrap_err();
        assert_eq!(missing, vec!["zeDeviceGet"]);
    }

    #[test]
    fn test_resolve_tolerates_missing_optional() {
        let required: Vec<&str> = EntryPoint::ALL
            .iter()
            .filter(|entry| entry.info().required)
            .map(|entry| entry.symbol())
            .collect();

        let table = DispatchTable::resolve(|symbol| {
            required.contains(&symbol).then_some(noop as DriverEntryFn)
        })
        .unwrap();

        assert_eq!(table.resolved_count(), required.len());
        assert!(table.get(EntryPoint::DriverGet).is_some());
        assert!(table.get(EntryPoint::KernelCreate).is_none());
        assert_eq!(DispatchTable::empty().resolved_count(), 0);
    }
}
