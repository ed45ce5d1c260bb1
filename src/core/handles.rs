//! 句柄翻译表
//!
//! 将加载器发放的不透明句柄映射到 (驱动, 原生句柄)。每种句柄类型一个分片存储，
//! 加载器句柄按类型单调递增发放，整个进程生命周期内不重复使用。

use crate::drivers::DriverRegistry;
use crate::types::{DriverId, HandleType, LoaderHandle, NativeHandle};
use crate::{LoaderError, Result};
use crossbeam::utils::CachePadded;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 句柄记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRecord {
    pub handle_type: HandleType,
    pub loader_handle: LoaderHandle,
    pub driver_id: DriverId,
    pub native_handle: NativeHandle,
}

/// 句柄翻译接口
///
/// 具体实现在构建加载器上下文时一次性选定：多驱动或强制拦截时使用
/// [`HandleTable`]，单驱动时使用恒等映射的 [`PassthroughTranslator`]。
pub trait HandleTranslator: Send + Sync {
    /// 为新创建的对象登记句柄，总是发放新的加载器句柄
    fn register(&self, handle_type: HandleType, driver_id: DriverId, native: NativeHandle) -> LoaderHandle;

    /// 为枚举得到的已有对象登记句柄，同一 (驱动, 原生句柄) 返回同一加载器句柄
    fn register_retrieved(&self, handle_type: HandleType, driver_id: DriverId, native: NativeHandle) -> LoaderHandle;

    /// 翻译加载器句柄，未登记或已释放的句柄均返回 `InvalidHandle`
    fn translate(&self, handle_type: HandleType, handle: LoaderHandle) -> Result<(DriverId, NativeHandle)>;

    /// 释放句柄，重复释放返回 `InvalidHandle`
    fn release(&self, handle_type: HandleType, handle: LoaderHandle) -> Result<()>;

    /// 清除全部记录（加载器拆除时）
    fn clear(&self);

    /// 某类型的存活句柄数
    fn live_count(&self, handle_type: HandleType) -> usize;

    fn is_passthrough(&self) -> bool;
}

/// 单一句柄类型的存储
struct HandleSlot {
    next: CachePadded<AtomicU64>,
    records: DashMap<LoaderHandle, HandleRecord>,
    retrieved: DashMap<(DriverId, NativeHandle), LoaderHandle>,
}

impl HandleSlot {
    fn new() -> Self {
        Self {
            // 0 保留给空句柄
            next: CachePadded::new(AtomicU64::new(1)),
            records: DashMap::new(),
            retrieved: DashMap::new(),
        }
    }
}

/// 句柄翻译表
pub struct HandleTable {
    slots: [HandleSlot; HandleType::COUNT],
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| HandleSlot::new()),
        }
    }

    fn slot(&self, handle_type: HandleType) -> &HandleSlot {
        &self.slots[handle_type.index()]
    }

    /// 查询句柄记录
    pub fn record(&self, handle_type: HandleType, handle: LoaderHandle) -> Option<HandleRecord> {
        self.slot(handle_type).records.get(&handle).map(|record| *record)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTranslator for HandleTable {
    fn register(&self, handle_type: HandleType, driver_id: DriverId, native: NativeHandle) -> LoaderHandle {
        let slot = self.slot(handle_type);
        let loader_handle = slot.next.fetch_add(1, Ordering::Relaxed);

        slot.records.insert(
            loader_handle,
            HandleRecord {
                handle_type,
                loader_handle,
                driver_id,
                native_handle: native,
            },
        );
        loader_handle
    }

    fn register_retrieved(&self, handle_type: HandleType, driver_id: DriverId, native: NativeHandle) -> LoaderHandle {
        let slot = self.slot(handle_type);

        match slot.retrieved.entry((driver_id, native)) {
            Entry::Occupied(mut entry) => {
                let existing = *entry.get();
                if slot.records.contains_key(&existing) {
                    existing
                } else {
                    let fresh = self.register(handle_type, driver_id, native);
                    entry.insert(fresh);
                    fresh
                }
            }
            Entry::Vacant(entry) => {
                let fresh = self.register(handle_type, driver_id, native);
                entry.insert(fresh);
                fresh
            }
        }
    }

    fn translate(&self, handle_type: HandleType, handle: LoaderHandle) -> Result<(DriverId, NativeHandle)> {
        self.slot(handle_type)
            .records
            .get(&handle)
            .map(|record| (record.driver_id, record.native_handle))
            .ok_or_else(|| LoaderError::invalid_handle(handle_type, handle))
    }

    fn release(&self, handle_type: HandleType, handle: LoaderHandle) -> Result<()> {
        let slot = self.slot(handle_type);
        let (_, record) = slot
            .records
            .remove(&handle)
            .ok_or_else(|| LoaderError::invalid_handle(handle_type, handle))?;

        slot.retrieved
            .remove_if(&(record.driver_id, record.native_handle), |_, mapped| *mapped == handle);
        Ok(())
    }

    fn clear(&self) {
        let mut cleared = 0;
        for slot in &self.slots {
            cleared += slot.records.len();
            slot.records.clear();
            slot.retrieved.clear();
        }
        info!("Handle table cleared ({} live handles dropped)", cleared);
    }

    fn live_count(&self, handle_type: HandleType) -> usize {
        self.slot(handle_type).records.len()
    }

    fn is_passthrough(&self) -> bool {
        false
    }
}

/// 恒等映射翻译器
///
/// 只有一个驱动且未强制拦截时使用，原生句柄即加载器句柄。
pub struct PassthroughTranslator {
    driver_id: DriverId,
}

impl PassthroughTranslator {
    pub fn new(driver_id: DriverId) -> Self {
        Self { driver_id }
    }
}

impl HandleTranslator for PassthroughTranslator {
    fn register(&self, _handle_type: HandleType, _driver_id: DriverId, native: NativeHandle) -> LoaderHandle {
        native
    }

    fn register_retrieved(&self, _handle_type: HandleType, _driver_id: DriverId, native: NativeHandle) -> LoaderHandle {
        native
    }

    fn translate(&self, _handle_type: HandleType, handle: LoaderHandle) -> Result<(DriverId, NativeHandle)> {
        Ok((self.driver_id, handle))
    }

    fn release(&self, _handle_type: HandleType, _handle: LoaderHandle) -> Result<()> {
        Ok(())
    }

    fn clear(&self) {}

    fn live_count(&self, _handle_type: HandleType) -> usize {
        0
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

/// 根据已加载驱动和配置选定翻译器
pub fn select_translator(registry: &DriverRegistry, intercept_forced: bool) -> Arc<dyn HandleTranslator> {
    let mut loaded = registry.loaded();
    match (loaded.next(), loaded.next()) {
        (Some(driver), None) if !intercept_forced => {
            debug!("Single driver {} loaded, handle translation in passthrough mode", driver.id());
            Arc::new(PassthroughTranslator::new(driver.id()))
        }
        _ => {
            debug!("Handle translation enabled");
            Arc::new(HandleTable::new())
        }
    }
}
