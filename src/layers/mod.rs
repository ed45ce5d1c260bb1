//! 拦截层
//!
//! 可在运行时开关的横切层（追踪、校验）以及按入口点组织的拦截链。
//! 层的相对顺序固定：追踪在最外层，校验在其内，最后是驱动调用。

pub mod chain;
pub mod manager;
pub mod tracing_layer;
pub mod validation_layer;

pub use chain::{CallFrame, ChainSnapshot, InterceptChain, InterceptStage, Next, TerminalStage};
pub use manager::LayerManager;
pub use tracing_layer::{CallRecord, EntryStats, Tracer, TracingLayer};
pub use validation_layer::ValidationLayer;

use serde::{Deserialize, Serialize};
use std::fmt;

/// 层种类，判别值即在链中的位置（小的在外层）
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerKind {
    Tracing = 0,
    Validation = 1,
}

impl LayerKind {
    /// 全部层，由外到内
    pub const ALL: [LayerKind; 2] = [LayerKind::Tracing, LayerKind::Validation];

    /// 登记到版本注册表的组件名
    pub fn component_name(self) -> &'static str {
        match self {
            LayerKind::Tracing => "ze_tracing",
            LayerKind::Validation => "ze_validation",
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.component_name())
    }
}

/// 已启用层的集合
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LayerSet {
    bits: u8,
}

impl LayerSet {
    pub const EMPTY: LayerSet = LayerSet { bits: 0 };

    /// 加入层，返回集合是否变化
    pub fn insert(&mut self, layer: LayerKind) -> bool {
        let changed = !self.contains(layer);
        self.bits |= layer.bit();
        changed
    }

    /// 移除层，返回集合是否变化
    pub fn remove(&mut self, layer: LayerKind) -> bool {
        let changed = self.contains(layer);
        self.bits &= !layer.bit();
        changed
    }

    pub fn contains(&self, layer: LayerKind) -> bool {
        self.bits & layer.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// 按链中顺序（由外到内）遍历
    pub fn iter(&self) -> impl Iterator<Item = LayerKind> + '_ {
        LayerKind::ALL.into_iter().filter(move |layer| self.contains(*layer))
    }
}

impl FromIterator<LayerKind> for LayerSet {
    fn from_iter<I: IntoIterator<Item = LayerKind>>(iter: I) -> Self {
        let mut set = LayerSet::EMPTY;
        for layer in iter {
            set.insert(layer);
        }
        set
    }
}
