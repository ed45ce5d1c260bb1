//! 拦截链
//!
//! 每个入口点一条由已启用层构成的阶段列表，末端是驱动调用。
//! 整条链以不可变快照的形式存在：重新配置时构建新快照并整体替换，
//! 正在进行的调用继续使用它开始时取得的快照。

use super::{LayerKind, LayerSet};
use crate::drivers::EntryPoint;
use crate::types::LoaderHandle;
use crate::Result;
use arc_swap::ArcSwap;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// 一次API调用在链中传递的数据
#[derive(Debug)]
pub struct CallFrame {
    pub entry: EntryPoint,
    /// 输入句柄，类型与入口点元数据按位置对应
    pub inputs: Vec<LoaderHandle>,
    /// 应用的描述符，原样透传给驱动
    pub payload: *mut c_void,
    /// Retrieve 类调用的输出容量，`None` 表示只查询数量
    pub capacity: Option<usize>,
    /// 输出句柄（已登记的加载器句柄）
    pub outputs: Vec<LoaderHandle>,
    /// Retrieve 类调用报告的数量
    pub count: usize,
    /// 执行本次调用的快照代数
    pub generation: u64,
}

impl CallFrame {
    pub fn new(entry: EntryPoint, inputs: Vec<LoaderHandle>) -> Self {
        Self {
            entry,
            inputs,
            payload: std::ptr::null_mut(),
            capacity: None,
            outputs: Vec::new(),
            count: 0,
            generation: 0,
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

/// 链中的拦截阶段
pub trait InterceptStage: Send + Sync {
    fn layer(&self) -> LayerKind;

    /// 是否拦截该入口点
    fn applies_to(&self, _entry: EntryPoint) -> bool {
        true
    }

    /// 处理调用：短路返回错误，或通过 `next` 继续传递
    fn intercept(&self, frame: &mut CallFrame, next: Next<'_>) -> Result<()>;
}

/// 链末端的驱动调用
pub trait TerminalStage: Send + Sync {
    fn call(&self, frame: &mut CallFrame) -> Result<()>;
}

/// 链中剩余的部分
pub struct Next<'a> {
    remaining: &'a [Arc<dyn InterceptStage>],
    terminal: &'a dyn TerminalStage,
}

impl<'a> Next<'a> {
    pub fn new(remaining: &'a [Arc<dyn InterceptStage>], terminal: &'a dyn TerminalStage) -> Self {
        Self { remaining, terminal }
    }

    pub fn run(self, frame: &mut CallFrame) -> Result<()> {
        match self.remaining.split_first() {
            Some((stage, rest)) => stage.intercept(
                frame,
                Next {
                    remaining: rest,
                    terminal: self.terminal,
                },
            ),
            None => self.terminal.call(frame),
        }
    }
}

/// 不可变的链快照
pub struct ChainSnapshot {
    generation: u64,
    layers: LayerSet,
    per_entry: Vec<Arc<[Arc<dyn InterceptStage>]>>,
}

impl ChainSnapshot {
    /// 不含任何层的初始快照
    pub fn empty() -> Self {
        Self::build(0, &[])
    }

    /// 由已启用的阶段构建快照，阶段按层顺序排列
    pub fn build(generation: u64, stages: &[Arc<dyn InterceptStage>]) -> Self {
        let mut ordered: Vec<Arc<dyn InterceptStage>> = stages.to_vec();
        ordered.sort_by_key(|stage| stage.layer());

        let layers = ordered.iter().map(|stage| stage.layer()).collect();
        let per_entry = EntryPoint::ALL
            .iter()
            .map(|entry| {
                ordered
                    .iter()
                    .filter(|stage| stage.applies_to(*entry))
                    .cloned()
                    .collect::<Vec<_>>()
                    .into()
            })
            .collect();

        Self {
            generation,
            layers,
            per_entry,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layers(&self) -> LayerSet {
        self.layers
    }

    /// 入口点的阶段列表
    pub fn stages(&self, entry: EntryPoint) -> &[Arc<dyn InterceptStage>] {
        &self.per_entry[entry.index()]
    }
}

impl fmt::Debug for ChainSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSnapshot")
            .field("generation", &self.generation)
            .field("layers", &self.layers)
            .finish()
    }
}

/// 拦截链
///
/// 取快照不加锁，调用本身也不持锁。
pub struct InterceptChain {
    current: ArcSwap<ChainSnapshot>,
}

impl InterceptChain {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ChainSnapshot::empty()),
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        self.current.load_full()
    }

    /// 替换快照，返回被替换的快照
    pub fn swap(&self, snapshot: ChainSnapshot) -> Arc<ChainSnapshot> {
        self.current.swap(Arc::new(snapshot))
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// 在当前快照上执行调用
    pub fn dispatch(&self, frame: &mut CallFrame, terminal: &dyn TerminalStage) -> Result<()> {
        let snapshot = self.snapshot();
        frame.generation = snapshot.generation;
        Next::new(snapshot.stages(frame.entry), terminal).run(frame)
    }
}

impl Default for InterceptChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterceptChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptChain")
            .field("current", &*self.snapshot())
            .finish()
    }
}
