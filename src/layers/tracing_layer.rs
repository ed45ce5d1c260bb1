//! 追踪层
//!
//! 在每次调用前后回调应用注册的追踪器，并为每个入口点计数。

use super::chain::{CallFrame, InterceptStage, Next};
use super::LayerKind;
use crate::drivers::EntryPoint;
use crate::types::LoaderHandle;
use crate::{Result, ZeResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// 传给追踪器的调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub entry: EntryPoint,
    /// 执行本次调用的链快照代数
    pub generation: u64,
    pub inputs: Vec<LoaderHandle>,
}

/// 应用注册的追踪器
#[cfg_attr(test, mockall::automock)]
pub trait Tracer: Send + Sync {
    fn prologue(&self, record: &CallRecord);

    fn epilogue(&self, record: &CallRecord, result: ZeResult);
}

/// 单个入口点的调用统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub symbol: &'static str,
    pub calls: u64,
    pub failures: u64,
}

/// 追踪层
pub struct TracingLayer {
    tracers: RwLock<Vec<Arc<dyn Tracer>>>,
    calls: Box<[AtomicU64]>,
    failures: Box<[AtomicU64]>,
}

impl TracingLayer {
    pub fn new() -> Self {
        Self {
            tracers: RwLock::new(Vec::new()),
            calls: (0..EntryPoint::COUNT).map(|_| AtomicU64::new(0)).collect(),
            failures: (0..EntryPoint::COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// 注册追踪器
    pub fn register_tracer(&self, tracer: Arc<dyn Tracer>) {
        let mut tracers = self.tracers.write();
        tracers.push(tracer);
        debug!("Tracer registered ({} total)", tracers.len());
    }

    /// 移除全部追踪器
    pub fn clear_tracers(&self) {
        self.tracers.write().clear();
    }

    pub fn tracer_count(&self) -> usize {
        self.tracers.read().len()
    }

    /// 有调用记录的入口点统计
    pub fn stats(&self) -> Vec<EntryStats> {
        EntryPoint::ALL
            .iter()
            .filter_map(|entry| {
                let calls = self.calls[entry.index()].load(Ordering::Relaxed);
                (calls > 0).then(|| EntryStats {
                    symbol: entry.symbol(),
                    calls,
                    failures: self.failures[entry.index()].load(Ordering::Relaxed),
                })
            })
            .collect()
    }

    /// 某入口点的调用次数
    pub fn call_count(&self, entry: EntryPoint) -> u64 {
        self.calls[entry.index()].load(Ordering::Relaxed)
    }
}

impl Default for TracingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptStage for TracingLayer {
    fn layer(&self) -> LayerKind {
        LayerKind::Tracing
    }

    fn intercept(&self, frame: &mut CallFrame, next: Next<'_>) -> Result<()> {
        let tracers = self.tracers.read().clone();
        let record = CallRecord {
            entry: frame.entry,
            generation: frame.generation,
            inputs: frame.inputs.clone(),
        };

        for tracer in &tracers {
            tracer.prologue(&record);
        }

        let start = Instant::now();
        let result = next.run(frame);
        let elapsed = start.elapsed();

        let code = match &result {
            Ok(()) => ZeResult::SUCCESS,
            Err(e) => e.code(),
        };

        for tracer in &tracers {
            tracer.epilogue(&record, code);
        }

        self.calls[frame.entry.index()].fetch_add(1, Ordering::Relaxed);
        if !code.is_success() {
            self.failures[frame.entry.index()].fetch_add(1, Ordering::Relaxed);
        }

        trace!(
            entry = %frame.entry,
            generation = frame.generation,
            elapsed_us = elapsed.as_micros() as u64,
            result = %code,
            "api call"
        );
        result
    }
}
