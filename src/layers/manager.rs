//! 层管理器
//!
//! 持有各层的开关状态。每次开关（包括重复的开关）都会重建整条拦截链并
//! 原子替换；开关之间串行，不等待正在进行的调用。

use super::chain::{ChainSnapshot, InterceptChain, InterceptStage};
use super::tracing_layer::TracingLayer;
use super::validation_layer::ValidationLayer;
use super::{LayerKind, LayerSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
struct LayerState {
    enabled: LayerSet,
    generation: u64,
}

/// 层管理器
pub struct LayerManager {
    chain: InterceptChain,
    tracing: Arc<TracingLayer>,
    validation: Arc<ValidationLayer>,
    state: Mutex<LayerState>,
}

impl LayerManager {
    pub fn new() -> Self {
        Self {
            chain: InterceptChain::new(),
            tracing: Arc::new(TracingLayer::new()),
            validation: Arc::new(ValidationLayer::new()),
            state: Mutex::new(LayerState::default()),
        }
    }

    pub fn chain(&self) -> &InterceptChain {
        &self.chain
    }

    pub fn tracing_layer(&self) -> &Arc<TracingLayer> {
        &self.tracing
    }

    pub fn validation_layer(&self) -> &Arc<ValidationLayer> {
        &self.validation
    }

    /// 启用层，重复启用视为成功
    pub fn enable(&self, layer: LayerKind) {
        let mut state = self.state.lock();
        if state.enabled.insert(layer) {
            info!("Layer {} enabled", layer);
        }
        self.rebuild(&mut state);
    }

    /// 停用层，重复停用视为成功
    pub fn disable(&self, layer: LayerKind) {
        let mut state = self.state.lock();
        if state.enabled.remove(layer) {
            info!("Layer {} disabled", layer);
        }
        self.rebuild(&mut state);
    }

    /// 停用全部层
    pub fn disable_all(&self) {
        let mut state = self.state.lock();
        state.enabled = LayerSet::EMPTY;
        self.rebuild(&mut state);
    }

    pub fn is_enabled(&self, layer: LayerKind) -> bool {
        self.state.lock().enabled.contains(layer)
    }

    pub fn enabled(&self) -> LayerSet {
        self.state.lock().enabled
    }

    fn stage(&self, layer: LayerKind) -> Arc<dyn InterceptStage> {
        match layer {
            LayerKind::Tracing => self.tracing.clone() as Arc<dyn InterceptStage>,
            LayerKind::Validation => self.validation.clone(),
        }
    }

    /// 在持有状态锁的情况下构建并替换快照
    fn rebuild(&self, state: &mut LayerState) {
        state.generation += 1;
        let stages: Vec<Arc<dyn InterceptStage>> = state.enabled.iter().map(|layer| self.stage(layer)).collect();
        self.chain.swap(ChainSnapshot::build(state.generation, &stages));
    }
}

impl Default for LayerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::EntryPoint;

    #[test]
    fn test_enable_disable_is_idempotent() {
        let manager = LayerManager::new();
        assert!(manager.enabled().is_empty());
        assert_eq!(manager.chain().generation(), 0);

        manager.enable(LayerKind::Tracing);
        manager.enable(LayerKind::Tracing);
        assert!(manager.is_enabled(LayerKind::Tracing));
        // 每次调用都重建
        assert_eq!(manager.chain().generation(), 2);

        manager.disable(LayerKind::Validation);
        assert!(manager.is_enabled(LayerKind::Tracing));
        assert!(!manager.is_enabled(LayerKind::Validation));
        assert_eq!(manager.chain().generation(), 3);
    }

    #[test]
    fn test_snapshot_reflects_layers_in_order() {
        let manager = LayerManager::new();
        manager.enable(LayerKind::Validation);
        manager.enable(LayerKind::Tracing);

        let snapshot = manager.chain().snapshot();
        let layers: Vec<LayerKind> = snapshot
            .stages(EntryPoint::ContextCreate)
            .iter()
            .map(|stage| stage.layer())
            .collect();
        assert_eq!(layers, vec![LayerKind::Tracing, LayerKind::Validation]);

        manager.disable_all();
        assert!(manager.enabled().is_empty());
        assert!(manager.chain().snapshot().stages(EntryPoint::ContextCreate).is_empty());
        // 旧快照不受影响
        assert_eq!(snapshot.stages(EntryPoint::ContextCreate).len(), 2);
    }

    #[test]
    fn test_concurrent_toggles_serialize() {
        let manager = LayerManager::new();

        crossbeam::thread::scope(|scope| {
            for i in 0..4 {
                let manager = &manager;
                scope.spawn(move |_| {
                    for _ in 0..250 {
                        if i % 2 == 0 {
                            manager.enable(LayerKind::Tracing);
                        } else {
                            manager.disable(LayerKind::Tracing);
                        }
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(manager.chain().generation(), 1000);
    }
}
