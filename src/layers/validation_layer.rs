//! 校验层
//!
//! 只做结构性检查：输入句柄数量与入口点元数据一致、输入句柄非空、
//! 创建类调用携带描述符。违规时返回API结果码，不调用驱动。

use super::chain::{CallFrame, InterceptStage, Next};
use super::LayerKind;
use crate::drivers::CallKind;
use crate::{LoaderError, Result, ZeResult};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// 校验层
#[derive(Debug, Default)]
pub struct ValidationLayer {
    violations: AtomicU64,
}

impl ValidationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计违规次数
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    fn check(&self, frame: &CallFrame) -> std::result::Result<(), (ZeResult, String)> {
        let info = frame.entry.info();

        if frame.inputs.len() != info.consumes.len() {
            return Err((
                ZeResult::ERROR_INVALID_ARGUMENT,
                format!("expected {} input handles, got {}", info.consumes.len(), frame.inputs.len()),
            ));
        }

        if let Some(position) = frame.inputs.iter().position(|handle| *handle == 0) {
            return Err((
                ZeResult::ERROR_INVALID_NULL_HANDLE,
                format!("null {} handle at position {}", info.consumes[position], position),
            ));
        }

        if info.kind == CallKind::Create && frame.payload.is_null() {
            return Err((ZeResult::ERROR_INVALID_NULL_POINTER, "null descriptor".to_string()));
        }

        Ok(())
    }
}

impl InterceptStage for ValidationLayer {
    fn layer(&self) -> LayerKind {
        LayerKind::Validation
    }

    fn intercept(&self, frame: &mut CallFrame, next: Next<'_>) -> Result<()> {
        if let Err((code, message)) = self.check(frame) {
            self.violations.fetch_add(1, Ordering::Relaxed);
            warn!("Validation failed for {}: {} ({})", frame.entry, message, code);
            return Err(LoaderError::Validation(code));
        }
        next.run(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::EntryPoint;
    use crate::layers::chain::TerminalStage;
    use std::ffi::c_void;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTerminal {
        calls: AtomicUsize,
    }

    impl TerminalStage for CountingTerminal {
        fn call(&self, _frame: &mut CallFrame) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn validate(layer: &ValidationLayer, terminal: &CountingTerminal, mut frame: CallFrame) -> ZeResult {
        match layer.intercept(&mut frame, Next::new(&[], terminal)) {
            Ok(()) => ZeResult::SUCCESS,
            Err(e) => e.code(),
        }
    }

    #[test]
    fn test_structural_violations() {
        let layer = ValidationLayer::new();
        let terminal = CountingTerminal::default();
        let mut descriptor = 0u32;
        let payload = &mut descriptor as *mut u32 as *mut c_void;

        assert_eq!(
            validate(&layer, &terminal, CallFrame::new(EntryPoint::CommandQueueCreate, vec![1]).with_payload(payload)),
            ZeResult::ERROR_INVALID_ARGUMENT
        );
        assert_eq!(
            validate(&layer, &terminal, CallFrame::new(EntryPoint::CommandQueueCreate, vec![1, 0]).with_payload(payload)),
            ZeResult::ERROR_INVALID_NULL_HANDLE
        );
        assert_eq!(
            validate(&layer, &terminal, CallFrame::new(EntryPoint::ContextCreate, vec![1])),
            ZeResult::ERROR_INVALID_NULL_POINTER
        );

        assert_eq!(layer.violations(), 3);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_violations_are_reported_as_loader_errors() {
        let layer = ValidationLayer::new();
        let terminal = CountingTerminal::default();
        let mut frame = CallFrame::new(EntryPoint::ContextDestroy, vec![0]);

        let error = layer.intercept(&mut frame, Next::new(&[], &terminal)).unwrap_err();
        assert!(matches!(error, LoaderError::Validation(ZeResult::ERROR_INVALID_NULL_HANDLE)));
        assert!(error.is_loader_origin());
    }

    #[test]
    fn test_valid_calls_pass_through() {
        let layer = ValidationLayer::new();
        let terminal = CountingTerminal::default();
        let mut descriptor = 0u32;
        let payload = &mut descriptor as *mut u32 as *mut c_void;

        assert!(validate(&layer, &terminal, CallFrame::new(EntryPoint::ContextCreate, vec![1]).with_payload(payload)).is_success());
        assert!(validate(&layer, &terminal, CallFrame::new(EntryPoint::ContextDestroy, vec![5])).is_success());
        assert!(validate(&layer, &terminal, CallFrame::new(EntryPoint::DriverGet, vec![]).with_capacity(0)).is_success());

        assert_eq!(layer.violations(), 0);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 3);
    }
}
