//! 加载器生命周期与拆除协调
//!
//! 状态机：
//!
//! ```text
//! ACTIVE --request_delay--> TEARDOWN_DELAYED --context_teardown--> TORN_DOWN
//! ACTIVE --process_shutdown / context_teardown--> TORN_DOWN
//! ```
//!
//! 进入 TORN_DOWN 后上下文被取走并拆除，之后除状态探针外的调用都返回
//! `Uninitialized`。正在进行的调用持有自己取得的上下文引用，照常完成。

use crate::{LoaderError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 加载器状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoaderState {
    Active = 0,
    TeardownDelayed = 1,
    TornDown = 2,
}

impl LoaderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoaderState::Active,
            1 => LoaderState::TeardownDelayed,
            _ => LoaderState::TornDown,
        }
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Active => "ACTIVE",
            LoaderState::TeardownDelayed => "TEARDOWN_DELAYED",
            LoaderState::TornDown => "TORN_DOWN",
        };
        f.write_str(name)
    }
}

/// 可被拆除的加载器上下文
pub trait ContextTeardown: Send + Sync {
    /// 拆除上下文，只会被调用一次
    fn teardown(&self);
}

/// 拆除协调器
pub struct TeardownCoordinator<C: ContextTeardown> {
    state: AtomicU8,
    context: RwLock<Option<Arc<C>>>,
}

impl<C: ContextTeardown> TeardownCoordinator<C> {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LoaderState::Active as u8),
            context: RwLock::new(None),
        }
    }

    pub fn state(&self) -> LoaderState {
        LoaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 状态探针，任何状态下都可调用
    pub fn is_torn_down(&self) -> bool {
        self.state() == LoaderState::TornDown
    }

    /// 安装上下文
    ///
    /// 已有上下文时保留原上下文并返回它；拆除后不能再安装。
    pub fn install(&self, context: Arc<C>) -> Result<Arc<C>> {
        let mut slot = self.context.write();

        if self.is_torn_down() {
            return Err(LoaderError::Uninitialized);
        }

        if let Some(existing) = slot.as_ref() {
            debug!("Loader context already installed, keeping the existing one");
            return Ok(existing.clone());
        }

        *slot = Some(context.clone());
        Ok(context)
    }

    /// 当前上下文
    pub fn context(&self) -> Result<Arc<C>> {
        if self.is_torn_down() {
            return Err(LoaderError::Uninitialized);
        }
        self.context.read().clone().ok_or(LoaderError::Uninitialized)
    }

    pub fn is_installed(&self) -> bool {
        self.context.read().is_some()
    }

    /// 请求推迟拆除，之后进程自然关闭不再拆除上下文
    pub fn request_delay(&self) {
        match self.state.compare_exchange(
            LoaderState::Active as u8,
            LoaderState::TeardownDelayed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => info!("Loader context teardown delayed until explicit teardown"),
            Err(current) => debug!(
                "Teardown delay requested in state {}, ignoring",
                LoaderState::from_u8(current)
            ),
        }
    }

    /// 进程自然关闭，推迟拆除时被忽略
    pub fn process_shutdown(&self) {
        self.tear_down(false);
    }

    /// 显式拆除上下文，ACTIVE 或 TEARDOWN_DELAYED 状态下均生效
    pub fn context_teardown(&self) {
        self.tear_down(true);
    }

    fn tear_down(&self, explicit: bool) {
        let transition = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| match LoaderState::from_u8(raw) {
                LoaderState::Active => Some(LoaderState::TornDown as u8),
                LoaderState::TeardownDelayed if explicit => Some(LoaderState::TornDown as u8),
                _ => None,
            });

        let previous = match transition {
            Ok(previous) => LoaderState::from_u8(previous),
            Err(current) => {
                if LoaderState::from_u8(current) == LoaderState::TeardownDelayed {
                    debug!("Process shutdown with delayed teardown, context kept alive");
                }
                return;
            }
        };

        let context = self.context.write().take();
        match context {
            Some(context) => {
                info!("Tearing down loader context (from {})", previous);
                context.teardown();
            }
            None => info!("Loader torn down before initialization"),
        }
    }
}

impl<C: ContextTeardown> Default for TeardownCoordinator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ContextTeardown> fmt::Debug for TeardownCoordinator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownCoordinator")
            .field("state", &self.state())
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// 进程关闭守卫
///
/// 应用持有该值，被释放时视为进程自然关闭。
#[must_use = "dropping the guard immediately triggers the shutdown path"]
pub struct ShutdownGuard<'a, C: ContextTeardown> {
    coordinator: &'a TeardownCoordinator<C>,
}

impl<'a, C: ContextTeardown> ShutdownGuard<'a, C> {
    pub fn new(coordinator: &'a TeardownCoordinator<C>) -> Self {
        Self { coordinator }
    }
}

impl<C: ContextTeardown> Drop for ShutdownGuard<'_, C> {
    fn drop(&mut self) {
        self.coordinator.process_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingContext {
        teardowns: AtomicUsize,
    }

    impl ContextTeardown for CountingContext {
        fn teardown(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn installed() -> (TeardownCoordinator<CountingContext>, Arc<CountingContext>) {
        let coordinator = TeardownCoordinator::new();
        let context = Arc::new(CountingContext::default());
        coordinator.install(context.clone()).unwrap();
        (coordinator, context)
    }

    #[test]
    fn test_uninstalled_context_is_uninitialized() {
        let coordinator = TeardownCoordinator::<CountingContext>::new();
        assert!(matches!(coordinator.context(), Err(LoaderError::Uninitialized)));
        assert!(!coordinator.is_torn_down());
    }

    #[test]
    fn test_natural_shutdown_tears_down() {
        let (coordinator, context) = installed();

        coordinator.process_shutdown();
        assert_eq!(coordinator.state(), LoaderState::TornDown);
        assert!(coordinator.is_torn_down());
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 1);
        assert!(matches!(coordinator.context(), Err(LoaderError::Uninitialized)));

        coordinator.process_shutdown();
        coordinator.context_teardown();
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_teardown() {
        let (coordinator, context) = installed();

        coordinator.request_delay();
        assert_eq!(coordinator.state(), LoaderState::TeardownDelayed);
        assert!(!coordinator.is_torn_down());

        // 自然关闭被忽略
        coordinator.process_shutdown();
        assert!(coordinator.context().is_ok());
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 0);

        coordinator.context_teardown();
        assert!(coordinator.is_torn_down());
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_teardown_from_active() {
        let (coordinator, context) = installed();
        coordinator.context_teardown();
        assert!(coordinator.is_torn_down());
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 1);

        coordinator.request_delay();
        assert_eq!(coordinator.state(), LoaderState::TornDown);
    }

    #[test]
    fn test_install_after_teardown_refused() {
        let (coordinator, _) = installed();
        coordinator.context_teardown();

        let result = coordinator.install(Arc::new(CountingContext::default()));
        assert!(matches!(result, Err(LoaderError::Uninitialized)));
    }

    #[test]
    fn test_install_twice_keeps_first() {
        let (coordinator, first) = installed();
        let second = Arc::new(CountingContext::default());

        let kept = coordinator.install(second).unwrap();
        assert!(Arc::ptr_eq(&kept, &first));
    }

    #[test]
    fn test_in_flight_context_survives_teardown() {
        let (coordinator, original) = installed();
        let captured = coordinator.context().unwrap();
        assert_eq!(Arc::strong_count(&original), 3);

        coordinator.context_teardown();
        assert_eq!(captured.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&original), 2);
    }

    #[test]
    fn test_shutdown_guard() {
        let (coordinator, context) = installed();
        {
            let _guard = ShutdownGuard::new(&coordinator);
        }
        assert!(coordinator.is_torn_down());
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 1);

        let (coordinator, context) = installed();
        coordinator.request_delay();
        drop(ShutdownGuard::new(&coordinator));
        assert!(!coordinator.is_torn_down());
        assert_eq!(context.teardowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_teardown_runs_once() {
        let (coordinator, context) = installed();

        crossbeam::thread::scope(|scope| {
            for i in 0..8 {
                let coordinator = &coordinator;
                scope.spawn(move |_| {
                    if i % 2 == 0 {
                        coordinator.context_teardown();
                    } else {
                        coordinator.process_shutdown();
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(context.teardowns.load(Ordering::SeqCst), 1);
    }
}
