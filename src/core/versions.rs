//! 组件版本注册表
//!
//! 各组件（加载器、各层）初始化时登记自己的名称、规范版本和库版本，
//! 应用通过两次调用协议查询。

use crate::types::ComponentVersion;
use crate::{LoaderError, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// 组件版本注册表
#[derive(Debug, Default)]
pub struct VersionRegistry {
    components: RwLock<Vec<ComponentVersion>>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记组件版本，同名组件已存在时保留先登记的记录
    pub fn register(&self, component: ComponentVersion) -> bool {
        let mut components = self.components.write();

        if let Some(existing) = components
            .iter()
            .find(|existing| existing.component_name == component.component_name)
        {
            warn!(
                "Component '{}' already registered with library version {}, ignoring {}",
                existing.component_name, existing.component_lib_version, component.component_lib_version
            );
            return false;
        }

        debug!(
            "Registered component '{}' (spec {}, library {})",
            component.component_name, component.spec_version, component.component_lib_version
        );
        components.push(component);
        true
    }

    /// 两次调用协议查询版本
    ///
    /// 不传缓冲区时只返回组件数量；缓冲区不小于组件数量时按登记顺序写入；
    /// 缓冲区不足时返回 `BufferTooSmall`，不写入任何内容。
    pub fn get_versions(&self, versions: Option<&mut [ComponentVersion]>) -> Result<usize> {
        let components = self.components.read();
        let count = components.len();

        if let Some(buffer) = versions {
            if buffer.len() < count {
                return Err(LoaderError::BufferTooSmall {
                    required: count,
                    provided: buffer.len(),
                });
            }
            buffer[..count].clone_from_slice(&components);
        }

        Ok(count)
    }

    /// 按名称查找组件
    pub fn find(&self, component_name: &str) -> Option<ComponentVersion> {
        self.components
            .read()
            .iter()
            .find(|component| component.component_name == component_name)
            .cloned()
    }

    /// 全部组件，按登记顺序
    pub fn components(&self) -> Vec<ComponentVersion> {
        self.components.read().clone()
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApiVersion, LibraryVersion};

    fn component(name: &str, patch: i32) -> ComponentVersion {
        ComponentVersion::new(name, ApiVersion::CURRENT, LibraryVersion::new(1, 3, patch))
    }

    fn placeholder() -> ComponentVersion {
        ComponentVersion::new("unset", ApiVersion::V1_0, LibraryVersion::new(0, 0, 0))
    }

    #[test]
    fn test_two_call_protocol() {
        let registry = VersionRegistry::new();
        registry.register(component("loader", 0));
        registry.register(component("ze_tracing", 0));
        registry.register(component("ze_validation", 0));

        let count = registry.get_versions(None).unwrap();
        assert_eq!(count, 3);

        let mut buffer = vec![placeholder(); count];
        assert_eq!(registry.get_versions(Some(&mut buffer)).unwrap(), 3);
        assert_eq!(buffer[0].component_name, "loader");
        assert_eq!(buffer[2].component_name, "ze_validation");
    }

    #[test]
    fn test_larger_buffer_leaves_tail_untouched() {
        let registry = VersionRegistry::new();
        registry.register(component("loader", 0));

        let mut buffer = vec![placeholder(); 3];
        assert_eq!(registry.get_versions(Some(&mut buffer)).unwrap(), 1);
        assert_eq!(buffer[0].component_name, "loader");
        assert_eq!(buffer[1], placeholder());
    }

    #[test]
    fn test_small_buffer_writes_nothing() {
        let registry = VersionRegistry::new();
        registry.register(component("loader", 0));
        registry.register(component("ze_tracing", 0));

        let mut buffer = vec![placeholder(); 1];
        let result = registry.get_versions(Some(&mut buffer));

        assert!(matches!(
            result,
            Err(LoaderError::BufferTooSmall { required: 2, provided: 1 })
        ));
        assert_eq!(buffer[0], placeholder());
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = VersionRegistry::new();
        assert!(registry.register(component("loader", 1)));
        assert!(!registry.register(component("loader", 2)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find("loader").unwrap().component_lib_version.patch, 1);
        assert!(registry.find("ze_tracing").is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = VersionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.get_versions(None).unwrap(), 0);
        assert_eq!(registry.get_versions(Some(&mut [])).unwrap(), 0);
    }
}
