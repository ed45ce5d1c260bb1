//! 驱动模块加载
//!
//! 注册表通过 [`ModuleLoader`] 枚举和加载候选驱动模块。提供两种实现：
//! 基于 `libloading` 的共享库加载器，以及由符号表构成的进程内模块加载器。

use super::entry_points::{DriverEntryFn, EntryPoint};
use crate::config::DriverDiscoveryConfig;
use crate::{LoaderError, Result};
use libloading::Library;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 候选驱动模块
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DriverCandidate {
    /// 共享库文件路径或由系统搜索的库名
    Library(PathBuf),
    /// 进程内模块
    Static(String),
}

impl fmt::Display for DriverCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverCandidate::Library(path) => write!(f, "{}", path.display()),
            DriverCandidate::Static(name) => write!(f, "static:{}", name),
        }
    }
}

/// 已加载的驱动模块
///
/// 模块被释放（drop）时即卸载，之后从它解析出的函数指针全部失效。
#[cfg_attr(test, mockall::automock)]
pub trait DriverModule: Send + Sync {
    /// 模块名称
    fn name(&self) -> &str;

    /// 按符号名解析入口函数
    fn symbol(&self, symbol: &str) -> Option<DriverEntryFn>;
}

/// 模块加载协作者
#[cfg_attr(test, mockall::automock)]
pub trait ModuleLoader: Send + Sync {
    /// 枚举候选驱动模块
    fn candidates(&self) -> Vec<DriverCandidate>;

    /// 加载候选模块
    fn load(&self, candidate: &DriverCandidate) -> Result<Arc<dyn DriverModule>>;
}

/// 共享库驱动模块
pub struct LibraryModule {
    name: String,
    path: PathBuf,
    library: Library,
}

impl LibraryModule {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DriverModule for LibraryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self, symbol: &str) -> Option<DriverEntryFn> {
        // SAFETY: 驱动按统一调用约定导出入口函数，函数指针的有效期受本模块约束
        unsafe { self.library.get::<DriverEntryFn>(symbol.as_bytes()) }
            .ok()
            .map(|function| *function)
    }
}

impl Drop for LibraryModule {
    fn drop(&mut self) {
        debug!("Unloading driver module {:?}", self.path);
    }
}

/// 共享库加载器
pub struct LibraryModuleLoader {
    config: DriverDiscoveryConfig,
}

impl LibraryModuleLoader {
    pub fn new(config: DriverDiscoveryConfig) -> Self {
        Self { config }
    }

    /// 扫描目录查找驱动库
    fn scan_directory(&self, dir_path: &Path) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(dir_path) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping driver search path {:?}: {}", dir_path, e);
                return Vec::new();
            }
        };

        let mut found: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(is_driver_file_name)
                    .unwrap_or(false)
            })
            .collect();

        // 目录遍历顺序不稳定，排序保证驱动编号可复现
        found.sort();
        found
    }
}

impl ModuleLoader for LibraryModuleLoader {
    fn candidates(&self) -> Vec<DriverCandidate> {
        if !self.config.alt_drivers.is_empty() {
            info!("Using alternate driver list ({} entries)", self.config.alt_drivers.len());
            return self
                .config
                .alt_drivers
                .iter()
                .cloned()
                .map(DriverCandidate::Library)
                .collect();
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for search_path in &self.config.search_paths {
            for path in self.scan_directory(search_path) {
                if seen.insert(path.clone()) {
                    candidates.push(DriverCandidate::Library(path));
                }
            }
        }

        for name in &self.config.default_names {
            let path = PathBuf::from(name);
            if seen.insert(path.clone()) {
                candidates.push(DriverCandidate::Library(path));
            }
        }

        debug!("Found {} driver candidates", candidates.len());
        candidates
    }

    fn load(&self, candidate: &DriverCandidate) -> Result<Arc<dyn DriverModule>> {
        let path = match candidate {
            DriverCandidate::Library(path) => path,
            DriverCandidate::Static(name) => {
                return Err(LoaderError::module_load(name, "static module requested from library loader"));
            }
        };

        // SAFETY: 加载驱动库会执行其初始化代码，驱动模块被信任
        let library = unsafe { Library::new(path) }
            .map_err(|e| LoaderError::module_load(&path.display().to_string(), &e.to_string()))?;

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();

        info!("Loaded driver module from: {:?}", path);
        Ok(Arc::new(LibraryModule {
            name,
            path: path.clone(),
            library,
        }))
    }
}

/// 判断文件名是否像驱动库
///
/// 加载器自身及各层的库不作为驱动。
pub fn is_driver_file_name(file_name: &str) -> bool {
    const EXCLUDED: [&str; 3] = ["ze_loader", "ze_tracing_layer", "ze_validation_layer"];

    let stem = if cfg!(windows) {
        match file_name.strip_suffix(".dll") {
            Some(stem) => stem,
            None => return false,
        }
    } else {
        match file_name.strip_prefix("lib").and_then(|rest| rest.split(".so").next()) {
            Some(stem) if file_name.contains(".so") => stem,
            _ => return false,
        }
    };

    stem.starts_with("ze_") && !EXCLUDED.contains(&stem)
}

/// 进程内驱动模块，由符号表构成
#[derive(Clone)]
pub struct StaticDriverModule {
    name: String,
    symbols: HashMap<String, DriverEntryFn>,
}

impl StaticDriverModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// 按符号名注册入口函数
    pub fn with_symbol(mut self, symbol: &str, function: DriverEntryFn) -> Self {
        self.symbols.insert(symbol.to_string(), function);
        self
    }

    /// 按入口点注册入口函数
    pub fn with_entry(self, entry: EntryPoint, function: DriverEntryFn) -> Self {
        self.with_symbol(entry.symbol(), function)
    }
}

impl DriverModule for StaticDriverModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self, symbol: &str) -> Option<DriverEntryFn> {
        self.symbols.get(symbol).copied()
    }
}

/// 进程内模块加载器
#[derive(Clone, Default)]
pub struct StaticModuleLoader {
    modules: Vec<Arc<StaticDriverModule>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: StaticDriverModule) -> Self {
        if self.modules.iter().any(|existing| existing.name == module.name) {
            warn!("Static driver module '{}' registered twice, keeping the first", module.name);
            return self;
        }
        self.modules.push(Arc::new(module));
        self
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn candidates(&self) -> Vec<DriverCandidate> {
        self.modules
            .iter()
            .map(|module| DriverCandidate::Static(module.name.clone()))
            .collect()
    }

    fn load(&self, candidate: &DriverCandidate) -> Result<Arc<dyn DriverModule>> {
        match candidate {
            DriverCandidate::Static(name) => self
                .modules
                .iter()
                .find(|module| &module.name == name)
                .map(|module| module.clone() as Arc<dyn DriverModule>)
                .ok_or_else(|| LoaderError::module_load(name, "no such static module")),
            DriverCandidate::Library(path) => Err(LoaderError::module_load(
                &path.display().to_string(),
                "library requested from static loader",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::entry_points::DriverCallArgs;
    use tempfile::TempDir;

    unsafe extern "C" fn noop(_args: *mut DriverCallArgs) -> i32 {
        0
    }

    #[cfg(unix)]
    #[test]
    fn test_driver_file_name_filter() {
        assert!(is_driver_file_name("libze_intel_gpu.so.1"));
        assert!(is_driver_file_name("libze_null.so"));
        assert!(!is_driver_file_name("libze_loader.so.1"));
        assert!(!is_driver_file_name("libze_tracing_layer.so.1"));
        assert!(!is_driver_file_name("libcuda.so.1"));
        assert!(!is_driver_file_name("ze_intel_gpu.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_library_candidates_scan_search_paths() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("libze_b.so.1"), b"").unwrap();
        std::fs::write(temp_dir.path().join("libze_a.so.1"), b"").unwrap();
        std::fs::write(temp_dir.path().join("libze_loader.so.1"), b"").unwrap();
        std::fs::write(temp_dir.path().join("README"), b"").unwrap();

        let loader = LibraryModuleLoader::new(DriverDiscoveryConfig {
            search_paths: vec![temp_dir.path().to_path_buf()],
            alt_drivers: vec![],
            default_names: vec!["libze_intel_gpu.so.1".to_string()],
            ..Default::default()
        });

        let candidates = loader.candidates();
        assert_eq!(
            candidates,
            vec![
                DriverCandidate::Library(temp_dir.path().join("libze_a.so.1")),
                DriverCandidate::Library(temp_dir.path().join("libze_b.so.1")),
                DriverCandidate::Library(PathBuf::from("libze_intel_gpu.so.1")),
            ]
        );
    }

    #[test]
    fn test_alt_drivers_replace_discovery() {
        let loader = LibraryModuleLoader::new(DriverDiscoveryConfig {
            search_paths: vec![PathBuf::from("/nonexistent")],
            alt_drivers: vec![PathBuf::from("/opt/custom/libze_custom.so")],
            default_names: vec!["libze_intel_gpu.so.1".to_string()],
            ..Default::default()
        });

        assert_eq!(
            loader.candidates(),
            vec![DriverCandidate::Library(PathBuf::from("/opt/custom/libze_custom.so"))]
        );
    }

    #[test]
    fn test_library_load_failure_is_reported() {
        let loader = LibraryModuleLoader::new(DriverDiscoveryConfig::default());
        let result = loader.load(&DriverCandidate::Library(PathBuf::from("/nonexistent/libze_missing.so")));
        assert!(matches!(result, Err(LoaderError::ModuleLoad { .. })));
    }

    #[test]
    fn test_static_loader() {
        let loader = StaticModuleLoader::new()
            .with_module(StaticDriverModule::new("gpu").with_entry(EntryPoint::DriverGet, noop))
            .with_module(StaticDriverModule::new("gpu"));

        assert_eq!(loader.candidates(), vec![DriverCandidate::Static("gpu".to_string())]);

        let module = loader.load(&DriverCandidate::Static("gpu".to_string())).unwrap();
        assert_eq!(module.name(), "gpu");
        assert!(module.symbol("zeDriverGet").is_some());
        assert!(module.symbol("zeDeviceGet").is_none());

        assert!(loader.load(&DriverCandidate::Static("npu".to_string())).is_err());
    }
}
