//! ze_loader_info - 加载器诊断工具
//!
//! 按配置初始化加载器，列出驱动、组件版本和层状态

use anyhow::Context;
use std::env;
use std::path::Path;
use ze_loader::{
    config::generate_default_config_file,
    drivers::{DriverState, LibraryModuleLoader},
    init_logging, LayerKind, Loader, LoaderConfig,
};

const DEFAULT_CONFIG_PATH: &str = "ze_loader_config.yaml";

/// 程序入口点
#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("❌ ze_loader_info failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// 主要逻辑函数
async fn run_main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.len() {
        1 => report(LoaderConfig::from_env()),
        2 => match args[1].as_str() {
            "init" => generate_config_file().await,
            "-h" | "--help" => {
                print_usage();
                Ok(())
            }
            path => {
                if !Path::new(path).exists() {
                    anyhow::bail!("config file not found: {} (use 'ze_loader_info init' to create one)", path);
                }
                let config = LoaderConfig::load_from_file(path)
                    .await
                    .with_context(|| format!("loading {}", path))?;
                report(config)
            }
        },
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// 初始化加载器并打印诊断信息
fn report(config: LoaderConfig) -> anyhow::Result<()> {
    init_logging(&config.logging);

    let loader = Loader::global();
    let module_loader = LibraryModuleLoader::new(config.drivers.clone());
    loader
        .initialize(&config, &module_loader)
        .context("initializing loader")?;
    let _shutdown = loader.shutdown_guard();

    let drivers = loader.drivers()?;
    println!("Drivers ({}):", drivers.len());
    if drivers.is_empty() {
        println!("  (none found)");
    }
    for driver in &drivers {
        match driver.state {
            DriverState::Loaded => println!(
                "  ✅ {} {} API {} ({} entry points)",
                driver.id,
                driver.name,
                driver.api_version.as_deref().unwrap_or("?"),
                driver.resolved_entry_points
            ),
            state => println!(
                "  ❌ {} {} {:?}: {}",
                driver.id,
                driver.name,
                state,
                driver.failure.as_deref().unwrap_or("released")
            ),
        }
    }

    let count = loader.get_versions(None)?;
    println!("Components ({}):", count);
    for component in loader.context()?.versions().components() {
        println!(
            "  {:<16} spec {} library {}",
            component.component_name, component.spec_version, component.component_lib_version
        );
    }

    let layers = loader.enabled_layers()?;
    println!("Layers:");
    for layer in LayerKind::ALL {
        println!("  {:<16} {}", layer, if layers.contains(layer) { "enabled" } else { "disabled" });
    }

    if env::var("ZE_LOADER_INFO_JSON").is_ok() {
        println!("{}", serde_json::to_string_pretty(&drivers)?);
    }
    Ok(())
}

/// 生成默认配置文件
async fn generate_config_file() -> anyhow::Result<()> {
    generate_default_config_file(DEFAULT_CONFIG_PATH).await?;
    println!("✅ Wrote default configuration to {}", DEFAULT_CONFIG_PATH);
    println!("🔧 Edit it, then run: ze_loader_info {}", DEFAULT_CONFIG_PATH);
    Ok(())
}

/// 打印使用说明
fn print_usage() {
    println!("ze_loader_info {}", ze_loader::VERSION);
    println!();
    println!("Usage:");
    println!("  ze_loader_info                 # configure from environment variables");
    println!("  ze_loader_info init            # write {}", DEFAULT_CONFIG_PATH);
    println!("  ze_loader_info <config_file>   # configure from a YAML/TOML/JSON file");
    println!();
    println!("Environment:");
    println!("  ZE_ENABLE_ALT_DRIVERS, ZE_ENABLE_TRACING_LAYER, ZE_ENABLE_VALIDATION_LAYER,");
    println!("  ZE_ENABLE_LOADER_INTERCEPT, ZEL_ENABLE_LOADER_LOGGING, ZEL_LOADER_LOGGING_LEVEL");
}
