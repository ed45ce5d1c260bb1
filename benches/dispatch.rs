//! 分派路径基准：句柄翻译表与经过拦截链的完整调用

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ze_loader::core::HandleTable;
use ze_loader::drivers::DriverCallArgs;
use ze_loader::{
    ApiCall, ApiVersion, DriverId, EntryPoint, HandleTranslator, HandleType, Loader, LoaderConfig, StaticDriverModule,
    StaticModuleLoader,
};

unsafe extern "C" fn driver_get(args: *mut DriverCallArgs) -> i32 {
    let args = &mut *args;
    if !args.out_handles.is_null() && args.out_capacity > 0 {
        *args.out_handles = 0x1;
    }
    *args.out_count = 1;
    0
}

unsafe extern "C" fn api_version(args: *mut DriverCallArgs) -> i32 {
    *((*args).payload as *mut u32) = ApiVersion::CURRENT.raw();
    0
}

unsafe extern "C" fn noop(_args: *mut DriverCallArgs) -> i32 {
    0
}

fn bench_driver(name: &str) -> StaticDriverModule {
    StaticDriverModule::new(name)
        .with_entry(EntryPoint::DriverGet, driver_get)
        .with_entry(EntryPoint::DriverGetApiVersion, api_version)
        .with_entry(EntryPoint::DriverGetProperties, noop)
        .with_entry(EntryPoint::DeviceGet, noop)
        .with_entry(EntryPoint::ContextCreate, noop)
        .with_entry(EntryPoint::ContextDestroy, noop)
}

fn bench_loader(tracing: bool) -> Loader {
    let modules = StaticModuleLoader::new()
        .with_module(bench_driver("bench_a"))
        .with_module(bench_driver("bench_b"));

    let mut config = LoaderConfig::default();
    config.layers.enable_tracing = tracing;

    let loader = Loader::new();
    loader.initialize(&config, &modules).expect("bench loader");
    loader
}

fn benchmark_handle_table(c: &mut Criterion) {
    let table = HandleTable::new();
    let handles: Vec<_> = (0..1024u64)
        .map(|native| table.register(HandleType::Context, DriverId((native % 2) as usize), native))
        .collect();

    c.bench_function("handle_translate", |b| {
        let mut index = 0;
        b.iter(|| {
            index = (index + 1) % handles.len();
            black_box(table.translate(HandleType::Context, handles[index]))
        })
    });

    c.bench_function("handle_register_release", |b| {
        b.iter(|| {
            let handle = table.register(HandleType::Event, DriverId(0), black_box(0x42));
            table.release(HandleType::Event, handle)
        })
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    for (name, tracing) in [("dispatch_plain", false), ("dispatch_traced", true)] {
        let loader = bench_loader(tracing);
        let driver = loader.driver_get().expect("drivers")[0];

        c.bench_function(name, |b| {
            b.iter(|| loader.invoke(ApiCall::new(EntryPoint::DriverGetProperties, black_box(&[driver]))))
        });
    }
}

criterion_group!(benches, benchmark_handle_table, benchmark_dispatch);
criterion_main!(benches);
