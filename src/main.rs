//! Pagebuf demo program
//!
//! Maps an anonymous reservation four times the buffer size, backed by an
//! in-memory store, and drives random faults at it from a few threads.
//! Configuration comes from an optional JSON file argument and `PAGEBUF_*`
//! environment variables.

// Use jemalloc as global allocator
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use pagebuf::config::BufferConfig;
use pagebuf::{FaultHandler, MappedMemory, MemoryStore, PageEngine, PagebufResult, Store};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{error, info};

const FAULT_THREADS: usize = 4;
const FAULTS_PER_THREAD: usize = 10_000;

fn load_config() -> PagebufResult<BufferConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => BufferConfig::from_json_file(path)?,
        None => BufferConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn run(config: BufferConfig) -> PagebufResult<()> {
    let page_size = config.page_size;
    let num_pages = config.buffer_size * 4;
    let len = num_pages * page_size;

    let memory = Arc::new(MappedMemory::reserve(len)?);
    let content: Vec<u8> = (0..len).map(|i| (i / page_size) as u8).collect();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::from_bytes(content));

    let fault: Arc<dyn FaultHandler> = memory.clone();
    let engine = Arc::new(PageEngine::new(config, fault)?);
    engine.map_region(memory.base(), len, Some(store), 0)?;

    let start = Instant::now();
    let threads: Vec<_> = (0..FAULT_THREADS)
        .map(|t| {
            let engine = engine.clone();
            let base = memory.base();
            thread::spawn(move || -> PagebufResult<()> {
                let mut rng = StdRng::seed_from_u64(t as u64);
                for i in 0..FAULTS_PER_THREAD {
                    let page = rng.gen_range(0..num_pages);
                    engine.handle_fault(base + page * page_size, i % 8 == 0)?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in threads {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => error!("fault thread panicked"),
        }
    }
    let elapsed = start.elapsed();

    engine.flush();
    info!(
        faults = FAULT_THREADS * FAULTS_PER_THREAD,
        elapsed_ms = elapsed.as_millis() as u64,
        snapshot = %engine.buffer().snapshot(),
        "workload completed"
    );
    engine.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    info!("Pagebuf demo starting...");

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => {
            info!("Pagebuf demo completed!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
