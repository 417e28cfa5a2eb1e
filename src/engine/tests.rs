// Engine tests running the real fill and evict workers

use super::*;
use crate::buffer::BufferError;
use crate::page::PageState;
use crate::store::MemoryStore;
use crate::testing::{RecordingFaults, small_config};
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::{Duration, Instant};

const PAGE: usize = 4096;
const BASE: PageAddr = 0x4000_0000;
const OTHER_BASE: PageAddr = 0x5000_0000;

fn engine(config: BufferConfig) -> (PageEngine, Arc<RecordingFaults>) {
    let faults = Arc::new(RecordingFaults::new());
    let engine = PageEngine::new(config, faults.clone()).unwrap();
    (engine, faults)
}

fn wait_for<F: Fn() -> bool>(what: &str, done: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Faults `addr` and waits until its page is resident
fn touch(engine: &PageEngine, addr: PageAddr, is_write: bool) {
    engine.handle_fault(addr, is_write).unwrap();
    let page = addr & !(PAGE - 1);
    wait_for("page to become present", || {
        matches!(engine.buffer().page_info(page), Some(info) if info.state == PageState::Present)
    });
}

fn page_bytes(fill: u8) -> Vec<u8> {
    vec![fill; PAGE]
}

#[test]
fn test_read_fault_fills_from_store() {
    let (engine, faults) = engine(small_config(8));
    let mut content = page_bytes(0xab);
    content.extend_from_slice(&[0xcd; 100]);
    let store = Arc::new(MemoryStore::from_bytes(content));
    engine.map_region(BASE, 4 * PAGE, Some(store.clone()), 0).unwrap();

    touch(&engine, BASE + 123, false);
    let page = faults.page(BASE).unwrap();
    assert_eq!(page.data, page_bytes(0xab));
    assert!(page.write_protected);

    // Short read is zero filled
    touch(&engine, BASE + PAGE, false);
    let page = faults.page(BASE + PAGE).unwrap();
    assert!(page.data[..100].iter().all(|b| *b == 0xcd));
    assert!(page.data[100..].iter().all(|b| *b == 0));

    // Past the end of the store
    touch(&engine, BASE + 3 * PAGE, false);
    assert_eq!(faults.page(BASE + 3 * PAGE).unwrap().data, page_bytes(0));
    assert_eq!(store.read_count(), 3);
}

#[test]
fn test_store_offset_is_applied() {
    let (engine, faults) = engine(small_config(8));
    let mut content = page_bytes(1);
    content.extend(page_bytes(2));
    let store = Arc::new(MemoryStore::from_bytes(content));
    engine.map_region(BASE, PAGE, Some(store), PAGE as u64).unwrap();

    touch(&engine, BASE, false);
    assert_eq!(faults.page(BASE).unwrap().data, page_bytes(2));
}

#[test]
fn test_unknown_address() {
    let (engine, _faults) = engine(small_config(8));
    engine.map_region(BASE, 4 * PAGE, None, 0).unwrap();
    assert!(matches!(
        engine.handle_fault(BASE + 4 * PAGE, false),
        Err(PagebufError::UnknownAddress(_))
    ));
}

#[test]
fn test_write_fault_makes_page_writable() {
    let (engine, faults) = engine(small_config(8));
    engine.map_region(BASE, 4 * PAGE, None, 0).unwrap();

    touch(&engine, BASE, false);
    assert!(faults.page(BASE).unwrap().write_protected);
    touch(&engine, BASE, true);
    assert!(!faults.page(BASE).unwrap().write_protected);
    assert!(engine.buffer().page_info(BASE).unwrap().dirty);
}

#[test]
fn test_dirty_page_survives_eviction() {
    let (engine, faults) = engine(small_config(4));
    let store = Arc::new(MemoryStore::new());
    engine.map_region(BASE, 16 * PAGE, Some(store.clone()), 0).unwrap();

    touch(&engine, BASE, true);
    faults.write(BASE, 0, b"persist");

    for n in 1..9 {
        touch(&engine, BASE + n * PAGE, false);
    }
    wait_for("first page to be evicted", || engine.buffer().page_info(BASE).is_none());
    assert!(!faults.is_resident(BASE));
    assert!(RecordingFaults::count(&faults.releases) >= 1);
    assert_eq!(store.snapshot(0, 7), b"persist");

    touch(&engine, BASE, false);
    assert_eq!(&faults.page(BASE).unwrap().data[..7], b"persist");

    let snapshot = engine.buffer().snapshot();
    assert!(snapshot.busy <= 4);
    assert!(snapshot.capacity_consistent());
}

#[test]
fn test_flush_writes_without_evicting() {
    let (engine, faults) = engine(small_config(8));
    let store = Arc::new(MemoryStore::new());
    engine.map_region(BASE, 4 * PAGE, Some(store.clone()), 0).unwrap();

    touch(&engine, BASE + PAGE, true);
    faults.write(BASE + PAGE, 10, b"flushed");
    touch(&engine, BASE, false);

    engine.flush();
    assert_eq!(store.write_count(), 1);
    assert_eq!(store.snapshot(PAGE as u64 + 10, 7), b"flushed");

    let info = engine.buffer().page_info(BASE + PAGE).unwrap();
    assert_eq!(info.state, PageState::Present);
    assert!(!info.dirty);
    assert!(faults.page(BASE + PAGE).unwrap().write_protected);

    // Nothing dirty left
    engine.flush();
    assert_eq!(store.write_count(), 1);

    touch(&engine, BASE + PAGE, true);
    assert!(!faults.page(BASE + PAGE).unwrap().write_protected);
}

#[test]
fn test_unmap_with_other_region_active() {
    let (engine, faults) = engine(small_config(8));
    let store_a = Arc::new(MemoryStore::new());
    let store_b = Arc::new(MemoryStore::new());
    let a = engine.map_region(BASE, 8 * PAGE, Some(store_a.clone()), 0).unwrap();
    engine.map_region(OTHER_BASE, 8 * PAGE, Some(store_b), 0).unwrap();

    for n in 0..3 {
        touch(&engine, BASE + n * PAGE, false);
    }
    touch(&engine, OTHER_BASE, false);

    engine.unmap_region(&a).unwrap();

    assert_eq!(store_a.write_count(), 0);
    for n in 0..3 {
        assert!(!faults.is_resident(BASE + n * PAGE));
        assert!(engine.buffer().page_info(BASE + n * PAGE).is_none());
    }
    assert!(faults.is_resident(OTHER_BASE));
    assert_eq!(engine.buffer().busy_addresses(), vec![OTHER_BASE]);
    assert!(engine.context().region_for(BASE).is_none());

    let snapshot = engine.buffer().snapshot();
    assert!(snapshot.is_quiescent());
    assert!(snapshot.capacity_consistent());
}

#[test]
fn test_unmap_writes_dirty_pages_once() {
    let (engine, faults) = engine(small_config(8));
    let store_a = Arc::new(MemoryStore::new());
    let a = engine.map_region(BASE, 8 * PAGE, Some(store_a.clone()), 0).unwrap();
    engine.map_region(OTHER_BASE, 8 * PAGE, None, 0).unwrap();

    touch(&engine, BASE, true);
    faults.write(BASE, 0, b"keep");
    touch(&engine, OTHER_BASE, false);

    engine.unmap_region(&a).unwrap();
    assert_eq!(store_a.write_count(), 1);
    assert_eq!(store_a.snapshot(0, 4), b"keep");

    assert!(matches!(
        engine.unmap_region(&a),
        Err(PagebufError::UnknownRegion(id)) if id == a.id()
    ));
}

#[test]
fn test_unmap_last_region_drains_buffer() {
    let (engine, faults) = engine(small_config(8));
    let store = Arc::new(MemoryStore::new());
    let region = engine.map_region(BASE, 8 * PAGE, Some(store.clone()), 0).unwrap();

    for n in 0..5 {
        touch(&engine, BASE + n * PAGE, n == 2);
    }
    engine.unmap_region(&region).unwrap();

    assert_eq!(faults.resident_count(), 0);
    assert_eq!(RecordingFaults::count(&faults.installs), 5);
    assert_eq!(RecordingFaults::count(&faults.releases), 5);
    let snapshot = engine.buffer().snapshot();
    assert_eq!(snapshot.busy, 0);
    assert_eq!(snapshot.free, snapshot.capacity);
    assert_eq!(store.write_count(), 1);
}

#[test]
fn test_overlapping_map_rejected() {
    let (engine, _faults) = engine(small_config(8));
    engine.map_region(BASE, 8 * PAGE, None, 0).unwrap();
    assert!(matches!(
        engine.map_region(BASE + PAGE, PAGE, None, 0),
        Err(PagebufError::RegionOverlap(_, _))
    ));
}

#[test]
fn test_concurrent_faults_with_eviction() {
    let (engine, faults) = engine(small_config(16));
    let engine = Arc::new(engine);
    let store = Arc::new(MemoryStore::new());
    engine.map_region(BASE, 64 * PAGE, Some(store), 0).unwrap();

    let threads: Vec<_> = (0..4u64)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(t);
                for _ in 0..500 {
                    let n = rng.gen_range(0..64);
                    let offset = rng.gen_range(0..PAGE);
                    engine.handle_fault(BASE + n * PAGE + offset, rng.gen_bool(0.2)).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let snapshot = engine.buffer().snapshot();
    assert!(snapshot.capacity_consistent(), "{}", snapshot);
    assert!(snapshot.index_consistent);
    assert!(engine.buffer().stats().pages_deleted > 0);

    engine.shutdown();
    assert_eq!(faults.resident_count(), 0);
    assert_eq!(engine.buffer().snapshot().busy, 0);
}

#[test]
fn test_full_high_water_still_evicts() {
    let full = BufferConfig {
        evict_high_water_pct: 100,
        evict_low_water_pct: 100,
        ..small_config(4)
    };
    assert!(matches!(
        PageEngine::new(full, Arc::new(RecordingFaults::new())),
        Err(PagebufError::Config(_))
    ));

    let config = BufferConfig {
        evict_high_water_pct: 100,
        evict_low_water_pct: 99,
        ..small_config(4)
    };
    let (engine, faults) = engine(config);
    engine.map_region(BASE, 16 * PAGE, None, 0).unwrap();

    // Every fault past the fourth needs the evictor to free a slot
    for n in 0..10 {
        touch(&engine, BASE + n * PAGE, false);
    }
    assert!(RecordingFaults::count(&faults.releases) >= 6);
    let snapshot = engine.buffer().snapshot();
    assert!(snapshot.busy <= 4);
    assert!(snapshot.capacity_consistent(), "{}", snapshot);
}

#[test]
fn test_shutdown_is_idempotent() {
    let (engine, faults) = engine(small_config(8));
    engine.map_region(BASE, 8 * PAGE, None, 0).unwrap();
    touch(&engine, BASE, true);

    engine.shutdown();
    engine.shutdown();
    assert_eq!(engine.context().num_active_regions(), 0);
    assert_eq!(faults.resident_count(), 0);
}

struct FixedProbe(u64);

impl MemoryProbe for FixedProbe {
    fn mem_available_kb(&self) -> Result<u64, BufferError> {
        Ok(self.0)
    }
}

#[test]
fn test_adaptive_resize_grows_buffer() {
    let config = BufferConfig {
        adapt_freq_secs: 1,
        mem_margin_kb: 0,
        resize_slack_bytes: 0,
        ..small_config(8)
    };
    let faults = Arc::new(RecordingFaults::new());
    let engine =
        PageEngine::with_memory_probe(config, faults, Arc::new(FixedProbe(4096))).unwrap();

    wait_for("buffer to grow", || engine.buffer().snapshot().capacity == 1024);
    engine.shutdown();
}
