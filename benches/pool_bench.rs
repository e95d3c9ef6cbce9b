//! Memory Resource Benchmark Suite
//!
//! Compares allocation cost across resources on the simulated device:
//! - direct device allocation (one driver call per request)
//! - pooled allocation, single-threaded and behind the thread-safety adaptor
//! - pooled allocation with several threads on separate streams
//! - fragmentation after a random allocate/free workload
//!
//! Run with: `cargo bench --bench pool_bench`

use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hipmr::backend::{SharedAllocator, SimulatedDevice};
use hipmr::mr::{DirectResource, PoolConfig, PoolResource, SharedResource, ThreadSafeResource};
use hipmr::{DeviceMemoryResource, DevicePtr, StreamHandle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

const DEVICE_CAPACITY: usize = 32 * 1024 * MB;

struct BenchmarkResult {
    name: String,
    iterations: usize,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn report(&self) {
        let total: Duration = self.durations.iter().sum();
        let avg = total / self.iterations as u32;

        let mut sorted = self.durations.clone();
        sorted.sort();
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let p50 = sorted[sorted.len() / 2];
        let p95 = sorted[(sorted.len() * 95) / 100];

        println!("\n=== {} ===", self.name);
        println!("Iterations: {}", self.iterations);
        println!("Average: {:?} ({:.3} ms)", avg, avg.as_secs_f64() * 1000.0);
        println!("Min:     {:?}", min);
        println!("Max:     {:?}", max);
        println!("P50:     {:?}", p50);
        println!("P95:     {:?}", p95);
    }

    fn avg_ms(&self) -> f64 {
        let total: Duration = self.durations.iter().sum();
        (total / self.iterations as u32).as_secs_f64() * 1000.0
    }
}

struct Benchmark {
    name: String,
    iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
        }
    }

    fn run<F: FnMut()>(&self, mut f: F) -> BenchmarkResult {
        // Warmup
        for _ in 0..3 {
            f();
        }

        let durations = (0..self.iterations)
            .map(|_| {
                let start = Instant::now();
                f();
                start.elapsed()
            })
            .collect();

        BenchmarkResult {
            name: self.name.clone(),
            iterations: self.iterations,
            durations,
        }
    }
}

fn simulated_direct() -> SharedResource {
    let allocator: SharedAllocator = Arc::new(SimulatedDevice::new(DEVICE_CAPACITY));
    Arc::new(DirectResource::device(allocator))
}

fn pool(initial: usize) -> PoolResource {
    PoolResource::new(
        simulated_direct(),
        PoolConfig::new().with_initial_pool_size(initial),
    )
    .expect("failed to create pool")
}

/// Random sizes up to `max_size`, fixed seed so every resource sees the
/// same workload
fn workload(count: usize, max_size: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    (0..count).map(|_| rng.gen_range(1..=max_size)).collect()
}

/// Allocate everything, then free in reverse
fn allocate_all_free_all(mr: &dyn DeviceMemoryResource, sizes: &[usize], stream: StreamHandle) {
    let ptrs: Vec<DevicePtr> = sizes
        .iter()
        .map(|&bytes| black_box(mr.allocate(bytes, stream).expect("allocation failed")))
        .collect();
    for (ptr, &bytes) in ptrs.iter().zip(sizes).rev() {
        mr.deallocate(*ptr, bytes, stream);
    }
}

fn benchmark_allocate_free_cycle() -> Vec<BenchmarkResult> {
    println!("\n[Allocate/Free Cycle]");
    println!("======================");
    println!("1000 random allocations up to 64 KB, all live, then freed");

    let sizes = workload(1000, 64 * KB);
    let mut results = Vec::new();

    let direct = simulated_direct();
    let result = Benchmark::new("Direct device resource", 50)
        .run(|| allocate_all_free_all(&*direct, &sizes, StreamHandle::DEFAULT));
    result.report();
    results.push(result);

    let bare = pool(256 * MB);
    let result = Benchmark::new("Pool (single thread, no lock)", 50)
        .run(|| allocate_all_free_all(&bare, &sizes, StreamHandle::DEFAULT));
    result.report();
    results.push(result);

    let locked = ThreadSafeResource::new(pool(256 * MB));
    let result = Benchmark::new("Pool behind ThreadSafeResource", 50)
        .run(|| allocate_all_free_all(&locked, &sizes, StreamHandle::DEFAULT));
    result.report();
    results.push(result);

    results
}

fn benchmark_pool_growth() -> BenchmarkResult {
    println!("\n[Pool Growth]");
    println!("==============");
    println!("Fresh 1 MB pool grown to hold 512 MB of 1 MB blocks");

    let sizes = vec![MB; 512];
    let result = Benchmark::new("Pool growth from 1 MB", 20).run(|| {
        let pool = pool(MB);
        allocate_all_free_all(&pool, &sizes, StreamHandle::DEFAULT);
        black_box(pool.stats().reservations);
    });
    result.report();
    result
}

fn benchmark_multithreaded_streams() -> BenchmarkResult {
    println!("\n[Multi-threaded, one stream per thread]");
    println!("=========================================");

    let threads = 4;
    let sizes = workload(500, 256 * KB);
    let shared: SharedResource = Arc::new(ThreadSafeResource::new(pool(512 * MB)));

    let result = Benchmark::new(&format!("Shared pool, {} threads", threads), 20).run(|| {
        thread::scope(|scope| {
            for t in 0..threads {
                let (mr, sizes) = (&shared, &sizes);
                scope.spawn(move || {
                    allocate_all_free_all(&**mr, sizes, StreamHandle::from_raw(t + 1));
                });
            }
        });
    });
    result.report();
    result
}

fn benchmark_fragmentation() {
    println!("\n[Fragmentation]");
    println!("================");
    println!("Random allocate/free mix, half of the live set kept");

    let pool = pool(64 * MB);
    let sizes = workload(4000, 128 * KB);
    let mut rng = StdRng::seed_from_u64(7);
    let mut live: Vec<(DevicePtr, usize)> = Vec::new();

    let start = Instant::now();
    for &bytes in &sizes {
        if !live.is_empty() && rng.gen_bool(0.45) {
            let (ptr, bytes) = live.swap_remove(rng.gen_range(0..live.len()));
            pool.deallocate(ptr, bytes, StreamHandle::DEFAULT);
        }
        let ptr = pool
            .allocate(bytes, StreamHandle::DEFAULT)
            .expect("allocation failed");
        live.push((ptr, bytes));
    }
    let elapsed = start.elapsed();

    let stats = pool.stats();
    println!("  Operations:    {} in {:?}", sizes.len(), elapsed);
    println!("  Pool size:     {} MB", stats.pool_size / MB);
    println!("  Peak in use:   {} MB", stats.peak_allocated_bytes / MB);
    println!("  Free blocks:   {}", stats.free_blocks);
    println!("  Fragmentation: {:.2}%", pool.fragmentation() * 100.0);

    for (ptr, bytes) in live {
        pool.deallocate(ptr, bytes, StreamHandle::DEFAULT);
    }
}

fn print_summary(cycle: &[BenchmarkResult], growth: &BenchmarkResult, mt: &BenchmarkResult) {
    println!("\n[Summary]");
    println!("==========");
    for result in cycle.iter().chain([growth, mt]) {
        println!("  {:<40} {:>10.3} ms", result.name, result.avg_ms());
    }
}

fn main() {
    println!("====================================");
    println!("hipmr Memory Resource Benchmarks");
    println!("====================================");

    hipmr::logging::init_logging_default();

    let cycle = benchmark_allocate_free_cycle();
    let growth = benchmark_pool_growth();
    let mt = benchmark_multithreaded_streams();
    benchmark_fragmentation();

    print_summary(&cycle, &growth, &mt);

    println!("\n====================================");
    println!("Benchmark Complete");
    println!("====================================");
}
