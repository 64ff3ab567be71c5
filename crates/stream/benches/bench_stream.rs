use std::hint::black_box;
use std::time::{Duration, Instant};

use cellfield_common::{Cell, CellCoord, TypeStyle};
use cellfield_stream::{
    DimensionDescriptor, InMemorySource, RegionCalculator, RegionLimits, StreamConfig,
    StreamCoordinator, WorkingSet,
};

fn make_cells(side: i32, layers: i32) -> Vec<Cell> {
    let mut cells = Vec::with_capacity((side * side * layers) as usize);
    for x in 0..side {
        for y in 0..side {
            for z in 0..layers {
                cells.push(Cell::new(CellCoord::new(x, y, z), "tierra"));
            }
        }
    }
    cells
}

fn bench_merge(side: i32, iterations: usize) {
    let cells = make_cells(side, 4);
    let count = cells.len();

    let start = Instant::now();
    for _ in 0..iterations {
        let mut ws = WorkingSet::new();
        let _ = black_box(ws.merge(black_box(cells.iter().cloned()), usize::MAX));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  merge ({count} cells, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_evict(side: i32, cap: usize, iterations: usize) {
    let cells = make_cells(side, 4);
    let count = cells.len();

    let mut total = Duration::ZERO;
    for _ in 0..iterations {
        let mut ws = WorkingSet::new();
        ws.merge(cells.iter().cloned(), usize::MAX);
        let start = Instant::now();
        let _ = black_box(ws.evict(black_box(CellCoord::new(0, 0, 0)), 40, cap));
        total += start.elapsed();
    }
    let per_iter = total / iterations as u32;
    println!(
        "  evict ({count} -> {cap} cells, {iterations} iters): {per_iter:?}/iter, total {total:?}"
    );
}

fn bench_coordinator_walk(side: i32, steps: usize) {
    let source = InMemorySource::new(make_cells(side, 2), vec![TypeStyle::new("tierra")]);
    let mut ws = WorkingSet::new();
    let mut coordinator = StreamCoordinator::new(
        StreamConfig {
            cooldown_ms: 0,
            ..StreamConfig::default()
        },
        RegionCalculator::new(RegionLimits::default()),
    );
    let dim = DimensionDescriptor {
        width_m: side as f32 * 0.25,
        depth_m: side as f32 * 0.25,
        ..DimensionDescriptor::default()
    };
    if let Err(err) = coordinator.load_initial(&dim, &mut ws, &source) {
        println!("  walk skipped: {err}");
        return;
    }

    let t0 = Instant::now();
    let start = Instant::now();
    for i in 0..steps {
        // Viewer walks diagonally across the world.
        let d = (i as f32 / steps as f32) * side as f32 * 0.25;
        let viewer = glam::Vec3::new(d, 2.0, d);
        let now = t0 + Duration::from_millis(i as u64 * 16);
        let _ = black_box(coordinator.update(Some(viewer), &mut ws, &source, now));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / steps as u32;
    println!(
        "  coordinator walk ({} source cells, {steps} ticks, {} fetches): {per_iter:?}/tick, total {elapsed:?}",
        source.cell_count(),
        coordinator.stats().fetches_started
    );
}

fn main() {
    println!("=== Stream Benchmarks ===\n");

    println!("Working set merge:");
    bench_merge(32, 100);
    bench_merge(128, 10);

    println!("\nWorking set eviction:");
    bench_evict(64, 4_000, 20);
    bench_evict(128, 10_000, 5);

    println!("\nCoordinator walk:");
    bench_coordinator_walk(160, 1000);
    bench_coordinator_walk(400, 200);

    println!("\n=== Done ===");
}
