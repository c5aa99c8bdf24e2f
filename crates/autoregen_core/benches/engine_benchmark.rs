//! Benchmark for the restore pass and snapshot persistence.
//!
//! TARGET: a 1M-cell volume diffed in well under a second
//!
//! Run with: cargo bench --package autoregen_core --bench engine_benchmark

use std::collections::HashMap;

use autoregen_core::memory::{MemoryAgents, MemoryWorld};
use autoregen_core::snapshot::format;
use autoregen_core::{
    Agent, CellAddress, CellRecord, ExclusionSet, ProtectionOracle, RegenerationEngine, Snapshot,
    VolumeAccess, VolumeId,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// `side x side` columns, `depth` cells deep.
fn terrain(side: i32, depth: i32) -> (MemoryWorld, Snapshot) {
    let volume = VolumeId::from("world");
    let host = MemoryWorld::new();
    host.fill_box(
        &volume,
        CellAddress::new(0, 0, 0),
        CellAddress::new(side - 1, depth - 1, side - 1),
        CellRecord::new(1),
    );
    let mut cells = HashMap::new();
    host.for_each_resident_cell(&volume, &mut |a: CellAddress, r: CellRecord| {
        cells.insert(a, r);
    })
    .unwrap();
    (host, Snapshot::from_cells(volume, 0, cells))
}

fn benchmark_unchanged_pass(c: &mut Criterion) {
    // 256x256 columns, 16 deep = 1M cells
    let (host, snapshot) = terrain(256, 16);
    let engine = RegenerationEngine::new(u64::MAX);
    let exclusions = ExclusionSet::new();

    let mut group = c.benchmark_group("restore_pass");
    group.sample_size(10);
    group.throughput(Throughput::Elements(snapshot.len() as u64));
    group.bench_function("1m_cells_unchanged", |b| {
        b.iter(|| black_box(engine.run(&host, snapshot.volume(), &snapshot, &exclusions).unwrap()));
    });
    group.finish();
}

fn benchmark_protected_pass(c: &mut Criterion) {
    let (host, snapshot) = terrain(256, 16);
    let agents = MemoryAgents::new();
    // 9x9 region zone around region [4,4], about a third of the area
    agents.place(snapshot.volume(), Agent { id: 1, position: CellAddress::new(64, 20, 64) });
    let exclusions = ProtectionOracle::new(&agents, 4)
        .compute_exclusions(snapshot.volume())
        .unwrap();
    let engine = RegenerationEngine::new(u64::MAX);

    c.bench_function("restore_pass_with_exclusions", |b| {
        b.iter(|| black_box(engine.run(&host, snapshot.volume(), &snapshot, &exclusions).unwrap()));
    });
}

fn benchmark_exclusions(c: &mut Criterion) {
    let volume = VolumeId::from("world");
    let agents = MemoryAgents::new();
    for id in 0..500u64 {
        let offset = i32::try_from(id).unwrap() * 37;
        agents.place(&volume, Agent { id, position: CellAddress::new(offset, 64, -offset) });
    }

    c.bench_function("exclusions_500_agents_radius_10", |b| {
        let oracle = ProtectionOracle::new(&agents, 10);
        b.iter(|| black_box(oracle.compute_exclusions(&volume).unwrap()));
    });
}

fn benchmark_snapshot_encode(c: &mut Criterion) {
    let (_, snapshot) = terrain(128, 16);
    let mut group = c.benchmark_group("snapshot_format");
    group.throughput(Throughput::Elements(snapshot.len() as u64));

    group.bench_function("encode_262k_cells", |b| {
        b.iter(|| black_box(format::encode(&snapshot, Vec::new()).unwrap()));
    });

    let bytes = format::encode(&snapshot, Vec::new()).unwrap();
    group.bench_function("decode_262k_cells", |b| {
        b.iter(|| black_box(format::decode(&bytes).unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_unchanged_pass,
    benchmark_protected_pass,
    benchmark_exclusions,
    benchmark_snapshot_encode,
);

criterion_main!(benches);
