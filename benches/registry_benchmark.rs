use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chunkjob::data::{Partition, PartitionIdx, RawStatus, Registry};
use chunkjob::scheduler::StatusTable;
use std::hint::black_box;

/// Whole-genome layout: 22 autosomes plus X at 5 Mb chunks
fn genome(chunk_length: u64) -> Vec<Partition> {
    let lengths: [u64; 23] = [
        249_250_621, 243_199_373, 198_022_430, 191_154_276, 180_915_260, 171_115_067,
        159_138_663, 146_364_022, 141_213_431, 135_534_747, 135_006_516, 133_851_895,
        115_169_878, 107_349_540, 102_531_392, 90_354_753, 81_195_210, 78_077_248,
        59_128_983, 63_025_520, 48_129_895, 51_304_566, 155_270_560,
    ];
    lengths
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let name = if i == 22 { "chrX".to_string() } else { format!("chr{}", i + 1) };
            let reference = format!("/ref/{}.legend.gz", name);
            Partition::new(PartitionIdx::new(i as u16), name, reference, len, chunk_length)
        })
        .collect()
}

/// Benchmark a read-only registry pass (what every sweep's bookkeeping does)
fn bench_registry_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_sweep");

    for chunk_mb in [5u64, 1] {
        let registry = Registry::initialize(genome(chunk_mb * 1_000_000), 6000);
        group.throughput(Throughput::Elements(registry.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("counts", format!("{}Mb", chunk_mb)),
            &registry,
            |b, registry| b.iter(|| black_box(registry.counts())),
        );
        group.bench_with_input(
            BenchmarkId::new("update_all", format!("{}Mb", chunk_mb)),
            &registry,
            |b, registry| {
                let keys = registry.keys();
                b.iter(|| {
                    for &key in &keys {
                        registry.update(key, |r| black_box(r.memory_mb));
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark raw status classification against the LSF table
fn bench_classify(c: &mut Criterion) {
    let table = StatusTable::default();
    let statuses = [
        RawStatus::new("RUN", None),
        RawStatus::new("PEND", None),
        RawStatus::new("DONE", Some(0)),
        RawStatus::new("EXIT", Some(130)),
        RawStatus::new("EXIT", Some(1)),
        RawStatus::new("ZOMBI", None),
    ];

    c.bench_function("status_classify", |b| {
        b.iter(|| {
            for raw in &statuses {
                black_box(table.classify(black_box(raw)));
            }
        })
    });
}

criterion_group!(benches, bench_registry_sweep, bench_classify);
criterion_main!(benches);
