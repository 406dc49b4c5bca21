use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use keyhash::{hash, hash_record, hash_records, hash_records_parallel, GENERATOR_RECORD, DIGEST_LEN, RECORD_LEN};

fn packed_records(count: usize) -> Vec<u8> {
    let mut input = Vec::with_capacity(count * RECORD_LEN);
    for i in 0..count {
        let mut record = GENERATOR_RECORD;
        record[32] = (i >> 8) as u8;
        record[31] = i as u8;
        input.extend_from_slice(&record);
    }
    input
}

fn bench_hashing(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("hashing");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("sha256-1mb", |b| {
        b.iter(|| hash(black_box(&data)))
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("single-record-fast-path", |b| {
        b.iter(|| hash_record(black_box(&GENERATOR_RECORD)))
    });

    group.finish();
}

fn bench_records(c: &mut Criterion) {
    const COUNT: usize = 64 * 1024;
    let input = packed_records(COUNT);
    let mut output = vec![0u8; COUNT * DIGEST_LEN];

    let mut group = c.benchmark_group("records");
    group.throughput(Throughput::Elements(COUNT as u64));

    group.bench_function("sequential-64k", |b| {
        b.iter(|| hash_records(black_box(&input), &mut output))
    });

    group.bench_function("parallel-64k", |b| {
        b.iter(|| hash_records_parallel(black_box(&input), &mut output))
    });

    group.finish();
}

criterion_group!(benches, bench_hashing, bench_records);
criterion_main!(benches);
