//! Benchmarks for per-cell access on the record store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;

use rowbase::columnar::{Float64Type, Row, Schema, SchemaOptions, StorageOptions};

const ROW_COUNTS: [usize; 3] = [1_000, 100_000, 1_000_000];

fn filled_schema(rows: usize, storage: StorageOptions) -> (Arc<Schema>, Float64Type) {
    let schema = Arc::new(
        Schema::with_options(
            SchemaOptions::new()
                .initial_capacity(rows)
                .increment(5000)
                .storage(storage),
        )
        .unwrap(),
    );
    let mz = Float64Type::new("mz");
    schema.add_data_type(&mz).unwrap();
    for _ in 0..rows {
        let row = Row::new(&schema).unwrap();
        row.set(&mz, row.index() as f64).unwrap();
    }
    (schema, mz)
}

fn bench_schema_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cell Read (Schema)");

    for &rows in &ROW_COUNTS {
        let (schema, mz) = filled_schema(rows, StorageOptions::heap());
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let mut sum = 0.0;
                for index in (0..rows).step_by(97) {
                    sum += schema.get(index, &mz).unwrap().unwrap_or(0.0);
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_column_handle_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cell Read (Column Handle)");

    for &rows in &ROW_COUNTS {
        let (schema, mz) = filled_schema(rows, StorageOptions::heap());
        let handle = schema.column(&mz).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let mut sum = 0.0;
                for index in (0..rows).step_by(97) {
                    sum += handle.get(index).unwrap_or(0.0);
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_rwlock_vec_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cell Read (RwLock<Vec>)");

    for &rows in &ROW_COUNTS {
        let cells: RwLock<Vec<Option<f64>>> = RwLock::new((0..rows).map(|i| Some(i as f64)).collect());
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let mut sum = 0.0;
                for index in (0..rows).step_by(97) {
                    sum += cells.read()[index].unwrap_or(0.0);
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_mapped_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cell Write (Mapped)");

    for &rows in &ROW_COUNTS {
        let (schema, mz) = filled_schema(rows, StorageOptions::mapped(1 << 16));
        let handle = schema.column(&mz).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                for index in (0..rows).step_by(97) {
                    black_box(handle.set(index, index as f64 * 2.0));
                }
            });
        });
    }

    group.finish();
}

fn bench_parallel_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Row Allocation (4 threads)");
    group.sample_size(20);

    for &rows in &[10_000usize, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let schema = Arc::new(Schema::new());
                let mz = Float64Type::new("mz");
                schema.add_data_type(&mz).unwrap();
                thread::scope(|scope| {
                    for _ in 0..4 {
                        let (schema, mz) = (&schema, &mz);
                        scope.spawn(move || {
                            for _ in 0..rows / 4 {
                                let row = Row::new(schema).unwrap();
                                row.set(mz, 1.0).unwrap();
                            }
                        });
                    }
                });
                black_box(schema.column_length())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_schema_get,
    bench_column_handle_get,
    bench_rwlock_vec_get,
    bench_mapped_set,
    bench_parallel_allocation
);
criterion_main!(benches);
