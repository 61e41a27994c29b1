// ========================================================================================
//
//                       Linear pair index inversion benchmark
//
// ========================================================================================
//
// Every pair of a batch starts by turning its linear index back into a row pair, so the
// inversion sits on the hot path of every worker. This measures it across matrix sizes
// for strided index samples, together with the masked extraction that follows it.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use depmat::matrix::extract_into;
use depmat::{MaskedMatrix, inv_sym_idx, pair_count, sym_idx};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Matrix sizes (rows) to invert indices for.
const ROW_COUNTS: [usize; 4] = [1_000, 20_000, 100_000, 1_000_000];
/// Indices sampled per size.
const SAMPLES: usize = 4_096;
/// Columns of the extraction benchmark matrix.
const SAMPLE_COLUMNS: usize = 500;

fn bench_inversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("inv_sym_idx");
    group.throughput(Throughput::Elements(SAMPLES as u64));
    for n in ROW_COUNTS {
        let total = pair_count(n);
        let stride = (total / SAMPLES).max(1);
        let indices: Vec<usize> = (0..SAMPLES).map(|i| (i * stride) % total).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &indices, |b, indices| {
            b.iter(|| {
                let mut acc = 0usize;
                for &index in indices {
                    if let Ok((row, col)) = inv_sym_idx(black_box(index), n) {
                        acc ^= row ^ col;
                    }
                }
                acc
            })
        });
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let n = 50_000;
    let total = pair_count(n);
    c.bench_function("round_trip_50k", |b| {
        let mut index = 0usize;
        b.iter(|| {
            index = (index + 7_919) % total;
            inv_sym_idx(black_box(index), n).and_then(|(row, col)| sym_idx(row, col, n))
        })
    });
}

fn bench_extraction(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let values = Array2::from_shape_fn((2, SAMPLE_COLUMNS), |_| rng.gen_range(-1.0..1.0));
    let mask = Array2::from_shape_fn((2, SAMPLE_COLUMNS), |_| rng.gen_bool(0.1));
    let matrix = match MaskedMatrix::new(values, mask) {
        Ok(matrix) => matrix,
        Err(e) => panic!("benchmark matrix is invalid: {e}"),
    };
    let (row_a, mask_a) = matrix.row(0).expect("row 0");
    let (row_b, mask_b) = matrix.row(1).expect("row 1");

    let mut x = Vec::with_capacity(SAMPLE_COLUMNS);
    let mut y = Vec::with_capacity(SAMPLE_COLUMNS);
    c.bench_function("extract_into_500", |b| {
        b.iter(|| {
            extract_into(row_a, mask_a, row_b, mask_b, &mut x, &mut y).expect("equal lengths");
            black_box(x.len())
        })
    });
}

criterion_group!(benches, bench_inversion, bench_round_trip, bench_extraction);
criterion_main!(benches);
