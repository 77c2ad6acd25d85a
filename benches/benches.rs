use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use siglent_logger::{
    instrument::parse_trace,
    waterfall::{mean_frequency, peak_centers, snr, windowed, PeakCenter, Spectrogram},
};

// One hour of sweeps at the default 2 s cadence
const SWEEPS: usize = 1800;
// Points per trace on the SSA3000X
const BINS: usize = 751;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let spectrogram = Spectrogram {
        spectra: Array2::from_shape_fn((SWEEPS, BINS), |_| rng.gen_range(-100.0..-20.0)),
        times: Array1::linspace(0.0, 2.0 * SWEEPS as f64, SWEEPS + 1),
        freqs: Array1::linspace(0.0, 100.0, BINS),
    };
    let raw_trace: String = (0..BINS)
        .map(|_| format!("{:.4},", rng.gen_range(-100.0..-20.0)))
        .collect();

    c.bench_function("trace parsing", |b| {
        b.iter(|| parse_trace(black_box(&raw_trace)))
    });

    c.bench_function("peak tracking", |b| {
        b.iter(|| peak_centers(black_box(&spectrogram), PeakCenter::Track, 5.0))
    });

    let centers = peak_centers(&spectrogram, PeakCenter::SpanCenter, 5.0);
    c.bench_function("windowing", |b| {
        b.iter(|| windowed(black_box(&spectrogram), black_box(&centers), 12.0))
    });

    let (db, linear) = windowed(&spectrogram, &centers, 12.0);
    c.bench_function("snr", |b| b.iter(|| snr(black_box(&db))));
    c.bench_function("mean frequency", |b| {
        b.iter(|| mean_frequency(black_box(&linear), black_box(&spectrogram.freqs)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
