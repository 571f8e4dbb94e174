use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use cv_sgm::aggregate::aggregate_costs;
use cv_sgm::cost::compute_costs;
use cv_sgm::prelude::*;
use image::{GrayImage, Luma};

fn texture(x: u32, y: u32) -> u8 {
    ((x * 71 + y * 29 + (x * y * 7) % 31 + (y * y * 3) % 17) % 256) as u8
}

fn sgm_bench(c: &mut Criterion) {
    // Build a synthetic pair with a disparity of 12
    let left = GrayImage::from_fn(320, 240, |x, y| Luma([texture(x, y)]));
    let right = GrayImage::from_fn(320, 240, |x, y| Luma([texture(x + 12, y)]));

    let params = Params::new()
        .with_window(2)
        .with_max_disparity(32)
        .with_penalties(100.0, 1000.0);

    let costs = compute_costs(&left, &right, params.half_window_size, params.max_disparity)
        .unwrap();

    let mut pipeline = SgmPipeline::new(CpuEnvironment::new().unwrap());

    c.bench_function("sad cost 320x240x32", |b| {
        b.iter(|| compute_costs(black_box(&left), black_box(&right), 2, 32))
    });
    c.bench_function("aggregation 320x240x32", |b| {
        b.iter(|| aggregate_costs(black_box(&costs), 100.0, 1000.0))
    });
    c.bench_function("sgm pipeline 320x240x32", |b| {
        b.iter(|| pipeline.process(black_box(&left), black_box(&right), &params))
    });
}

criterion_group!(benches, sgm_bench);
criterion_main!(benches);
