use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cv_stereo::block_matching::{BlockMatching, Params};
use cv_stereo::prelude::*;
use image::{GrayImage, Luma};

/// Synthetic flat plane: noise texture shifted horizontally between the cameras.
fn synthetic_pair(width: u32, height: u32, shift: u32) -> RectifiedPair {
    let mut state = 0x0f0f_3c3cu32;
    let mut left = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            left.put_pixel(x, y, Luma([(state >> 24) as u8]));
        }
    }

    let mut right = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            right.put_pixel(x, y, *left.get_pixel((x + shift) % width, y));
        }
    }

    RectifiedPair { left, right }
}

fn block_matching_bench(c: &mut Criterion) {
    let pair = synthetic_pair(160, 120, 8);

    let mut disp = BlockMatching::new(Params {
        min_disparity: 0,
        num_disparities: 32,
        block_size: 5,
        ..Default::default()
    });

    // Benchmark compute function
    c.bench_function("block_matching synthetic 160x120", |b| {
        b.iter(|| disp.compute(black_box(&pair)))
    });
}

criterion_group!(benches, block_matching_bench);
criterion_main!(benches);
