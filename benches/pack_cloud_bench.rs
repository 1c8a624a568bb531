// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmark for point cloud packing with axis remapping
//!
//! Run with: cargo bench --bench pack_cloud_bench

use std::time::{Duration, Instant};
use stereopub::camera::CoordinateConvention;
use stereopub::msg::pack_cloud;
use stereopub::remap::AxisMap;

const WIDTH: usize = 1280;
const HEIGHT: usize = 720;
const ITERATIONS: usize = 200;

fn make_points() -> Vec<[f32; 4]> {
    (0..WIDTH * HEIGHT)
        .map(|i| {
            let x = (i % WIDTH) as f32 * 0.01;
            let y = (i / WIDTH) as f32 * 0.01;
            let z = 2.0 + (i as f32 * 0.001).sin();
            let color = f32::from_bits(0x00c0_8040 | (i as u32 & 0xff) << 24);
            [x, y, z, color]
        })
        .collect()
}

fn bench(name: &str, map: &AxisMap, points: &[[f32; 4]]) {
    // Warmup
    for _ in 0..10 {
        std::hint::black_box(pack_cloud(points, map));
    }

    let mut total = Duration::ZERO;
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        std::hint::black_box(pack_cloud(points, map));
        total += start.elapsed();
    }

    let per_iter = total / ITERATIONS as u32;
    let mpts = points.len() as f64 / per_iter.as_secs_f64() / 1e6;
    println!("{name:24} {per_iter:>10.2?}/frame  {mpts:>8.1} Mpts/s");
}

fn main() {
    let points = make_points();
    println!(
        "pack_cloud: {}x{} points, {} iterations",
        WIDTH, HEIGHT, ITERATIONS
    );

    bench(
        "identity remap",
        &AxisMap::for_convention(CoordinateConvention::RightHandedZUpXFwd),
        &points,
    );
    bench(
        "camera-optical remap",
        &AxisMap::for_convention(CoordinateConvention::CameraOptical),
        &points,
    );
}
