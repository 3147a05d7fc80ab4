//! Scan setup micro-benchmark.
//!
//! Measures the host-side work done before every scan:
//! - session layout for colour and gray requests
//! - slope table construction for the scan and fast-feed ramps
//! - shading table computation and decimation for one calibration line

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use scan_common::hal::types::{ScanMode, ScanParams, StepType};
use scan_hal::calibration::ShadingTable;
use scan_hal::profiles::find_model;
use scan_hal::session::compute_session;
use scan_hal::slope::build_slope_table;

fn color_request() -> ScanParams {
    ScanParams {
        xres: 300,
        yres: 300,
        startx: 160,
        starty: 600,
        pixels: 2480,
        lines: 3300,
        depth: 8,
        channels: 3,
        scan_mode: ScanMode::Color,
        ..ScanParams::default()
    }
}

fn bench_compute_session(c: &mut Criterion) {
    let model = find_model("cis-flatbed").unwrap();
    let color = color_request();
    let gray = ScanParams {
        channels: 1,
        scan_mode: ScanMode::Gray,
        depth: 16,
        ..color_request()
    };

    c.bench_function("compute_session_color", |b| {
        b.iter(|| compute_session(&model, black_box(&color), &model.sensor))
    });
    c.bench_function("compute_session_gray16", |b| {
        b.iter(|| compute_session(&model, black_box(&gray), &model.sensor))
    });
}

fn bench_slope_tables(c: &mut Criterion) {
    let model = find_model("cis-flatbed").unwrap();
    let motor = &model.motor;

    c.bench_function("slope_table_scan", |b| {
        b.iter(|| {
            build_slope_table(
                black_box(900),
                11000,
                motor.base_ydpi,
                StepType::Half,
                1,
                motor.motor_id,
                &motor.profiles,
            )
        })
    });
    c.bench_function("slope_table_fast", |b| {
        b.iter(|| {
            build_slope_table(
                black_box(75),
                11000,
                motor.base_ydpi,
                StepType::Half,
                4,
                motor.motor_id,
                &motor.profiles,
            )
        })
    });
}

fn bench_shading(c: &mut Criterion) {
    let pixels = 2550;
    let channels = 3;
    let dark: Vec<u16> = (0..pixels * channels).map(|i| 2000 + (i % 17) as u16).collect();
    let white: Vec<u16> = (0..pixels * channels).map(|i| 36000 - (i % 53) as u16 * 40).collect();

    c.bench_function("shading_compute", |b| {
        b.iter(|| ShadingTable::compute(black_box(&dark), black_box(&white), pixels, channels))
    });

    let table = ShadingTable::compute(&dark, &white, pixels, channels).unwrap();
    c.bench_function("shading_decimate", |b| {
        b.iter(|| table.decimate(black_box(1), 20, 2, 1240))
    });
}

criterion_group!(
    benches,
    bench_compute_session,
    bench_slope_tables,
    bench_shading
);
criterion_main!(benches);
