//! Criterion benchmarks for the pure wire encode/decode helpers on the hot
//! path of every exposure: monochromator goto/scan framing and mount
//! Alt/Az angle formatting, both pure functions with no transport.
//!
//! Run with: cargo bench --bench wire_codec

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pandora::devices::monochromator::wire as mono_wire;
use pandora::devices::mount::wire as mount_wire;

fn monochromator_goto_encode(c: &mut Criterion) {
    c.bench_function("mono_encode_goto", |b| {
        b.iter(|| mono_wire::encode_goto(black_box(5324)));
    });
}

fn monochromator_scan_encode(c: &mut Criterion) {
    c.bench_function("mono_encode_scan", |b| {
        b.iter(|| mono_wire::encode_scan(black_box(5000), black_box(5020)));
    });
}

fn monochromator_status_decode(c: &mut Criterion) {
    c.bench_function("mono_decode_status", |b| {
        b.iter(|| mono_wire::decode_status(black_box(0b1010_1000)));
    });
}

fn mount_altitude_format(c: &mut Criterion) {
    c.bench_function("mount_format_altitude", |b| {
        b.iter(|| mount_wire::format_altitude(black_box(45.0)).unwrap());
    });
}

fn mount_azimuth_format(c: &mut Criterion) {
    c.bench_function("mount_format_azimuth", |b| {
        b.iter(|| mount_wire::format_azimuth(black_box(271.5)));
    });
}

fn mount_altaz_parse(c: &mut Criterion) {
    let alt = mount_wire::format_altitude(45.0).unwrap();
    let az = mount_wire::format_azimuth(180.0);
    let reply = format!("{alt}{az}#");
    c.bench_function("mount_parse_altaz", |b| {
        b.iter(|| mount_wire::parse_altaz(black_box(&reply)).unwrap());
    });
}

criterion_group!(
    benches,
    monochromator_goto_encode,
    monochromator_scan_encode,
    monochromator_status_decode,
    mount_altitude_format,
    mount_azimuth_format,
    mount_altaz_parse,
);
criterion_main!(benches);
