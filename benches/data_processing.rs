//! Benchmarks for the byte-to-value path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorvis_rs::crc::{lookup_preset, Crc};
use sensorvis_rs::framing::{CrcTrailer, Endianness, Framer, FramingPolicy, HeaderLayout};
use sensorvis_rs::parser::parse;
use sensorvis_rs::types::{Value, Variable, VariableKey};
use std::time::Duration;

const RECORD: &str = "{temp: 21.53, pressure: 1013, state: 'heating', raw: b\"AAECAwQF\"}";

fn header_crc_policy() -> FramingPolicy {
    FramingPolicy::HeaderCrc {
        header: HeaderLayout {
            start_sequence: vec![0xAA, 0xBB],
            header_size: 4,
            length_field_offset: 2,
            length_field_size: 2,
            header_included_in_length: true,
            endianness: Endianness::Little,
        },
        trailer: CrcTrailer {
            model: lookup_preset("CRC16-MODBUS").expect("preset exists"),
            crc_included_in_length: true,
            endianness: Endianness::Little,
        },
    }
}

/// `count` encoded copies of [`RECORD`]
fn traffic(policy: &FramingPolicy, count: usize) -> Vec<u8> {
    let frame = policy.encode(RECORD.as_bytes()).expect("record fits the policy");
    frame.repeat(count)
}

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc");
    let data: Vec<u8> = (0..4096u32).map(|i| (i * 31) as u8).collect();
    group.throughput(Throughput::Bytes(data.len() as u64));

    for name in ["CRC8-CCITT", "CRC16-MODBUS", "CRC32-CRC32"] {
        let crc = Crc::new(lookup_preset(name).expect("preset exists")).expect("valid model");
        group.bench_with_input(BenchmarkId::new("checksum", name), &data, |b, data| {
            b.iter(|| black_box(crc.checksum(black_box(data))));
        });
    }

    group.finish();
}

fn bench_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("framer");

    for (label, policy) in [
        ("line_feed", FramingPolicy::LineFeed),
        ("header_crc", header_crc_policy()),
    ] {
        let bytes = traffic(&policy, 256);
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        for chunk in [16usize, 256, 4096] {
            group.bench_with_input(
                BenchmarkId::new(label, chunk),
                &bytes,
                |b, bytes| {
                    b.iter(|| {
                        let mut framer = Framer::new(policy.clone()).expect("valid policy");
                        let mut frames = 0usize;
                        for piece in bytes.chunks(chunk) {
                            frames += framer.feed(piece).is_some() as usize;
                            frames += framer.drain().len();
                        }
                        black_box(frames)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record", |b| {
        b.iter(|| black_box(parse(black_box(RECORD))));
    });

    let repeated = format!(
        "{{{}}}",
        (0..32)
            .map(|i| format!("s: {}", i))
            .collect::<Vec<_>>()
            .join(", ")
    );
    group.bench_function("repeated_keys", |b| {
        b.iter(|| black_box(parse(black_box(&repeated))));
    });

    group.finish();
}

fn bench_variable_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("variable_history");

    for size in [100usize, 10_000] {
        let mut variable = Variable::new(VariableKey::new("temp", "bench")).with_history_len(size);
        for i in 0..size as u64 {
            variable.push(Value::Float(i as f64), Duration::from_micros(i));
        }

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("push_at_capacity", size), |b| {
            let mut i = size as u64;
            b.iter(|| {
                variable.push(black_box(Value::Float(i as f64)), Duration::from_micros(i));
                i = i.wrapping_add(1);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_crc,
    bench_framer,
    bench_parser,
    bench_variable_history,
);

criterion_main!(benches);
