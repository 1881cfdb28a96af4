//! Frame cipher throughput for typical client and server payload sizes.

use std::hint::black_box;

use aden::network::crypt::{Decoder, Encoder};
use aden::network::opcodes::S_SAY;
use aden::network::packet::Writer;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const SEED: u32 = 0x2f1a_9c44;

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");
    for size in [8usize, 64, 512, 4096] {
        let payload = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let mut enc = Encoder::new(SEED);
            let mut buf = payload.clone();
            b.iter(|| {
                buf.copy_from_slice(payload);
                enc.encrypt(black_box(&mut buf));
            });
        });
    }
    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt");
    for size in [8usize, 64, 512] {
        let payload = vec![0xa5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let mut dec = Decoder::new(SEED);
            let mut buf = payload.clone();
            b.iter(|| {
                buf.copy_from_slice(payload);
                dec.decrypt(black_box(&mut buf));
            });
        });
    }
    group.finish();
}

fn bench_chat_packet(c: &mut Criterion) {
    c.bench_function("build_and_encrypt_say", |b| {
        let mut enc = Encoder::new(SEED);
        b.iter(|| {
            let mut out = Writer::new(S_SAY).c(0).d(1_000_001).s("hello from the town square").finish().to_vec();
            enc.encrypt(&mut out);
            black_box(out)
        });
    });
}

criterion_group!(benches, bench_encrypt, bench_decrypt, bench_chat_packet);
criterion_main!(benches);
