//! Encoder throughput on representative DMX universes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use luxd_codec::{encode, DMX_UNIVERSE_SIZE};

fn bench_encode(c: &mut Criterion) {
    let blackout = vec![0u8; DMX_UNIVERSE_SIZE];

    // Worst case: no byte ever repeats three times.
    let chase: Vec<u8> = (0..DMX_UNIVERSE_SIZE).map(|i| (i % 251) as u8).collect();

    // Typical rig: banks of identical levels with a few moving fixtures.
    let mut show = vec![0u8; DMX_UNIVERSE_SIZE];
    for bank in show.chunks_mut(32) {
        bank.fill(0x80);
    }
    show[100] = 0x01;
    show[200] = 0x02;
    show[300] = 0x03;

    let mut dst = vec![0u8; DMX_UNIVERSE_SIZE * 2];

    c.bench_function("encode/blackout", |b| {
        b.iter(|| encode(black_box(&blackout), &mut dst))
    });
    c.bench_function("encode/chase", |b| {
        b.iter(|| encode(black_box(&chase), &mut dst))
    });
    c.bench_function("encode/show", |b| {
        b.iter(|| encode(black_box(&show), &mut dst))
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
