//! Benchmarks for the hot PCM paths: cross-fade mixing and gain scaling.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use cadenza_player::audio::SampleFormat;
use cadenza_player::pcm::{apply_volume, mix, PcmDither};

const BUF_SIZE: usize = 4096;

fn bench_mix(c: &mut Criterion) {
    let src = vec![0x5au8; BUF_SIZE];

    c.bench_function("mix_s16_linear", |b| {
        let mut dither = PcmDither::new();
        let mut dest = vec![0x22u8; BUF_SIZE];
        b.iter(|| {
            mix(
                &mut dither,
                black_box(&mut dest),
                black_box(&src),
                SampleFormat::S16,
                0.5,
            )
        });
    });

    c.bench_function("mix_s16_mixramp", |b| {
        let mut dither = PcmDither::new();
        let mut dest = vec![0x22u8; BUF_SIZE];
        b.iter(|| {
            mix(
                &mut dither,
                black_box(&mut dest),
                black_box(&src),
                SampleFormat::S16,
                -1.0,
            )
        });
    });

    c.bench_function("mix_f32_linear", |b| {
        let mut dither = PcmDither::new();
        let src: Vec<u8> = (0..BUF_SIZE / 4)
            .flat_map(|i| ((i as f32 / 1024.0).sin() * 0.5).to_ne_bytes())
            .collect();
        let mut dest = src.clone();
        b.iter(|| {
            mix(
                &mut dither,
                black_box(&mut dest),
                black_box(&src),
                SampleFormat::F32,
                0.5,
            )
        });
    });
}

fn bench_volume(c: &mut Criterion) {
    c.bench_function("volume_s16_replay_gain", |b| {
        let mut dither = PcmDither::new();
        let mut data = vec![0x33u8; BUF_SIZE];
        b.iter(|| {
            apply_volume(
                &mut dither,
                black_box(&mut data),
                SampleFormat::S16,
                0.708, // -3 dB
            )
        });
    });
}

criterion_group!(benches, bench_mix, bench_volume);
criterion_main!(benches);
