use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use live_voice_session::codec::{FrameDecoder, FrameEncoder};
use live_voice_session::protocol::WireMessage;

fn sine(len: usize, rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.8)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let encoder = FrameEncoder::new(16_000);
    let mut group = c.benchmark_group("encode");
    for len in [320usize, 4096] {
        let samples = sine(len, 16_000);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &samples, |b, samples| {
            b.iter(|| encoder.encode(black_box(samples)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let decoder = FrameDecoder::new(24_000);
    let mut group = c.benchmark_group("decode");
    for len in [480usize, 6144] {
        let WireMessage::Media(chunk) = FrameEncoder::new(24_000).encode(&sine(len, 24_000)) else {
            unreachable!("encoder always produces media");
        };
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &chunk, |b, chunk| {
            b.iter(|| decoder.decode_f32(black_box(chunk)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
