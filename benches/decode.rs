use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kiro_bridge::eventstream::encode_event_frame;
use kiro_bridge::FrameDecoder;

fn sample_stream(frame_count: usize) -> Vec<u8> {
    (0..frame_count)
        .flat_map(|i| {
            let payload = format!(r#"{{"content":"token {i} of the answer, with some padding"}}"#);
            encode_event_frame("assistantResponseEvent", payload.as_bytes())
        })
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let stream = sample_stream(256);

    c.bench_function("decode_256_frames_single_feed", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.feed(black_box(&stream));
            let frames = decoder.decode_ready_frames().expect("decode");
            black_box(frames.len());
        });
    });

    c.bench_function("decode_256_frames_1k_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::with_capacity(256);
            for chunk in stream.chunks(1024) {
                decoder.feed(black_box(chunk));
                decoder
                    .decode_ready_frames_into(&mut frames)
                    .expect("decode");
            }
            black_box(frames.len());
        });
    });

    let mut noisy = vec![0xA5u8; 4096];
    noisy.extend_from_slice(&stream);
    c.bench_function("decode_resync_over_4k_noise", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.feed(black_box(&noisy));
            let frames = decoder.decode_ready_frames().expect("decode");
            black_box(frames.len());
        });
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
