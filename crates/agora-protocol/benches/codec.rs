use agora_protocol::{codec, Envelope, MAX_FRAME_SIZE};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_encode(c: &mut Criterion) {
    let envelope = Envelope::chat("x".repeat(256), "alice", "client_1");

    c.bench_function("encode_chat_256", |b| {
        b.iter(|| codec::encode(black_box(&envelope)))
    });
}

fn bench_decode_inbound(c: &mut Criterion) {
    let text = format!(r#"{{"type":"chat","content":"{}"}}"#, "x".repeat(256));

    c.bench_function("decode_inbound_256", |b| {
        b.iter(|| codec::decode_inbound(black_box(&text), MAX_FRAME_SIZE))
    });
}

criterion_group!(benches, bench_encode, bench_decode_inbound);
criterion_main!(benches);
