use criterion::{criterion_group, criterion_main, Criterion};
use mayrpc::protocol::{
    encode_request, function_id, split_function_id, success_frame, RpcHeader,
    DEFAULT_MAX_PAYLOAD_LENGTH, REQUEST_HEADER_LEN,
};
use mayrpc::registry::{HandlerDescriptor, HandlerRegistry};
use mayrpc::server::write_queue::WriteQueue;
use std::hint::black_box;

fn bench_frame_decode(c: &mut Criterion) {
    let frame = encode_request(42, function_id("echo"), &[7u8; 256]);
    c.bench_function("frame_decode", |b| {
        b.iter(|| {
            let mut header = [0u8; REQUEST_HEADER_LEN];
            header.copy_from_slice(&frame[..REQUEST_HEADER_LEN]);
            let header = RpcHeader::decode(black_box(&header)).unwrap_or_else(|e| panic!("{e}"));
            let len = header
                .payload_len(DEFAULT_MAX_PAYLOAD_LENGTH)
                .unwrap_or_else(|e| panic!("{e}"));
            let payload = &frame[REQUEST_HEADER_LEN..REQUEST_HEADER_LEN + len];
            black_box(split_function_id(payload).unwrap_or_else(|e| panic!("{e}")));
        })
    });
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = HandlerRegistry::new();
    let names: Vec<String> = (0..64).map(|i| format!("handler_{i}")).collect();
    for name in &names {
        registry.register(HandlerDescriptor::immediate(name, |req| Ok(req.args.clone())));
    }
    let ids: Vec<_> = names.iter().map(|n| function_id(n)).collect();
    c.bench_function("registry_lookup", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(registry.lookup(*id));
            }
        })
    });
}

fn bench_write_queue_drain(c: &mut Criterion) {
    c.bench_function("write_queue_drain_64", |b| {
        b.iter(|| {
            let (mut queue, drain) = WriteQueue::channel();
            for seq in 0..64u32 {
                if let Ok(slot) = queue.reserve(seq) {
                    slot.fill(success_frame(b"pong"));
                }
            }
            drop(queue);
            let mut sink = Vec::with_capacity(64 * 9);
            black_box(drain.run(&mut sink, || false).written);
        })
    });
}

criterion_group!(
    benches,
    bench_frame_decode,
    bench_registry_lookup,
    bench_write_queue_drain
);
criterion_main!(benches);
