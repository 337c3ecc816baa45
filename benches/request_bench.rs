// benches/request_bench.rs

//! Microbenchmarks for the request wire codec.

use bytes::{Bytes, BytesMut};
use citrinekv::core::request::{
    Consistency, DispatcherId, Durability, Operation, Request, RequestCodec, RequestOptions,
    RequestTarget,
};
use citrinekv::core::topology::PartitionId;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn sample_write() -> Request {
    let mut opts = RequestOptions::new(DispatcherId("bench-client".to_string()));
    opts.ttl = 3;
    opts.timeout_ms = 5000;
    opts.topo_seq_basis = Some(42);
    Request::write(
        RequestTarget::Partition(PartitionId(7)),
        Durability::default(),
        Bytes::from(
            Operation::Put {
                key: b"user:100042".to_vec(),
                value: vec![0xABu8; 256],
            }
            .encode()
            .unwrap(),
        ),
        opts,
    )
    .unwrap()
}

fn sample_read() -> Request {
    Request::read(
        RequestTarget::Partition(PartitionId(7)),
        Consistency::NoneRequired,
        Bytes::from(
            Operation::Get {
                key: b"user:100042".to_vec(),
            }
            .encode()
            .unwrap(),
        ),
        RequestOptions::new(DispatcherId("bench-client".to_string())),
    )
    .unwrap()
}

fn bench_encode(c: &mut Criterion) {
    let codec = RequestCodec::default();
    let write = sample_write();
    let read = sample_read();

    c.bench_function("encode_write_request", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(512);
            codec.encode_request(black_box(&write), &mut buf);
            black_box(buf);
        })
    });
    c.bench_function("encode_read_request", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(128);
            codec.encode_request(black_box(&read), &mut buf);
            black_box(buf);
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let codec = RequestCodec::default();
    let mut buf = BytesMut::new();
    codec.encode_request(&sample_write(), &mut buf);
    let encoded = buf.freeze();

    c.bench_function("decode_write_request", |b| {
        b.iter(|| {
            let mut bytes = encoded.clone();
            black_box(codec.decode_request(&mut bytes).unwrap());
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
