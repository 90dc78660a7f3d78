use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use kcp_protocol::segment::{Command, Segment, SegmentIter};
use kcp_protocol::sequence::SeqNumber;
use kcp_protocol::{Config, Connection, Mode};

fn data_segment(len: usize) -> Segment {
    let mut segment = Segment::push(0x1234, 0, Bytes::from(vec![0u8; len]));
    segment.sn = SeqNumber::new(1000);
    segment.una = SeqNumber::new(990);
    segment.wnd = 128;
    segment.ts = 5000;
    segment
}

fn bench_segment_encode(c: &mut Criterion) {
    let segment = data_segment(1376);
    let mut group = c.benchmark_group("segment");
    group.throughput(Throughput::Bytes(segment.size() as u64));

    group.bench_function("encode", |b| {
        let mut buf = BytesMut::with_capacity(segment.size());
        b.iter(|| {
            buf.clear();
            black_box(&segment).encode(&mut buf).unwrap();
            black_box(&buf);
        });
    });

    let bytes = segment.to_bytes().unwrap().freeze();
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut buf = black_box(&bytes).clone();
            let segment = Segment::decode(&mut buf).unwrap();
            black_box(segment);
        });
    });

    group.finish();
}

fn bench_packed_datagram(c: &mut Criterion) {
    // A full datagram of pure acks
    let mut datagram = BytesMut::new();
    for sn in 0..58u32 {
        let mut ack = data_segment(0);
        ack.cmd = Command::Ack;
        ack.sn = SeqNumber::new(sn);
        ack.encode(&mut datagram).unwrap();
    }
    let datagram = datagram.freeze();

    c.bench_function("segment_iter_acks", |b| {
        b.iter(|| {
            let count = SegmentIter::new(black_box(&datagram).clone()).count();
            black_box(count);
        });
    });
}

fn bench_seq_number_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_number");

    group.bench_function("increment", |b| {
        let mut seq = SeqNumber::new(1000);
        b.iter(|| {
            seq.increment();
            black_box(&seq);
        });
    });

    group.bench_function("distance", |b| {
        let from = SeqNumber::new(u32::MAX - 10);
        let to = SeqNumber::new(20);
        b.iter(|| {
            let dist = black_box(from).distance_to(black_box(to));
            black_box(dist);
        });
    });

    group.bench_function("in_window", |b| {
        let start = SeqNumber::new(1000);
        let sn = SeqNumber::new(1100);
        b.iter(|| {
            let result = black_box(sn).in_window(black_box(start), 128);
            black_box(result);
        });
    });

    group.finish();
}

fn bench_connection_transfer(c: &mut Criterion) {
    c.bench_function("connection_transfer_64k", |b| {
        let payload = vec![7u8; 64 * 1024];
        b.iter(|| {
            let mut wire = Vec::new();
            let config = Config::new(1)
                .with_mode(Mode::AggressiveFast)
                .with_windows(256, 256);
            let mut sender = Connection::new(config, |d: &[u8]| {
                wire.push(Bytes::copy_from_slice(d))
            });
            sender.send(&payload).unwrap();
            sender.flush(0);
            drop(sender);
            black_box(wire.len());
        });
    });
}

criterion_group!(
    benches,
    bench_segment_encode,
    bench_packed_datagram,
    bench_seq_number_ops,
    bench_connection_transfer
);
criterion_main!(benches);
