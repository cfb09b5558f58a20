//! Micro-benchmarks for datagram encoding and parsing.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use groupcast_core::constants::SHORT_HEADER_SIZE;
use groupcast_core::types::ChannelName;
use groupcast_core::wire::{self, LongHeader, ShortHeader};

fn bench_encode_short(c: &mut Criterion) {
    let channel = ChannelName::new("POSE").unwrap();
    let payload = vec![0x5Au8; 256];

    c.bench_function("encode_short_256b", |b| {
        b.iter(|| wire::encode_short(black_box(42), black_box(&channel), black_box(&payload)))
    });
}

fn bench_parse_short(c: &mut Criterion) {
    let channel = ChannelName::new("POSE").unwrap();
    let payload = vec![0x5Au8; 256];
    let raw = wire::encode_short(42, &channel, &payload);

    c.bench_function("parse_short_256b", |b| {
        b.iter(|| {
            let raw = black_box(&raw);
            let kind = wire::classify(raw).unwrap();
            let hdr = ShortHeader::parse(raw).unwrap();
            let (name, consumed) = wire::parse_channel(&raw[SHORT_HEADER_SIZE..]).unwrap();
            (kind, hdr, name.len(), consumed)
        })
    });
}

fn bench_long_header_roundtrip(c: &mut Criterion) {
    let hdr = LongHeader {
        seqno: 7,
        msg_size: 1 << 20,
        fragment_offset: 1396,
        fragment_no: 1,
        fragments_in_msg: 751,
    };

    c.bench_function("long_header_roundtrip", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(20);
            black_box(&hdr).write_to(&mut buf);
            LongHeader::parse(&buf).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_short,
    bench_parse_short,
    bench_long_header_roundtrip
);
criterion_main!(benches);
