use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use recnet::net::{
    decode_value, encode_value, CodecOptions, DataFormat, MessageType, NetHeader, StatusCode,
};
use recnet::record::{DataType, FieldValue};

fn opts(format: DataFormat) -> CodecOptions {
    CodecOptions {
        format,
        use_64bit_longs: false,
    }
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    let header = NetHeader::new(
        MessageType::PutArrayByHandle.as_u32(),
        StatusCode::SUCCESS,
        DataType::Double.as_u32(),
        42,
    );

    for size in [64usize, 1024, 64 * 1024] {
        let payload = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter(|| {
                black_box(header.encode_frame(&payload));
            });
        });

        let frame = header.encode_frame(&payload);
        group.bench_function(format!("split_{size}b"), |b| {
            b.iter(|| {
                black_box(NetHeader::split_frame(&frame).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_value_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_encode");

    let doubles = FieldValue::double_array((0..4096).map(f64::from).collect());
    group.throughput(Throughput::Bytes(4096 * 8));
    for format in [
        DataFormat::Ascii,
        DataFormat::Raw,
        DataFormat::Xdr,
        DataFormat::ByteSwap,
    ] {
        let o = opts(format);
        group.bench_function(format!("double_4096_{format:?}"), |b| {
            b.iter(|| {
                black_box(encode_value(&doubles, &o).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_value_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_decode");

    let doubles = FieldValue::double_array((0..4096).map(f64::from).collect());
    let dims = doubles.dims().to_vec();
    group.throughput(Throughput::Bytes(4096 * 8));
    for format in [
        DataFormat::Ascii,
        DataFormat::Raw,
        DataFormat::Xdr,
        DataFormat::ByteSwap,
    ] {
        let o = opts(format);
        let bytes = encode_value(&doubles, &o).unwrap();
        group.bench_function(format!("double_4096_{format:?}"), |b| {
            b.iter(|| {
                black_box(decode_value(&bytes, DataType::Double, &dims, &o).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame, bench_value_encode, bench_value_decode);
criterion_main!(benches);
