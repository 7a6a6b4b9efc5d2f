use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use vista_rows::{RowCodec, RowEvent};

fn make_body(rows: usize) -> Vec<u8> {
    let mut body = format!(r#"{{"total_rows":{rows},"rows":["#).into_bytes();
    for i in 0..rows {
        if i > 0 {
            body.push(b',');
        }
        body.extend_from_slice(
            format!(r#"{{"id":"doc-{i}","key":["user",{i}],"value":{{"score":{i},"tag":"x\"y"}}}}"#)
                .as_bytes(),
        );
    }
    body.extend_from_slice(b"]}");
    body
}

fn bench_codec(c: &mut Criterion) {
    let body = make_body(10_000);
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(body.len() as u64));

    for chunk_size in [512usize, 4096, 65536] {
        group.bench_with_input(
            BenchmarkId::new("split", chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut codec = RowCodec::new();
                    let mut rows = 0usize;
                    for chunk in body.chunks(size) {
                        codec.feed(chunk);
                        while let Some(event) = codec.next_event() {
                            if let RowEvent::Row(_) = event {
                                rows += 1;
                            }
                        }
                    }
                    rows
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("split_and_parse", chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut codec = RowCodec::new();
                    let mut ids = 0usize;
                    for chunk in body.chunks(size) {
                        codec.feed(chunk);
                        while let Some(event) = codec.next_event() {
                            if let RowEvent::Row(row) = event {
                                if row.parse().is_ok_and(|r| r.has_document()) {
                                    ids += 1;
                                }
                            }
                        }
                    }
                    ids
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
