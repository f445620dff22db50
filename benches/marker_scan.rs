use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rexsh::daemon::protocol::{LengthDecoder, MarkerScanner, MARKER};

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// `size` bytes of line-oriented output followed by the marker
fn marker_response(size: usize) -> Vec<u8> {
    let line = b"drwxr-xr-x  2 root root 4096 Jan  1 00:00 <dir>\n";
    let mut data: Vec<u8> = line.iter().copied().cycle().take(size).collect();
    data.extend_from_slice(MARKER);
    data
}

fn length_response(size: usize, chunk: usize) -> Vec<u8> {
    let payload = vec![b'x'; size];
    let mut data = Vec::with_capacity(size + size / chunk * 4 + 8);
    for piece in payload.chunks(chunk) {
        data.extend_from_slice(&(piece.len() as u32).to_le_bytes());
        data.extend_from_slice(piece);
    }
    data.extend_from_slice(&0u32.to_le_bytes());
    data
}

// ===========================================================================
// 1. MARKER SCANNER
//    Network reads of various sizes over the same response.
// ===========================================================================

fn bench_marker_scanner(c: &mut Criterion) {
    let response = marker_response(64 * 1024);

    let mut group = c.benchmark_group("marker_scan");
    group.throughput(Throughput::Bytes(response.len() as u64));

    for read_size in [16usize, 512, 4096] {
        group.bench_with_input(
            BenchmarkId::new("read_size", read_size),
            &read_size,
            |b, &read_size| {
                b.iter(|| {
                    let mut scanner = MarkerScanner::new();
                    let mut shown = 0usize;
                    for piece in response.chunks(read_size) {
                        let decoded = scanner.feed(black_box(piece));
                        shown += decoded.payload.len();
                        if decoded.complete {
                            break;
                        }
                    }
                    black_box(shown)
                });
            },
        );
    }

    group.finish();
}

// ===========================================================================
// 2. LENGTH-PREFIXED DECODER
//    Same payload size, for comparison with the marker scan.
// ===========================================================================

fn bench_length_decoder(c: &mut Criterion) {
    let response = length_response(64 * 1024, 4096);

    let mut group = c.benchmark_group("length_decode");
    group.throughput(Throughput::Bytes(response.len() as u64));

    group.bench_function("read_size_4096", |b| {
        b.iter(|| {
            let mut decoder = LengthDecoder::new();
            let mut shown = 0usize;
            for piece in response.chunks(4096) {
                let decoded = decoder.feed(black_box(piece)).unwrap();
                shown += decoded.payload.len();
                if decoded.complete {
                    break;
                }
            }
            black_box(shown)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_marker_scanner, bench_length_decoder);
criterion_main!(benches);
