//! Throughput Benchmark for miniserver
//!
//! Measures the per-request hot paths that run on a worker thread:
//! buffer churn, request parsing, routing and idle-timer bookkeeping.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use miniserver::protocol::RequestParser;
use miniserver::service::MemoryContentProvider;
use miniserver::storage::InMemoryCredentialStore;
use miniserver::{ByteBuffer, RequestHandler, TimerHeap};
use std::sync::Arc;
use std::time::Duration;

const GET_REQUEST: &[u8] = b"GET /index.html HTTP/1.1\r\n\
Host: localhost:8888\r\n\
User-Agent: bench/1.0\r\n\
Accept: text/html\r\n\
Connection: keep-alive\r\n\r\n";

const POST_REQUEST: &[u8] = b"POST /login HTTP/1.1\r\n\
Host: localhost:8888\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\
Content-Length: 26\r\n\
Connection: keep-alive\r\n\r\n\
username=ariz&password=abc";

/// Benchmark append/retrieve cycles on the connection buffer
fn bench_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");

    for size in [64usize, 1024, 16 * 1024] {
        let chunk = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("append_retrieve", size), &chunk, |b, chunk| {
            let mut buf = ByteBuffer::new();
            b.iter(|| {
                buf.append(black_box(chunk));
                buf.retrieve(chunk.len() / 2);
                buf.retrieve(buf.readable_bytes());
            });
        });
    }

    group.bench_function("find_crlf", |b| {
        let mut buf = ByteBuffer::new();
        buf.append(GET_REQUEST);
        b.iter(|| black_box(buf.find_crlf()));
    });

    group.finish();
}

/// Benchmark request parsing, whole and in small fragments
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_whole", |b| {
        let mut parser = RequestParser::new();
        let mut buf = ByteBuffer::new();
        b.iter(|| {
            buf.append(GET_REQUEST);
            black_box(parser.parse(&mut buf).ok());
            black_box(parser.take_request());
        });
    });

    group.bench_function("post_whole", |b| {
        let mut parser = RequestParser::new();
        let mut buf = ByteBuffer::new();
        b.iter(|| {
            buf.append(POST_REQUEST);
            black_box(parser.parse(&mut buf).ok());
            black_box(parser.take_request());
        });
    });

    group.bench_function("get_fragmented_16", |b| {
        let mut parser = RequestParser::new();
        let mut buf = ByteBuffer::new();
        b.iter(|| {
            for chunk in GET_REQUEST.chunks(16) {
                buf.append(chunk);
                black_box(parser.parse(&mut buf).ok());
            }
            black_box(parser.take_request());
        });
    });

    group.bench_function("pipelined_8", |b| {
        let mut parser = RequestParser::new();
        let mut buf = ByteBuffer::new();
        b.iter(|| {
            for _ in 0..8 {
                buf.append(GET_REQUEST);
            }
            while parser.parse(&mut buf).map(|_| parser.is_complete()).unwrap_or(false) {
                black_box(parser.take_request());
            }
        });
    });

    group.finish();
}

/// Benchmark routing a parsed request to a response
fn bench_handle(c: &mut Criterion) {
    let content = MemoryContentProvider::new()
        .with_document("/index.html", "<h1>index</h1>".repeat(64))
        .with_document("/welcome.html", "<h1>welcome</h1>")
        .with_document("/error.html", "<h1>error</h1>");
    let credentials = InMemoryCredentialStore::with_users([("ariz", "abc")]);
    let handler = RequestHandler::new(Arc::new(content), Arc::new(credentials));

    let parse = |raw: &[u8]| {
        let mut parser = RequestParser::new();
        let mut buf = ByteBuffer::new();
        buf.append(raw);
        parser.parse(&mut buf).ok();
        parser.take_request()
    };
    let get = parse(GET_REQUEST);
    let post = parse(POST_REQUEST);

    let mut group = c.benchmark_group("handle");
    group.throughput(Throughput::Elements(1));

    if let Some(get) = get {
        group.bench_function("static_get", |b| {
            b.iter(|| black_box(handler.handle(&get, true)));
        });
    }
    if let Some(post) = post {
        group.bench_function("login_post", |b| {
            b.iter(|| black_box(handler.handle(&post, true)));
        });
    }

    group.finish();
}

/// Benchmark idle-timer insert/renew/cancel churn
fn bench_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("timers");

    group.bench_function("renew_10k", |b| {
        let mut timers: TimerHeap<i32, ()> = TimerHeap::with_capacity(10_000);
        for fd in 0..10_000 {
            timers.insert(fd, Duration::from_secs(60), ());
        }
        let mut fd = 0;
        b.iter(|| {
            timers.renew(black_box(fd), Duration::from_secs(60));
            fd = (fd + 1) % 10_000;
        });
    });

    group.bench_function("insert_cancel", |b| {
        let mut timers: TimerHeap<i32, ()> = TimerHeap::with_capacity(1024);
        for fd in 0..1024 {
            timers.insert(fd, Duration::from_secs(60), ());
        }
        b.iter(|| {
            timers.insert(black_box(5000), Duration::from_secs(30), ());
            timers.cancel(black_box(5000));
        });
    });

    group.bench_function("fire_1k", |b| {
        b.iter(|| {
            let mut timers: TimerHeap<i32, ()> = TimerHeap::with_capacity(1024);
            for fd in 0..1024 {
                timers.insert(fd, Duration::ZERO, ());
            }
            timers.fire_expired(|heap, fd, ()| {
                heap.cancel(fd);
            });
            black_box(timers.len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_buffer, bench_parse, bench_handle, bench_timers);

criterion_main!(benches);
