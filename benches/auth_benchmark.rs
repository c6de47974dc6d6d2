use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;

use tandem::auth::KeyExchange;

/// two key exchanges that know each other's public key
fn paired() -> (KeyExchange, KeyExchange) {
    let mut a = KeyExchange::new();
    let mut b = KeyExchange::new();
    let (a_pub, b_pub) = (a.public_key(), b.public_key());
    a.register_counterpart(&b_pub).unwrap();
    b.register_counterpart(&a_pub).unwrap();
    (a, b)
}

/// signing benchmark
fn bench_sign(c: &mut Criterion) {
    let (a, _b) = paired();

    let mut group = c.benchmark_group("Sign");
    group.throughput(Throughput::Elements(1));

    group.bench_function("move", |b| {
        b.iter(|| {
            let signed = a.sign("move", black_box(json!({"cell": 4}))).unwrap();
            black_box(signed)
        })
    });

    group.finish();
}

/// verification benchmark
fn bench_verify(c: &mut Criterion) {
    let (a, b) = paired();
    let signed = a.sign("move", json!({"cell": 4})).unwrap();

    let mut group = c.benchmark_group("Verify");
    group.throughput(Throughput::Elements(1));

    group.bench_function("move", |bench| {
        bench.iter(|| b.verify(black_box(&signed)).unwrap())
    });

    group.finish();
}

/// sign, put on the wire, parse and verify
fn bench_full_cycle(c: &mut Criterion) {
    let (a, b) = paired();

    let mut group = c.benchmark_group("FullCycle");
    group.throughput(Throughput::Elements(1));

    group.bench_function("sign_encode_verify", |bench| {
        bench.iter(|| {
            let signed = a.sign("move", black_box(json!({"cell": 4}))).unwrap();
            let wire = serde_json::to_string(&signed).unwrap();
            let parsed = serde_json::from_str(&wire).unwrap();
            b.verify(&parsed).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_sign, bench_verify, bench_full_cycle);
criterion_main!(benches);
