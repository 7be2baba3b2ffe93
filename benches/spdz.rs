use criterion::{criterion_group, criterion_main, Criterion};
use tensorgrid::tensor::RawTensor;
use tensorgrid::worker::{connect, Worker, WorkerConfig};
use tensorgrid::SpdzContext;

fn setup() -> SpdzContext {
    let _ = env_logger::try_init();
    let client = Worker::new(WorkerConfig {
        id: Some("client".into()),
        is_client: true,
        ..WorkerConfig::default()
    });
    let alice = Worker::new(WorkerConfig {
        id: Some("alice".into()),
        ..WorkerConfig::default()
    });
    let bob = Worker::new(WorkerConfig {
        id: Some("bob".into()),
        ..WorkerConfig::default()
    });
    connect(&client, &alice).unwrap();
    connect(&client, &bob).unwrap();
    SpdzContext::new(client, "alice", "bob")
}

fn bench_spdz(c: &mut Criterion) {
    let ctx = setup();
    let plain = RawTensor::float_from_rows(16, 16, &vec![0.5; 256]);

    c.bench_function("share_and_reveal_16x16", |b| {
        b.iter(|| {
            let x = ctx.share_secret(&plain).unwrap();
            ctx.reveal(&x).unwrap()
        })
    });

    c.bench_function("spdz_mul_16x16", |b| {
        b.iter(|| {
            let x = ctx.share_secret(&plain).unwrap();
            let y = ctx.share_secret(&plain).unwrap();
            ctx.mul(&x, &y).unwrap()
        })
    });

    c.bench_function("spdz_matmul_16x16", |b| {
        b.iter(|| {
            let x = ctx.share_secret(&plain).unwrap();
            let y = ctx.share_secret(&plain).unwrap();
            ctx.matmul(&x, &y).unwrap()
        })
    });

    c.bench_function("sigmoid_1x16", |b| {
        let row = RawTensor::float_row(&[0.25; 16]);
        b.iter(|| {
            let x = ctx.share_secret(&row).unwrap();
            ctx.sigmoid(&x).unwrap()
        })
    });
}

criterion_group!(benches, bench_spdz);
criterion_main!(benches);
