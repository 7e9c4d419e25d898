use background_logger::{BackgroundLogger, Destination, LoggerConfig, Toggles};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::sync::Arc;
use tempfile::tempdir;

const RECORDS_PER_BATCH: u32 = 1_000;

#[derive(Debug)]
struct TestEvent {
    id: i32,
    active: bool,
    large_number: u64,
    description: &'static str,
}

const EVENT: TestEvent = TestEvent {
    id: 42,
    active: true,
    large_number: u64::MAX,
    description: "This is a longer description that includes some special characters !@#$^&*() \
                  and provides more context about the event. It also contains some metrics like \
                  CPU: 95, Memory: 2.5GB, Network: 1.2Gbps",
};

fn sink() -> Destination {
    Destination::from(Arc::new(Mutex::new(io::sink())))
}

fn submit_batch(logger: &BackgroundLogger, dest: &Destination) {
    for i in 0..RECORDS_PER_BATCH {
        logger.submit(
            dest.clone(),
            "Test perf: iteration=%u id=%d active=%s n=%llu desc=%s\n",
            (i, EVENT.id, EVENT.active, EVENT.large_number, EVENT.description),
        );
    }
}

fn bench_call_site(c: &mut Criterion) {
    let mut group = c.benchmark_group("Call site");
    let dest = sink();

    let background = BackgroundLogger::new(LoggerConfig::default().with_capacity(4096)).unwrap();
    group.bench_function("background_submit", |b| {
        b.iter(|| {
            submit_batch(&background, &dest);
            black_box(background.write_count())
        });
        background.sync();
    });

    let toggles = Arc::new(Toggles::default());
    toggles.set_background(false);
    let direct = BackgroundLogger::new(LoggerConfig::default().with_toggles(toggles)).unwrap();
    group.bench_function("direct_write", |b| {
        b.iter(|| submit_batch(&direct, &dest));
    });

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("End to end");
    group.sample_size(10);

    let dir = tempdir().unwrap();
    let file = Arc::new(Mutex::new(File::create(dir.path().join("perf.log")).unwrap()));
    let dest = Destination::from(file);
    let logger = BackgroundLogger::new(LoggerConfig::default()).unwrap();

    group.bench_function("submit_and_sync_to_file", |b| {
        b.iter_batched(
            || (),
            |()| {
                submit_batch(&logger, &dest);
                logger.sync();
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_call_site, bench_end_to_end);
criterion_main!(benches);
