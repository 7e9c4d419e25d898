use std::env;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Instant;

use background_logger::fault::{self, PanicMode};
use background_logger::{global, submit, Destination};
use tracing_subscriber::EnvFilter;

const DEMO_RECORDS: u32 = 10_000;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mode = env::args().nth(1).unwrap_or_else(|| "latency".to_string());
    match mode.as_str() {
        "latency" => latency(),
        "crash-abort" => crash_abort(),
        "panic" => panic_terminate(),
        other => {
            eprintln!("unknown mode '{other}'; expected latency, crash-abort or panic");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

/// Compares call-site cost with the consumer on and off.
fn latency() {
    let sink = Destination::from(std::sync::Arc::new(parking_lot::Mutex::new(io::sink())));

    let start = Instant::now();
    for i in 0..DEMO_RECORDS {
        submit!(sink.clone(), "tick %u price %.4f venue %s\n", i, 100.0 + f64::from(i) * 0.25, "XNAS");
    }
    let background = start.elapsed();
    global::sync();
    let drained = start.elapsed();

    global::set_background_enabled(false);
    let start = Instant::now();
    for i in 0..DEMO_RECORDS {
        submit!(sink.clone(), "tick %u price %.4f venue %s\n", i, 100.0 + f64::from(i) * 0.25, "XNAS");
    }
    let direct = start.elapsed();
    global::set_background_enabled(true);

    let per_call = |total: std::time::Duration| total.as_nanos() / u128::from(DEMO_RECORDS);
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "background: {} ns/call ({:?} until drained)", per_call(background), drained);
    let _ = writeln!(out, "direct:     {} ns/call", per_call(direct));
}

/// Submits records, then aborts. The signal handler drains them first.
fn crash_abort() {
    for i in 0..3 {
        submit!(Destination::Stdout, "before crash %d\n", i);
    }
    std::process::abort();
}

/// Submits records, then panics with the terminating panic mode.
fn panic_terminate() {
    fault::set_panic_mode(PanicMode::Terminate);
    submit!(Destination::Stdout, "before panic %s\n", "ok");
    panic!("demo panic");
}
