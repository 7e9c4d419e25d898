use background_logger::{fatal, global, submit, Destination, LogBridge, LoggerError};
use log::LevelFilter;
use parking_lot::Mutex;
use std::sync::Arc;

fn capture() -> (Arc<Mutex<Vec<u8>>>, Destination) {
    let out = Arc::new(Mutex::new(Vec::<u8>::new()));
    let dest = Destination::from(out.clone());
    (out, dest)
}

fn text(out: &Mutex<Vec<u8>>) -> String {
    String::from_utf8(out.lock().clone()).unwrap()
}

#[test]
fn test_global_submit_sync_and_toggle() {
    let (out, dest) = capture();

    submit!(dest.clone(), "Hello %d\n", 5);
    submit!(dest.clone(), "Value %s\n", "abc");
    submit!(dest.clone(), "Done\n");
    global::sync();
    assert_eq!(text(&out), "Hello 5\nValue abc\nDone\n");
    assert!(background_logger::fault::is_installed());

    assert!(global::logger().unwrap().is_running());

    // written before submit returns, no sync needed
    global::set_background_enabled(false);
    submit!(dest.clone(), "direct %u\n", 1u8);
    assert!(text(&out).ends_with("direct 1\n"));
    global::set_background_enabled(true);

    global::submit_fmt(dest, format_args!("eager {}\n", 2));
    global::sync();
    assert!(text(&out).ends_with("direct 1\neager 2\n"));
}

#[test]
fn test_fatal_logs_and_returns_error() {
    let (out, dest) = capture();

    let err = fatal!(dest, "position limit %d breached on %s\n", 500, "ESZ4");
    assert!(matches!(&err, LoggerError::Fatal(msg) if msg == "position limit 500 breached on ESZ4\n"));
    assert_eq!(text(&out), "!!FATAL!! position limit 500 breached on ESZ4\n");
}

#[test]
fn test_log_bridge_installs_once() {
    assert!(LogBridge::init(LevelFilter::Info).is_ok());
    assert!(matches!(LogBridge::init(LevelFilter::Info), Err(LoggerError::LoggerAlreadySet)));
    log::info!("bridged record {}", 1);
    log::logger().flush();
}
