/// Installs the fmt subscriber for the router's `tracing` output.
///
/// `level` is `logging.level` from the settings. Connection open/close
/// shows at `info`, per-frame traffic at `debug` and fan-out at `trace`.
/// Anything unrecognised means `info`. Safe to call more than once; only
/// the first call installs a subscriber.
pub fn init(level: &str) {
    let max_level = match level.to_ascii_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .try_init();
}
