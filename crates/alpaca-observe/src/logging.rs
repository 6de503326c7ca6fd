use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. The filter comes from
/// `ALPACA_LOG`, then `RUST_LOG`, then defaults to `info`.
///
/// Field contract for alpaca events:
/// - `step` and `sample` on every claim/report event.
/// - `status` on every report.
/// - `added` (count) on every reload.
/// - Protocol events use target `alpaca_proof`; periodic counters use
///   `alpaca_metrics`.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// Like [`init_tracing`], but logs to stderr and defaults to `warn` so
/// command output on stdout stays machine-readable.
pub fn init_cli_tracing() {
    let filter = EnvFilter::try_from_env("ALPACA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("ALPACA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
