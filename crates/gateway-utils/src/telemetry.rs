use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Installs the process-wide `tracing` subscriber: a formatting layer plus an
/// `EnvFilter` driven by `RUST_LOG`.
///
/// Grounded in the teacher's `querymt-utils::telemetry::setup_telemetry`,
/// minus its OTLP exporter layer — this gateway has no configured collector
/// endpoint of its own (see DESIGN.md), so it keeps the `tracing-subscriber`
/// half of the teacher's setup and drops the `opentelemetry` half rather than
/// wiring a default endpoint nothing reads.
pub fn setup_telemetry(service_name: &str) {
    let fmt_layer = fmt::layer().with_target(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default().with(filter).with(fmt_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!(service_name, "tracing subscriber already installed");
    }
}
