use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "releve_notes=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Logs go to stderr so generated reports can be piped from stdout.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}
