use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Log line format for the orchestrator process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Initialize tracing
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Setup tracing layers
    let logger = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let collector = Registry::default().with(env_filter).with(logger);

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing::subscriber::set_global_default(collector);
}
