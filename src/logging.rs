use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::core::config::LoggingConfig;

/// Maps `logging.level` to a tracing level; `logging.debug` forces `debug`.
pub(crate) fn level_for(config: &LoggingConfig) -> Level {
    if config.debug {
        return Level::DEBUG;
    }
    match config.level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the global fmt subscriber. A second call is a no-op.
pub fn init(config: &LoggingConfig) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level_for(config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
