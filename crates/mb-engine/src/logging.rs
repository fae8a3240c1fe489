use mb_types::{config_error, MbResult};
use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
};

/// Level selected by the `-v`/`-q` flags.
pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, takes precedence over
/// `verbosity` unless `quiet` is requested.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> MbResult<()> {
    let level = level_for(verbosity, quiet);
    let filter = if quiet {
        EnvFilter::new(level.to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_target(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| config_error!("failed to install logger: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_types::MbError;
    use tracing::{debug, trace};

    #[test]
    fn flags_map_to_levels() {
        assert_eq!(level_for(0, false), LevelFilter::WARN);
        assert_eq!(level_for(1, false), LevelFilter::INFO);
        assert_eq!(level_for(2, false), LevelFilter::DEBUG);
        assert_eq!(level_for(7, false), LevelFilter::TRACE);
        assert_eq!(level_for(3, true), LevelFilter::OFF);
    }

    #[test]
    fn file_layer_records_events() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("run.log");

        let file = File::create(&log_path).unwrap();
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true);
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            debug!("wrote deck for paraboloid");
            trace!("filtered out");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("wrote deck for paraboloid"));
        assert!(content.contains("DEBUG"));
        assert!(!content.contains("filtered out"));
    }

    #[test]
    fn unwritable_log_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = setup_logging(0, true, Some(dir.path()));
        assert!(matches!(result, Err(MbError::Io(_))));
    }
}
