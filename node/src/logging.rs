use std::{fs::OpenOptions, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use slog::{Drain, Level, Logger, Never, o};

/// Default file name for the plain-text run log.
pub const DEFAULT_LOG_FILE: &str = "DEIChain_log.txt";

/// Builds the process logger.
///
/// Records go to the terminal and, when `log_file` is set, are duplicated as
/// plain text into that file (appending). Both sinks share one async drain
/// filtered at `level`.
pub fn build_logger(level: &str, log_file: Option<&Path>) -> Result<Logger> {
    let level = Level::from_str(level).map_err(|()| anyhow!("unknown log level `{level}`"))?;

    let decorator = slog_term::TermDecorator::new().build();
    let term = slog_term::FullFormat::new(decorator).build().fuse();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let decorator = slog_term::PlainSyncDecorator::new(file);
            let plain = slog_term::FullFormat::new(decorator).build().fuse();
            Ok(finish(slog::Duplicate::new(term, plain).fuse(), level))
        }
        None => Ok(finish(term, level)),
    }
}

fn finish<D>(drain: D, level: Level) -> Logger
where
    D: Drain<Ok = (), Err = Never> + Send + 'static,
{
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(level)
        .fuse();
    Logger::root(drain, o!("app" => "deichain"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_level() {
        assert!(build_logger("loud", None).is_err());
    }

    #[test]
    fn writes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_LOG_FILE);
        {
            let logger = build_logger("info", Some(&path)).unwrap();
            slog::info!(logger, "hello from the test"; "n" => 1);
        }
        // The async drain flushes when the last logger handle is dropped
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello from the test"));
    }
}
