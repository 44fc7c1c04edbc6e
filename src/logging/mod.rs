//! Logging
//!
//! Two independent outputs:
//! - `tracing` for engine diagnostics, installed by `init_tracing`
//! - `LogEntry` protocol trace, pushed through an optional channel with `try_log`

pub mod entry;

pub use entry::{Direction, LogEntry, LogKind};

use tokio::sync::mpsc;

/// Initialize internal tracing
///
/// Call early in main() before any logging occurs.
/// Set `verbose` to true for debug-level output. `RUST_LOG` overrides both.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .try_init();
}

/// Push a trace entry without blocking
///
/// Returns false if there is no trace channel or the entry was dropped
/// (full or closed). `what` names the entry in the debug message.
pub fn try_log(tx: &Option<mpsc::Sender<LogEntry>>, entry: LogEntry, what: &str) -> bool {
    let Some(tx) = tx else {
        return false;
    };
    match tx.try_send(entry) {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!("Dropped {} trace entry: {}", what, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_log_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(try_log(&Some(tx), LogEntry::system("hello"), "system"));
        let entry = rx.recv().await.unwrap();
        assert!(matches!(entry.kind, LogKind::System { .. }));
    }

    #[test]
    fn test_try_log_without_channel() {
        assert!(!try_log(&None, LogEntry::system("nobody"), "system"));
    }

    #[test]
    fn test_try_log_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let tx = Some(tx);
        assert!(try_log(&tx, LogEntry::system("first"), "system"));
        assert!(!try_log(&tx, LogEntry::system("second"), "system"));
    }
}
