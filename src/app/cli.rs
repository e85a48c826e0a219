use std::future::Future;

use tracing::{error, info, warn};

use super::error::AppError;

/// Reusable CLI application runner that handles:
/// - Signal handling (SIGINT, SIGTERM, SIGHUP)
/// - Stdout buffering
/// - Exit codes (0 = success, 1 = error, 128 + signal number when interrupted)
///
/// Interrupting drops the main future, so any open storage transaction is
/// rolled back rather than committed.
pub struct CliApp {
    name: String,
}

impl CliApp {
    /// Create a new CLI application runner
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the CLI application with signal handling and exit codes.
    ///
    /// Creates a buffered stdout writer and passes it to the main function,
    /// which is responsible for flushing it.
    ///
    /// This function never returns - it calls std::process::exit with the appropriate code
    pub async fn run<F, Fut>(self, main_fn: F) -> !
    where
        F: FnOnce(tokio::io::BufWriter<tokio::io::Stdout>) -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        let writer = tokio::io::BufWriter::new(tokio::io::stdout());
        let signal_fut = self.wait_for_signal();

        tokio::select! {
            result = main_fn(writer) => {
                match result {
                    Ok(()) => std::process::exit(0),
                    Err(e) => {
                        error!(app = %self.name, error = %e, "Command failed");
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            signal_code = signal_fut => {
                info!(app = %self.name, signal_code, "Interrupted, in-flight events rolled back");
                std::process::exit(signal_code);
            }
        }
    }

    /// Wait for any Unix signal (SIGINT, SIGTERM, SIGHUP) or Ctrl+C
    /// Returns the exit code to use (130 for SIGINT, 143 for SIGTERM, etc.)
    async fn wait_for_signal(&self) -> i32 {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let (Ok(mut sigterm), Ok(mut sigint), Ok(mut sighup)) = (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
                signal(SignalKind::hangup()),
            ) else {
                warn!("Signal handlers unavailable, running without them");
                return std::future::pending().await;
            };

            tokio::select! {
                _ = sigterm.recv() => 143, // 128 + 15
                _ = sigint.recv() => 130,  // 128 + 2
                _ = sighup.recv() => 129,  // 128 + 1
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Ctrl+C handler unavailable, running without it");
                return std::future::pending().await;
            }
            130
        }
    }
}
