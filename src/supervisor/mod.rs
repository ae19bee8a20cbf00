// =============================================================================
// Supervisor (C9) — restartable-unit lifecycle for the analysis loops and
// the chat listener
// =============================================================================
//
// Generalizes the reconnect-loop pattern the rest of this codebase reaches
// for around its network streams (spawn, run until the future exits or
// panics, sleep, respawn) into a named unit with a fast-crash counter and
// exponential back-off, plus a shared shutdown signal every unit watches.
// =============================================================================

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Crash inside this window counts toward the fast-crash streak; a unit
/// that survives longer than this resets its streak back to zero (§4.9).
const FAST_CRASH_WINDOW_SECS: u64 = 60;

/// Bounded drain period after a shutdown signal before a unit is abandoned
/// mid-flight (§5 "must finish within a 5-second drain or be force-terminated").
const DRAIN_TIMEOUT_SECS: u64 = 5;

/// Back-off before restart: `min(2^(fails-1), 60)` seconds, zero on the
/// first start of a unit's life.
fn backoff_secs(fails: u32) -> u64 {
    if fails == 0 {
        return 0;
    }
    2u64.saturating_pow(fails - 1).min(60)
}

/// Owns the shared shutdown signal every supervised unit watches, and
/// spawns each unit as an independently restartable task.
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self { shutdown_tx }
    }

    /// Signal every supervised unit to stop. Units observe this on their
    /// next poll and get up to `DRAIN_TIMEOUT_SECS` to finish in flight.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn `name` as a restartable unit. `make` is called fresh on every
    /// (re)start; its returned future is expected to run until cancelled or
    /// until it errors out on its own. A unit that returns or panics counts
    /// as a crash: elapsed time under the fast-crash window increments the
    /// streak, anything longer resets it, and the next start is delayed by
    /// `backoff_secs`.
    pub fn spawn_unit<F, Fut>(&self, name: impl Into<String>, mut make: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let mut shutdown_rx = self.shutdown_rx();

        tokio::spawn(async move {
            let mut fails: u32 = 0;

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                info!(unit = %name, "unit starting");
                let started = Instant::now();
                let mut handle = tokio::spawn(make());

                tokio::select! {
                    res = &mut handle => {
                        let elapsed = started.elapsed();
                        match res {
                            Ok(()) => info!(unit = %name, elapsed_s = elapsed.as_secs(), "unit exited"),
                            Err(e) => error!(unit = %name, error = %e, elapsed_s = elapsed.as_secs(), "unit crashed"),
                        }

                        if elapsed < Duration::from_secs(FAST_CRASH_WINDOW_SECS) {
                            fails += 1;
                        } else {
                            fails = 0;
                        }

                        if *shutdown_rx.borrow() {
                            break;
                        }

                        let wait = backoff_secs(fails);
                        warn!(unit = %name, fails, wait_secs = wait, "restarting unit after back-off");
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if !*shutdown_rx.borrow() {
                            continue;
                        }
                        info!(unit = %name, "shutdown requested, draining");
                        match tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), &mut handle).await {
                            Ok(_) => info!(unit = %name, "unit drained cleanly"),
                            Err(_) => {
                                handle.abort();
                                warn!(unit = %name, "drain timed out, unit force-terminated");
                            }
                        }
                        break;
                    }
                }
            }

            info!(unit = %name, "unit stopped");
        })
    }
}

/// Write this process's pid to `path` so external tooling can find it.
/// Overwrites any existing file.
pub fn write_pidfile(path: impl AsRef<Path>) -> std::io::Result<()> {
    std::fs::write(path, std::process::id().to_string())
}

/// Remove the pidfile on clean shutdown. Absence is not an error — a
/// supervisor that never wrote one, or one already cleaned up, shuts down
/// the same way.
pub fn remove_pidfile(path: impl AsRef<Path>) {
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.as_ref().display(), error = %e, "failed to remove pidfile");
        }
    }
}

pub fn default_pidfile_path() -> PathBuf {
    PathBuf::from("aurora-assistant.pid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_is_zero_on_first_start() {
        assert_eq!(backoff_secs(0), 0);
    }

    #[test]
    fn backoff_doubles_and_caps_at_60() {
        assert_eq!(backoff_secs(1), 1);
        assert_eq!(backoff_secs(2), 2);
        assert_eq!(backoff_secs(3), 4);
        assert_eq!(backoff_secs(7), 64.min(60));
        assert_eq!(backoff_secs(10), 60);
    }

    #[tokio::test]
    async fn unit_restarts_after_it_returns() {
        let supervisor = Supervisor::new();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();

        let handle = supervisor.spawn_unit("test-unit", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn pidfile_round_trips() {
        let path = std::env::temp_dir().join(format!("aurora-test-{}.pid", std::process::id()));
        write_pidfile(&path).unwrap();
        assert!(path.exists());
        remove_pidfile(&path);
        assert!(!path.exists());
    }
}
