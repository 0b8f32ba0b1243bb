use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::csrf::CsrfGuard;
use crate::session::SessionManager;

/// Handle to stop and join the sweeper thread.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the thread to exit. An in-flight sweep
    /// finishes first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_removed: usize,
    pub tokens_revoked: usize,
}

/// Periodic removal of expired sessions and their CSRF tokens.
#[derive(Debug)]
pub struct SessionSweeper;

impl SessionSweeper {
    /// Spawn the sweeper thread. The first sweep runs one `interval` after
    /// spawning.
    pub fn spawn(
        sessions: Arc<SessionManager>,
        csrf: Arc<CsrfGuard>,
        interval: Duration,
    ) -> io::Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("session-sweeper".to_string())
            .spawn(move || sweeper_loop(&sessions, &csrf, interval, shutdown_rx))?;

        info!(interval_secs = interval.as_secs(), "session sweeper started");
        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Run one sweep at `now`.
    ///
    /// Besides the tokens of sessions removed here, any token whose session
    /// is already gone (expired on access, logged out, rotated) is dropped.
    pub fn sweep_once(sessions: &SessionManager, csrf: &CsrfGuard, now: DateTime<Utc>) -> SweepReport {
        let removed = sessions.sweep(now);
        let tokens_revoked =
            csrf.revoke_all(&removed) + csrf.retain_live(|id| sessions.contains(id));
        SweepReport {
            sessions_removed: removed.len(),
            tokens_revoked,
        }
    }
}

fn sweeper_loop(
    sessions: &SessionManager,
    csrf: &CsrfGuard,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let report = SessionSweeper::sweep_once(sessions, csrf, Utc::now());
                if report != SweepReport::default() {
                    info!(
                        sessions_removed = report.sessions_removed,
                        tokens_revoked = report.tokens_revoked,
                        "expired sessions swept"
                    );
                } else {
                    debug!("session sweep found nothing to remove");
                }
            }
            // Explicit shutdown, or every handle dropped.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("session sweeper stopped");
}
