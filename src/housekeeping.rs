use crate::error::AppResult;
use crate::services::UserService;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

/// Background task that purges expired sessions and locks accounts whose trip is over
pub struct Housekeeper {
    user_service: Arc<UserService>,
    interval: Duration,
}

/// What one pass changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub sessions_purged: u64,
    pub accounts_locked: usize,
}

impl Housekeeper {
    pub fn new(user_service: Arc<UserService>, interval: Duration) -> Self {
        Self {
            user_service,
            interval,
        }
    }

    /// Run forever; a failed pass is logged and retried on the next tick
    pub async fn start(self) {
        let mut interval = time::interval(self.interval);
        info!("Housekeeping started, running every {:?}", self.interval);

        loop {
            interval.tick().await;

            match self.run_once().await {
                Ok(report) if report != PassReport::default() => {
                    info!(
                        "Housekeeping: purged {} session(s), locked {} account(s)",
                        report.sessions_purged, report.accounts_locked
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Housekeeping pass failed: {}", e),
            }
        }
    }

    pub async fn run_once(&self) -> AppResult<PassReport> {
        let sessions_purged = self.user_service.purge_expired_sessions().await?;
        let accounts_locked = self.user_service.lock_finished_trips().await?;

        Ok(PassReport {
            sessions_purged,
            accounts_locked,
        })
    }
}
