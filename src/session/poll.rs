use super::SessionController;
use crate::http::HttpError;
use crate::redact::redact_secrets;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Refreshed,
    LoggedOut,
    Failed,
}

fn compute_next_delay_with_nanos(base: Duration, ratio: f64, nanos: i128) -> Duration {
    let base_ms = base.as_millis() as f64;
    let frac = ((nanos % 1000) as f64) / 1000.0;
    let delta = (frac * 2.0 - 1.0) * (base_ms * ratio);
    let floor_ms = base_ms.min(1000.0);
    Duration::from_millis((base_ms + delta).max(floor_ms) as u64)
}

/// `interval` with ±10% jitter so polling clients do not line up.
pub(crate) fn next_poll_delay(interval: Duration) -> Duration {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    compute_next_delay_with_nanos(interval, 0.1, nanos)
}

/// Fetches the profile once. A 401 that survived token recovery ends the session;
/// a failed refresh already did so through the coordinator.
pub async fn poll_once(session: &SessionController) -> PollOutcome {
    match session.api().get_me().await {
        Ok(user) => {
            session.refresh_user(user);
            PollOutcome::Refreshed
        }
        Err(err) if err.is_unauthorized() => {
            warn!("identity poll rejected after token recovery");
            session.logout().await;
            PollOutcome::LoggedOut
        }
        Err(HttpError::Refresh(_)) => PollOutcome::LoggedOut,
        Err(err) => {
            warn!(error = %redact_secrets(&err.to_string()), transient = err.is_transient(), "identity poll failed");
            PollOutcome::Failed
        }
    }
}

/// Polls the identity endpoint while the session is authenticated. Pauses while it
/// is not; stops on [`SessionController::shutdown`] or when the session is dropped.
pub fn spawn_identity_poll(session: &SessionController, interval: Duration) -> JoinHandle<()> {
    let weak = session.downgrade();
    let mut state_rx = session.subscribe();
    let mut shutdown_rx = session.shutdown_signal();

    tokio::spawn(async move {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let authenticated = state_rx.borrow_and_update().is_authenticated();
            if !authenticated {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() { break; }
                        continue;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(next_poll_delay(interval)) => {}
                changed = state_rx.changed() => {
                    if changed.is_err() { break; }
                    continue;
                }
                _ = shutdown_rx.changed() => break,
            }

            let Some(session) = SessionController::upgrade(&weak) else {
                break;
            };
            let outcome = poll_once(&session).await;
            debug!(?outcome, "identity poll");
        }
        debug!("identity poll stopped");
    })
}
