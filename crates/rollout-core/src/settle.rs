//! Settle windows
//!
//! After a topology or software change the network needs time to
//! converge. A window is either a fixed sleep followed by one observation,
//! or a bounded poll that re-observes until the check passes or the
//! timeout expires.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How long to wait before a checkpoint is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SettlePolicy {
    /// Sleep `secs`, then observe once
    Fixed {
        /// Wait in seconds
        secs: u64,
    },
    /// Observe every `interval_secs` until success or `timeout_secs`
    Poll {
        /// Upper bound in seconds
        timeout_secs: u64,
        /// Time between observations in seconds
        interval_secs: u64,
    },
}

impl SettlePolicy {
    /// Fixed window
    #[inline]
    #[must_use]
    pub fn fixed(secs: u64) -> Self {
        Self::Fixed { secs }
    }

    /// Polling window
    #[inline]
    #[must_use]
    pub fn poll(timeout_secs: u64, interval_secs: u64) -> Self {
        Self::Poll {
            timeout_secs,
            interval_secs,
        }
    }

    /// Longest time the window can take
    #[must_use]
    pub fn budget(&self) -> Duration {
        match *self {
            Self::Fixed { secs } => Duration::from_secs(secs),
            Self::Poll { timeout_secs, .. } => Duration::from_secs(timeout_secs),
        }
    }

    /// Reason the policy is unusable, if any
    #[must_use]
    pub fn problem(&self) -> Option<String> {
        match *self {
            Self::Fixed { .. } => None,
            Self::Poll {
                timeout_secs,
                interval_secs,
            } => {
                if interval_secs == 0 {
                    Some("poll interval must be positive".to_string())
                } else if interval_secs > timeout_secs {
                    Some(format!(
                        "poll interval {interval_secs}s exceeds timeout {timeout_secs}s"
                    ))
                } else {
                    None
                }
            }
        }
    }
}

/// Wait out `policy`, judging with `check`
///
/// In poll mode only convergence failures are re-observed; anything else
/// (node lifecycle, tool failures, state divergence) is returned at once.
/// When the timeout expires the last failure is returned.
pub async fn settle_until<T, F, Fut>(policy: SettlePolicy, mut check: F) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    match policy {
        SettlePolicy::Fixed { secs } => {
            tracing::info!("waiting {secs}s");
            tokio::time::sleep(Duration::from_secs(secs)).await;
            check().await
        }
        SettlePolicy::Poll {
            timeout_secs,
            interval_secs,
        } => {
            tracing::info!("polling every {interval_secs}s for up to {timeout_secs}s");
            let interval = Duration::from_secs(interval_secs.max(1));
            let deadline = Instant::now() + Duration::from_secs(timeout_secs);
            let mut attempt = 0u32;
            loop {
                tokio::time::sleep(interval).await;
                attempt += 1;
                match check().await {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_convergence_failure() && Instant::now() < deadline => {
                        tracing::debug!(attempt, %err, "not converged yet");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

/// Plain wait between lifecycle steps
pub async fn pause(secs: u64) {
    if secs > 0 {
        tracing::info!("waiting {secs}s");
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
