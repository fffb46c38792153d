//! Cancellation and shutdown envelope for outbound calls.

use std::{future::Future, time::Duration};

use {
    tokio::time::{Instant, timeout_at},
    tokio_util::sync::CancellationToken,
};

use crate::error::{Result, UpstreamError};

/// The signals one outbound call observes besides its own timeout.
///
/// `cancel` aborts immediately (the run was stopped or superseded).
/// `shutdown` lets the call continue, but only for `grace` more.
#[derive(Debug, Clone)]
pub struct CallDeadline {
    cancel: CancellationToken,
    shutdown: CancellationToken,
    grace: Duration,
}

impl CallDeadline {
    #[must_use]
    pub fn new(cancel: CancellationToken, shutdown: CancellationToken, grace: Duration) -> Self {
        Self {
            cancel,
            shutdown,
            grace,
        }
    }

    /// A deadline nothing outside the call can shorten.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(CancellationToken::new(), CancellationToken::new(), Duration::ZERO)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves when the run is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Resolves once shutdown has begun.
    pub async fn shutdown_started(&self) {
        self.shutdown.cancelled().await;
    }

    /// Drive `fut` to completion within `timeout`, honouring cancellation and
    /// the shutdown grace period.
    pub async fn run<T, F>(&self, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + timeout;
        tokio::pin!(fut);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(UpstreamError::Cancelled),
            res = timeout_at(deadline, &mut fut) => {
                return res.unwrap_or(Err(UpstreamError::Timeout { after: timeout }));
            },
            () = self.shutdown.cancelled() => {},
        }

        let grace_deadline = deadline.min(Instant::now() + self.grace);
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(UpstreamError::Cancelled),
            res = timeout_at(grace_deadline, &mut fut) => match res {
                Ok(out) => out,
                Err(_) if grace_deadline < deadline => Err(UpstreamError::Cancelled),
                Err(_) => Err(UpstreamError::Timeout { after: timeout }),
            },
        }
    }
}
