//! Bounded retries with exponential backoff over a raw `HubTransport`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{HubRequest, HubResponse, HubTransport, TransportError};
use crate::error::{HubError, Result};

/// Call site tag, used for logs and error classification only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    FetchModel,
    UploadMetrics,
    UploadEpoch,
    UploadFinal,
    Heartbeat,
    DatasetProbe,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchModel => "fetch-model",
            Self::UploadMetrics => "upload-metrics",
            Self::UploadEpoch => "upload-epoch",
            Self::UploadFinal => "upload-final",
            Self::Heartbeat => "heartbeat",
            Self::DatasetProbe => "dataset-probe",
        }
    }
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exponential backoff: `base * 2^(retry - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// No waiting between attempts
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Worst-case time spent sleeping across `retries` retries.
    pub fn total(&self, retries: u32) -> Duration {
        (1..=retries).map(|r| self.delay(r)).sum()
    }
}

/// Retry budget, timeout and backoff for one kind of call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallProfile {
    /// Retries after the first attempt; 0 means a single attempt
    pub retries: u32,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl CallProfile {
    pub fn new(retries: u32, timeout: Duration, backoff: Backoff) -> Self {
        Self {
            retries,
            timeout,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Shared, stateless retry wrapper used for every outbound hub call
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn HubTransport>,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn HubTransport>) -> Self {
        Self { inner }
    }

    /// Send `request`, retrying transient failures up to `profile.retries` times.
    ///
    /// Non-2xx responses are failures. Permanent failures return immediately as
    /// `TransportPermanent`; an exhausted budget returns `TransportExhausted`
    /// carrying the last failure.
    pub async fn send(
        &self,
        mut request: HubRequest,
        call: CallKind,
        profile: &CallProfile,
    ) -> Result<HubResponse> {
        request.timeout = profile.timeout;
        let max_attempts = profile.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let failure =
                match tokio::time::timeout(profile.timeout, self.inner.send(request.clone())).await
                {
                    Ok(Ok(resp)) if resp.is_success() => {
                        debug!(call = %call, attempt, status = %resp.status, "hub call succeeded");
                        return Ok(resp);
                    }
                    Ok(Ok(resp)) => TransportError::from_response(&resp),
                    Ok(Err(e)) => e,
                    Err(_) => TransportError::Timeout(profile.timeout),
                };

            if !failure.is_transient() {
                warn!(call = %call, attempt, "hub call rejected: {}", failure);
                return Err(HubError::TransportPermanent {
                    call,
                    source: failure,
                });
            }

            if attempt >= max_attempts {
                return Err(HubError::TransportExhausted {
                    call,
                    attempts: attempt,
                    last: failure,
                });
            }

            let delay = profile.backoff.delay(attempt);
            warn!(
                call = %call,
                attempt,
                max_attempts,
                "hub call failed: {}, retrying in {:?}",
                failure,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
