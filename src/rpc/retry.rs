use crate::errors::{RetryError, RpcFailure};
use crate::metrics;
use crate::rpc::{ChainClient, EndpointPool};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{task::yield_now, time::sleep};
use tokio_util::sync::CancellationToken;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RetryPolicy {
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl RetryPolicy {
    /// Rejects `max_attempts == 0`.
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Result<Self, ValidationErrors> {
        let policy = Self {
            max_attempts,
            retry_delay_ms: retry_delay.as_millis().min(u128::from(u64::MAX)) as u64,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Runs a fallible RPC operation under a [`RetryPolicy`].
///
/// Only transient failures are retried, with a fixed delay between attempts.
/// Permanent failures return on first sight. An optional cancellation token
/// aborts remaining attempts and any pending delay.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancellation: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcFailure>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0;

        loop {
            if self.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}/{}", label, attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                metrics::record_permanent_failure(err.kind);
                warn!("{} failed permanently: {}", label, err);
                return Err(RetryError::Permanent(err));
            }

            if attempt >= max_attempts {
                metrics::record_exhausted();
                error!("{} exhausted {} attempt(s): {}", label, attempt, err);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            metrics::record_retry(err.kind);
            warn!(
                "{} failed on attempt {}/{} ({}); retrying in {}ms",
                label,
                attempt,
                max_attempts,
                err,
                self.policy.retry_delay_ms
            );
            self.pause(self.policy.retry_delay()).await?;
        }
    }

    /// Like [`execute`](Self::execute) against the pool's active endpoint. When
    /// retries run out the pool advances once and the whole operation is rerun
    /// against the next endpoint.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        pool: &mut EndpointPool,
        label: &str,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, RpcFailure>>,
    {
        let client = pool.client().map_err(RetryError::Permanent)?;
        let first = self
            .execute(label, || operation(client.clone()))
            .await;

        match first {
            Err(RetryError::Exhausted { attempts, last }) => {
                let next = match pool.advance() {
                    Ok(next) => next.clone(),
                    Err(pool_err) => {
                        warn!("{}: cannot fail over ({})", label, pool_err);
                        return Err(RetryError::Exhausted { attempts, last });
                    }
                };
                warn!("{}: retrying once against {}", label, next);
                let client = pool.client().map_err(RetryError::Permanent)?;
                self.execute(label, || operation(client.clone())).await
            }
            other => other,
        }
    }

    async fn pause(&self, delay: Duration) -> Result<(), RetryError> {
        if delay.is_zero() {
            yield_now().await;
            return Ok(());
        }
        match &self.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(RetryError::Cancelled),
                _ = sleep(delay) => Ok(()),
            },
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }
}
