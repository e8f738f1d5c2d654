//! Per-request context.
//!
//! A [`RequestContext`] travels with one logical token acquisition through
//! authority resolution, discovery and the token request. It carries the
//! correlation id sent to the service, the cancellation signal and an optional
//! deadline applied to every network call.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{IdentityError, Result};

/// Context information for one logical request
#[derive(Clone)]
pub struct RequestContext {
    /// Correlation id sent as `client-request-id` and expected back in the response
    pub correlation_id: Option<Uuid>,

    /// Client (application) identifier, used for log fields
    pub client_id: Option<String>,

    /// Identifier reported to telemetry receivers
    pub telemetry_request_id: String,

    /// Cooperative cancellation signal
    pub cancellation_token: CancellationToken,

    /// Deadline applied to each network call made under this context
    pub timeout: Option<Duration>,

    /// Creation time, for elapsed-time reporting
    pub start_time: Instant,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("correlation_id", &self.correlation_id)
            .field("client_id", &self.client_id)
            .field("telemetry_request_id", &self.telemetry_request_id)
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a context with a fresh correlation id
    pub fn new() -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4()),
            client_id: None,
            telemetry_request_id: Uuid::new_v4().to_string(),
            cancellation_token: CancellationToken::new(),
            timeout: None,
            start_time: Instant::now(),
        }
    }

    /// Set an explicit correlation id
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Send requests without correlation headers
    pub fn without_correlation_id(mut self) -> Self {
        self.correlation_id = None;
        self
    }

    /// Set the client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Bound every network call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check if the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Drive `fut` to completion unless the context is cancelled or times out first
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Cancelled`] or [`IdentityError::Timeout`] when the
    /// future is abandoned, otherwise whatever `fut` yields.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(IdentityError::Cancelled);
        }

        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => Err(IdentityError::Cancelled),
                result = fut => result,
            }
        };

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, guarded)
                .await
                .map_err(|_| IdentityError::Timeout(timeout))?,
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start() {
        let ctx = RequestContext::new();
        ctx.cancellation_token.cancel();

        let result: Result<()> = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(IdentityError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_cancelled_in_flight() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation_token(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result: Result<()> = ctx
            .run(async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(IdentityError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(5));

        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(IdentityError::Timeout(d)) if d == Duration::from_secs(5)));
    }

    #[test]
    fn test_builder_and_debug() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::new()
            .with_correlation_id(id)
            .with_client_id("app");
        assert_eq!(ctx.correlation_id, Some(id));
        assert_eq!(ctx.client_id.as_deref(), Some("app"));
        assert!(format!("{ctx:?}").contains("cancelled: false"));

        assert!(RequestContext::new().without_correlation_id().correlation_id.is_none());
    }
}
