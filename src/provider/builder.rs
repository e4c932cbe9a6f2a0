use std::time::Duration;

use crate::provider::{IntoRootProvider, ProviderError, RpcProvider};

// RPC retry and timeout settings
/// Default total timeout of a single [`RpcProvider`] call, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time to wait for the next head on a subscription.
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default maximum number of retry attempts.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

/// Builder for constructing an [`RpcProvider`].
///
/// Use this to configure timeouts and retry/backoff.
#[derive(Debug)]
pub struct RpcProviderBuilder<P: IntoRootProvider> {
    provider: P,
    call_timeout: Duration,
    subscription_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
}

impl<P: IntoRootProvider> RpcProviderBuilder<P> {
    /// Create a new builder with default settings.
    ///
    /// Any type implementing [`IntoRootProvider`] can be used.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            subscription_timeout: DEFAULT_SUBSCRIPTION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }

    /// Create a new builder with no retry attempts and only timeout set.
    #[must_use]
    pub fn fragile(provider: P) -> Self {
        Self::new(provider).max_retries(0).min_delay(Duration::ZERO)
    }

    /// Set the maximum timeout for RPC operations.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the timeout for receiving the next head from a subscription.
    ///
    /// This should be set higher than the chain's block time. Default is
    /// [`DEFAULT_SUBSCRIPTION_TIMEOUT`].
    #[must_use]
    pub fn subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Build the [`RpcProvider`].
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to connect.
    pub async fn build(self) -> Result<RpcProvider, ProviderError> {
        debug!(
            call_timeout_ms = self.call_timeout.as_millis(),
            subscription_timeout_ms = self.subscription_timeout.as_millis(),
            max_retries = self.max_retries,
            "Building RpcProvider"
        );

        let root = self.provider.into_root_provider().await?;

        info!("RpcProvider initialized");

        Ok(RpcProvider {
            root,
            call_timeout: self.call_timeout,
            subscription_timeout: self.subscription_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
        })
    }
}
