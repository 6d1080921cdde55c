use crate::resilience::backoff::RetryPolicy;
use crate::runtime::telemetry::DEFAULT_METRICS_INTERVAL;
use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Default minimum spacing between forced sequence refetches.
pub const DEFAULT_FORCE_REFETCH_INTERVAL: Duration = Duration::from_secs(5);
/// Default upper bound on a single remote sequence fetch.
pub const DEFAULT_REFETCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ITEM_TIMEOUT_SECS: u64 = 10;

/// Refetch throttling and timeout for a [`NonceTracker`](crate::NonceTracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceTrackerConfig {
    force_refetch_interval: Duration,
    refetch_timeout: Duration,
}

impl Default for NonceTrackerConfig {
    fn default() -> Self {
        Self {
            force_refetch_interval: DEFAULT_FORCE_REFETCH_INTERVAL,
            refetch_timeout: DEFAULT_REFETCH_TIMEOUT,
        }
    }
}

impl NonceTrackerConfig {
    pub fn builder() -> NonceTrackerConfigBuilder {
        NonceTrackerConfigBuilder::default()
    }

    pub fn new(force_refetch_interval: Duration, refetch_timeout: Duration) -> Result<Self> {
        let config = Self {
            force_refetch_interval,
            refetch_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Refetches closer together than this are refused.
    pub fn force_refetch_interval(&self) -> Duration {
        self.force_refetch_interval
    }

    /// Upper bound on a single remote fetch.
    pub fn refetch_timeout(&self) -> Duration {
        self.refetch_timeout
    }

    pub fn validate(&self) -> Result<()> {
        if self.refetch_timeout.is_zero() {
            bail!("refetch_timeout must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct NonceTrackerConfigBuilder {
    force_refetch_interval: Option<Duration>,
    refetch_timeout: Option<Duration>,
}

impl NonceTrackerConfigBuilder {
    pub fn force_refetch_interval(mut self, interval: Duration) -> Self {
        self.force_refetch_interval = Some(interval);
        self
    }

    pub fn refetch_timeout(mut self, timeout: Duration) -> Self {
        self.refetch_timeout = Some(timeout);
        self
    }

    /// Both intervals must be overridden together or left at their defaults.
    pub fn build(self) -> Result<NonceTrackerConfig> {
        match (self.force_refetch_interval, self.refetch_timeout) {
            (Some(interval), Some(timeout)) => NonceTrackerConfig::new(interval, timeout),
            (None, None) => Ok(NonceTrackerConfig::default()),
            _ => bail!(
                "force_refetch_interval and refetch_timeout must be set together; \
                 either both custom or neither"
            ),
        }
    }
}

/// Runtime configuration for an [`AsyncProcessor`](crate::AsyncProcessor).
///
/// Construct through [`ProcessorConfig::builder`] or [`ProcessorConfig::new`] so
/// invariants are validated before the processor sees the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    queue_capacity: usize,
    item_timeout: Duration,
    retry_policy: Option<RetryPolicy>,
    non_retriable_patterns: Vec<String>,
    metrics_interval: Option<Duration>,
}

pub struct ProcessorConfigParams {
    pub queue_capacity: usize,
    pub item_timeout: Duration,
    pub retry_policy: Option<RetryPolicy>,
    pub non_retriable_patterns: Vec<String>,
    pub metrics_interval: Option<Duration>,
}

impl ProcessorConfig {
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::default()
    }

    pub fn new(params: ProcessorConfigParams) -> Result<Self> {
        let ProcessorConfigParams {
            queue_capacity,
            item_timeout,
            retry_policy,
            non_retriable_patterns,
            metrics_interval,
        } = params;

        let config = Self {
            queue_capacity,
            item_timeout,
            retry_policy,
            non_retriable_patterns: non_retriable_patterns
                .into_iter()
                .map(|pattern| pattern.trim().to_owned())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Fixed capacity of the input queue (and of the output queue).
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Deadline applied to each item, retries included.
    pub fn item_timeout(&self) -> Duration {
        self.item_timeout
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Error substrings that stop retrying an item.
    pub fn non_retriable_patterns(&self) -> &[String] {
        &self.non_retriable_patterns
    }

    /// Interval of the periodic metrics log line, if enabled.
    pub fn metrics_interval(&self) -> Option<Duration> {
        self.metrics_interval
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than 0");
        }

        if self.item_timeout.is_zero() {
            bail!("item_timeout must be greater than 0");
        }

        if let Some(policy) = &self.retry_policy {
            if policy.max_duration().is_zero() {
                bail!("retry_policy max_duration must be greater than 0");
            }
        }

        if self.metrics_interval.is_some_and(|interval| interval.is_zero()) {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProcessorConfigBuilder {
    queue_capacity: Option<usize>,
    item_timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    non_retriable_patterns: Vec<String>,
    metrics_interval: Option<Duration>,
}

impl ProcessorConfigBuilder {
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn non_retriable_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.non_retriable_patterns.push(pattern.into());
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    /// Enables the metrics reporter at [`DEFAULT_METRICS_INTERVAL`].
    pub fn with_default_metrics(self) -> Self {
        self.metrics_interval(DEFAULT_METRICS_INTERVAL)
    }

    pub fn build(self) -> Result<ProcessorConfig> {
        let params = ProcessorConfigParams {
            queue_capacity: self.queue_capacity.context("queue_capacity is required")?,
            item_timeout: self
                .item_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_ITEM_TIMEOUT_SECS)),
            retry_policy: self.retry_policy,
            non_retriable_patterns: self.non_retriable_patterns,
            metrics_interval: self.metrics_interval,
        };

        ProcessorConfig::new(params)
    }
}
