pub mod nonce;
pub mod processor;
pub mod resilience;
pub mod runtime;
pub mod scope;

pub use nonce::{NonceError, NonceTracker, SequenceFuture, SequenceRecord, SequenceSource};
pub use processor::{
    AsyncProcessor, FnProcessor, ProcessFuture, ProcessorError, RequestProcessor, WorkItem,
    WorkResult,
};
pub use resilience::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerSnapshot, CircuitOpen, CircuitState, RetryExhausted, RetryPolicy, NO_PATTERNS,
};
pub use runtime::config::{
    NonceTrackerConfig, NonceTrackerConfigBuilder, ProcessorConfig, ProcessorConfigBuilder,
    ProcessorConfigParams,
};
pub use runtime::telemetry::{
    init_tracing, ProcessorTelemetry, ProcessorTelemetrySnapshot, DEFAULT_METRICS_INTERVAL,
};
pub use scope::{Scope, ScopeError};
