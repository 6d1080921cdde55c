//! Call guards for outbound operations: bounded linear-backoff retries and a
//! three-state circuit breaker.

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{retry_with_backoff, RetryExhausted, RetryPolicy, NO_PATTERNS};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerSnapshot,
    CircuitOpen, CircuitState, ErrorHook, StateChangeHook,
};
