//! Named wall-clock timeout classes.
//!
//! Each class wraps an async operation in `tokio::time::timeout`. On
//! expiry the wrapped future is dropped, which cancels any in-flight
//! awaits it owns, and a `timeout` error naming the class and duration is
//! returned.

use std::future::Future;
use std::time::Duration;

use relay_core::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Connection,
    Request,
    /// Bounds an entire policy execution, retries and waits included.
    Operation,
    Idle,
}

impl TimeoutClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Request => "request",
            Self::Operation => "operation",
            Self::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub connection: Duration,
    pub request: Duration,
    pub operation: Duration,
    pub idle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection: Duration::from_secs(10),
            request: Duration::from_secs(30),
            operation: Duration::from_secs(60),
            idle: Duration::from_secs(300),
        }
    }
}

pub struct TimeoutExecutor {
    config: TimeoutConfig,
}

impl TimeoutExecutor {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn duration_for(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Connection => self.config.connection,
            TimeoutClass::Request => self.config.request,
            TimeoutClass::Operation => self.config.operation,
            TimeoutClass::Idle => self.config.idle,
        }
    }

    pub async fn run<T, Fut>(&self, class: TimeoutClass, operation: Fut) -> Result<T, ChannelError>
    where
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        self.run_with(class, self.duration_for(class), operation).await
    }

    /// Run with an explicit duration overriding the configured one.
    pub async fn run_with<T, Fut>(
        &self,
        class: TimeoutClass,
        duration: Duration,
        operation: Fut,
    ) -> Result<T, ChannelError>
    where
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        match tokio::time::timeout(duration, operation).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ChannelError::timeout(class.as_str(), duration)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::ErrorCode;
    use tokio::time::Instant;

    use super::{TimeoutClass, TimeoutConfig, TimeoutExecutor};

    #[tokio::test(start_paused = true)]
    async fn unit_expired_class_reports_name_and_duration() {
        let executor = TimeoutExecutor::new(TimeoutConfig {
            request: Duration::from_millis(100),
            ..TimeoutConfig::default()
        });
        let error = executor
            .run(TimeoutClass::Request, std::future::pending::<Result<(), _>>())
            .await
            .expect_err("must time out");
        assert_eq!(error.code, ErrorCode::Timeout);
        assert!(error.message.contains("request"));
        assert!(error.message.contains("100ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn unit_completed_operation_passes_through() {
        let executor = TimeoutExecutor::new(TimeoutConfig::default());
        let value = executor
            .run(TimeoutClass::Operation, async { Ok::<u32, _>(7) })
            .await
            .expect("completes");
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_custom_duration_overrides_configured_one() {
        let executor = TimeoutExecutor::new(TimeoutConfig {
            operation: Duration::from_secs(60),
            ..TimeoutConfig::default()
        });
        let started = Instant::now();
        executor
            .run_with(
                TimeoutClass::Operation,
                Duration::from_millis(50),
                std::future::pending::<Result<(), _>>(),
            )
            .await
            .expect_err("custom timeout fires");
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(150),
            "elapsed was {elapsed:?}"
        );
    }
}
