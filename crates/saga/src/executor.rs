//! Activity executor: runs one activity call with timeouts and retries.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Semaphore, watch};

use crate::activity::{ActivityCall, ActivityContext, ActivityError, ActivityOptions, ActivityRegistry};
use crate::events::FailureKind;

/// Default size of the activity worker pool.
pub const DEFAULT_ACTIVITY_WORKERS: usize = 32;

/// Terminal failure of an invocation after retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of an invocation across all of its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub output: Result<Value, ActivityFailure>,
    pub attempts: u32,
}

enum AttemptError {
    Activity(ActivityError),
    TimedOut,
}

/// Invokes registered activities.
///
/// A semaphore bounds how many attempts run at once, independent of how
/// many sagas are in flight. Waiting for a permit or a backoff holds no
/// thread.
#[derive(Clone)]
pub struct ActivityExecutor {
    registry: Arc<ActivityRegistry>,
    workers: Arc<Semaphore>,
}

impl ActivityExecutor {
    pub fn new(registry: ActivityRegistry, workers: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Runs `call` until it succeeds, fails fatally, or exhausts its policy.
    ///
    /// A success after failed attempts is a plain success; the earlier
    /// failures only show up in logs and metrics. When `cancel` flips to
    /// true no further attempt is started, but a running one is allowed to
    /// finish.
    #[tracing::instrument(
        skip(self, call, options, cancel),
        fields(workflow_id = %ctx.workflow_id, run_id = %ctx.run_id, activity = %call.activity)
    )]
    pub async fn invoke(
        &self,
        ctx: ActivityContext,
        call: &ActivityCall,
        options: &ActivityOptions,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> InvocationReport {
        let policy = &options.retry_policy;
        let max_attempts = policy.attempts();
        let activity = call.activity.clone();
        let mut last_error = String::new();
        let mut last_timed_out = false;

        for attempt in 1..=max_attempts {
            let ctx = ActivityContext {
                attempt,
                activity: activity.clone(),
                ..ctx.clone()
            };

            let result = self.attempt(&ctx, call, options).await;
            metrics::counter!("activity_attempts_total", "activity" => activity.clone())
                .increment(1);

            match result {
                Ok(output) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "activity succeeded after retries");
                    }
                    return InvocationReport {
                        output: Ok(output),
                        attempts: attempt,
                    };
                }
                Err(AttemptError::Activity(ActivityError::Fatal(message))) => {
                    metrics::counter!(
                        "activity_failures_total",
                        "activity" => activity.clone(),
                        "kind" => "fatal"
                    )
                    .increment(1);
                    tracing::warn!(attempt, error = %message, "activity failed fatally");
                    return InvocationReport {
                        output: Err(ActivityFailure {
                            kind: FailureKind::Fatal,
                            message,
                        }),
                        attempts: attempt,
                    };
                }
                Err(AttemptError::Activity(ActivityError::Retryable(message))) => {
                    metrics::counter!(
                        "activity_failures_total",
                        "activity" => activity.clone(),
                        "kind" => "retryable"
                    )
                    .increment(1);
                    last_error = message;
                    last_timed_out = false;
                }
                Err(AttemptError::TimedOut) => {
                    metrics::counter!(
                        "activity_failures_total",
                        "activity" => activity.clone(),
                        "kind" => "timeout"
                    )
                    .increment(1);
                    last_error = format!(
                        "timed out after {:?}",
                        options.start_to_close_timeout
                    );
                    last_timed_out = true;
                }
            }

            if attempt == max_attempts {
                break;
            }

            let backoff = policy.interval_for(attempt - 1);
            tracing::warn!(
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %last_error,
                "activity attempt failed, retrying"
            );

            let cancelled = match cancel.as_mut() {
                Some(rx) => tokio::select! {
                    _ = tokio::time::sleep(backoff) => false,
                    _ = rx.wait_for(|c| *c) => true,
                },
                None => {
                    tokio::time::sleep(backoff).await;
                    false
                }
            };
            if cancelled {
                return InvocationReport {
                    output: Err(ActivityFailure {
                        kind: FailureKind::Cancelled,
                        message: format!("cancelled after {attempt} attempts: {last_error}"),
                    }),
                    attempts: attempt,
                };
            }
        }

        let kind = if last_timed_out {
            FailureKind::Timeout
        } else {
            FailureKind::RetriesExhausted
        };
        tracing::warn!(attempts = max_attempts, error = %last_error, "activity retries exhausted");
        InvocationReport {
            output: Err(ActivityFailure {
                kind,
                message: format!("{last_error} (after {max_attempts} attempts)"),
            }),
            attempts: max_attempts,
        }
    }

    async fn attempt(
        &self,
        ctx: &ActivityContext,
        call: &ActivityCall,
        options: &ActivityOptions,
    ) -> Result<Value, AttemptError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| AttemptError::Activity(ActivityError::fatal("activity pool closed")))?;

        let started = Instant::now();
        let result =
            tokio::time::timeout(options.start_to_close_timeout, self.registry.call(ctx, call))
                .await;
        metrics::histogram!("activity_duration_seconds", "activity" => ctx.activity.clone())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(AttemptError::Activity(err)),
            Err(_) => Err(AttemptError::TimedOut),
        }
    }
}

impl std::fmt::Debug for ActivityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityExecutor")
            .field("registry", &self.registry)
            .field("available_workers", &self.workers.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use common::{RunId, WorkflowId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails `failures` times with the given error, then succeeds.
    struct Flaky {
        calls: Arc<AtomicU32>,
        failures: u32,
        error: ActivityError,
        delay: Duration,
    }

    #[async_trait]
    impl Activity for Flaky {
        type Input = ();
        type Output = ();

        const NAME: &'static str = "flaky";

        async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<(), ActivityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(())
        }
    }

    fn executor(failures: u32, error: ActivityError, delay: Duration) -> (ActivityExecutor, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ActivityRegistry::new().register(Flaky {
            calls: calls.clone(),
            failures,
            error,
            delay,
        });
        (ActivityExecutor::new(registry, 4), calls)
    }

    fn ctx() -> ActivityContext {
        ActivityContext {
            workflow_id: WorkflowId::new("wf"),
            run_id: RunId::new(),
            activity: String::new(),
            attempt: 0,
        }
    }

    fn options(attempts: u32) -> ActivityOptions {
        ActivityOptions::new(
            RetryPolicy::standard()
                .with_initial_interval(Duration::from_millis(1))
                .with_maximum_interval(Duration::from_millis(5))
                .with_maximum_attempts(attempts),
        )
    }

    fn call() -> ActivityCall {
        ActivityCall::to::<Flaky>(&()).unwrap()
    }

    #[tokio::test]
    async fn success_after_retries_is_a_plain_success() {
        let (executor, calls) = executor(2, ActivityError::retryable("unavailable"), Duration::ZERO);

        let report = executor.invoke(ctx(), &call(), &options(3), None).await;

        assert!(report.output.is_ok());
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn always_retryable_is_invoked_exactly_max_attempts() {
        let (executor, calls) = executor(u32::MAX, ActivityError::retryable("down"), Duration::ZERO);

        let report = executor.invoke(ctx(), &call(), &options(4), None).await;

        let failure = report.output.unwrap_err();
        assert_eq!(failure.kind, FailureKind::RetriesExhausted);
        assert!(failure.message.contains("down"));
        assert_eq!(report.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let (executor, calls) = executor(u32::MAX, ActivityError::fatal("insufficient stock"), Duration::ZERO);

        let report = executor.invoke(ctx(), &call(), &options(5), None).await;

        assert_eq!(report.output.unwrap_err().kind, FailureKind::Fatal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_reported() {
        let (executor, calls) = executor(0, ActivityError::fatal("unused"), Duration::from_millis(200));
        let options = options(2).with_timeout(Duration::from_millis(10));

        let report = executor.invoke(ctx(), &call(), &options, None).await;

        assert_eq!(report.output.unwrap_err().kind, FailureKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_further_attempts() {
        let (executor, calls) = executor(u32::MAX, ActivityError::retryable("down"), Duration::ZERO);
        let (tx, rx) = watch::channel(true);
        let options = ActivityOptions::new(
            RetryPolicy::standard()
                .with_initial_interval(Duration::from_secs(30))
                .with_maximum_attempts(5),
        );

        let report = executor.invoke(ctx(), &call(), &options, Some(rx)).await;

        assert_eq!(report.output.unwrap_err().kind, FailureKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(tx);
    }
}
