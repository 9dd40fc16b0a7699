//! Activities: typed remote calls the engine invokes from saga steps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{RunId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::payload::{self, Payload, PayloadError};
use crate::retry::RetryPolicy;

/// Failure reported by an activity. The callee decides the classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    /// Transient problem (service unavailable, network). Retried per policy.
    #[error("{0}")]
    Retryable(String),

    /// Business rejection. Never retried.
    #[error("{0}")]
    Fatal(String),
}

impl ActivityError {
    pub fn retryable(message: impl Into<String>) -> Self {
        ActivityError::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ActivityError::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::Retryable(_))
    }
}

impl From<PayloadError> for ActivityError {
    fn from(err: PayloadError) -> Self {
        ActivityError::Fatal(err.to_string())
    }
}

/// Identifies one attempt of one activity call.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub activity: String,
    /// 1-based.
    pub attempt: u32,
}

/// Per-call execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    /// Limit for a single attempt. A timeout counts as a retryable failure.
    pub start_to_close_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(5 * 60),
            retry_policy: RetryPolicy::standard(),
        }
    }
}

/// A named activity with its encoded input, as recorded by a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCall {
    pub activity: String,
    pub input: Value,
}

impl ActivityCall {
    /// Builds a call to `A` from its typed input.
    pub fn to<A: Activity>(input: &A::Input) -> Result<Self, PayloadError> {
        Ok(Self {
            activity: A::NAME.to_string(),
            input: payload::encode(input)?,
        })
    }
}

/// A named remote operation with typed input and output.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    type Input: Payload;
    type Output: Payload;

    const NAME: &'static str;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

/// Object-safe form of [`Activity`] working on encoded payloads.
#[async_trait]
trait ErasedActivity: Send + Sync {
    async fn call(&self, ctx: &ActivityContext, input: &Value) -> Result<Value, ActivityError>;
}

struct Typed<A>(A);

#[async_trait]
impl<A: Activity> ErasedActivity for Typed<A> {
    async fn call(&self, ctx: &ActivityContext, input: &Value) -> Result<Value, ActivityError> {
        let input: A::Input = payload::decode(input)?;
        let output = self.0.execute(ctx, input).await?;
        Ok(payload::encode(&output)?)
    }
}

/// Activity lookup table, built once at startup and handed to the executor.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<&'static str, Arc<dyn ErasedActivity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an activity under its [`Activity::NAME`], replacing any previous one.
    pub fn register<A: Activity>(mut self, activity: A) -> Self {
        self.activities.insert(A::NAME, Arc::new(Typed(activity)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.activities.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub(crate) async fn call(
        &self,
        ctx: &ActivityContext,
        call: &ActivityCall,
    ) -> Result<Value, ActivityError> {
        match self.activities.get(call.activity.as_str()) {
            Some(activity) => activity.call(ctx, &call.input).await,
            None => Err(ActivityError::Fatal(format!(
                "activity {} is not registered",
                call.activity
            ))),
        }
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.names())
            .finish()
    }
}
