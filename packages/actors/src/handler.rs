//! Job handler trait and registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use queue_core::{FailureCode, Job, JobResult, OperationType, ProcessingError};

/// Result type for job handlers.
pub type HandlerResult = Result<JobResult, ProcessingError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Processes the payload of one kind of job.
///
/// Return [`ProcessingError::Retryable`] for transient trouble (network, a
/// busy upstream) and [`ProcessingError::Fatal`] when retrying cannot help.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, job: &Job) -> HandlerFuture;
}

/// Routes jobs to handlers by operation type.
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<OperationType, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `operation`, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, operation: OperationType, handler: H) {
        self.handlers.insert(operation, Arc::new(handler));
    }

    pub fn with<H: JobHandler>(mut self, operation: OperationType, handler: H) -> Self {
        self.register(operation, handler);
        self
    }

    pub fn get(&self, operation: OperationType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&operation).cloned()
    }

    pub fn has_handler(&self, operation: OperationType) -> bool {
        self.handlers.contains_key(&operation)
    }

    pub fn operations(&self) -> Vec<OperationType> {
        let mut ops: Vec<_> = self.handlers.keys().copied().collect();
        ops.sort();
        ops
    }

    /// Run the handler for `job`. A job nobody handles fails with `NO_HANDLER`.
    pub fn dispatch(&self, job: &Job) -> HandlerFuture {
        match self.get(job.operation) {
            Some(handler) => handler.handle(job),
            None => {
                let operation = job.operation;
                Box::pin(async move {
                    Err(ProcessingError::fatal(
                        FailureCode::NoHandler,
                        format!("no handler registered for {operation}"),
                    ))
                })
            }
        }
    }
}

impl fmt::Debug for JobHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Build a [`FnHandler`] from an async body that owns a clone of the job.
///
/// ```ignore
/// let handler = job_handler!(|job| Ok(JobResult::new(format!("done {}", job.id))));
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::new(|$job: &::queue_core::Job| {
            let $job = $job.clone();
            Box::pin(async move { $body })
        })
    };
}
