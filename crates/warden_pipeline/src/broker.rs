//! Task broker abstraction (C4/§5): chain and group primitives.
//!
//! `TaskBroker` stands in for the external broker spec.md §5 describes:
//! chains run their links strictly in order, stopping at the first failure;
//! groups run independently, with no ordering guaranteed and no link's
//! failure affecting its siblings. `TokioBroker` is the reference
//! implementation, spawning one `tokio::spawn`ed task per link, the way
//! `casparian_sentinel`'s job queue hands claimed work to a worker task —
//! except here the "queue" is just the `Vec` the caller built, since nothing
//! outlives this process.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::PipelineError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Run `links` strictly in order. Stop at (and return) the first error;
    /// later links in the same chain never run.
    async fn chain(&self, links: Vec<BoxFuture<'static, Result<(), PipelineError>>>) -> Result<(), PipelineError>;

    /// Run `tasks` independently. Every task runs regardless of its
    /// siblings' outcome; a failing task is logged, not propagated.
    async fn group(&self, tasks: Vec<BoxFuture<'static, Result<(), PipelineError>>>);
}

#[derive(Debug, Default)]
pub struct TokioBroker;

#[async_trait]
impl TaskBroker for TokioBroker {
    async fn chain(&self, links: Vec<BoxFuture<'static, Result<(), PipelineError>>>) -> Result<(), PipelineError> {
        for link in links {
            link.await?;
        }
        Ok(())
    }

    async fn group(&self, tasks: Vec<BoxFuture<'static, Result<(), PipelineError>>>) {
        let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "group task failed"),
                Err(join_err) => tracing::error!(error = %join_err, "group task panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn chain_stops_at_first_failure() {
        let broker = TokioBroker;
        let ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let a = {
            let ran = ran.clone();
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as BoxFuture<'static, Result<(), PipelineError>>
        };
        let b = Box::pin(async move { Err(PipelineError::Internal("boom".into())) })
            as BoxFuture<'static, Result<(), PipelineError>>;
        let c = {
            let ran = ran.clone();
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as BoxFuture<'static, Result<(), PipelineError>>
        };

        let result = broker.chain(vec![a, b, c]).await;
        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn group_runs_every_task_even_if_one_fails() {
        let broker = TokioBroker;
        let ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let ok_task = {
            let ran = ran.clone();
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as BoxFuture<'static, Result<(), PipelineError>>
        };
        let failing = Box::pin(async move { Err(PipelineError::Internal("boom".into())) })
            as BoxFuture<'static, Result<(), PipelineError>>;
        let ok_task_two = {
            let ran = ran.clone();
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as BoxFuture<'static, Result<(), PipelineError>>
        };

        broker.group(vec![ok_task, failing, ok_task_two]).await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
