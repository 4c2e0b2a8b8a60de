use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::domain::lifecycle::LifecycleProcessor;
use crate::domain::lifecycle::Notification;
use crate::infrastructure::k8s::ChangeStreamOptions;
use crate::infrastructure::k8s::PodChangeStream;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<Result<()>>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    /// Start the change stream and the dispatcher feeding the lifecycle processor
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let capacity = usize::try_from(app.track_args().channel_capacity).unwrap_or(usize::MAX);
        let (update_sender, update_receiver) = mpsc::channel::<Notification>(capacity);

        let change_stream_task = self.spawn_change_stream_task(app, update_sender);
        self.tasks.push(change_stream_task);

        let processor_task = self.spawn_processor_task(app, update_receiver);
        self.tasks.push(processor_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    ///
    /// Whatever ends the wait, every task is cancelled and awaited before returning.
    pub async fn wait_for_completion(&mut self, handle_signals: bool) -> Result<()> {
        let cancellation_token = self.cancellation_token.clone();
        let signal_handler = async {
            if handle_signals {
                shutdown_signal().await
            } else {
                std::future::pending().await
            }
        };
        let tasks = &mut self.tasks;
        let first_finished = async move {
            let (result, index, _) = futures::future::select_all(tasks.iter_mut()).await;
            (result, index)
        };

        let outcome = tokio::select! {
            result = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                result
            }
            _ = cancellation_token.cancelled() => {
                tracing::info!("Cancellation requested, waiting for tasks");
                Ok(())
            }
            // Wait for any task to complete unexpectedly
            (result, index) = first_finished => {
                self.tasks.remove(index);
                match result {
                    Ok(Ok(())) => {
                        tracing::warn!("Task completed unexpectedly");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(anyhow!("Task panicked or was aborted: {e}")),
                }
            }
        };

        self.cancellation_token.cancel();
        let remaining = self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
        outcome.and(remaining)
    }

    /// Await every remaining task, returning the first failure.
    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        let tasks = std::mem::take(&mut self.tasks);
        tokio::time::timeout(timeout, async {
            let mut first_error = None;
            for task in tasks {
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow!("Task failed during shutdown: {e}")),
                };
                if let Err(e) = result {
                    tracing::error!("{e:#}");
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
            Ok(())
        })
    }

    fn spawn_change_stream_task(
        &self,
        app: &Application,
        update_sender: mpsc::Sender<Notification>,
    ) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();
        let change_stream = PodChangeStream::new(ChangeStreamOptions::from(app.track_args()));
        tokio::spawn(async move {
            tracing::info!("Starting pod change stream task");
            change_stream
                .run(update_sender, token)
                .await
                .map_err(|e| anyhow!("Pod change stream failed: {e:?}"))?;
            tracing::info!("Pod change stream task completed");
            Ok(())
        })
    }

    fn spawn_processor_task(
        &self,
        app: &Application,
        update_receiver: mpsc::Receiver<Notification>,
    ) -> JoinHandle<Result<()>> {
        let token = self.cancellation_token.clone();
        let threshold = app.track_args().lifecycle_threshold_seconds;
        tokio::spawn(async move {
            tracing::info!("Starting lifecycle processor task");
            let mut processor = LifecycleProcessor::with_threshold(threshold);
            let processed = processor.run(update_receiver, token).await;
            tracing::info!(processed, "Lifecycle processor task completed");
            Ok(())
        })
    }
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }
    Ok(())
}
