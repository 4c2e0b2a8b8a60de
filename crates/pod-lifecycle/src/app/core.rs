use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::app::tasks::Tasks;
use crate::config::TrackArgs;

/// Application core structure with explicit dependencies
pub struct Application {
    track_args: TrackArgs,
}

impl Application {
    pub fn new(track_args: TrackArgs) -> Self {
        Self { track_args }
    }

    /// Get track arguments
    pub fn track_args(&self) -> &TrackArgs {
        &self.track_args
    }

    /// Run until a shutdown signal arrives or a task fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until_cancelled(CancellationToken::new(), true)
            .await
    }

    /// Run until `cancellation_token` is cancelled or a task fails.
    ///
    /// With `handle_signals`, SIGINT/SIGTERM also cancel the token.
    pub async fn run_until_cancelled(
        &self,
        cancellation_token: CancellationToken,
        handle_signals: bool,
    ) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new(cancellation_token);
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion(handle_signals).await {
            tracing::error!("Error during task execution: {e:#}");
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
