use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::domain::lifecycle::Notification;
use crate::infrastructure::k8s::pod_cache::PodCache;
use crate::infrastructure::k8s::types::KubernetesError;
use crate::infrastructure::kube_client;

/// What to watch and how often to resync.
#[derive(Debug, Clone, Default)]
pub struct ChangeStreamOptions {
    pub kubeconfig: Option<PathBuf>,
    /// Namespace to watch; all namespaces when `None`.
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    /// Restrict to pods scheduled on this node.
    pub node_name: Option<String>,
    /// Period of unchanged re-announcements; disabled when `None`.
    pub resync_period: Option<Duration>,
}

/// Watches pods and forwards `Added` / `Updated` / `Deleted` notifications.
///
/// Delivery is serialized through a single channel, so the receiving
/// processor sees every pod's history in order.
pub struct PodChangeStream {
    options: ChangeStreamOptions,
}

impl PodChangeStream {
    pub fn new(options: ChangeStreamOptions) -> Self {
        Self { options }
    }

    /// Watch pods until cancelled.
    ///
    /// Once the initial listing has completed, watch errors are logged and
    /// the watcher recovers with backoff while the cache keeps its view.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ConnectionFailed`] if the client cannot be built
    /// - [`KubernetesError::WatchFailed`] if the initial listing fails or the watch ends on its own
    /// - [`KubernetesError::ChannelClosed`] if the receiver went away
    #[tracing::instrument(skip_all, fields(namespace = ?self.options.namespace, node_name = ?self.options.node_name))]
    pub async fn run(
        &self,
        update_sender: mpsc::Sender<Notification>,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting pod change stream");
        let client = kube_client::init_kube_client(self.options.kubeconfig.as_deref()).await?;
        self.watch_pods(&client, &update_sender, &cancellation_token)
            .await
    }

    fn api(&self, client: &Client) -> Api<Pod> {
        match &self.options.namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        }
    }

    fn watcher_config(&self) -> Config {
        let mut config = Config::default();
        if let Some(labels) = &self.options.label_selector {
            config = config.labels(labels);
        }
        if let Some(node_name) = &self.options.node_name {
            config = config.fields(&format!("spec.nodeName={node_name}"));
        }
        config
    }

    async fn watch_pods(
        &self,
        client: &Client,
        update_sender: &mpsc::Sender<Notification>,
        cancellation_token: &CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        let mut stream = watcher(self.api(client), self.watcher_config())
            .default_backoff()
            .boxed();
        let mut cache = PodCache::new();
        let mut resync = self.options.resync_period.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let notifications = select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    info!("Pod change stream shutdown requested");
                    return Ok(());
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => cache.apply(event),
                    Some(Err(e)) => {
                        check_watch_error(cache.is_synced(), &e)?;
                        continue;
                    }
                    None => {
                        return Err(Report::new(KubernetesError::WatchFailed {
                            message: "Watch stream ended unexpectedly".to_string(),
                        }));
                    }
                },
                _ = tick(&mut resync), if cache.is_synced() => {
                    debug!(pods = cache.len(), "Resyncing pods");
                    cache.resync()
                }
            };

            for notification in notifications {
                if !forward(update_sender, notification, cancellation_token).await? {
                    info!("Pod change stream shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

/// Decides whether a watch error ends the stream.
///
/// Before the first listing completes there is nothing to keep, so the error
/// is fatal. Afterwards the watcher backs off and relists on its own.
fn check_watch_error(
    synced: bool,
    error: &impl std::fmt::Display,
) -> Result<(), Report<KubernetesError>> {
    if !synced {
        return Err(Report::new(KubernetesError::WatchFailed {
            message: format!("Initial pod listing failed: {error}"),
        }));
    }
    warn!("Pod watch error, retrying with backoff: {error}");
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sends one notification, giving up if cancellation is observed first.
///
/// Returns `false` when cancelled.
async fn forward(
    update_sender: &mpsc::Sender<Notification>,
    notification: Notification,
    cancellation_token: &CancellationToken,
) -> Result<bool, Report<KubernetesError>> {
    select! {
        biased;
        _ = cancellation_token.cancelled() => Ok(false),
        sent = update_sender.send(notification) => match sent {
            Ok(()) => Ok(true),
            Err(_) => Err(Report::new(KubernetesError::ChannelClosed)),
        }
    }
}
