use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::domain::lifecycle::DEFAULT_THRESHOLD_SECONDS;
use crate::infrastructure::k8s::ChangeStreamOptions;

#[derive(Parser, Clone, Debug)]
pub struct TrackArgs {
    #[arg(
        long,
        env = "LIFECYCLE_THRESHOLD_SECONDS",
        default_value_t = DEFAULT_THRESHOLD_SECONDS,
        value_parser = parse_threshold,
        help = "Pods whose observed lifetime is less than or equal to this many seconds are reported"
    )]
    pub lifecycle_threshold_seconds: f64,

    #[arg(
        long,
        env = "KUBECONFIG_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "WATCH_NAMESPACE",
        help = "Namespace to watch, all namespaces when unset"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        env = "WATCH_LABEL_SELECTOR",
        help = "Only watch pods matching this label selector, e.g. app=batch"
    )]
    pub label_selector: Option<String>,

    #[arg(
        long,
        env = "NODE_NAME",
        help = "Only watch pods scheduled on this node"
    )]
    pub node_name: Option<String>,

    #[arg(
        long,
        env = "RESYNC_PERIOD_SECONDS",
        default_value = "30",
        help = "Seconds between resyncs of unchanged pods, 0 disables resync"
    )]
    pub resync_period_seconds: u64,

    #[arg(
        long,
        env = "SUMMARY_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also append short-lived pod summaries to this file, rotated daily, e.g. /logs/summary.log"
    )]
    pub summary_file: Option<PathBuf>,

    #[arg(
        long,
        default_value = "256",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Capacity of the notification channel between the watch and the processor"
    )]
    pub channel_capacity: u64,
}

impl TrackArgs {
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_seconds > 0).then(|| Duration::from_secs(self.resync_period_seconds))
    }
}

impl From<&TrackArgs> for ChangeStreamOptions {
    fn from(args: &TrackArgs) -> Self {
        Self {
            kubeconfig: args.kubeconfig.clone(),
            namespace: args.namespace.clone(),
            label_selector: args.label_selector.clone(),
            node_name: args.node_name.clone(),
            resync_period: args.resync_period(),
        }
    }
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    let threshold: f64 = value
        .parse()
        .map_err(|e| format!("invalid threshold `{value}`: {e}"))?;
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(format!(
            "threshold must be a finite, non-negative number of seconds, got `{value}`"
        ));
    }
    Ok(threshold)
}
