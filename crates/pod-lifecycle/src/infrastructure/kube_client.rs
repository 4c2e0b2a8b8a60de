use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::info;

use crate::infrastructure::k8s::KubernetesError;

/// Client for the API server the pods are watched on.
///
/// With `kubeconfig` the file is used as is; otherwise the in-cluster
/// service account and then `~/.kube/config` are tried.
///
/// # Errors
///
/// - [`KubernetesError::ConnectionFailed`] if no usable configuration is found
pub async fn init_kube_client(
    kubeconfig: Option<&Path>,
) -> Result<Client, Report<KubernetesError>> {
    let config = load_config(kubeconfig).await?;
    info!(cluster_url = %config.cluster_url, "Using Kubernetes API server");

    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to build Kubernetes client".to_string(),
    })
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Report<KubernetesError>> {
    let Some(path) = kubeconfig else {
        return Config::infer()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "No in-cluster or local kubeconfig available".to_string(),
            });
    };

    let connection_failed = |what: &str| KubernetesError::ConnectionFailed {
        message: format!("{what}: {}", path.display()),
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .change_context_lazy(|| connection_failed("Unreadable kubeconfig"))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(|| connection_failed("Unusable kubeconfig"))
}
