//! Conversion from Kubernetes pods to lifecycle units.

use std::collections::BTreeMap;
use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::domain::lifecycle::ContainerSpec;
use crate::domain::lifecycle::Unit;
use crate::domain::lifecycle::UnitId;
use crate::domain::lifecycle::UnitPhase;

impl From<&Pod> for Unit {
    fn from(pod: &Pod) -> Self {
        let metadata = &pod.metadata;
        let name = metadata
            .name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let namespace = metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        // pods always carry a uid once persisted; fall back to the name for partial objects
        let id = metadata
            .uid
            .clone()
            .map(UnitId::from)
            .unwrap_or_else(|| UnitId::new(format!("{namespace}/{name}")));

        let status = pod.status.as_ref();
        let phase = UnitPhase::from_phase_str(status.and_then(|s| s.phase.as_deref()));
        let finished_at = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| terminated_at_by_container(statuses))
            .unwrap_or_default();

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .map(|container| container_spec(container, &finished_at))
                    .collect()
            })
            .unwrap_or_default();

        Unit {
            id,
            namespace,
            name,
            phase,
            resource_version: metadata.resource_version.clone().unwrap_or_default(),
            containers,
        }
    }
}

fn terminated_at_by_container(statuses: &[ContainerStatus]) -> HashMap<String, DateTime<Utc>> {
    statuses
        .iter()
        .filter_map(|status| {
            let finished_at = status
                .state
                .as_ref()?
                .terminated
                .as_ref()?
                .finished_at
                .as_ref()?;
            Some((status.name.clone(), finished_at.0))
        })
        .collect()
}

fn container_spec(
    container: &Container,
    finished_at: &HashMap<String, DateTime<Utc>>,
) -> ContainerSpec {
    let resources = container.resources.as_ref();
    ContainerSpec {
        name: container.name.clone(),
        limits: quantities(resources.and_then(|r| r.limits.as_ref())),
        requests: quantities(resources.and_then(|r| r.requests.as_ref())),
        terminated_at: finished_at.get(&container.name).copied(),
    }
}

fn quantities(resources: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    resources
        .map(|resources| {
            resources
                .iter()
                .map(|(name, quantity)| (name.clone(), quantity.0.clone()))
                .collect()
        })
        .unwrap_or_default()
}
