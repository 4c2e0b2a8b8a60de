//! Last-seen pod snapshots, used to turn raw watch events into notifications.
//!
//! `kube::runtime::watcher` reports what a pod looks like now, not what it
//! looked like before. Keeping the previous snapshot per UID lets us emit
//! `Updated(old, new)` pairs, announce pods that vanished across a relist,
//! and replay unchanged snapshots on resync.

use std::collections::HashMap;
use std::collections::HashSet;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use tracing::debug;
use tracing::info;

use crate::domain::lifecycle::Notification;
use crate::domain::lifecycle::Unit;
use crate::domain::lifecycle::UnitId;

#[derive(Debug, Default)]
pub struct PodCache {
    units: HashMap<UnitId, Unit>,
    synced: bool,
}

impl PodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the initial enumeration has completed.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Folds a watch event into the cache and returns the notifications it implies.
    pub fn apply(&mut self, event: watcher::Event<Pod>) -> Vec<Notification> {
        match event {
            watcher::Event::Applied(pod) => vec![self.upsert(Unit::from(&pod))],
            watcher::Event::Deleted(pod) => {
                let unit = Unit::from(&pod);
                self.units.remove(&unit.id);
                vec![Notification::Deleted(unit)]
            }
            watcher::Event::Restarted(pods) => self.relist(pods),
        }
    }

    /// Re-announces every cached unit unchanged.
    pub fn resync(&self) -> Vec<Notification> {
        self.units
            .values()
            .map(|unit| Notification::Updated(unit.clone(), unit.clone()))
            .collect()
    }

    fn upsert(&mut self, unit: Unit) -> Notification {
        match self.units.insert(unit.id.clone(), unit.clone()) {
            Some(previous) => Notification::Updated(previous, unit),
            None => Notification::Added(unit),
        }
    }

    fn relist(&mut self, pods: Vec<Pod>) -> Vec<Notification> {
        let listed: Vec<Unit> = pods.iter().map(Unit::from).collect();
        let listed_ids: HashSet<&UnitId> = listed.iter().map(|unit| &unit.id).collect();

        let vanished: Vec<UnitId> = self
            .units
            .keys()
            .filter(|id| !listed_ids.contains(id))
            .cloned()
            .collect();

        let mut notifications = Vec::with_capacity(listed.len() + vanished.len());
        for id in vanished {
            if let Some(unit) = self.units.remove(&id) {
                debug!(namespace = %unit.namespace, name = %unit.name, "Pod missing from relist");
                notifications.push(Notification::Deleted(unit));
            }
        }
        for unit in listed {
            notifications.push(self.upsert(unit));
        }

        if !self.synced {
            self.synced = true;
            info!(pods = self.units.len(), "Initial pod enumeration complete");
        } else {
            debug!(pods = self.units.len(), "Pod watch relisted");
        }
        notifications
    }
}
