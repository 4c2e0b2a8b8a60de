//! Data model shared by the lifecycle tracker.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use derive_more::Display;

/// Stable identity of a tracked unit (the pod UID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle phase reported by the unit's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl UnitPhase {
    /// Maps a Kubernetes `status.phase` string. Anything unrecognised is `Unknown`.
    pub fn from_phase_str(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the unit has finished and will not run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Declared resources of one container, as raw quantity strings keyed by resource name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub limits: BTreeMap<String, String>,
    pub requests: BTreeMap<String, String>,
    /// When the container's terminated state was last observed to finish.
    pub terminated_at: Option<DateTime<Utc>>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, resource: &str, quantity: &str) -> Self {
        self.limits.insert(resource.to_string(), quantity.to_string());
        self
    }

    pub fn with_request(mut self, resource: &str, quantity: &str) -> Self {
        self.requests.insert(resource.to_string(), quantity.to_string());
        self
    }
}

/// Full snapshot of a unit as delivered by the change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: UnitId,
    pub namespace: String,
    pub name: String,
    pub phase: UnitPhase,
    /// Opaque change token; equal tokens mean an unchanged object.
    pub resource_version: String,
    pub containers: Vec<ContainerSpec>,
}

impl Unit {
    pub fn new(id: impl Into<UnitId>, namespace: &str, name: &str) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase: UnitPhase::Pending,
            resource_version: String::new(),
            containers: Vec::new(),
        }
    }

    pub fn with_phase(mut self, phase: UnitPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_resource_version(mut self, resource_version: &str) -> Self {
        self.resource_version = resource_version.to_string();
        self
    }

    pub fn with_container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    /// Latest per-container finish timestamp, if any container has terminated.
    pub fn last_container_finished_at(&self) -> Option<DateTime<Utc>> {
        self.containers.iter().filter_map(|c| c.terminated_at).max()
    }
}

/// A change notification for a single unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Added(Unit),
    /// Previous and current snapshot.
    Updated(Unit, Unit),
    Deleted(Unit),
}

impl Notification {
    pub fn unit_id(&self) -> &UnitId {
        match self {
            Self::Added(unit) | Self::Deleted(unit) | Self::Updated(_, unit) => &unit.id,
        }
    }
}

/// Tracked state for one unit between its first `Added` and its `Deleted`.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleRecord {
    pub id: UnitId,
    pub namespace: String,
    pub name: String,
    /// Observation time of the first `Added`. Never changes.
    pub start_time: DateTime<Utc>,
    /// Last terminal observation; overwritten by later ones.
    pub end_time: Option<DateTime<Utc>>,
    pub last_resource_version: String,
}

impl LifecycleRecord {
    pub fn new(unit: &Unit, start_time: DateTime<Utc>) -> Self {
        Self {
            id: unit.id.clone(),
            namespace: unit.namespace.clone(),
            name: unit.name.clone(),
            start_time,
            end_time: None,
            last_resource_version: unit.resource_version.clone(),
        }
    }

    /// Seconds elapsed between `start_time` and `at`.
    pub fn elapsed_seconds(&self, at: DateTime<Utc>) -> f64 {
        seconds(at - self.start_time)
    }

    /// Seconds between `start_time` and `end_time`, if the record has been finalized.
    pub fn total_seconds(&self) -> Option<f64> {
        self.end_time.map(|end| self.elapsed_seconds(end))
    }
}

fn seconds(delta: TimeDelta) -> f64 {
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Declared resources summed across all containers of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    pub cpu_limit_milli: u64,
    pub memory_limit_bytes: u64,
    pub cpu_request_milli: u64,
    pub memory_request_bytes: u64,
}

impl Add for ResourceTotals {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cpu_limit_milli: self.cpu_limit_milli.saturating_add(rhs.cpu_limit_milli),
            memory_limit_bytes: self
                .memory_limit_bytes
                .saturating_add(rhs.memory_limit_bytes),
            cpu_request_milli: self.cpu_request_milli.saturating_add(rhs.cpu_request_milli),
            memory_request_bytes: self
                .memory_request_bytes
                .saturating_add(rhs.memory_request_bytes),
        }
    }
}

impl Sum for ResourceTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}
