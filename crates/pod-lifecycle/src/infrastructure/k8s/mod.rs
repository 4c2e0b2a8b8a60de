//! Kubernetes integration module.
//!
//! Turns the raw pod watch into the `Added` / `Updated` / `Deleted`
//! notifications consumed by the lifecycle processor.
//!
//! The main components are:
//! - [`PodChangeStream`]: watches pods and forwards notifications
//! - [`PodCache`]: last-seen snapshot per pod, used to derive notifications
//! - [`KubernetesError`]: failures of the watch or the client

pub mod change_stream;
pub mod pod_cache;
pub mod types;
pub mod unit;

pub use change_stream::ChangeStreamOptions;
pub use change_stream::PodChangeStream;
pub use pod_cache::PodCache;
pub use types::KubernetesError;
