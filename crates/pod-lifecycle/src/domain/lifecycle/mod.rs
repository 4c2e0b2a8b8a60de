//! Lifecycle tracking for short-lived pods.
//!
//! - [`LifecycleProcessor`]: the state machine consuming [`Notification`]s
//! - [`LifecycleStore`]: per-unit records keyed by [`UnitId`]
//! - [`aggregator`]: declared CPU/memory totals across containers
//! - [`Reporter`]: emits the [`LifecycleSummary`] of short-lived units

pub mod aggregator;
pub mod clock;
pub mod processor;
pub mod reporter;
pub mod store;
pub mod types;

pub use clock::Clock;
#[cfg(any(test, feature = "test-util"))]
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use processor::LifecycleProcessor;
pub use processor::DEFAULT_THRESHOLD_SECONDS;
pub use reporter::LifecycleSummary;
#[cfg(any(test, feature = "test-util"))]
pub use reporter::RecordingReporter;
pub use reporter::Reporter;
pub use reporter::TracingReporter;
pub use reporter::SUMMARY_TARGET;
pub use store::LifecycleStore;
pub use types::ContainerSpec;
pub use types::LifecycleRecord;
pub use types::Notification;
pub use types::ResourceTotals;
pub use types::Unit;
pub use types::UnitId;
pub use types::UnitPhase;
