//! Lifecycle state machine.
//!
//! Each unit moves through *absent* → *tracked* → *finalized* → *absent*:
//! the first `Added` creates a record, terminal `Updated` notifications stamp
//! an end time, and `Deleted` finalizes the record, reports it when it lived
//! no longer than the threshold, and evicts it.

use chrono::SecondsFormat;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::aggregator;
use super::clock::Clock;
use super::clock::SystemClock;
use super::reporter::LifecycleSummary;
use super::reporter::Reporter;
use super::reporter::TracingReporter;
use super::store::LifecycleStore;
use super::types::LifecycleRecord;
use super::types::Notification;
use super::types::Unit;
use super::types::UnitPhase;

/// Default lifetime (seconds) at or below which a deleted unit is reported.
pub const DEFAULT_THRESHOLD_SECONDS: f64 = 30.0;

/// Consumes change notifications and decides when to report short-lived units.
///
/// Owns its store, sequence counter, clock and reporter, so independent
/// processors can coexist in one process.
pub struct LifecycleProcessor<C = SystemClock, R = TracingReporter> {
    store: LifecycleStore,
    clock: C,
    reporter: R,
    threshold_seconds: f64,
    sequence: u64,
}

impl LifecycleProcessor {
    /// Processor backed by the wall clock and the tracing reporter.
    pub fn with_threshold(threshold_seconds: f64) -> Self {
        Self::new(threshold_seconds, SystemClock, TracingReporter)
    }
}

impl<C, R> LifecycleProcessor<C, R>
where
    C: Clock,
    R: Reporter,
{
    pub fn new(threshold_seconds: f64, clock: C, reporter: R) -> Self {
        Self {
            store: LifecycleStore::new(),
            clock,
            reporter,
            threshold_seconds,
            sequence: 0,
        }
    }

    pub fn store(&self) -> &LifecycleStore {
        &self.store
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Number of summaries emitted so far; also the last sequence number used.
    pub fn reports_emitted(&self) -> u64 {
        self.sequence
    }

    pub fn handle(&mut self, notification: Notification) {
        match notification {
            Notification::Added(unit) => self.on_added(&unit),
            Notification::Updated(old, new) => self.on_updated(&old, &new),
            Notification::Deleted(unit) => self.on_deleted(&unit),
        }
    }

    /// Starts tracking `unit`. A duplicate `Added` leaves the existing record untouched.
    pub fn on_added(&mut self, unit: &Unit) {
        if self.store.contains(&unit.id) {
            trace!(
                namespace = %unit.namespace,
                name = %unit.name,
                "Pod already tracked, ignoring duplicate add"
            );
            return;
        }

        let record = LifecycleRecord::new(unit, self.clock.now());
        debug!(
            namespace = %record.namespace,
            name = %record.name,
            start_time = %record.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            "Pod created"
        );
        self.store.upsert(unit.id.clone(), record);
    }

    /// Applies a real change. Resync echoes and orphans are dropped.
    pub fn on_updated(&mut self, old: &Unit, new: &Unit) {
        if old.resource_version == new.resource_version {
            return;
        }
        let Some(record) = self.store.get_mut(&new.id) else {
            return;
        };
        if record.last_resource_version == new.resource_version {
            return;
        }
        record.last_resource_version = new.resource_version.clone();

        let now = self.clock.now();
        if new.phase.is_terminal() {
            record.end_time = Some(now);
            trace!(
                namespace = %record.namespace,
                name = %record.name,
                phase = %new.phase,
                end_time = %now.to_rfc3339_opts(SecondsFormat::Secs, true),
                container_finished_at = ?new.last_container_finished_at(),
                total_seconds = record.elapsed_seconds(now),
                "Pod finished"
            );
        } else if new.phase == UnitPhase::Running {
            trace!(
                namespace = %record.namespace,
                name = %record.name,
                running_seconds = record.elapsed_seconds(now),
                "Pod updated"
            );
        }
    }

    /// Finalizes and evicts the record, reporting it when it is short-lived.
    pub fn on_deleted(&mut self, unit: &Unit) {
        let Some(mut record) = self.store.delete(&unit.id) else {
            return;
        };

        let end_time = self.clock.now();
        record.end_time = Some(end_time);
        let total_seconds = record.elapsed_seconds(end_time);
        let totals = aggregator::aggregate(&unit.containers);

        debug!(
            namespace = %record.namespace,
            name = %record.name,
            end_time = %end_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            total_seconds,
            "Pod deleted"
        );

        if total_seconds <= self.threshold_seconds {
            self.sequence += 1;
            self.reporter.report(&LifecycleSummary {
                seq: self.sequence,
                namespace: record.namespace,
                name: record.name,
                total_seconds,
                totals,
            });
        }
    }

    /// Dispatches notifications from `receiver` until cancelled or the channel closes.
    ///
    /// Cancellation is checked before every receive, so nothing is processed
    /// once it has been observed. Returns the number of notifications handled.
    pub async fn run(
        &mut self,
        mut receiver: mpsc::Receiver<Notification>,
        cancellation_token: CancellationToken,
    ) -> u64 {
        info!(
            threshold_seconds = self.threshold_seconds,
            "Starting lifecycle processor"
        );

        let mut processed = 0;
        loop {
            select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    info!("Lifecycle processor shutdown requested");
                    break;
                }
                notification = receiver.recv() => match notification {
                    Some(notification) => {
                        self.handle(notification);
                        processed += 1;
                    }
                    None => {
                        warn!("Notification channel closed");
                        break;
                    }
                }
            }
        }
        receiver.close();

        info!(
            processed,
            tracked = self.store.len(),
            reported = self.sequence,
            "Lifecycle processor stopped"
        );
        processed
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use chrono::TimeDelta;
    use chrono::TimeZone;
    use chrono::Utc;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::lifecycle::aggregator::CPU;
    use crate::domain::lifecycle::aggregator::MEMORY;
    use crate::domain::lifecycle::clock::ManualClock;
    use crate::domain::lifecycle::reporter::RecordingReporter;
    use crate::domain::lifecycle::types::ContainerSpec;
    use crate::domain::lifecycle::types::UnitId;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    type TestProcessor = LifecycleProcessor<ManualClock, RecordingReporter>;

    fn processor(threshold: f64) -> (TestProcessor, ManualClock) {
        let clock = ManualClock::new(t0());
        let processor =
            LifecycleProcessor::new(threshold, clock.clone(), RecordingReporter::default());
        (processor, clock)
    }

    fn pod(uid: &str, rv: &str) -> Unit {
        Unit::new(uid, "default", uid).with_resource_version(rv)
    }

    #[test]
    fn added_creates_record_at_observation_time() {
        let (mut processor, _clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));

        let record = processor.store().get(&UnitId::new("a")).expect("tracked");
        assert_eq!(record.start_time, t0());
        assert_eq!(record.end_time, None);
        assert_eq!(record.last_resource_version, "1");
    }

    #[test]
    fn duplicate_added_keeps_first_record() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));
        clock.advance(TimeDelta::seconds(3));
        processor.on_added(&pod("a", "5"));

        let record = processor.store().get(&UnitId::new("a")).expect("tracked");
        assert_eq!(record.start_time, t0());
        assert_eq!(record.last_resource_version, "1");
        assert_eq!(processor.store().len(), 1);
    }

    #[test]
    fn resync_echo_never_mutates() {
        let (mut processor, clock) = processor(30.0);
        let running = pod("a", "2").with_phase(UnitPhase::Succeeded);
        processor.on_added(&pod("a", "1"));
        let before = processor.store().get(&UnitId::new("a")).cloned();

        for _ in 0..5 {
            clock.advance(TimeDelta::seconds(1));
            processor.on_updated(&running, &running);
        }

        assert_eq!(processor.store().get(&UnitId::new("a")).cloned(), before);
        assert_eq!(processor.reports_emitted(), 0);
    }

    #[test]
    fn update_with_stored_token_is_ignored() {
        let (mut processor, _clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));

        let old = pod("a", "0");
        let new = pod("a", "1").with_phase(UnitPhase::Failed);
        processor.on_updated(&old, &new);

        let record = processor.store().get(&UnitId::new("a")).expect("tracked");
        assert_eq!(record.end_time, None);
    }

    #[test]
    fn orphan_update_and_delete_are_noops() {
        let (mut processor, _clock) = processor(30.0);

        processor.on_updated(
            &pod("ghost", "1"),
            &pod("ghost", "2").with_phase(UnitPhase::Succeeded),
        );
        processor.on_deleted(&pod("ghost", "3"));

        assert!(processor.store().is_empty());
        assert!(processor.reporter().summaries().is_empty());
    }

    #[test]
    fn terminal_update_sets_end_time_last_write_wins() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));

        clock.advance(TimeDelta::seconds(4));
        processor.on_updated(&pod("a", "1"), &pod("a", "2").with_phase(UnitPhase::Failed));
        clock.advance(TimeDelta::seconds(2));
        processor.on_updated(&pod("a", "2"), &pod("a", "3").with_phase(UnitPhase::Succeeded));

        let record = processor.store().get(&UnitId::new("a")).expect("tracked");
        assert_eq!(record.end_time, Some(t0() + TimeDelta::seconds(6)));
        assert_eq!(record.last_resource_version, "3");
    }

    #[test]
    fn running_update_leaves_end_time_unset() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));
        clock.advance(TimeDelta::seconds(2));
        processor.on_updated(&pod("a", "1"), &pod("a", "2").with_phase(UnitPhase::Running));

        let record = processor.store().get(&UnitId::new("a")).expect("tracked");
        assert_eq!(record.end_time, None);
        assert_eq!(record.last_resource_version, "2");
    }

    #[test]
    fn delete_overrides_terminal_end_time() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));
        clock.advance(TimeDelta::seconds(3));
        processor.on_updated(&pod("a", "1"), &pod("a", "2").with_phase(UnitPhase::Succeeded));
        clock.advance(TimeDelta::seconds(4));
        processor.on_deleted(&pod("a", "3"));

        let summaries = processor.reporter().summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_seconds, 7.0);
    }

    #[test]
    fn elapsed_time_and_single_report() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));
        clock.advance(TimeDelta::seconds(2));
        processor.on_updated(&pod("a", "1"), &pod("a", "2").with_phase(UnitPhase::Running));
        clock.advance(TimeDelta::seconds(8));
        processor.on_deleted(&pod("a", "3"));

        let summaries = processor.reporter().summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].seq, 1);
        assert_eq!(summaries[0].total_seconds, 10.0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("exact", "1"));
        processor.on_added(&pod("over", "1"));

        clock.advance(TimeDelta::seconds(30));
        processor.on_deleted(&pod("exact", "2"));
        clock.advance(TimeDelta::milliseconds(1));
        processor.on_deleted(&pod("over", "2"));

        let summaries = processor.reporter().summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "exact");
        assert_eq!(summaries[0].total_seconds, 30.0);
    }

    #[test]
    fn delete_evicts_even_without_report() {
        let (mut processor, clock) = processor(1.0);
        processor.on_added(&pod("slow", "1"));
        clock.advance(TimeDelta::seconds(60));
        processor.on_deleted(&pod("slow", "2"));

        assert!(processor.store().get(&UnitId::new("slow")).is_none());
        assert_eq!(processor.reports_emitted(), 0);
    }

    #[test]
    fn sequence_increments_by_one_per_report() {
        let (mut processor, clock) = processor(10.0);
        for (i, uid) in ["a", "b", "slow", "c"].iter().enumerate() {
            processor.on_added(&pod(uid, "1"));
            if *uid == "slow" {
                clock.advance(TimeDelta::seconds(11));
            }
            processor.on_deleted(&pod(uid, "2"));
            clock.advance(TimeDelta::seconds(i as i64));
        }

        let seqs: Vec<u64> = processor
            .reporter()
            .summaries()
            .iter()
            .map(|s| s.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(processor.reports_emitted(), 3);
    }

    #[test]
    fn delete_reports_aggregated_resources() {
        let (mut processor, clock) = processor(30.0);
        let unit = pod("a", "1")
            .with_container(
                ContainerSpec::new("main")
                    .with_limit(CPU, "250m")
                    .with_limit(MEMORY, "128Mi")
                    .with_request(CPU, "100m"),
            )
            .with_container(ContainerSpec::new("sidecar").with_request(MEMORY, "64Mi"));

        processor.on_added(&unit);
        clock.advance(TimeDelta::seconds(1));
        processor.on_deleted(&unit);

        let totals = processor.reporter().summaries()[0].totals;
        assert_eq!(totals.cpu_limit_milli, 250);
        assert_eq!(totals.memory_limit_bytes, 134_217_728);
        assert_eq!(totals.cpu_request_milli, 100);
        assert_eq!(totals.memory_request_bytes, 67_108_864);
    }

    #[test]
    fn readded_after_delete_starts_fresh() {
        let (mut processor, clock) = processor(30.0);
        processor.on_added(&pod("a", "1"));
        processor.on_deleted(&pod("a", "2"));
        clock.advance(TimeDelta::seconds(100));
        processor.on_added(&pod("a", "3"));

        let record = processor.store().get(&UnitId::new("a")).expect("tracked");
        assert_eq!(record.start_time, t0() + TimeDelta::seconds(100));
    }

    #[test(tokio::test)]
    async fn run_drains_channel_until_closed() {
        let (mut processor, _clock) = processor(30.0);
        let (tx, rx) = mpsc::channel(8);

        tx.send(Notification::Added(pod("a", "1"))).await.unwrap();
        tx.send(Notification::Deleted(pod("a", "2"))).await.unwrap();
        drop(tx);

        let processed = processor.run(rx, CancellationToken::new()).await;
        assert_eq!(processed, 2);
        assert_eq!(processor.reports_emitted(), 1);
    }

    #[test(tokio::test)]
    async fn run_processes_nothing_after_cancellation() {
        let (mut processor, _clock) = processor(30.0);
        let (tx, rx) = mpsc::channel(8);
        tx.send(Notification::Added(pod("a", "1"))).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let processed = processor.run(rx, token).await;
        assert_eq!(processed, 0);
        assert!(processor.store().is_empty());
        assert!(tx.send(Notification::Deleted(pod("a", "2"))).await.is_err());
    }
}
