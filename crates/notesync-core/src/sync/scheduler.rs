//! Background task that decides when sync cycles run.
//!
//! One task owns the engine and runs cycles strictly one after another.
//! Edits and foreground events are debounced, explicit requests run at once,
//! a periodic timer covers quiet periods, and failed cycles are retried with
//! exponential backoff. Triggers that arrive while a cycle is running
//! collapse into a single follow-up run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{CycleReport, ReconciliationEngine, RetryPolicy, SyncError, SyncResult};
use crate::config::SyncSettings;
use crate::remote::RemoteClient;

const OUTCOME_CHANNEL_CAPACITY: usize = 32;

/// Far enough out to mean "not scheduled" without overflowing `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Why a sync was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicit request; skips debounce and backoff
    Immediate,
    /// A record was created, edited or deleted
    RecordEdited,
    /// The app returned to the foreground
    Foreground,
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleCause {
    Trigger(Trigger),
    /// Periodic timer
    Interval,
    /// Backoff retry after a failed cycle
    Retry,
}

/// Result of one scheduled cycle, delivered on the outcome channel
#[derive(Debug)]
pub struct CycleOutcome {
    pub cause: CycleCause,
    pub result: SyncResult<CycleReport>,
    /// Failed cycles in a row, including this one
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub debounce: Duration,
    pub cycle_timeout: Duration,
    /// Backoff between failed cycles
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            interval: settings.interval(),
            debounce: settings.debounce(),
            cycle_timeout: settings.cycle_timeout(),
            retry: settings.retry,
        }
    }
}

#[derive(Debug)]
enum Command {
    Trigger(Trigger),
    Shutdown,
}

/// Control handle for a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request a sync; returns `false` once the scheduler has stopped
    pub fn trigger(&self, trigger: Trigger) -> bool {
        self.commands.send(Command::Trigger(trigger)).is_ok()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the scheduler, letting an active cycle finish first
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(error) = self.task.await {
            tracing::error!("Sync scheduler task failed: {error}");
        }
    }
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// Start the scheduler task on the current runtime
    pub fn spawn<C>(
        engine: Arc<ReconciliationEngine<C>>,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, mpsc::Receiver<CycleOutcome>)
    where
        C: RemoteClient + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);

        let task = tokio::spawn(run(engine, config, command_rx, outcome_tx));
        tracing::info!(
            interval_secs = config.interval.as_secs(),
            debounce_ms = u64::try_from(config.debounce.as_millis()).unwrap_or(u64::MAX),
            "Sync scheduler started"
        );

        (
            SchedulerHandle {
                commands: command_tx,
                task,
            },
            outcome_rx,
        )
    }
}

async fn run<C: RemoteClient + 'static>(
    engine: Arc<ReconciliationEngine<C>>,
    config: SchedulerConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    outcomes: mpsc::Sender<CycleOutcome>,
) {
    let mut schedule = Schedule::new(config, Instant::now());

    loop {
        let next = schedule.next_run();
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Trigger(trigger)) => schedule.on_trigger(trigger, Instant::now()),
                Some(Command::Shutdown) | None => break,
            },
            () = wait_until(next.map(|(at, _)| at)) => {
                let cause = next.map_or(CycleCause::Interval, |(_, cause)| cause);
                let result = run_bounded(&engine, config.cycle_timeout).await;
                schedule.on_finished(&result, Instant::now());

                let outcome = CycleOutcome {
                    cause,
                    result,
                    consecutive_failures: schedule.failures,
                };
                match outcomes.try_send(outcome) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Sync outcome dropped; receiver is not keeping up");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("Sync outcome receiver closed");
                    }
                }
            }
        }
    }

    tracing::info!("Sync scheduler stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_bounded<C: RemoteClient>(
    engine: &ReconciliationEngine<C>,
    cycle_timeout: Duration,
) -> SyncResult<CycleReport> {
    tokio::time::timeout(cycle_timeout, engine.run_cycle())
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Sync cycle exceeded {}s and was abandoned", cycle_timeout.as_secs());
            Err(SyncError::Timeout(cycle_timeout))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRun {
    at: Instant,
    trigger: Trigger,
}

/// Timing decisions, kept free of I/O
#[derive(Debug)]
struct Schedule {
    config: SchedulerConfig,
    pending: Option<PendingRun>,
    next_periodic: Instant,
    backoff_until: Option<Instant>,
    failures: u32,
    /// Automatic runs stop after the remote rejects credentials
    paused: bool,
}

fn after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

impl Schedule {
    fn new(config: SchedulerConfig, now: Instant) -> Self {
        Self {
            config,
            pending: None,
            next_periodic: after(now, config.interval),
            backoff_until: None,
            failures: 0,
            paused: false,
        }
    }

    fn on_trigger(&mut self, trigger: Trigger, now: Instant) {
        if trigger == Trigger::Immediate {
            self.paused = false;
            self.pending = Some(PendingRun { at: now, trigger });
            return;
        }

        let immediate_pending = self
            .pending
            .is_some_and(|pending| pending.trigger == Trigger::Immediate);
        if !immediate_pending {
            // Trailing debounce: each event pushes the run back
            self.pending = Some(PendingRun {
                at: after(now, self.config.debounce),
                trigger,
            });
        }
    }

    /// When and why the next cycle should start, if anything is scheduled
    fn next_run(&self) -> Option<(Instant, CycleCause)> {
        let triggered = self.pending.and_then(|pending| match pending.trigger {
            Trigger::Immediate => Some((pending.at, CycleCause::Trigger(pending.trigger))),
            _ if self.paused => None,
            _ => Some((self.hold(pending.at), CycleCause::Trigger(pending.trigger))),
        });

        let periodic_cause = if self.failures > 0 {
            CycleCause::Retry
        } else {
            CycleCause::Interval
        };
        let periodic = (!self.paused).then(|| (self.hold(self.next_periodic), periodic_cause));

        match (triggered, periodic) {
            (Some(triggered), Some(periodic)) => Some(if triggered.0 <= periodic.0 {
                triggered
            } else {
                periodic
            }),
            (triggered, periodic) => triggered.or(periodic),
        }
    }

    fn hold(&self, at: Instant) -> Instant {
        self.backoff_until.map_or(at, |until| at.max(until))
    }

    fn on_finished(&mut self, result: &SyncResult<CycleReport>, now: Instant) {
        self.pending = None;

        match result {
            Ok(_) => {
                self.failures = 0;
                self.backoff_until = None;
                self.next_periodic = after(now, self.config.interval);
            }
            Err(error) if !error.is_retryable() => {
                self.failures = self.failures.saturating_add(1);
                self.backoff_until = None;
                self.paused = true;
                self.next_periodic = after(now, self.config.interval);
                tracing::error!("Automatic sync paused: {error}");
            }
            Err(error) => {
                self.failures = self.failures.saturating_add(1);
                let delay = self.config.retry.delay_for(self.failures - 1);
                let until = after(now, delay);
                self.backoff_until = Some(until);
                self.next_periodic = until;
                tracing::info!(
                    failures = self.failures,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Sync cycle failed: {error}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordDraft;
    use crate::remote::{MemoryRemote, RemoteError};
    use crate::services::RecordStore;
    use crate::sync::{ConflictPolicy, EngineConfig};

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(60),
            debounce: Duration::from_millis(500),
            cycle_timeout: Duration::from_secs(120),
            retry: RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(4)),
        }
    }

    fn engine() -> Arc<ReconciliationEngine<MemoryRemote>> {
        let store = RecordStore::open_in_memory().unwrap();
        let config = EngineConfig {
            retry: RetryPolicy::default(),
            conflict_policy: ConflictPolicy::LastWriteWins,
        };
        Arc::new(ReconciliationEngine::new(store, MemoryRemote::new(), config))
    }

    async fn assert_quiet(outcomes: &mut mpsc::Receiver<CycleOutcome>, window: Duration) {
        let next = tokio::time::timeout(window, outcomes.recv()).await;
        assert!(next.is_err(), "unexpected cycle: {next:?}");
    }

    #[test]
    fn debounce_is_trailing_and_immediate_wins() {
        let start = Instant::now();
        let mut schedule = Schedule::new(config(), start);

        schedule.on_trigger(Trigger::RecordEdited, start);
        schedule.on_trigger(Trigger::RecordEdited, start + Duration::from_millis(300));
        assert_eq!(
            schedule.next_run(),
            Some((
                start + Duration::from_millis(800),
                CycleCause::Trigger(Trigger::RecordEdited)
            ))
        );

        schedule.on_trigger(Trigger::Immediate, start + Duration::from_millis(400));
        schedule.on_trigger(Trigger::Foreground, start + Duration::from_millis(450));
        assert_eq!(
            schedule.next_run(),
            Some((
                start + Duration::from_millis(400),
                CycleCause::Trigger(Trigger::Immediate)
            ))
        );
    }

    #[test]
    fn backoff_delays_automatic_runs_but_not_immediate_ones() {
        let start = Instant::now();
        let mut schedule = Schedule::new(config(), start);

        schedule.on_finished(&Err(SyncError::Offline), start);
        schedule.on_finished(&Err(SyncError::Offline), start);
        assert_eq!(schedule.failures, 2);
        let retry_at = start + Duration::from_secs(2);
        assert_eq!(schedule.next_run(), Some((retry_at, CycleCause::Retry)));

        schedule.on_trigger(Trigger::RecordEdited, start);
        assert_eq!(
            schedule.next_run(),
            Some((retry_at, CycleCause::Trigger(Trigger::RecordEdited)))
        );

        schedule.on_trigger(Trigger::Immediate, start);
        assert_eq!(
            schedule.next_run(),
            Some((start, CycleCause::Trigger(Trigger::Immediate)))
        );

        schedule.on_finished(&Ok(CycleReport::default()), start);
        assert_eq!(schedule.failures, 0);
        assert_eq!(
            schedule.next_run(),
            Some((start + Duration::from_secs(60), CycleCause::Interval))
        );
    }

    #[test]
    fn unauthorized_pauses_until_immediate_trigger() {
        let start = Instant::now();
        let mut schedule = Schedule::new(config(), start);

        schedule.on_finished(&Err(SyncError::Unauthorized), start);
        assert_eq!(schedule.next_run(), None);

        schedule.on_trigger(Trigger::RecordEdited, start);
        assert_eq!(schedule.next_run(), None);

        schedule.on_trigger(Trigger::Immediate, start);
        assert!(schedule.next_run().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_trigger_runs_a_cycle() {
        let engine = engine();
        engine
            .store()
            .create(RecordDraft::new("note", ""))
            .await
            .unwrap();
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config());

        assert!(handle.trigger(Trigger::Immediate));
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.cause, CycleCause::Trigger(Trigger::Immediate));
        assert_eq!(outcome.result.unwrap().pushed, 1);
        assert_eq!(outcome.consecutive_failures, 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn edit_bursts_are_debounced_into_one_cycle() {
        let engine = engine();
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config());

        let start = Instant::now();
        for _ in 0..3 {
            handle.trigger(Trigger::RecordEdited);
        }
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.cause, CycleCause::Trigger(Trigger::RecordEdited));
        assert!(start.elapsed() >= Duration::from_millis(500));

        assert_quiet(&mut outcomes, Duration::from_secs(5)).await;
        assert_eq!(engine.client().pull_count(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_cycles_run_without_triggers() {
        let engine = engine();
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config());

        let start = Instant::now();
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.cause, CycleCause::Interval);
        assert!(start.elapsed() >= Duration::from_secs(60));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycles_back_off_exponentially_then_recover() {
        let engine = engine();
        engine.client().set_reachable(false);
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config());

        handle.trigger(Trigger::Immediate);
        let first = outcomes.recv().await.unwrap();
        assert!(matches!(first.result, Err(SyncError::Offline)));
        assert_eq!(first.consecutive_failures, 1);

        for (failures, expected) in [(2, 1), (3, 2), (4, 4), (5, 4)] {
            let started = Instant::now();
            let outcome = outcomes.recv().await.unwrap();
            assert_eq!(outcome.cause, CycleCause::Retry);
            assert_eq!(outcome.consecutive_failures, failures);
            assert_eq!(started.elapsed(), Duration::from_secs(expected));
        }

        engine.client().set_reachable(true);
        let recovered = outcomes.recv().await.unwrap();
        assert!(recovered.result.is_ok());
        assert_eq!(recovered.consecutive_failures, 0);

        let started = Instant::now();
        let next = outcomes.recv().await.unwrap();
        assert_eq!(next.cause, CycleCause::Interval);
        assert_eq!(started.elapsed(), Duration::from_secs(60));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_during_a_cycle_collapse_into_one_follow_up() {
        let engine = engine();
        engine
            .store()
            .create(RecordDraft::new("note", ""))
            .await
            .unwrap();
        let hold = engine.client().hold_pushes();
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config());

        handle.trigger(Trigger::Immediate);
        hold.entered.notified().await;
        for _ in 0..3 {
            handle.trigger(Trigger::RecordEdited);
            handle.trigger(Trigger::Immediate);
        }
        engine.client().release_pushes();

        let first = outcomes.recv().await.unwrap();
        assert_eq!(first.result.unwrap().pushed, 1);
        let follow_up = outcomes.recv().await.unwrap();
        assert_eq!(follow_up.cause, CycleCause::Trigger(Trigger::Immediate));

        assert_quiet(&mut outcomes, Duration::from_secs(5)).await;
        assert_eq!(engine.client().pull_count(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_cycle_is_reported_and_recovered() {
        let engine = engine();
        let record = engine
            .store()
            .create(RecordDraft::new("note", ""))
            .await
            .unwrap();
        let _hold = engine.client().hold_pushes();
        let config = SchedulerConfig {
            cycle_timeout: Duration::from_secs(5),
            ..config()
        };
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config);

        handle.trigger(Trigger::Immediate);
        let timed_out = outcomes.recv().await.unwrap();
        assert!(matches!(timed_out.result, Err(SyncError::Timeout(_))));

        engine.client().release_pushes();
        handle.trigger(Trigger::Immediate);
        let recovered = outcomes.recv().await.unwrap();
        assert_eq!(recovered.result.unwrap().pushed, 1);
        assert!(engine.store().get(&record.id).await.unwrap().last_synced_at.is_some());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_stops_automatic_retries() {
        let engine = engine();
        engine.client().fail_next_pull(RemoteError::Unauthorized);
        let (handle, mut outcomes) = SyncScheduler::spawn(Arc::clone(&engine), config());

        handle.trigger(Trigger::Immediate);
        let outcome = outcomes.recv().await.unwrap();
        assert!(matches!(outcome.result, Err(SyncError::Unauthorized)));

        handle.trigger(Trigger::RecordEdited);
        assert_quiet(&mut outcomes, Duration::from_secs(600)).await;

        handle.trigger(Trigger::Immediate);
        assert!(outcomes.recv().await.unwrap().result.is_ok());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_outcome_channel() {
        let engine = engine();
        let (handle, mut outcomes) = SyncScheduler::spawn(engine, config());
        assert!(handle.is_running());

        handle.shutdown().await;
        assert!(outcomes.recv().await.is_none());
    }
}
