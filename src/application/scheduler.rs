use crate::application::calendar_sync::{SyncPass, SyncSummary};
use crate::domain::models::{DEFAULT_SYNC_INTERVAL_MINUTES, MIN_SYNC_INTERVAL_MINUTES};
use crate::infrastructure::command_log::{CommandLog, NoopCommandLog};
use crate::infrastructure::error::InfraError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub type StatusSink = Arc<dyn Fn(&str) + Send + Sync>;

const LOG_SCOPE: &str = "scheduler";
pub const AUTO_SYNC_DISABLED: &str = "Auto-sync disabled";

pub fn validate_interval(minutes: i64) -> Result<u32, InfraError> {
    if minutes < i64::from(MIN_SYNC_INTERVAL_MINUTES) {
        return Err(InfraError::IntervalTooShort { minutes });
    }
    u32::try_from(minutes).map_err(|_| {
        InfraError::InvalidConfig(format!("sync interval of {minutes} minutes is too large"))
    })
}

struct PassRunner {
    pass: Arc<dyn SyncPass>,
    sink: StatusSink,
    log: Arc<dyn CommandLog>,
    generation: AtomicU64,
    in_flight: AtomicBool,
}

// Held for the lifetime of a pass; dropping it (completion, cancellation or
// panic) frees the slot for the next pass.
struct PassPermit {
    runner: Arc<PassRunner>,
}

impl Drop for PassPermit {
    fn drop(&mut self) {
        self.runner.in_flight.store(false, Ordering::Release);
    }
}

impl PassRunner {
    fn try_begin(self: &Arc<Self>) -> Option<PassPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassPermit {
                runner: Arc::clone(self),
            })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn publish(&self, outcome: &Result<SyncSummary, InfraError>) {
        match outcome {
            Ok(summary) => (self.sink)(&summary.status_message()),
            Err(error) => {
                self.log.error(LOG_SCOPE, &error.to_string());
                (self.sink)(&format!("Sync failed: {error}"));
            }
        }
    }

    async fn run(&self, permit: PassPermit) -> Result<SyncSummary, InfraError> {
        let outcome = self.pass.run_pass().await;
        drop(permit);
        outcome
    }

    async fn run_scheduled(&self, generation: u64, permit: PassPermit) {
        if !self.is_current(generation) {
            self.log
                .info(LOG_SCOPE, &format!("skipped due tick of stopped schedule {generation}"));
            return;
        }
        let outcome = self.run(permit).await;
        if self.is_current(generation) {
            self.publish(&outcome);
        } else {
            self.log.info(
                LOG_SCOPE,
                &format!("discarded result of pass from stopped schedule {generation}"),
            );
        }
    }
}

struct TimerState {
    enabled: bool,
    interval_minutes: u32,
    timer: Option<JoinHandle<()>>,
}

pub struct SyncScheduler {
    runner: Arc<PassRunner>,
    state: Mutex<TimerState>,
}

impl SyncScheduler {
    pub fn new(pass: Arc<dyn SyncPass>) -> Self {
        Self {
            runner: Arc::new(PassRunner {
                pass,
                sink: Arc::new(|_: &str| {}),
                log: Arc::new(NoopCommandLog),
                generation: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
            }),
            state: Mutex::new(TimerState {
                enabled: false,
                interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
                timer: None,
            }),
        }
    }

    pub fn with_status_sink(self, sink: StatusSink) -> Self {
        self.rebuild_runner(|runner| runner.sink = sink)
    }

    pub fn with_log(self, log: Arc<dyn CommandLog>) -> Self {
        self.rebuild_runner(|runner| runner.log = log)
    }

    fn rebuild_runner(mut self, apply: impl FnOnce(&mut PassRunner)) -> Self {
        let current = &self.runner;
        let mut runner = PassRunner {
            pass: Arc::clone(&current.pass),
            sink: Arc::clone(&current.sink),
            log: Arc::clone(&current.log),
            generation: AtomicU64::new(current.generation.load(Ordering::Acquire)),
            in_flight: AtomicBool::new(false),
        };
        apply(&mut runner);
        self.runner = Arc::new(runner);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, TimerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.lock_state().enabled
    }

    pub fn interval_minutes(&self) -> u32 {
        self.lock_state().interval_minutes
    }

    pub fn has_timer(&self) -> bool {
        self.lock_state().timer.is_some()
    }

    pub fn is_pass_running(&self) -> bool {
        self.runner.in_flight.load(Ordering::Acquire)
    }

    pub fn start(&self, interval_minutes: u32) -> Result<(), InfraError> {
        let interval_minutes = validate_interval(i64::from(interval_minutes))?;
        let mut state = self.lock_state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let generation = self.runner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        state.enabled = true;
        state.interval_minutes = interval_minutes;
        state.timer = Some(self.spawn_timer(interval_minutes, generation));
        self.runner.log.info(
            LOG_SCOPE,
            &format!("auto-sync armed every {interval_minutes} minute(s)"),
        );
        Ok(())
    }

    /// A pass that is already running may finish but its result is not
    /// published.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        self.runner.generation.fetch_add(1, Ordering::AcqRel);
        state.enabled = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        drop(state);
        self.runner.log.info(LOG_SCOPE, AUTO_SYNC_DISABLED);
        (self.runner.sink)(AUTO_SYNC_DISABLED);
    }

    pub fn reschedule(&self, interval_minutes: i64) -> Result<(), InfraError> {
        let interval_minutes = validate_interval(interval_minutes)?;
        if self.is_enabled() {
            return self.start(interval_minutes);
        }
        self.lock_state().interval_minutes = interval_minutes;
        Ok(())
    }

    /// Returns `Ok(None)` when another pass is still in flight.
    pub async fn run_now(&self) -> Result<Option<SyncSummary>, InfraError> {
        let Some(permit) = self.runner.try_begin() else {
            return Ok(None);
        };
        let outcome = self.runner.run(permit).await;
        self.runner.publish(&outcome);
        outcome.map(Some)
    }

    fn spawn_timer(&self, interval_minutes: u32, generation: u64) -> JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        let period = Duration::from_secs(u64::from(interval_minutes) * 60);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !runner.is_current(generation) {
                    break;
                }
                let Some(permit) = runner.try_begin() else {
                    runner
                        .log
                        .info(LOG_SCOPE, "tick dropped: previous pass still running");
                    continue;
                };
                let pass_runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    pass_runner.run_scheduled(generation, permit).await;
                });
            }
        })
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct CountingPass {
        calls: AtomicUsize,
        duration: Duration,
    }

    impl CountingPass {
        fn taking(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                duration,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncPass for CountingPass {
        async fn run_pass(&self) -> Result<SyncSummary, InfraError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.duration).await;
            Ok(SyncSummary {
                added: call,
                source_count: 1,
                succeeded: vec!["Family".to_string()],
                errors: Vec::new(),
                completed_at: Utc::now(),
            })
        }
    }

    fn recording_sink() -> (StatusSink, Arc<Mutex<Vec<String>>>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&messages);
        let sink: StatusSink = Arc::new(move |message: &str| {
            captured.lock().expect("sink lock").push(message.to_string());
        });
        (sink, messages)
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn start_runs_immediately_then_on_interval_and_stop_cancels() {
        let pass = CountingPass::taking(Duration::from_millis(10));
        let scheduler = SyncScheduler::new(pass.clone());

        scheduler.start(1).expect("start");
        advance(Duration::from_secs(1)).await;
        assert_eq!(pass.calls(), 1);

        advance(MINUTE).await;
        assert_eq!(pass.calls(), 2);

        scheduler.stop();
        assert!(!scheduler.has_timer());
        advance(MINUTE * 10).await;
        assert_eq!(pass.calls(), 2);
        assert!(!scheduler.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_during_a_running_pass_are_dropped() {
        let pass = CountingPass::taking(Duration::from_secs(150));
        let scheduler = SyncScheduler::new(pass.clone());

        scheduler.start(1).expect("start");
        advance(Duration::from_secs(170)).await;
        assert_eq!(pass.calls(), 1);

        advance(Duration::from_secs(20)).await;
        assert_eq!(pass.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_restarts_with_a_single_timer() {
        let pass = CountingPass::taking(Duration::from_millis(10));
        let scheduler = SyncScheduler::new(pass.clone());

        scheduler.start(1).expect("start");
        advance(Duration::from_secs(1)).await;
        scheduler.reschedule(5).expect("reschedule");
        advance(Duration::from_secs(1)).await;
        assert_eq!(pass.calls(), 2);

        advance(MINUTE * 4).await;
        assert_eq!(pass.calls(), 2);

        advance(MINUTE + Duration::from_secs(1)).await;
        assert_eq!(pass.calls(), 3);
        assert_eq!(scheduler.interval_minutes(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_while_disabled_only_records_interval() {
        let pass = CountingPass::taking(Duration::from_millis(10));
        let scheduler = SyncScheduler::new(pass.clone());

        scheduler.reschedule(15).expect("reschedule");
        advance(MINUTE * 30).await;

        assert_eq!(pass.calls(), 0);
        assert_eq!(scheduler.interval_minutes(), 15);
        assert!(!scheduler.has_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn too_short_interval_keeps_previous_configuration() {
        let pass = CountingPass::taking(Duration::from_millis(10));
        let scheduler = SyncScheduler::new(pass.clone());
        scheduler.start(10).expect("start");

        let result = scheduler.reschedule(0);

        assert!(matches!(result, Err(InfraError::IntervalTooShort { minutes: 0 })));
        assert_eq!(scheduler.interval_minutes(), 10);
        assert!(scheduler.has_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn result_of_pass_running_during_stop_is_discarded() {
        let pass = CountingPass::taking(Duration::from_secs(30));
        let (sink, messages) = recording_sink();
        let scheduler = SyncScheduler::new(pass.clone()).with_status_sink(sink);

        scheduler.start(1).expect("start");
        advance(Duration::from_secs(1)).await;
        scheduler.stop();
        advance(MINUTE * 5).await;

        assert_eq!(pass.calls(), 1);
        assert!(!scheduler.is_pass_running());
        assert_eq!(
            *messages.lock().expect("sink lock"),
            vec![AUTO_SYNC_DISABLED.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_at_a_due_tick_starts_no_pass() {
        let pass = CountingPass::taking(Duration::from_millis(10));
        let scheduler = SyncScheduler::new(pass.clone());

        scheduler.start(1).expect("start");
        advance(Duration::from_secs(1)).await;
        assert_eq!(pass.calls(), 1);

        // Wakes at the same instant as the next tick.
        advance(MINUTE - Duration::from_secs(1)).await;
        scheduler.stop();
        advance(MINUTE * 10).await;

        assert_eq!(pass.calls(), 1);
        assert!(!scheduler.is_pass_running());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_manual_pass_frees_the_slot() {
        let pass = CountingPass::taking(Duration::from_secs(30));
        let scheduler = SyncScheduler::new(pass.clone());

        let cancelled = tokio::time::timeout(Duration::from_secs(1), scheduler.run_now()).await;
        assert!(cancelled.is_err());
        assert!(!scheduler.is_pass_running());

        let second = scheduler.run_now().await.expect("no error");
        assert!(second.is_some());
        assert_eq!(pass.calls(), 2);

        scheduler.start(1).expect("start");
        advance(Duration::from_secs(45)).await;
        assert_eq!(pass.calls(), 3);
        advance(MINUTE).await;
        assert_eq!(pass.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn run_now_publishes_and_refuses_to_overlap() {
        let pass = CountingPass::taking(Duration::from_secs(5));
        let (sink, messages) = recording_sink();
        let scheduler = Arc::new(SyncScheduler::new(pass.clone()).with_status_sink(sink));

        let background = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_now().await })
        };
        advance(Duration::from_secs(1)).await;
        let overlapping = scheduler.run_now().await.expect("no error");
        let first = background
            .await
            .expect("join")
            .expect("no error")
            .expect("first pass ran");

        assert!(overlapping.is_none());
        assert_eq!(first.added, 1);
        assert_eq!(
            *messages.lock().expect("sink lock"),
            vec!["Synced 1 new event(s) from 1 calendar(s)".to_string()]
        );
    }
}
