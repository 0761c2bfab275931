//! Submission lifecycle
//!
//! Idle -> Validating -> Sending -> Succeeded | Failed, then back to Idle once
//! the acknowledgment has been visible for its configured time. Only one
//! submission runs at a time, and a new one is refused until the cool-down
//! after the previous dispatch attempt has passed.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::api::{DispatchReceipt, Dispatcher, TransportError};
use crate::config::FeedbackConfig;
use crate::counters::{CounterSnapshot, CounterStore};
use crate::form::{self, FormInput, FormRecord, ValidationResult};

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub acknowledgment: Duration,
    pub cooldown: Duration,
}

impl From<&FeedbackConfig> for ControllerSettings {
    fn from(config: &FeedbackConfig) -> Self {
        Self {
            acknowledgment: config.acknowledgment(),
            cooldown: config.resubmit_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgmentLevel {
    Success,
    Error,
}

/// Transient banner shown after a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    pub level: AcknowledgmentLevel,
    pub text: String,
    pub display_ms: u64,
}

impl Acknowledgment {
    fn new(level: AcknowledgmentLevel, text: String, display_for: Duration) -> Self {
        Self {
            level,
            text,
            display_ms: u64::try_from(display_for.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Validating,
    Sending {
        submission_id: Uuid,
    },
    Succeeded {
        submission_id: Uuid,
        acknowledgment: Acknowledgment,
    },
    Failed {
        acknowledgment: Acknowledgment,
    },
}

impl SubmissionState {
    fn is_settled(&self) -> bool {
        matches!(
            self,
            SubmissionState::Succeeded { .. } | SubmissionState::Failed { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum SubmissionFailure {
    #[error("{}", .0.message)]
    Validation(ValidationResult),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Submission already in progress; retry in {}s", .retry_after.as_secs_f32().ceil())]
    Busy { retry_after: Duration },
}

impl SubmissionFailure {
    pub fn advisory(&self) -> String {
        match self {
            SubmissionFailure::Validation(result) => result.message.clone(),
            SubmissionFailure::Transport(err) => err.advisory(),
            SubmissionFailure::Busy { retry_after } => format!(
                "Please wait {}s before submitting again.",
                retry_after.as_secs_f32().ceil()
            ),
        }
    }
}

/// What a successful submission produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub dispatch: DispatchReceipt,
    /// `None` when the counter store could not be updated.
    pub counters: Option<CounterSnapshot>,
    pub acknowledgment: Acknowledgment,
    /// The surface should clear its input fields.
    pub reset_form: bool,
}

#[derive(Default)]
struct Gate {
    in_flight: bool,
    cooldown_until: Option<Instant>,
}

/// Releases the gate when a submission ends, however it ends.
struct InFlight {
    gate: Arc<Mutex<Gate>>,
    cooldown: Duration,
    dispatch_attempted: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut gate = lock(&self.gate);
        gate.in_flight = false;
        if self.dispatch_attempted {
            gate.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }
}

struct Shared {
    state: watch::Sender<SubmissionState>,
    generation: AtomicU64,
}

struct Inner<D, C> {
    dispatcher: D,
    counters: C,
    settings: ControllerSettings,
    gate: Arc<Mutex<Gate>>,
    shared: Arc<Shared>,
}

pub struct SubmissionController<D, C> {
    inner: Arc<Inner<D, C>>,
}

impl<D: Dispatcher, C: CounterStore + 'static> SubmissionController<D, C> {
    pub fn new(dispatcher: D, counters: C, settings: ControllerSettings) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                counters,
                settings,
                gate: Arc::new(Mutex::new(Gate::default())),
                shared: Arc::new(Shared {
                    state,
                    generation: AtomicU64::new(0),
                }),
            }),
        }
    }

    #[cfg(test)]
    pub fn dispatcher(&self) -> &D {
        &self.inner.dispatcher
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.inner.shared.state.subscribe()
    }

    pub fn state(&self) -> SubmissionState {
        self.inner.shared.state.borrow().clone()
    }

    /// Run one submission through validation, dispatch and counter update.
    ///
    /// Once a record is being sent the rest of the lifecycle runs on its own
    /// task: dropping the returned future does not abort the request, skip
    /// the counter update or leave the state stuck in `Sending`.
    pub async fn submit(&self, input: &FormInput) -> Result<SubmissionReceipt, SubmissionFailure> {
        let mut flight = self.begin()?;
        let submission_id = Uuid::new_v4();

        self.inner.transition(SubmissionState::Validating);
        let record = FormRecord::capture(input);
        let validation = form::validate(&record);
        if !validation.is_valid {
            tracing::debug!(%submission_id, violations = validation.violations.len(), "submission failed validation");
            return Err(self.inner.fail(SubmissionFailure::Validation(validation)));
        }

        self.inner.transition(SubmissionState::Sending { submission_id });
        flight.dispatch_attempted = true;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.deliver(submission_id, record).await;
            drop(flight);
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%submission_id, error = %err, "submission task failed");
                Err(self.inner.fail(SubmissionFailure::Transport(TransportError::Unknown(
                    err.to_string(),
                ))))
            }
        }
    }

    /// Counts for the current UTC day.
    pub fn counts(&self) -> anyhow::Result<CounterSnapshot> {
        self.inner.counters.get(Utc::now().date_naive())
    }

    pub fn reset_counters(&self) -> anyhow::Result<CounterSnapshot> {
        self.inner.counters.reset()?;
        self.counts()
    }

    fn begin(&self) -> Result<InFlight, SubmissionFailure> {
        let mut gate = lock(&self.inner.gate);
        if gate.in_flight {
            return Err(SubmissionFailure::Busy {
                retry_after: self.inner.settings.cooldown,
            });
        }
        if let Some(until) = gate.cooldown_until {
            let now = Instant::now();
            if now < until {
                return Err(SubmissionFailure::Busy {
                    retry_after: until - now,
                });
            }
        }
        gate.in_flight = true;

        Ok(InFlight {
            gate: Arc::clone(&self.inner.gate),
            cooldown: self.inner.settings.cooldown,
            dispatch_attempted: false,
        })
    }
}

impl<D: Dispatcher, C: CounterStore + 'static> Inner<D, C> {
    /// Sending -> Succeeded | Failed.
    async fn deliver(
        self: Arc<Self>,
        submission_id: Uuid,
        record: FormRecord,
    ) -> Result<SubmissionReceipt, SubmissionFailure> {
        let dispatch = match self.dispatcher.dispatch(&record).await {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::warn!(%submission_id, kind = ?err.kind(), error = %err, "dispatch failed");
                return Err(self.fail(SubmissionFailure::Transport(err)));
            }
        };
        tracing::info!(%submission_id, subject = record.subject(), "submission dispatched");

        let day = record.timestamp().date_naive();
        let this = Arc::clone(&self);
        let updated = tokio::task::spawn_blocking(move || this.counters.increment(day))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result);
        let counters = match updated {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(%submission_id, error = %err, "could not update submission counters");
                None
            }
        };

        let acknowledgment = Acknowledgment::new(
            AcknowledgmentLevel::Success,
            "Sent! Your message was handed to the spreadsheet.".to_string(),
            self.settings.acknowledgment,
        );
        self.settle(SubmissionState::Succeeded {
            submission_id,
            acknowledgment: acknowledgment.clone(),
        });

        Ok(SubmissionReceipt {
            submission_id,
            dispatch,
            counters,
            acknowledgment,
            reset_form: true,
        })
    }
}

impl<D, C> Inner<D, C> {
    fn fail(&self, failure: SubmissionFailure) -> SubmissionFailure {
        let acknowledgment = Acknowledgment::new(
            AcknowledgmentLevel::Error,
            failure.advisory(),
            self.settings.acknowledgment,
        );
        self.settle(SubmissionState::Failed { acknowledgment });
        failure
    }

    fn transition(&self, state: SubmissionState) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_replace(state);
        generation
    }

    /// Publish a settled state and schedule its return to Idle.
    fn settle(&self, state: SubmissionState) {
        let generation = self.transition(state);
        let shared = Arc::clone(&self.shared);
        let delay = self.settings.acknowledgment;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.state.send_if_modified(|current| {
                // A newer submission owns the state now.
                if shared.generation.load(Ordering::SeqCst) != generation || !current.is_settled() {
                    return false;
                }
                *current = SubmissionState::Idle;
                true
            });
        });
    }
}

fn lock(gate: &Mutex<Gate>) -> std::sync::MutexGuard<'_, Gate> {
    gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransportErrorKind;
    use crate::config::ResetScope;
    use crate::counters::SubmissionCounters;
    use crate::storage::MemoryStore;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    #[derive(Default)]
    struct StubDispatcher {
        calls: AtomicUsize,
        completed: AtomicUsize,
        delay: Option<Duration>,
        error: Option<TransportError>,
        watcher: OnceLock<watch::Receiver<SubmissionState>>,
        seen_while_sending: Mutex<Vec<SubmissionState>>,
    }

    impl StubDispatcher {
        fn failing(error: TransportError) -> Self {
            Self {
                error: Some(error),
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Dispatcher for StubDispatcher {
        async fn dispatch(&self, _record: &FormRecord) -> Result<DispatchReceipt, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(watcher) = self.watcher.get() {
                lock_vec(&self.seen_while_sending).push(watcher.borrow().clone());
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(err) => Err(err.clone()),
                None => Ok(DispatchReceipt::opaque()),
            }
        }
    }

    fn lock_vec<T>(m: &Mutex<Vec<T>>) -> std::sync::MutexGuard<'_, Vec<T>> {
        m.lock().unwrap()
    }

    struct BrokenCounters;

    impl CounterStore for BrokenCounters {
        fn get(&self, _day: NaiveDate) -> anyhow::Result<CounterSnapshot> {
            anyhow::bail!("storage unavailable")
        }

        fn increment(&self, _day: NaiveDate) -> anyhow::Result<CounterSnapshot> {
            anyhow::bail!("storage unavailable")
        }

        fn reset(&self) -> anyhow::Result<()> {
            anyhow::bail!("storage unavailable")
        }
    }

    type TestController = SubmissionController<StubDispatcher, SubmissionCounters<MemoryStore>>;

    fn settings(cooldown_secs: u64) -> ControllerSettings {
        ControllerSettings {
            acknowledgment: Duration::from_secs(5),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    fn controller_with(dispatcher: StubDispatcher, cooldown_secs: u64) -> TestController {
        SubmissionController::new(
            dispatcher,
            SubmissionCounters::new(MemoryStore::new(), ResetScope::All),
            settings(cooldown_secs),
        )
    }

    fn valid_input() -> FormInput {
        FormInput {
            name: "Jo".to_string(),
            email: "a@b.co".to_string(),
            phone: None,
            subject: "General".to_string(),
            message: "1234567890".to_string(),
        }
    }

    fn invalid_input() -> FormInput {
        FormInput {
            name: "J".to_string(),
            email: "bad".to_string(),
            phone: Some("123".to_string()),
            subject: String::new(),
            message: "short".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_increments_both_counters_once() {
        let controller = controller_with(StubDispatcher::default(), 0);

        let receipt = controller.submit(&valid_input()).await.unwrap();
        assert!(receipt.dispatch.dispatched);
        assert!(!receipt.dispatch.server_confirmed);
        assert!(receipt.reset_form);
        let counters = receipt.counters.unwrap();
        assert_eq!((counters.today, counters.total), (1, 1));

        let receipt = controller.submit(&valid_input()).await.unwrap();
        let counters = receipt.counters.unwrap();
        assert_eq!((counters.today, counters.total), (2, 2));

        let counts = controller.counts().unwrap();
        assert_eq!((counts.today, counts.total), (2, 2));
        assert_eq!(controller.dispatcher().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_never_dispatches_or_counts() {
        let controller = controller_with(StubDispatcher::default(), 2);

        let err = controller.submit(&invalid_input()).await.unwrap_err();
        let SubmissionFailure::Validation(result) = &err else {
            panic!("expected validation failure, got {err:?}");
        };
        assert!(!result.is_valid);
        assert_eq!(controller.dispatcher().calls(), 0);
        assert_eq!(controller.counts().unwrap().total, 0);
        assert!(matches!(controller.state(), SubmissionState::Failed { .. }));

        // No dispatch happened, so no cool-down either.
        controller.submit(&valid_input()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_leaves_counters_untouched() {
        let dispatcher =
            StubDispatcher::failing(TransportError::NetworkUnreachable("refused".to_string()));
        let controller = controller_with(dispatcher, 0);

        let err = controller.submit(&valid_input()).await.unwrap_err();
        let SubmissionFailure::Transport(transport) = &err else {
            panic!("expected transport failure, got {err:?}");
        };
        assert_eq!(transport.kind(), TransportErrorKind::NetworkUnreachable);
        assert_eq!(controller.dispatcher().calls(), 1);
        assert_eq!(controller.counts().unwrap().total, 0);

        match controller.state() {
            SubmissionState::Failed { acknowledgment } => {
                assert_eq!(acknowledgment.level, AcknowledgmentLevel::Error);
                assert!(acknowledgment.text.contains("internet connection"));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counter_failure_does_not_fail_submission() {
        let controller =
            SubmissionController::new(StubDispatcher::default(), BrokenCounters, settings(0));

        let receipt = controller.submit(&valid_input()).await.unwrap();
        assert!(receipt.dispatch.dispatched);
        assert!(receipt.counters.is_none());
        assert!(matches!(controller.state(), SubmissionState::Succeeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_resubmission_after_dispatch() {
        let controller = controller_with(StubDispatcher::default(), 2);
        controller.submit(&valid_input()).await.unwrap();

        let err = controller.submit(&valid_input()).await.unwrap_err();
        let SubmissionFailure::Busy { retry_after } = err else {
            panic!("expected busy, got {err:?}");
        };
        assert!(retry_after <= Duration::from_secs(2));
        assert_eq!(controller.dispatcher().calls(), 1);
        assert_eq!(controller.counts().unwrap().total, 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        controller.submit(&valid_input()).await.unwrap();
        assert_eq!(controller.counts().unwrap().total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_also_follows_failed_dispatch() {
        let dispatcher = StubDispatcher::failing(TransportError::Unknown("boom".to_string()));
        let controller = controller_with(dispatcher, 2);

        let _ = controller.submit(&valid_input()).await.unwrap_err();
        let err = controller.submit(&valid_input()).await.unwrap_err();
        assert!(matches!(err, SubmissionFailure::Busy { .. }));
        assert_eq!(controller.dispatcher().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_happens_while_sending() {
        let controller = controller_with(StubDispatcher::default(), 0);
        assert!(controller
            .dispatcher()
            .watcher
            .set(controller.subscribe())
            .is_ok());

        let receipt = controller.submit(&valid_input()).await.unwrap();

        let seen = lock_vec(&controller.dispatcher().seen_while_sending).clone();
        assert_eq!(
            seen,
            vec![SubmissionState::Sending {
                submission_id: receipt.submission_id
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_submit_still_completes() {
        let controller = controller_with(StubDispatcher::slow(Duration::from_secs(1)), 0);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), controller.submit(&valid_input())).await;
        assert!(abandoned.is_err());
        assert!(matches!(controller.state(), SubmissionState::Sending { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.dispatcher().completed.load(Ordering::SeqCst), 1);
        assert!(matches!(controller.state(), SubmissionState::Succeeded { .. }));
        let counts = controller.counts().unwrap();
        assert_eq!((counts.today, counts.total), (1, 1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.state(), SubmissionState::Idle);
        controller.submit(&valid_input()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgment_clears_after_delay() {
        let controller = controller_with(StubDispatcher::default(), 0);
        let mut rx = controller.subscribe();

        controller.submit(&valid_input()).await.unwrap();
        assert!(matches!(
            *rx.borrow_and_update(),
            SubmissionState::Succeeded { .. }
        ));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(matches!(controller.state(), SubmissionState::Succeeded { .. }));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SubmissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_clear_does_not_hide_newer_acknowledgment() {
        let controller = controller_with(StubDispatcher::default(), 0);

        controller.submit(&valid_input()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let _ = controller.submit(&invalid_input()).await.unwrap_err();

        // First acknowledgment's timer fires here; the newer failure stays up.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(matches!(controller.state(), SubmissionState::Failed { .. }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(controller.state(), SubmissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_zeroed_counts() {
        let controller = controller_with(StubDispatcher::default(), 0);
        controller.submit(&valid_input()).await.unwrap();

        let snapshot = controller.reset_counters().unwrap();
        assert_eq!((snapshot.today, snapshot.total), (0, 0));
    }

    #[test]
    fn busy_advisory_rounds_up() {
        let failure = SubmissionFailure::Busy {
            retry_after: Duration::from_millis(1_200),
        };
        assert_eq!(failure.advisory(), "Please wait 2s before submitting again.");
    }
}
