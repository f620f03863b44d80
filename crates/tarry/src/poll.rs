//! Poller: drives a predicate to a terminal outcome within a deadline.
//!
//! ## Tick cadence
//!
//! ```text
//! t=0        t=i        t=2i              deadline
//!  │ eval     │ eval     │ eval     ...     │ expired -> TimedOut
//!  ▼          ▼          ▼                  ▼
//! Pending ─► Pending ─► Satisfied -> Success
//!                    └► Failed(r) -> PredicateError(r), never retried
//! ```
//!
//! The first evaluation always happens immediately. Every later one is
//! preceded by a deadline check, and the sleep before it is clamped to the
//! time left, so a poll never overshoots its deadline by a full interval. A
//! sleep that was clamped onto the deadline still gets its evaluation there:
//! interval 50 with timeout 200 evaluates at 0, 50, 100, 150 and 200.
//!
//! The blocking driver lives here; the task-based one is in `task.rs`. Both
//! step the same [`PollState`].

use crate::ambient::AmbientTimeoutGuard;
use crate::client::RemoteClient;
use crate::config::PollConfig;
use crate::result::{TarryError, TarryResult};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// PREDICATE OUTCOME
// =============================================================================

/// Outcome of a single predicate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Not there yet, evaluate again after the interval
    Pending,
    /// Condition holds
    Satisfied,
    /// Condition can never hold, or evaluating it failed
    Failed(String),
}

impl Check {
    /// Check if the result is terminal
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Values a predicate may return
pub trait IntoCheck {
    /// Convert into a [`Check`]
    fn into_check(self) -> Check;
}

impl IntoCheck for Check {
    fn into_check(self) -> Check {
        self
    }
}

impl IntoCheck for bool {
    fn into_check(self) -> Check {
        if self {
            Check::Satisfied
        } else {
            Check::Pending
        }
    }
}

impl<E: std::fmt::Display> IntoCheck for Result<bool, E> {
    fn into_check(self) -> Check {
        match self {
            Ok(done) => done.into_check(),
            Err(e) => Check::Failed(e.to_string()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "predicate panicked".to_string()
    }
}

/// Run one evaluation. A panic counts as `Failed`.
pub(crate) fn evaluate<P, R>(predicate: &mut P) -> Check
where
    P: FnMut() -> R,
    R: IntoCheck,
{
    match std::panic::catch_unwind(AssertUnwindSafe(|| predicate().into_check())) {
        Ok(check) => check,
        Err(payload) => Check::Failed(panic_message(payload.as_ref())),
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Terminal outcome of a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate was satisfied
    Success,
    /// The deadline passed first
    TimedOut,
    /// The predicate failed
    PredicateError(String),
}

/// Everything known about a finished poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// How the poll ended
    pub outcome: PollOutcome,
    /// Predicate evaluations performed
    pub ticks: u32,
    /// Time from start to resolution
    pub elapsed: Duration,
    /// Effective timeout the poll ran under
    pub timeout: Duration,
}

impl Resolution {
    /// Map the outcome onto the error taxonomy
    pub fn into_result(self, waited_for: &str) -> TarryResult<WaitResult> {
        match self.outcome {
            PollOutcome::Success => Ok(WaitResult {
                ticks: self.ticks,
                elapsed: self.elapsed,
                waited_for: waited_for.to_string(),
            }),
            PollOutcome::TimedOut => Err(TarryError::Timeout {
                ms: self.timeout.as_millis() as u64,
                waited_for: waited_for.to_string(),
                ticks: self.ticks,
            }),
            PollOutcome::PredicateError(message) => Err(TarryError::Predicate { message }),
        }
    }
}

/// Result of a successful wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    /// Predicate evaluations performed
    pub ticks: u32,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Description of what was waited for
    pub waited_for: String,
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Deadline bookkeeping shared by the blocking and task drivers
#[derive(Debug, Clone)]
pub(crate) struct PollState {
    started: Instant,
    /// `None` when `started + timeout` does not fit in an `Instant`
    deadline: Option<Instant>,
    timeout: Duration,
    interval: Duration,
    ticks: u32,
    /// The pending sleep was clamped to end on the deadline, so one more
    /// evaluation is owed there
    final_tick: FinalTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalTick {
    NotScheduled,
    Due,
    Done,
}

impl PollState {
    pub(crate) fn new(started: Instant, timeout: Duration, interval: Duration) -> Self {
        Self {
            started,
            deadline: started.checked_add(timeout),
            timeout,
            interval,
            ticks: 0,
            final_tick: FinalTick::NotScheduled,
        }
    }

    /// Whether the next evaluation must be skipped in favour of `TimedOut`.
    ///
    /// The evaluation a sleep was clamped onto the deadline for still runs;
    /// anything after it, or after reaching the deadline otherwise, does not.
    pub(crate) fn expired(&self, now: Instant) -> bool {
        if self.ticks == 0 {
            return false;
        }
        match self.final_tick {
            FinalTick::Due => false,
            FinalTick::Done => true,
            FinalTick::NotScheduled => self.deadline.is_some_and(|deadline| now >= deadline),
        }
    }

    /// Count an evaluation; `Some` when it ends the poll
    pub(crate) fn record(&mut self, check: Check) -> Option<PollOutcome> {
        self.ticks = self.ticks.saturating_add(1);
        if self.final_tick == FinalTick::Due {
            self.final_tick = FinalTick::Done;
        }
        match check {
            Check::Pending => None,
            Check::Satisfied => Some(PollOutcome::Success),
            Check::Failed(reason) => Some(PollOutcome::PredicateError(reason)),
        }
    }

    /// Sleep before the next evaluation
    pub(crate) fn delay(&mut self, now: Instant) -> Duration {
        let Some(deadline) = self.deadline else {
            return self.interval;
        };
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return Duration::ZERO;
        }
        if remaining <= self.interval {
            self.final_tick = FinalTick::Due;
        }
        self.interval.min(remaining)
    }

    pub(crate) const fn ticks(&self) -> u32 {
        self.ticks
    }

    pub(crate) fn finish(&self, outcome: PollOutcome, now: Instant) -> Resolution {
        let elapsed = now.saturating_duration_since(self.started);
        tracing::debug!(
            ticks = self.ticks,
            elapsed_ms = elapsed.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            ?outcome,
            "poll resolved"
        );
        Resolution {
            outcome,
            ticks: self.ticks,
            elapsed,
            timeout: self.timeout,
        }
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Repeatedly evaluates a predicate against a [`RemoteClient`]'s timing rules
#[derive(Clone)]
pub struct Poller {
    pub(crate) client: Arc<dyn RemoteClient>,
    pub(crate) config: PollConfig,
    pub(crate) description: String,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Poller with default config for `client`
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            config: PollConfig::default(),
            description: "condition".to_string(),
        }
    }

    /// Set interval and timeout
    #[must_use]
    pub const fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    /// Describe what is being waited for, used in timeout errors
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Current config
    #[must_use]
    pub const fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Validate, raise the ambient timeout if overridden, and pick the
    /// effective timeout. Nothing is evaluated yet.
    pub(crate) fn prepare(&self) -> TarryResult<(AmbientTimeoutGuard, Duration)> {
        self.config.validate()?;
        Ok(match self.config.timeout_override() {
            Some(timeout) => (
                AmbientTimeoutGuard::raise(Arc::clone(&self.client), timeout),
                timeout,
            ),
            None => (
                AmbientTimeoutGuard::inert(Arc::clone(&self.client)),
                self.client.ambient_timeout(),
            ),
        })
    }

    /// Block until the predicate resolves, returning the full record.
    ///
    /// Only configuration errors are returned as `Err`; timeouts and
    /// predicate failures are in [`Resolution::outcome`].
    pub fn run<P, R>(&self, mut predicate: P) -> TarryResult<Resolution>
    where
        P: FnMut() -> R,
        R: IntoCheck,
    {
        let (_guard, timeout) = self.prepare()?;
        let mut state = PollState::new(Instant::now(), timeout, self.config.interval());

        loop {
            if state.expired(Instant::now()) {
                return Ok(state.finish(PollOutcome::TimedOut, Instant::now()));
            }
            let check = evaluate(&mut predicate);
            tracing::trace!(tick = state.ticks() + 1, ?check, "evaluated predicate");
            if let Some(outcome) = state.record(check) {
                return Ok(state.finish(outcome, Instant::now()));
            }
            std::thread::sleep(state.delay(Instant::now()));
        }
    }

    /// Block until the predicate is satisfied.
    ///
    /// # Errors
    ///
    /// [`TarryError::Timeout`], [`TarryError::Predicate`], or
    /// [`TarryError::Config`].
    pub fn poll<P, R>(&self, predicate: P) -> TarryResult<WaitResult>
    where
        P: FnMut() -> R,
        R: IntoCheck,
    {
        self.run(predicate)?.into_result(&self.description)
    }
}

// =============================================================================
// TESTS
// =============================================================================
