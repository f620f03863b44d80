//! Wait Mechanisms
//!
//! Presence, visibility, and alert waits built on [`Poller`].
//!
//! Every waiter is a [`Condition`] turned into a predicate and handed to the
//! poller. Waiters take [`WaitOptions`]; a `timeout_ms` there is forwarded as
//! the poller's override, otherwise the client's ambient timeout governs.
//!
//! ## Disappearance: locator vs. element
//!
//! - A locator is searched again on every tick. The wait ends once nothing
//!   matching is displayed.
//! - A resolved [`ElementRef`] is re-checked directly. The wait ends once
//!   *that node* is hidden or detached, even if another node matching the
//!   same locator has since been added.

use crate::alert::{AlertMatcher, ALERT_MESSAGE_SCRIPT};
use crate::client::{ClientError, ElementRef, ElementTarget, RemoteClient};
use crate::config::{PollConfig, WaitOptions};
use crate::poll::{Check, IntoCheck, PollOutcome, Poller, WaitResult};
use crate::result::TarryResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "async")]
use crate::task::PollHandle;

// =============================================================================
// CONDITIONS
// =============================================================================

/// Display state a visibility wait is aiming for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Present and displayed
    Visible,
    /// Absent, detached, or not displayed
    Hidden,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Visible => write!(f, "visible"),
            Self::Hidden => write!(f, "hidden"),
        }
    }
}

/// A waitable condition on the remote tree
#[derive(Debug, Clone)]
pub enum Condition {
    /// Target reaches a display state
    Visibility {
        /// Element or locator to watch
        target: ElementTarget,
        /// State to wait for
        state: Visibility,
    },
    /// A modal alert with a matching message is open
    Alert(AlertMatcher),
}

impl Condition {
    /// Target exists and is displayed
    #[must_use]
    pub fn appear(target: impl Into<ElementTarget>) -> Self {
        Self::Visibility {
            target: target.into(),
            state: Visibility::Visible,
        }
    }

    /// Target is gone or hidden
    #[must_use]
    pub fn disappear(target: impl Into<ElementTarget>) -> Self {
        Self::Visibility {
            target: target.into(),
            state: Visibility::Hidden,
        }
    }

    /// An alert matching `matcher` is open
    #[must_use]
    pub fn alert(matcher: impl Into<AlertMatcher>) -> Self {
        Self::Alert(matcher.into())
    }

    /// Human-readable description for timeout errors
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Visibility {
                target,
                state: Visibility::Visible,
            } => format!("{target} to be displayed"),
            Self::Visibility {
                target,
                state: Visibility::Hidden,
            } => format!("{target} to disappear"),
            Self::Alert(matcher) => matcher.to_string(),
        }
    }

    /// Evaluate the condition once
    pub fn check(&self, client: &dyn RemoteClient) -> Check {
        match self {
            Self::Visibility {
                target,
                state: Visibility::Visible,
            } => check_visible(client, target),
            Self::Visibility {
                target,
                state: Visibility::Hidden,
            } => check_hidden(client, target),
            Self::Alert(matcher) => check_alert(client, matcher),
        }
    }
}

fn check_visible(client: &dyn RemoteClient, target: &ElementTarget) -> Check {
    let element = match target.resolve(client) {
        Ok(Some(element)) => element,
        Ok(None) => return Check::Pending,
        // a locator's scope can go stale between two client calls; a
        // resolved anchor going stale is permanent
        Err(ClientError::StaleElement) if !target.is_anchored() => return Check::Pending,
        Err(e) => return Check::Failed(e.to_string()),
    };
    match client.is_displayed(&element) {
        Ok(displayed) => displayed.into_check(),
        Err(ClientError::StaleElement) if !target.is_element() => Check::Pending,
        Err(e) => Check::Failed(e.to_string()),
    }
}

fn check_hidden(client: &dyn RemoteClient, target: &ElementTarget) -> Check {
    let element = match target {
        ElementTarget::Element(element) => element.clone(),
        ElementTarget::Locator { .. } => match target.resolve(client) {
            Ok(Some(element)) => element,
            Ok(None) | Err(ClientError::StaleElement) => return Check::Satisfied,
            Err(e) => return Check::Failed(e.to_string()),
        },
    };
    check_element_hidden(client, &element)
}

fn check_element_hidden(client: &dyn RemoteClient, element: &ElementRef) -> Check {
    match client.is_displayed(element) {
        Ok(displayed) => (!displayed).into_check(),
        Err(ClientError::StaleElement) => Check::Satisfied,
        Err(e) => Check::Failed(e.to_string()),
    }
}

fn check_alert(client: &dyn RemoteClient, matcher: &AlertMatcher) -> Check {
    match client.evaluate_remote(ALERT_MESSAGE_SCRIPT, &[]) {
        Ok(serde_json::Value::String(message)) => matcher.matches(&message).into_check(),
        Ok(serde_json::Value::Null) => Check::Pending,
        Ok(other) => Check::Failed(format!("unexpected alert probe result: {other}")),
        Err(e) => Check::Failed(e.to_string()),
    }
}

// =============================================================================
// WAITER
// =============================================================================

/// Waits on a remote tree through a shared [`RemoteClient`]
#[derive(Clone)]
pub struct Waiter {
    client: Arc<dyn RemoteClient>,
    config: PollConfig,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Waiter {
    /// Create a waiter with default poll config
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            config: PollConfig::default(),
        }
    }

    /// Set the base config that per-call options are merged onto
    #[must_use]
    pub const fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    /// The client this waiter queries
    #[must_use]
    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    fn poller(&self, options: &WaitOptions, description: String) -> Poller {
        Poller::new(Arc::clone(&self.client))
            .with_config(self.config.merged(options))
            .with_description(description)
    }

    /// Wait for an arbitrary predicate
    pub fn wait_for<P, R>(&self, predicate: P, options: &WaitOptions) -> TarryResult<WaitResult>
    where
        P: FnMut() -> R,
        R: IntoCheck,
    {
        self.poller(options, "custom predicate".to_string())
            .poll(predicate)
    }

    /// Block until `condition` holds
    pub fn wait_until(
        &self,
        condition: &Condition,
        options: &WaitOptions,
    ) -> TarryResult<WaitResult> {
        let client = Arc::clone(&self.client);
        self.poller(options, condition.description())
            .poll(|| condition.check(client.as_ref()))
    }

    /// Wait for `target` to reach `state`
    pub fn wait_for_visibility(
        &self,
        target: impl Into<ElementTarget>,
        state: Visibility,
        options: &WaitOptions,
    ) -> TarryResult<WaitResult> {
        let condition = Condition::Visibility {
            target: target.into(),
            state,
        };
        self.wait_until(&condition, options)
    }

    /// Wait until `target` exists and is displayed
    pub fn wait_for_element(
        &self,
        target: impl Into<ElementTarget>,
        options: &WaitOptions,
    ) -> TarryResult<WaitResult> {
        self.wait_for_visibility(target, Visibility::Visible, options)
    }

    /// Wait until a descendant of `parent` matching `locator` is displayed
    pub fn wait_for_child(
        &self,
        parent: impl Into<ElementTarget>,
        locator: impl Into<String>,
        options: &WaitOptions,
    ) -> TarryResult<WaitResult> {
        self.wait_for_element(ElementTarget::scoped(parent, locator), options)
    }

    /// Wait until `target` no longer exists or is not displayed
    pub fn wait_for_element_to_disappear(
        &self,
        target: impl Into<ElementTarget>,
        options: &WaitOptions,
    ) -> TarryResult<WaitResult> {
        self.wait_for_visibility(target, Visibility::Hidden, options)
    }

    /// Wait for an open alert whose message matches
    pub fn wait_for_alert(
        &self,
        matcher: impl Into<AlertMatcher>,
        options: &WaitOptions,
    ) -> TarryResult<WaitResult> {
        self.wait_until(&Condition::alert(matcher), options)
    }

    /// Block for at least `duration`.
    ///
    /// Runs as a poll with an explicit timeout, so a client whose ambient
    /// timeout is shorter than `duration` has it raised for the pause and
    /// restored afterwards.
    pub fn pause(&self, duration: Duration) -> TarryResult<()> {
        let wanted_ms = duration.as_millis() as u64;
        let slack_ms = self.config.interval_ms.max(1).saturating_mul(2);
        let options = WaitOptions::new().with_timeout(wanted_ms.saturating_add(slack_ms));
        let description = format!("{wanted_ms}ms pause");
        let started = Instant::now();
        let resolution = self
            .poller(&options, description.clone())
            .run(|| started.elapsed() >= duration)?;
        // hitting the deadline after the pause has elapsed still counts
        if resolution.outcome == PollOutcome::TimedOut && started.elapsed() >= duration {
            return Ok(());
        }
        resolution.into_result(&description).map(|_| ())
    }

    /// Start waiting for `condition` without blocking
    #[cfg(feature = "async")]
    pub fn spawn(&self, condition: Condition, options: &WaitOptions) -> TarryResult<PollHandle> {
        let client = Arc::clone(&self.client);
        self.poller(options, condition.description())
            .spawn(move || condition.check(client.as_ref()))
    }

    /// Callback form of [`Waiter::wait_for_alert`]
    #[cfg(feature = "async")]
    pub fn spawn_wait_for_alert<F>(
        &self,
        matcher: impl Into<AlertMatcher>,
        options: &WaitOptions,
        on_complete: F,
    ) -> TarryResult<()>
    where
        F: FnOnce(TarryResult<WaitResult>) + Send + 'static,
    {
        self.spawn(Condition::alert(matcher), options)?
            .on_complete(on_complete);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mock::{MockRemote, Mutation};
    use crate::result::TarryError;
    use regex::Regex;

    // =========================================================================
    // Condition checks (single evaluation, no sleeping)
    // =========================================================================

    mod visible_tests {
        use super::*;

        #[test]
        fn test_absent_is_pending() {
            let remote = MockRemote::new();
            assert_eq!(Condition::appear("#a").check(&remote), Check::Pending);
        }

        #[test]
        fn test_hidden_is_pending() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a").hidden());
            assert_eq!(Condition::appear("#a").check(&remote), Check::Pending);
        }

        #[test]
        fn test_displayed_is_satisfied() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a"));
            assert_eq!(Condition::appear("#a").check(&remote), Check::Satisfied);
        }

        #[test]
        fn test_invalid_selector_fails() {
            let remote = MockRemote::new();
            remote.reject_selector("#bad[");
            let check = Condition::appear("#bad[").check(&remote);
            assert_eq!(check, Check::Failed("invalid selector: #bad[".into()));
        }

        #[test]
        fn test_stale_element_ref_fails() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a"));
            let a = remote.element("#a").unwrap();
            remote.apply(Mutation::remove("#a"));
            let check = Condition::appear(a).check(&remote);
            assert_eq!(check, Check::Failed("stale element reference".into()));
        }

        #[test]
        fn test_child_of_stale_parent_ref_fails() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#parent"));
            let parent = remote.element("#parent").unwrap();
            remote.apply(Mutation::remove("#parent"));
            let check = Condition::appear(ElementTarget::scoped(parent, "#child")).check(&remote);
            assert!(matches!(check, Check::Failed(_)));
        }

        #[test]
        fn test_scoped_ignores_other_containers() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#parent"));
            remote.apply(Mutation::insert("#elsewhere"));
            remote.apply(Mutation::insert("#child").under("#elsewhere"));
            let parent = remote.element("#parent").unwrap();
            let condition = Condition::appear(ElementTarget::scoped(parent, "#child"));
            assert_eq!(condition.check(&remote), Check::Pending);
            remote.apply(Mutation::insert("#child").under("#parent"));
            assert_eq!(condition.check(&remote), Check::Satisfied);
        }
    }

    mod hidden_tests {
        use super::*;

        #[test]
        fn test_locator_absent_is_satisfied() {
            let remote = MockRemote::new();
            assert_eq!(Condition::disappear("#a").check(&remote), Check::Satisfied);
        }

        #[test]
        fn test_locator_hidden_is_satisfied() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a").hidden());
            assert_eq!(Condition::disappear("#a").check(&remote), Check::Satisfied);
        }

        #[test]
        fn test_locator_displayed_is_pending() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a"));
            assert_eq!(Condition::disappear("#a").check(&remote), Check::Pending);
        }

        #[test]
        fn test_element_removed_is_satisfied() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a"));
            let a = remote.element("#a").unwrap();
            let condition = Condition::disappear(a);
            assert_eq!(condition.check(&remote), Check::Pending);
            remote.apply(Mutation::remove("#a"));
            assert_eq!(condition.check(&remote), Check::Satisfied);
        }

        #[test]
        fn test_element_form_does_not_research() {
            let remote = MockRemote::new();
            remote.apply(Mutation::insert("#a"));
            let a = remote.element("#a").unwrap();
            remote.apply(Mutation::remove("#a"));
            remote.apply(Mutation::insert("#a"));

            // the original node is gone even though '#a' matches again
            assert_eq!(Condition::disappear(a).check(&remote), Check::Satisfied);
            assert_eq!(Condition::disappear("#a").check(&remote), Check::Pending);
            assert_eq!(remote.find_calls(), 1);
        }

        #[test]
        fn test_locator_error_fails() {
            let remote = MockRemote::new();
            remote.reject_selector(">>");
            assert!(matches!(
                Condition::disappear(">>").check(&remote),
                Check::Failed(_)
            ));
        }
    }

    mod alert_tests {
        use super::*;

        #[test]
        fn test_no_alert_is_pending() {
            let remote = MockRemote::new();
            assert_eq!(Condition::alert("lol").check(&remote), Check::Pending);
        }

        #[test]
        fn test_matching_alert() {
            let remote = MockRemote::new();
            remote.apply(Mutation::alert("lololololololol"));
            assert_eq!(Condition::alert("lol").check(&remote), Check::Satisfied);
            let pattern = Regex::new("(lo)*l").unwrap();
            assert_eq!(Condition::alert(pattern).check(&remote), Check::Satisfied);
        }

        #[test]
        fn test_non_matching_alert_is_pending() {
            let remote = MockRemote::new();
            remote.apply(Mutation::alert("Saved"));
            assert_eq!(Condition::alert("lol").check(&remote), Check::Pending);
        }

        #[test]
        fn test_script_failure_fails() {
            let remote = MockRemote::new();
            remote.fail_scripts_with(ClientError::ScriptTimeout { ms: 23 });
            assert_eq!(
                Condition::alert("lol").check(&remote),
                Check::Failed("remote script timed out after 23ms".into())
            );
        }
    }

    mod description_tests {
        use super::*;

        #[test]
        fn test_descriptions() {
            assert_eq!(
                Condition::appear("#a").description(),
                "'#a' to be displayed"
            );
            assert_eq!(Condition::disappear("#a").description(), "'#a' to disappear");
            assert_eq!(Condition::alert("x").description(), "alert containing 'x'");
        }

        #[test]
        fn test_visibility_display() {
            assert_eq!(Visibility::Visible.to_string(), "visible");
            assert_eq!(Visibility::Hidden.to_string(), "hidden");
        }
    }

    // =========================================================================
    // Waiter (blocking)
    // =========================================================================

    mod waiter_tests {
        use super::*;

        fn waiter(ambient_ms: u64) -> (Arc<MockRemote>, Waiter) {
            let remote = Arc::new(MockRemote::with_ambient_timeout(Duration::from_millis(
                ambient_ms,
            )));
            let waiter = Waiter::new(remote.clone()).with_config(PollConfig::new().with_interval(10));
            (remote, waiter)
        }

        #[test]
        fn test_wait_for_counter() {
            let (_, waiter) = waiter(1_000);
            let mut i = 0;
            waiter
                .wait_for(
                    || {
                        i += 1;
                        i > 4
                    },
                    &WaitOptions::new().with_interval(50).with_timeout(400),
                )
                .unwrap();
            assert_eq!(i, 5);
        }

        #[test]
        fn test_wait_for_element_already_there() {
            let (remote, waiter) = waiter(1_000);
            remote.apply(Mutation::insert("#ready"));
            let result = waiter.wait_for_element("#ready", &WaitOptions::new()).unwrap();
            assert_eq!(result.ticks, 1);
            assert_eq!(result.waited_for, "'#ready' to be displayed");
        }

        #[test]
        fn test_custom_timeout_override() {
            let (remote, waiter) = waiter(5_000);
            remote.apply(Mutation::insert("#stays"));
            let started = Instant::now();
            let err = waiter
                .wait_for_element_to_disappear("#stays", &WaitOptions::new().with_timeout(10))
                .unwrap_err();
            assert!(matches!(err, TarryError::Timeout { ms: 10, .. }));
            assert!(started.elapsed() < Duration::from_millis(200));
        }

        #[test]
        fn test_ambient_timeout_governs_without_override() {
            let (remote, waiter) = waiter(40);
            let err = waiter
                .wait_for_element("#never", &WaitOptions::new())
                .unwrap_err();
            assert!(matches!(err, TarryError::Timeout { ms: 40, .. }));
            assert!(remote.ambient_history().is_empty());
        }

        #[test]
        fn test_malformed_locator_propagates() {
            let (remote, waiter) = waiter(1_000);
            remote.reject_selector("#x[");
            let err = waiter
                .wait_for_element("#x[", &WaitOptions::new())
                .unwrap_err();
            assert!(err.is_predicate());
            assert_eq!(remote.find_calls(), 1);
        }

        #[test]
        fn test_pause_restores_short_ambient_timeout() {
            let (remote, waiter) = waiter(23);
            let started = Instant::now();
            waiter.pause(Duration::from_millis(100)).unwrap();
            assert!(started.elapsed() >= Duration::from_millis(100));
            assert_eq!(remote.ambient_timeout(), Duration::from_millis(23));
            assert!(!remote.ambient_history().is_empty());
        }

        #[test]
        fn test_pause_zero() {
            let (_, waiter) = waiter(1_000);
            waiter.pause(Duration::ZERO).unwrap();
        }

        #[test]
        fn test_wait_for_alert_sync() {
            let (remote, waiter) = waiter(1_000);
            remote.schedule(Duration::from_millis(30), Mutation::alert("lololololololol"));
            waiter.wait_for_alert("lol", &WaitOptions::new()).unwrap();
            waiter
                .wait_for_alert(Regex::new("(lo)*l").unwrap(), &WaitOptions::new())
                .unwrap();
        }
    }
}
