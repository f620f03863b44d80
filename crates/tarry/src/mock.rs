//! In-memory remote tree for testing waiters without a device or browser.
//!
//! [`MockRemote`] keeps a flat list of nodes with parent links and a queue of
//! time-scheduled [`Mutation`]s. Due mutations are applied lazily whenever
//! the client is queried, so a test can say "insert `#banner` in 500ms" and
//! then block on a waiter.
//!
//! ```ignore
//! let remote = Arc::new(MockRemote::new());
//! remote.schedule(Duration::from_millis(500), Mutation::insert("#banner"));
//! Waiter::new(remote).wait_for_element("#banner", &WaitOptions::new())?;
//! ```

use crate::alert::ALERT_MESSAGE_SCRIPT;
use crate::client::{ClientError, ClientResult, ElementRef, RemoteClient};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Ambient timeout a fresh [`MockRemote`] starts with (5 seconds)
pub const DEFAULT_AMBIENT_TIMEOUT_MS: u64 = 5_000;

/// A change to the mock tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Attach a new node
    Insert {
        /// Selector the node answers to
        selector: String,
        /// Selector of the parent node (document root when `None`)
        parent: Option<String>,
        /// Initial display state
        displayed: bool,
    },
    /// Detach the first node matching `selector`, with its descendants
    Remove {
        /// Selector of the node to remove
        selector: String,
    },
    /// Toggle display of the first node matching `selector`
    SetDisplayed {
        /// Selector of the node to update
        selector: String,
        /// New display state
        displayed: bool,
    },
    /// Open a modal alert
    ShowAlert {
        /// Alert text
        message: String,
    },
    /// Close the modal alert
    DismissAlert,
}

impl Mutation {
    /// Insert a visible node at the document root
    #[must_use]
    pub fn insert(selector: impl Into<String>) -> Self {
        Self::Insert {
            selector: selector.into(),
            parent: None,
            displayed: true,
        }
    }

    /// Place an insert under the first node matching `parent`
    #[must_use]
    pub fn under(self, parent: impl Into<String>) -> Self {
        match self {
            Self::Insert {
                selector,
                displayed,
                ..
            } => Self::Insert {
                selector,
                parent: Some(parent.into()),
                displayed,
            },
            other => other,
        }
    }

    /// Make an insert start out hidden
    #[must_use]
    pub fn hidden(self) -> Self {
        match self {
            Self::Insert {
                selector, parent, ..
            } => Self::Insert {
                selector,
                parent,
                displayed: false,
            },
            other => other,
        }
    }

    /// Remove a node
    #[must_use]
    pub fn remove(selector: impl Into<String>) -> Self {
        Self::Remove {
            selector: selector.into(),
        }
    }

    /// Display a node
    #[must_use]
    pub fn show(selector: impl Into<String>) -> Self {
        Self::SetDisplayed {
            selector: selector.into(),
            displayed: true,
        }
    }

    /// Hide a node
    #[must_use]
    pub fn hide(selector: impl Into<String>) -> Self {
        Self::SetDisplayed {
            selector: selector.into(),
            displayed: false,
        }
    }

    /// Open an alert
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self::ShowAlert {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct MockNode {
    id: u64,
    selector: String,
    parent: Option<u64>,
    displayed: bool,
    attached: bool,
}

#[derive(Debug, Clone)]
struct Scheduled {
    at: Duration,
    mutation: Mutation,
}

#[derive(Debug, Default)]
struct MockState {
    ambient: Duration,
    ambient_history: Vec<Duration>,
    nodes: Vec<MockNode>,
    next_id: u64,
    scheduled: Vec<Scheduled>,
    alert: Option<String>,
    rejected: Vec<String>,
    script_error: Option<ClientError>,
    find_calls: usize,
    display_calls: usize,
    script_calls: usize,
}

impl MockState {
    fn advance(&mut self, now: Duration) {
        while self.scheduled.first().is_some_and(|s| s.at <= now) {
            let due = self.scheduled.remove(0);
            self.apply(due.mutation);
        }
    }

    fn first_attached(&self, selector: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.attached && n.selector == selector)
    }

    fn node(&self, id: u64) -> Option<&MockNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn is_descendant(&self, node: &MockNode, ancestor: u64) -> bool {
        let mut cursor = node.parent;
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    fn rendered(&self, node: &MockNode) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if !n.displayed {
                return false;
            }
            current = n.parent.and_then(|id| self.node(id));
        }
        true
    }

    fn detach(&mut self, id: u64) {
        let children: Vec<u64> = self
            .nodes
            .iter()
            .filter(|n| n.attached && n.parent == Some(id))
            .map(|n| n.id)
            .collect();
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) {
            node.attached = false;
        }
        for child in children {
            self.detach(child);
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Insert {
                selector,
                parent,
                displayed,
            } => {
                let parent = match parent {
                    Some(sel) => match self.first_attached(&sel) {
                        Some(idx) => Some(self.nodes[idx].id),
                        None => {
                            tracing::trace!(%selector, parent = %sel, "mock insert skipped, parent missing");
                            return;
                        }
                    },
                    None => None,
                };
                self.next_id += 1;
                self.nodes.push(MockNode {
                    id: self.next_id,
                    selector,
                    parent,
                    displayed,
                    attached: true,
                });
            }
            Mutation::Remove { selector } => {
                if let Some(idx) = self.first_attached(&selector) {
                    let id = self.nodes[idx].id;
                    self.detach(id);
                }
            }
            Mutation::SetDisplayed {
                selector,
                displayed,
            } => {
                if let Some(idx) = self.first_attached(&selector) {
                    self.nodes[idx].displayed = displayed;
                }
            }
            Mutation::ShowAlert { message } => self.alert = Some(message),
            Mutation::DismissAlert => self.alert = None,
        }
    }
}

fn node_id(element: &ElementRef) -> Option<u64> {
    element.id.strip_prefix("node-")?.parse().ok()
}

/// Mock remote client for unit testing
#[derive(Debug)]
pub struct MockRemote {
    epoch: Instant,
    state: Mutex<MockState>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Empty tree with the default ambient timeout
    #[must_use]
    pub fn new() -> Self {
        Self::with_ambient_timeout(Duration::from_millis(DEFAULT_AMBIENT_TIMEOUT_MS))
    }

    /// Empty tree with a specific ambient timeout
    #[must_use]
    pub fn with_ambient_timeout(ambient: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(MockState {
                ambient,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.advance(self.epoch.elapsed());
        state
    }

    /// Apply a mutation now
    pub fn apply(&self, mutation: Mutation) {
        self.lock().apply(mutation);
    }

    /// Apply a mutation once `after` has elapsed from now
    pub fn schedule(&self, after: Duration, mutation: Mutation) {
        let at = self.epoch.elapsed() + after;
        let mut state = self.lock();
        let idx = state.scheduled.partition_point(|s| s.at <= at);
        state.scheduled.insert(idx, Scheduled { at, mutation });
    }

    /// Resolve `selector` document-wide without counting a client call
    #[must_use]
    pub fn element(&self, selector: &str) -> Option<ElementRef> {
        let state = self.lock();
        state
            .first_attached(selector)
            .map(|idx| ElementRef::new(format!("node-{}", state.nodes[idx].id)))
    }

    /// Make `find_element` reject `selector` as malformed
    pub fn reject_selector(&self, selector: impl Into<String>) {
        self.lock().rejected.push(selector.into());
    }

    /// Make every `evaluate_remote` call fail with `error`
    pub fn fail_scripts_with(&self, error: ClientError) {
        self.lock().script_error = Some(error);
    }

    /// Every value passed to `set_ambient_timeout`, in order
    #[must_use]
    pub fn ambient_history(&self) -> Vec<Duration> {
        self.lock().ambient_history.clone()
    }

    /// Number of `find_element` calls
    #[must_use]
    pub fn find_calls(&self) -> usize {
        self.lock().find_calls
    }

    /// Number of `is_displayed` calls
    #[must_use]
    pub fn display_calls(&self) -> usize {
        self.lock().display_calls
    }

    /// Number of `evaluate_remote` calls
    #[must_use]
    pub fn script_calls(&self) -> usize {
        self.lock().script_calls
    }
}

impl RemoteClient for MockRemote {
    fn ambient_timeout(&self) -> Duration {
        self.lock().ambient
    }

    fn set_ambient_timeout(&self, timeout: Duration) {
        let mut state = self.lock();
        state.ambient = timeout;
        state.ambient_history.push(timeout);
    }

    fn find_element(
        &self,
        locator: &str,
        scope: Option<&ElementRef>,
    ) -> ClientResult<Option<ElementRef>> {
        let mut state = self.lock();
        state.find_calls += 1;
        if state.rejected.iter().any(|r| r == locator) {
            return Err(ClientError::InvalidSelector {
                selector: locator.to_string(),
            });
        }
        let scope_id = match scope {
            Some(element) => {
                let id = node_id(element).ok_or(ClientError::StaleElement)?;
                match state.node(id) {
                    Some(node) if node.attached => Some(id),
                    _ => return Err(ClientError::StaleElement),
                }
            }
            None => None,
        };
        let found = state.nodes.iter().find(|n| {
            n.attached
                && n.selector == locator
                && scope_id.map_or(true, |ancestor| state.is_descendant(n, ancestor))
        });
        Ok(found.map(|n| ElementRef::new(format!("node-{}", n.id))))
    }

    fn is_displayed(&self, element: &ElementRef) -> ClientResult<bool> {
        let mut state = self.lock();
        state.display_calls += 1;
        let id = node_id(element).ok_or(ClientError::StaleElement)?;
        match state.node(id) {
            Some(node) if node.attached => Ok(state.rendered(node)),
            _ => Err(ClientError::StaleElement),
        }
    }

    fn evaluate_remote(
        &self,
        script: &str,
        _args: &[serde_json::Value],
    ) -> ClientResult<serde_json::Value> {
        let mut state = self.lock();
        state.script_calls += 1;
        if let Some(err) = state.script_error.clone() {
            return Err(err);
        }
        if script == ALERT_MESSAGE_SCRIPT {
            return Ok(state
                .alert
                .clone()
                .map_or(serde_json::Value::Null, serde_json::Value::String));
        }
        Err(ClientError::Javascript {
            message: "script not supported by MockRemote".to_string(),
        })
    }
}
