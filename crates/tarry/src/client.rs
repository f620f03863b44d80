//! RemoteClient - Abstract Remote Tree Client Trait
//!
//! The waiters never talk to a browser or device directly. Everything they
//! need from the remote side goes through [`RemoteClient`]:
//!
//! ```text
//! ┌──────────────┐   predicate   ┌──────────┐   queries   ┌────────────────┐
//! │   Waiter     │──────────────►│  Poller  │────────────►│  RemoteClient  │
//! │ (conditions) │               │ (ticks)  │◄────────────│ (marionette,   │
//! └──────────────┘               └──────────┘   answers   │  CDP, mock...) │
//!                                                         └────────────────┘
//! ```
//!
//! Implementations own the ambient remote-execution timeout. The poller only
//! raises it temporarily through [`crate::AmbientTimeoutGuard`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for remote client calls
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors reported by a remote client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The referenced element is no longer attached to the tree
    #[error("stale element reference")]
    StaleElement,

    /// The locator could not be parsed by the remote side
    #[error("invalid selector: {selector}")]
    InvalidSelector {
        /// Offending selector
        selector: String,
    },

    /// Remote execution exceeded the client's ambient timeout
    #[error("remote script timed out after {ms}ms")]
    ScriptTimeout {
        /// Ambient timeout in effect
        ms: u64,
    },

    /// Remote code raised an error
    #[error("javascript error: {message}")]
    Javascript {
        /// Error message
        message: String,
    },

    /// Transport-level failure
    #[error("transport error: {message}")]
    Transport {
        /// Error message
        message: String,
    },
}

/// Opaque handle to a remote element, issued by the client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Client-assigned identifier
    pub id: String,
}

impl ElementRef {
    /// Wrap a client-assigned identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "element<{}>", self.id)
    }
}

/// What a waiter is looking at: a resolved element, or a locator that is
/// re-queried on every tick, optionally scoped to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementTarget {
    /// An element already resolved by the client
    Element(ElementRef),
    /// A locator, searched under `scope` or the whole document
    Locator {
        /// Selector passed verbatim to the client
        selector: String,
        /// Container to search under
        scope: Option<Box<ElementTarget>>,
    },
}

impl ElementTarget {
    /// Document-wide locator
    #[must_use]
    pub fn locator(selector: impl Into<String>) -> Self {
        Self::Locator {
            selector: selector.into(),
            scope: None,
        }
    }

    /// Locator restricted to descendants of `scope`
    #[must_use]
    pub fn scoped(scope: impl Into<ElementTarget>, selector: impl Into<String>) -> Self {
        Self::Locator {
            selector: selector.into(),
            scope: Some(Box::new(scope.into())),
        }
    }

    /// Whether this target is a resolved element reference
    #[must_use]
    pub const fn is_element(&self) -> bool {
        matches!(self, Self::Element(_))
    }

    /// Whether the target is, or is searched under, a resolved reference
    #[must_use]
    pub fn is_anchored(&self) -> bool {
        match self {
            Self::Element(_) => true,
            Self::Locator {
                scope: Some(scope), ..
            } => scope.is_anchored(),
            Self::Locator { scope: None, .. } => false,
        }
    }

    /// Look the target up through `client`.
    ///
    /// A resolved reference is returned as is, without checking that it is
    /// still attached. A locator whose scope cannot be found resolves to
    /// `None`.
    pub fn resolve(&self, client: &dyn RemoteClient) -> ClientResult<Option<ElementRef>> {
        match self {
            Self::Element(element) => Ok(Some(element.clone())),
            Self::Locator { selector, scope } => {
                let scope = match scope {
                    Some(parent) => match parent.resolve(client)? {
                        Some(found) => Some(found),
                        None => return Ok(None),
                    },
                    None => None,
                };
                client.find_element(selector, scope.as_ref())
            }
        }
    }
}

impl std::fmt::Display for ElementTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Element(element) => write!(f, "{element}"),
            Self::Locator {
                selector,
                scope: None,
            } => write!(f, "'{selector}'"),
            Self::Locator {
                selector,
                scope: Some(scope),
            } => write!(f, "'{selector}' within {scope}"),
        }
    }
}

impl From<ElementRef> for ElementTarget {
    fn from(element: ElementRef) -> Self {
        Self::Element(element)
    }
}

impl From<&ElementRef> for ElementTarget {
    fn from(element: &ElementRef) -> Self {
        Self::Element(element.clone())
    }
}

impl From<&str> for ElementTarget {
    fn from(selector: &str) -> Self {
        Self::locator(selector)
    }
}

impl From<String> for ElementTarget {
    fn from(selector: String) -> Self {
        Self::locator(selector)
    }
}

/// Abstract client for a remote, externally mutating element tree.
///
/// Methods take `&self`: implementations are shared between concurrent polls
/// behind an `Arc` and synchronise internally.
///
/// # Implementations
///
/// - [`crate::mock::MockRemote`] - in-memory tree for unit tests
/// - marionette / CDP / WebDriver adapters live in the host harness
pub trait RemoteClient: Send + Sync {
    /// Current default budget for remote operations
    fn ambient_timeout(&self) -> Duration;

    /// Replace the default budget for remote operations
    fn set_ambient_timeout(&self, timeout: Duration);

    /// Find the first element matching `locator`, searching under `scope`
    /// when given. `Ok(None)` means nothing matched.
    fn find_element(&self, locator: &str, scope: Option<&ElementRef>)
        -> ClientResult<Option<ElementRef>>;

    /// Whether the element is rendered. A detached element yields
    /// [`ClientError::StaleElement`].
    fn is_displayed(&self, element: &ElementRef) -> ClientResult<bool>;

    /// Run `script` on the remote side with positional `args`
    fn evaluate_remote(
        &self,
        script: &str,
        args: &[serde_json::Value],
    ) -> ClientResult<serde_json::Value>;
}
