//! Modal alert matching for [`crate::Waiter::wait_for_alert`].
//!
//! The alert text is read on the remote side with [`ALERT_MESSAGE_SCRIPT`],
//! which returns the message of the open modal alert or `null`.

use regex::Regex;

/// Remote probe returning the open alert's message, or `null`
pub const ALERT_MESSAGE_SCRIPT: &str = "\
var el = document.querySelector('.modal-dialog-alert-message');\
return (el && el.offsetParent !== null) ? el.textContent : null;";

/// How an alert message is matched
#[derive(Debug, Clone)]
pub enum AlertMatcher {
    /// Message contains this substring
    Contains(String),
    /// Message matches this pattern anywhere
    Pattern(Regex),
}

impl AlertMatcher {
    /// Match on substring containment
    #[must_use]
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    /// Check a message against the matcher
    #[must_use]
    pub fn matches(&self, message: &str) -> bool {
        match self {
            Self::Contains(needle) => message.contains(needle.as_str()),
            Self::Pattern(pattern) => pattern.is_match(message),
        }
    }
}

impl std::fmt::Display for AlertMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains(needle) => write!(f, "alert containing '{needle}'"),
            Self::Pattern(pattern) => write!(f, "alert matching /{}/", pattern.as_str()),
        }
    }
}

impl From<&str> for AlertMatcher {
    fn from(needle: &str) -> Self {
        Self::Contains(needle.to_string())
    }
}

impl From<String> for AlertMatcher {
    fn from(needle: String) -> Self {
        Self::Contains(needle)
    }
}

impl From<Regex> for AlertMatcher {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}
