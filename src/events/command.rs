//! Typed view of an inbound cluster event.

use regex::Regex;
use serde_json::{Map, Value};

use crate::constants::{DEFAULT_ACTION, NAMESPACE};
use crate::error::{AgentError, Result};

/// Command extracted from a namespaced event name
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub namespace: String,
    /// First segment after the namespace, never empty
    pub kind: String,
    /// Second segment, `None` means the default action
    pub action: Option<String>,
    pub payload: Map<String, Value>,
}

/// Result of splitting an event name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameParse<'a> {
    Command {
        kind: &'a str,
        action: Option<&'a str>,
    },
    OutsideNamespace,
    EmptyKind,
}

impl ParsedCommand {
    /// Split `mamiya:<kind>[:<action>]` into its segments.
    ///
    /// Only the first `:` after the kind separates the action, so
    /// `mamiya:fetch:retry:now` has action `retry:now`.
    pub fn split_name(name: &str) -> NameParse<'_> {
        let Some(remainder) = name
            .strip_prefix(NAMESPACE)
            .and_then(|rest| rest.strip_prefix(':'))
        else {
            return NameParse::OutsideNamespace;
        };

        let (kind, action) = match remainder.split_once(':') {
            Some((kind, action)) => (kind, Some(action).filter(|a| !a.is_empty())),
            None => (remainder, None),
        };

        if kind.is_empty() {
            NameParse::EmptyKind
        } else {
            NameParse::Command { kind, action }
        }
    }

    pub fn new(kind: &str, action: Option<&str>, payload: Map<String, Value>) -> Self {
        Self {
            namespace: NAMESPACE.to_string(),
            kind: kind.to_string(),
            action: action.map(str::to_string),
            payload,
        }
    }

    /// Action the handler is asked to perform
    pub fn target_action(&self) -> &str {
        self.action.as_deref().unwrap_or(DEFAULT_ACTION)
    }

    /// Full event name, e.g. `mamiya:fetch:retry`
    pub fn event_name(&self) -> String {
        match &self.action {
            Some(action) => format!("{}:{}:{}", self.namespace, self.kind, action),
            None => format!("{}:{}", self.namespace, self.kind),
        }
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Decode an event payload as a JSON object
pub fn decode_payload(
    payload: &[u8],
) -> std::result::Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_slice::<Map<String, Value>>(payload)
}

#[derive(Debug, Clone)]
pub enum EventMatcher {
    Exact(String),
    Pattern(Regex),
}

impl EventMatcher {
    /// `/.../` entries compile as regular expressions, anything else matches exactly
    pub fn parse(entry: &str) -> Result<Self> {
        match entry
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(pattern) => Regex::new(pattern).map(EventMatcher::Pattern).map_err(|e| {
                AgentError::Configuration(format!("Invalid event filter pattern {entry}: {e}"))
            }),
            None => Ok(EventMatcher::Exact(entry.to_string())),
        }
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            EventMatcher::Exact(expected) => expected == kind,
            EventMatcher::Pattern(regex) => regex.is_match(kind),
        }
    }
}

/// Ordered set of matchers restricting which command kinds are dispatched
#[derive(Debug, Clone)]
pub struct EventFilter {
    matchers: Vec<EventMatcher>,
}

impl EventFilter {
    pub fn new(matchers: Vec<EventMatcher>) -> Self {
        Self { matchers }
    }

    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        entries
            .iter()
            .map(|entry| EventMatcher::parse(entry.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    pub fn allows(&self, kind: &str) -> bool {
        self.matchers.iter().any(|matcher| matcher.matches(kind))
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}
