//! Error reports and automatic severity classification

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Severity of a captured error, ordered from least to most serious
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight this severity contributes to the rolling user-impact score
    pub fn impact_weight(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 3.0,
            Severity::High => 7.0,
            Severity::Critical => 15.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error came from. Known shapes carry their own fields; anything
/// else goes through [`ErrorContext::Component`].
#[derive(Debug, Clone)]
pub enum ErrorContext {
    /// A failed outbound query
    Query { url: String, action: String },
    /// A cache operation that degraded to a miss
    Cache { key: String },
    /// A state store operation
    State { store: String },
    /// Process-level capture (panic hook)
    Global,
    Component { component: String, action: String },
}

impl ErrorContext {
    pub fn component(&self) -> &str {
        match self {
            ErrorContext::Query { .. } => "connection",
            ErrorContext::Cache { .. } => "cache",
            ErrorContext::State { .. } => "state",
            ErrorContext::Global => "global",
            ErrorContext::Component { component, .. } => component,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            ErrorContext::Query { action, .. } => action,
            ErrorContext::Cache { .. } => "cache_op",
            ErrorContext::State { .. } => "state_op",
            ErrorContext::Global => "panic",
            ErrorContext::Component { action, .. } => action,
        }
    }
}

/// A captured error on its way into the handler
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Discriminant used for recovery-strategy lookup, e.g. "timeout"
    pub kind: String,
    pub message: String,
    pub context: ErrorContext,
    /// Explicit severity; classified from kind and message when absent
    pub severity: Option<Severity>,
    pub extra: HashMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, context: ErrorContext) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            context,
            severity: None,
            extra: HashMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Explicit severity if supplied, otherwise classified
    pub fn effective_severity(&self) -> Severity {
        self.severity
            .unwrap_or_else(|| classify_severity(&self.kind, &self.message))
    }
}

const CRITICAL_MARKERS: &[&str] = &["security", "auth", "unauthorized", "forbidden", "payment"];
const HIGH_MARKERS: &[&str] = &["network", "server", "database", "api", "timeout", "type"];
const MEDIUM_MARKERS: &[&str] = &["render", "state", "display"];

/// Classify severity from an error's kind and message.
///
/// Markers are checked in descending severity order, so a message matching
/// both "auth" and "network" classifies as critical.
pub fn classify_severity(kind: &str, message: &str) -> Severity {
    let haystack = format!("{} {}", kind, message).to_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| haystack.contains(m)) {
        Severity::Critical
    } else if HIGH_MARKERS.iter().any(|m| haystack.contains(m)) {
        Severity::High
    } else if MEDIUM_MARKERS.iter().any(|m| haystack.contains(m)) {
        Severity::Medium
    } else {
        Severity::Low
    }
}
