//! Core telemetry: error capture, classification, recovery, and impact
//! metrics
//!
//! ## Overview
//!
//! Every component reports failures into the [`ErrorHandler`]; nothing
//! depends on its internals. Reports are classified by severity, counted
//! into rolling metrics, and routed through registered recovery strategies
//! with generic fallbacks when no strategy matches.
//!
//! - [`classify`]: report shapes and the severity heuristics
//! - [`handler`]: the capture/buffer/flush pipeline
//! - [`recovery`]: strategy trait, connectivity watch, recovery broadcast
//! - [`metrics`]: aggregated counters and the user-impact score

pub mod classify;
pub mod handler;
pub mod metrics;
pub mod recovery;

pub use classify::{classify_severity, ErrorContext, ErrorReport, Severity};
pub use handler::{install_panic_hook, ErrorHandler, TelemetryConfig};
pub use metrics::{ErrorMetrics, ErrorMetricsSnapshot};
pub use recovery::{RecoveryError, RecoveryEvent, RecoveryStrategy};

/// Common imports for downstream crates
pub mod prelude {
    pub use crate::classify::{ErrorContext, ErrorReport, Severity};
    pub use crate::handler::{install_panic_hook, ErrorHandler, TelemetryConfig};
    pub use crate::metrics::ErrorMetricsSnapshot;
    pub use crate::recovery::{RecoveryError, RecoveryEvent, RecoveryStrategy};
}
