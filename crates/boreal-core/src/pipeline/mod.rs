//! Concurrent scan reduction with deterministic result ordering.
//!
//! Scans are partitioned across pipeline threads; a registry of
//! completion tokens lets the coordinator hand summaries out in canonical
//! (scan, integration) order no matter which pipeline finishes first.

mod queue;
mod scheduler;

pub use queue::InFlightRegistry;
pub use scheduler::{reduce_all, reduce_all_with, IntegrationSummary, SourceModel};
