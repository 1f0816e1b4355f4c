//! Receiver-side traffic splitting controller.
//!
//! The controller consumes periodic per-link measurement samples together with a
//! shared link-status view and answers with a discrete splitting decision: how
//! many shares of the next burst go to each link. The sending side applies the
//! decision; nothing in this crate touches packets.

pub mod controller;
mod error;

// Testing utilities (always available)
pub mod testing;

// Export public types
pub use crate::controller::{
    ClosedWindow, ExternalAction, Granularity, LinkId, LinkStatusView, LinkTable, MeasurementSample, Mode,
    PolicyEngine, QosAdmission, QosSession, QosWindows, SharedLinkTable, SplitConfig,
    SplittingDecision, SplittingState, WindowKind,
};
pub use crate::error::{Result, SplitError};
