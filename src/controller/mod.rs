//! Traffic splitting controller.
//! Public facade re-exporting the policy engine and its collaborators.

pub use self::decision::{ExternalAction, SplittingDecision};
pub use self::engine::PolicyEngine;
pub use self::link_view::{LinkId, LinkStatusView, LinkTable, QosAdmission, SharedLinkTable};
pub use self::measurement::MeasurementSample;
pub use self::props::{options, Granularity, Mode, OptionSpec, SplitConfig};
pub use self::state::SplittingState;
pub use self::timers::{ClosedWindow, QosSession, QosWindows, WindowKind, DEFAULT_PACKET_WEIGHT};

mod decision;
mod engine;
mod link_view;
mod measurement;
mod props;
mod rounding;
mod state;
mod strategy;
mod timers;
