use serde::{Deserialize, Serialize};

use crate::controller::link_view::LinkId;
use crate::error::Result;

/// Wire value for "no queueing delay measurement".
pub const NO_QUEUEING_DELAY: u8 = u8::MAX;

/// Output of one controller cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplittingDecision {
    /// Shares of the burst per link, same order as the measurement sample.
    pub shares: Vec<u32>,
    /// True if the sending side must be notified.
    pub update: bool,
    /// Per-link queueing delay (ms) the sender should drain before resuming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queueing_delay: Option<Vec<Option<u32>>>,
    /// Applies to the opposite direction only; never persisted.
    #[serde(default)]
    pub reverse: bool,
}

impl SplittingDecision {
    pub fn new(shares: Vec<u32>, update: bool) -> Self {
        Self {
            shares,
            update,
            queueing_delay: None,
            reverse: false,
        }
    }

    pub fn unchanged(shares: Vec<u32>) -> Self {
        Self::new(shares, false)
    }

    pub fn burst(&self) -> u32 {
        self.shares.iter().sum()
    }

    /// Drain hint as carried in the notification: 255 = no measurement,
    /// measured values capped at 254.
    pub fn queueing_delay_wire(&self) -> Option<Vec<u8>> {
        self.queueing_delay.as_ref().map(|delays| {
            delays
                .iter()
                .map(|d| match d {
                    Some(ms) => (*ms).min(u32::from(NO_QUEUEING_DELAY - 1)) as u8,
                    None => NO_QUEUEING_DELAY,
                })
                .collect()
        })
    }

    /// Notification payload handed to the transport layer.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Ratio update supplied by an external agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAction {
    pub link_ids: Vec<LinkId>,
    pub shares: Vec<u32>,
}
