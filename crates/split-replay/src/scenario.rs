//! Replay scenario format
//!
//! A scenario names the links, the controller configuration and a list of
//! timestamped events. Samples use the controller's own JSON form.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use splitcontrol::{ExternalAction, LinkId, LinkTable, MeasurementSample, SplitConfig};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Link ids in measurement order.
    pub links: Vec<LinkId>,
    /// Defaults to the first link.
    #[serde(default)]
    pub default_link: Option<LinkId>,
    /// Defaults to the second link.
    #[serde(default)]
    pub backup_link: Option<LinkId>,
    #[serde(default)]
    pub config: SplitConfig,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: Event,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Event {
    /// One measurement interval.
    Sample(MeasurementSample),
    /// Link reported down outside the measurement cycle.
    LinkDown(LinkId),
    LinkUp(LinkId),
    /// Ratios from an external agent.
    External(ExternalAction),
    /// QoS probe admission request for a backup link.
    QosRequest(LinkId),
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario file {}", path.display()))?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Reject scenarios whose events reference unknown links or go back in
    /// time.
    pub fn check(&self) -> Result<()> {
        if self.links.is_empty() {
            bail!("Scenario '{}' has no links", self.name);
        }
        let mut last = 0;
        for (i, step) in self.steps.iter().enumerate() {
            if step.at_ms < last {
                bail!("Step {} at {} ms goes back in time", i, step.at_ms);
            }
            last = step.at_ms;
            if let Event::Sample(sample) = &step.event {
                if sample.link_ids != self.links {
                    bail!(
                        "Step {} sample links {:?} do not match scenario links {:?}",
                        i,
                        sample.link_ids,
                        self.links
                    );
                }
            }
        }
        Ok(())
    }

    pub fn link_table(&self) -> LinkTable {
        let mut table = LinkTable::new(&self.links);
        if let Some(id) = self.default_link {
            table.set_default_link(id);
        }
        if let Some(id) = self.backup_link {
            table.set_backup_link(id);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_parse_with_flattened_events() {
        let json = r#"{
            "name": "mini",
            "links": [0, 1],
            "config": {"mode": "hill-climb-delay", "granularity": 8},
            "steps": [
                {"at-ms": 0, "link-down": 1},
                {"at-ms": 10, "qos-request": 1}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.steps.len(), 2);
        assert!(matches!(scenario.steps[0].event, Event::LinkDown(1)));
        assert_eq!(scenario.steps[1].at_ms, 10);
        scenario.check().unwrap();
    }

    #[test]
    fn time_must_not_go_backwards() {
        let json = r#"{
            "name": "bad",
            "links": [0, 1],
            "steps": [
                {"at-ms": 10, "link-up": 1},
                {"at-ms": 5, "link-up": 1}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert!(scenario.check().is_err());
    }
}
