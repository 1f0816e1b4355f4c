//! CLI command implementations for the replay tool

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use splitcontrol::controller::options;
use splitcontrol::{PolicyEngine, SplittingDecision};
use tracing::{debug, info};

use crate::scenario::{Event, Scenario};

/// One output line per replayed step.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ReplayLine<'a> {
    at_ms: u64,
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<&'a SplittingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    admitted: Option<bool>,
}

/// Implementation of the 'run' command - replays a scenario file
pub fn cmd_run(path: &Path, overrides: &[String], only_updates: bool) -> Result<()> {
    let mut scenario = Scenario::from_file(path)?;
    for pair in overrides {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("Option override '{}' is not key=value", pair))?;
        scenario
            .config
            .set_option(name.trim(), value.trim())
            .with_context(|| format!("Invalid option override '{}'", pair))?;
    }

    info!("Replaying scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut table = scenario.link_table();
    let mut engine =
        PolicyEngine::new(scenario.config.clone()).context("Invalid controller configuration")?;

    let mut updates = 0usize;
    for (index, step) in scenario.steps.iter().enumerate() {
        let now = Duration::from_millis(step.at_ms);
        let (event, decision, admitted) = match &step.event {
            Event::Sample(sample) => {
                let decision = engine
                    .decide(&mut table, sample, now)
                    .with_context(|| format!("Step {} failed", index))?;
                ("sample", Some(decision), None)
            }
            Event::LinkDown(link) => {
                table.set_link_up(*link, false);
                let decision = engine
                    .on_link_down(&mut table, *link)
                    .with_context(|| format!("Step {} failed", index))?;
                ("link-down", Some(decision), None)
            }
            Event::LinkUp(link) => {
                table.set_link_up(*link, true);
                ("link-up", None, None)
            }
            Event::External(action) => {
                let decision = engine
                    .apply_external_action(&table, action)
                    .with_context(|| format!("Step {} failed", index))?;
                ("external", Some(decision), None)
            }
            Event::QosRequest(link) => {
                let admitted = engine
                    .request_qos_test(&mut table, *link, now)
                    .with_context(|| format!("Step {} failed", index))?;
                ("qos-request", None, Some(admitted))
            }
        };

        let updated = decision.as_ref().is_some_and(|d| d.update);
        if updated {
            updates += 1;
        }
        if only_updates && !updated {
            debug!(step = index, event, "no update");
            continue;
        }

        let line = ReplayLine {
            at_ms: step.at_ms,
            event,
            decision: decision.as_ref(),
            admitted,
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    info!(
        "Replay finished: {} steps, {} updates, final shares {:?}",
        scenario.steps.len(),
        updates,
        engine.state().shares
    );
    Ok(())
}

/// Implementation of the 'options' command - lists controller options
pub fn cmd_options() -> Result<()> {
    println!("Controller options:");
    for option in options() {
        println!("  {:<30} {} (default: {})", option.name, option.blurb, option.default);
    }
    Ok(())
}
