use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SplitError};

/// Burst sizes the sending side knows how to apply.
pub const SUPPORTED_BURSTS: [u32; 7] = [1, 4, 8, 16, 32, 64, 128];
/// Smallest burst used by the proportional algorithm and adaptive granularity.
pub const MIN_SPLIT_BURST: u32 = 8;
/// Largest burst; link-failure inference only runs at this resolution.
pub const MAX_SPLIT_BURST: u32 = 128;

/// Splitting algorithm, fixed for the lifetime of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Move shares from the highest-delay link to the lowest-delay link.
    #[default]
    HillClimbDelay,
    /// Stay on the default link until it shows loss, then hill-climb.
    CongestionFallback,
    /// Congestion- and bandwidth-aware proportional redistribution.
    CongestionAwareProportional,
    /// Binary primary/backup steering gated by QoS admission tests.
    QosSteer,
    /// Never update; everything stays on the default link.
    FixedDefault,
    /// Ratios come from an external agent; measurements never update.
    ExternalOverride,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::HillClimbDelay => "hill-climb-delay",
            Mode::CongestionFallback => "congestion-fallback",
            Mode::CongestionAwareProportional => "congestion-aware-proportional",
            Mode::QosSteer => "qos-steer",
            Mode::FixedDefault => "fixed-default",
            Mode::ExternalOverride => "external-override",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self> {
        let mode = match s.to_ascii_lowercase().as_str() {
            "hill-climb-delay" | "delay" | "gma" => Mode::HillClimbDelay,
            "congestion-fallback" | "congdelay" => Mode::CongestionFallback,
            "congestion-aware-proportional" | "gma2" => Mode::CongestionAwareProportional,
            "qos-steer" | "qossteer" => Mode::QosSteer,
            "fixed-default" | "defaultlink" => Mode::FixedDefault,
            "external-override" | "rlsplit" => Mode::ExternalOverride,
            other => {
                return Err(SplitError::InvalidConfig(format!(
                    "unknown splitting mode '{}'",
                    other
                )))
            }
        };
        Ok(mode)
    }
}

/// Denominator of the share vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Granularity {
    Fixed(u32),
    /// Recomputed every proportional cycle from the available traffic.
    Adaptive,
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Fixed(1)
    }
}

impl Granularity {
    /// Burst the controller starts from before any measurement arrives.
    pub fn initial_burst(&self) -> u32 {
        match self {
            Granularity::Fixed(burst) => *burst,
            Granularity::Adaptive => MIN_SPLIT_BURST,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self, Granularity::Adaptive)
    }

    pub fn is_steer(&self) -> bool {
        matches!(self, Granularity::Fixed(1))
    }
}

impl TryFrom<u32> for Granularity {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        if value == 0 {
            Ok(Granularity::Adaptive)
        } else if SUPPORTED_BURSTS.contains(&value) {
            Ok(Granularity::Fixed(value))
        } else {
            Err(format!(
                "granularity {} not supported, use 0 (adaptive) or one of {:?}",
                value, SUPPORTED_BURSTS
            ))
        }
    }
}

impl From<Granularity> for u32 {
    fn from(value: Granularity) -> Self {
        match value {
            Granularity::Fixed(burst) => burst,
            Granularity::Adaptive => 0,
        }
    }
}

/// Controller configuration. Every field has a default so partial JSON works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SplitConfig {
    pub mode: Mode,
    pub granularity: Granularity,
    /// Split only if max link delay exceeds min link delay by more than this.
    pub delay_threshold_ms: f64,
    pub adaptive_step: bool,
    pub stability_guard: bool,
    pub loss_tie_break: bool,
    pub qos_delay_violation_target: f64,
    pub qos_loss_target: f64,
    pub qos_flow_prioritization: bool,
    pub congestion_scaler: f64,
    pub adaptive_congestion_scaler: bool,
    pub congestion_scaler_min: f64,
    pub congestion_scaler_max: f64,
    pub bandwidth_estimate: bool,
    pub history_size: usize,
    pub rounding_bias: f64,
    pub measurement_burst_scaler: u32,
    /// Shares of the burst moved back to the default link per calm cycle.
    pub relocation_step: u32,
    pub queueing_delay_target_ms: u32,
    pub congestion_loss_threshold: f64,
    pub step_threshold: u32,
    pub loss_bound_factor: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            granularity: Granularity::default(),
            delay_threshold_ms: 5.0,
            adaptive_step: true,
            stability_guard: true,
            loss_tie_break: true,
            qos_delay_violation_target: 0.01,
            qos_loss_target: 1.0,
            qos_flow_prioritization: false,
            congestion_scaler: 0.3,
            adaptive_congestion_scaler: true,
            congestion_scaler_min: 0.1,
            congestion_scaler_max: 0.5,
            bandwidth_estimate: true,
            history_size: 10,
            rounding_bias: -0.3,
            measurement_burst_scaler: 2,
            relocation_step: 1,
            queueing_delay_target_ms: 10,
            congestion_loss_threshold: 0.05,
            step_threshold: 2,
            loss_bound_factor: 1.5,
        }
    }
}

impl SplitConfig {
    pub fn new(mode: Mode, granularity: Granularity) -> Self {
        Self {
            mode,
            granularity,
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON object and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SplitConfig =
            serde_json::from_str(json).map_err(|e| SplitError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from `name=value` style pairs on top of the defaults.
    pub fn from_options<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (name, value) in pairs {
            config.set_option(name, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set one recognised option by name. Does not validate cross-field rules.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match name {
            "mode" => self.mode = value.parse()?,
            "granularity" => {
                let raw: u32 = parse_value(name, value)?;
                self.granularity = Granularity::try_from(raw).map_err(SplitError::InvalidConfig)?;
            }
            "delay-threshold-ms" => self.delay_threshold_ms = parse_value(name, value)?,
            "adaptive-step" => self.adaptive_step = parse_value(name, value)?,
            "stability-guard" => self.stability_guard = parse_value(name, value)?,
            "loss-tie-break" => self.loss_tie_break = parse_value(name, value)?,
            "qos-delay-violation-target" => {
                self.qos_delay_violation_target = parse_value(name, value)?
            }
            "qos-loss-target" => self.qos_loss_target = parse_value(name, value)?,
            "qos-flow-prioritization" => self.qos_flow_prioritization = parse_value(name, value)?,
            "congestion-scaler" => self.congestion_scaler = parse_value(name, value)?,
            "adaptive-congestion-scaler" => {
                self.adaptive_congestion_scaler = parse_value(name, value)?
            }
            "congestion-scaler-min" => self.congestion_scaler_min = parse_value(name, value)?,
            "congestion-scaler-max" => self.congestion_scaler_max = parse_value(name, value)?,
            "bandwidth-estimate" => self.bandwidth_estimate = parse_value(name, value)?,
            "history-size" => self.history_size = parse_value(name, value)?,
            "rounding-bias" => self.rounding_bias = parse_value(name, value)?,
            "measurement-burst-scaler" => self.measurement_burst_scaler = parse_value(name, value)?,
            "relocation-step" => self.relocation_step = parse_value(name, value)?,
            "queueing-delay-target-ms" => self.queueing_delay_target_ms = parse_value(name, value)?,
            "congestion-loss-threshold" => {
                self.congestion_loss_threshold = parse_value(name, value)?
            }
            "step-threshold" => self.step_threshold = parse_value(name, value)?,
            "loss-bound-factor" => self.loss_bound_factor = parse_value(name, value)?,
            other => {
                return Err(SplitError::InvalidConfig(format!(
                    "unknown option '{}'",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Reject any configuration the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Granularity::Fixed(burst) = self.granularity {
            if !SUPPORTED_BURSTS.contains(&burst) {
                return Err(invalid(format!("granularity {} not supported", burst)));
            }
        }
        match (self.mode, self.granularity) {
            (Mode::QosSteer, g) if !g.is_steer() => {
                return Err(invalid("qos-steer mode requires granularity 1".into()));
            }
            (Mode::CongestionAwareProportional, Granularity::Fixed(burst))
                if burst != 1 && !(MIN_SPLIT_BURST..=MAX_SPLIT_BURST).contains(&burst) =>
            {
                return Err(invalid(format!(
                    "proportional mode needs granularity 1, adaptive, or within [{}, {}]",
                    MIN_SPLIT_BURST, MAX_SPLIT_BURST
                )));
            }
            (Mode::QosSteer, _) | (Mode::CongestionAwareProportional, _) => {}
            (_, Granularity::Adaptive) if self.mode != Mode::ExternalOverride => {
                return Err(invalid(format!(
                    "adaptive granularity is only available in {} mode",
                    Mode::CongestionAwareProportional
                )));
            }
            _ => {}
        }
        if !(self.delay_threshold_ms >= 0.0) {
            return Err(invalid("delay-threshold-ms must be >= 0".into()));
        }
        check_unit("qos-delay-violation-target", self.qos_delay_violation_target)?;
        check_unit("qos-loss-target", self.qos_loss_target)?;
        check_unit("congestion-loss-threshold", self.congestion_loss_threshold)?;
        for (name, value) in [
            ("congestion-scaler", self.congestion_scaler),
            ("congestion-scaler-min", self.congestion_scaler_min),
            ("congestion-scaler-max", self.congestion_scaler_max),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(invalid(format!("{} must be within [0, 1)", name)));
            }
        }
        if self.congestion_scaler_min > self.congestion_scaler_max {
            return Err(invalid(
                "congestion-scaler-min must not exceed congestion-scaler-max".into(),
            ));
        }
        if !(self.rounding_bias > -1.0 && self.rounding_bias <= 0.0) {
            return Err(invalid("rounding-bias must be within (-1, 0]".into()));
        }
        if self.history_size == 0 {
            return Err(invalid("history-size must be at least 1".into()));
        }
        if self.measurement_burst_scaler == 0 {
            return Err(invalid("measurement-burst-scaler cannot be zero".into()));
        }
        if !(self.loss_bound_factor >= 1.0) {
            return Err(invalid("loss-bound-factor must be >= 1".into()));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(format!("cannot parse '{}' for option '{}'", value, name)))
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{} must be within [0, 1]", name)))
    }
}

fn invalid(msg: String) -> SplitError {
    SplitError::InvalidConfig(msg)
}

/// Description of one recognised configuration option.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub blurb: &'static str,
    pub default: &'static str,
}

/// Table of every option `SplitConfig::set_option` accepts.
pub fn options() -> &'static [OptionSpec] {
    static OPTIONS: Lazy<Vec<OptionSpec>> = Lazy::new(|| {
        let spec = |name, blurb, default| OptionSpec {
            name,
            blurb,
            default,
        };
        vec![
            spec(
                "mode",
                "Splitting algorithm: hill-climb-delay, congestion-fallback, congestion-aware-proportional, qos-steer, fixed-default or external-override",
                "hill-climb-delay",
            ),
            spec(
                "granularity",
                "Splitting burst size: 1 (steer), 4, 8, 16, 32, 64, 128, or 0 for adaptive",
                "1",
            ),
            spec(
                "delay-threshold-ms",
                "Split only if max link delay > min link delay + threshold (ms)",
                "5",
            ),
            spec(
                "adaptive-step",
                "Grow the hill-climb step while the same link stays the slowest",
                "true",
            ),
            spec(
                "stability-guard",
                "Skip a move while the slowest link's delay is already decreasing",
                "true",
            ),
            spec(
                "loss-tie-break",
                "If delays are tied, favour the link with lower loss",
                "true",
            ),
            spec(
                "qos-delay-violation-target",
                "Max acceptable ratio of high-delay packets for a QoS flow",
                "0.01",
            ),
            spec(
                "qos-loss-target",
                "Max acceptable packet loss ratio for a QoS flow",
                "1",
            ),
            spec(
                "qos-flow-prioritization",
                "Prioritise QoS flows on the sending side",
                "false",
            ),
            spec(
                "congestion-scaler",
                "Fraction of violation packets moved off a congested link per cycle",
                "0.3",
            ),
            spec(
                "adaptive-congestion-scaler",
                "Derive the congestion scaler from spare bandwidth on calm links",
                "true",
            ),
            spec(
                "congestion-scaler-min",
                "Lower clamp for the adaptive congestion scaler",
                "0.1",
            ),
            spec(
                "congestion-scaler-max",
                "Upper clamp for the adaptive congestion scaler",
                "0.5",
            ),
            spec(
                "bandwidth-estimate",
                "Redistribute proportionally to the rolling max bandwidth when available",
                "true",
            ),
            spec(
                "history-size",
                "Number of per-link bandwidth and violation samples kept",
                "10",
            ),
            spec(
                "rounding-bias",
                "Offset applied when rounding a decreasing share (must be <= 0)",
                "-0.3",
            ),
            spec(
                "measurement-burst-scaler",
                "Packets per burst unit required before inferring a link failure",
                "2",
            ),
            spec(
                "relocation-step",
                "Shares moved back to the default link per uncongested cycle",
                "1",
            ),
            spec(
                "queueing-delay-target-ms",
                "Queueing delay below this is reported as zero in drain hints",
                "10",
            ),
            spec(
                "congestion-loss-threshold",
                "Default-link loss above which congestion fallback starts splitting",
                "0.05",
            ),
            spec(
                "step-threshold",
                "Consecutive slowest-link cycles before the adaptive step grows",
                "2",
            ),
            spec(
                "loss-bound-factor",
                "Loss tie-break triggers when max loss > min loss * factor",
                "1.5",
            ),
        ]
    });
    OPTIONS.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_table_defaults_match_config_defaults() {
        let mut config = SplitConfig::default();
        for opt in options() {
            config
                .set_option(opt.name, opt.default)
                .unwrap_or_else(|e| panic!("option {} rejected its default: {}", opt.name, e));
        }
        assert_eq!(config, SplitConfig::default());
    }

    #[test]
    fn unsupported_granularity_is_rejected() {
        let err = SplitConfig::from_options([("granularity", "12")]).unwrap_err();
        assert!(matches!(err, SplitError::InvalidConfig(_)));
        let err = SplitConfig::from_json(r#"{"granularity": 2}"#).unwrap_err();
        assert!(matches!(err, SplitError::InvalidConfig(_)));
    }

    #[test]
    fn qos_steer_requires_single_share() {
        let config = SplitConfig::new(Mode::QosSteer, Granularity::Fixed(8));
        assert!(config.validate().is_err());
        let config = SplitConfig::new(Mode::QosSteer, Granularity::Fixed(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn proportional_rejects_small_bursts() {
        let config = SplitConfig::new(Mode::CongestionAwareProportional, Granularity::Fixed(4));
        assert!(config.validate().is_err());
        for g in [
            Granularity::Fixed(1),
            Granularity::Fixed(8),
            Granularity::Fixed(128),
            Granularity::Adaptive,
        ] {
            let config = SplitConfig::new(Mode::CongestionAwareProportional, g);
            assert!(config.validate().is_ok(), "{:?} should be accepted", g);
        }
    }

    #[test]
    fn mode_aliases_parse() {
        assert_eq!("gma2".parse::<Mode>().unwrap(), Mode::CongestionAwareProportional);
        assert_eq!("CongDelay".parse::<Mode>().unwrap(), Mode::CongestionFallback);
        assert_eq!("qos-steer".parse::<Mode>().unwrap(), Mode::QosSteer);
        assert!("round-robin".parse::<Mode>().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SplitConfig::from_json(
            r#"{"mode": "congestion-aware-proportional", "granularity": 0, "history-size": 4}"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::CongestionAwareProportional);
        assert_eq!(config.granularity, Granularity::Adaptive);
        assert_eq!(config.history_size, 4);
        assert_eq!(config.delay_threshold_ms, 5.0);
    }
}
