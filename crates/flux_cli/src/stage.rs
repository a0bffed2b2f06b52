//! Stage specs and configuration for `flux run`.

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use flux_core::{DropPolicy, FluxConfig, OperationError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One integer stage, written `KIND:N` on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSpec {
    /// Add `N`
    Add(i64),
    /// Multiply by `N`
    Mul(i64),
    /// Pass through, failing on multiples of `N`
    Fail(i64),
}

impl StageSpec {
    /// Apply the stage to one input
    pub fn apply(self, x: i64) -> Result<i64, OperationError> {
        match self {
            Self::Add(n) => x
                .checked_add(n)
                .ok_or_else(|| OperationError::new(format!("{x} + {n} overflows"))),
            Self::Mul(n) => x
                .checked_mul(n)
                .ok_or_else(|| OperationError::new(format!("{x} * {n} overflows"))),
            Self::Fail(n) => match x.checked_rem(n) {
                Some(0) | None => Err(OperationError::new(format!("{x} is a multiple of {n}"))),
                Some(_) => Ok(x),
            },
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(n) => write!(f, "add:{n}"),
            Self::Mul(n) => write!(f, "mul:{n}"),
            Self::Fail(n) => write!(f, "fail:{n}"),
        }
    }
}

impl FromStr for StageSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = s
            .split_once(':')
            .ok_or_else(|| format!("expected KIND:N, got '{s}'"))?;
        let n: i64 = arg
            .trim()
            .parse()
            .map_err(|_| format!("'{arg}' is not an integer"))?;
        match kind.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add(n)),
            "mul" => Ok(Self::Mul(n)),
            "fail" if n == 0 => Err("fail:N needs a non-zero N".to_string()),
            "fail" => Ok(Self::Fail(n)),
            other => Err(format!(
                "unknown stage kind '{other}' (expected add, mul or fail)"
            )),
        }
    }
}

/// Flags that override the config file
#[derive(Debug, Default, Clone, Args)]
pub struct ConfigOverrides {
    /// Entropy available to each stage
    #[arg(long)]
    pub entropy_budget: Option<f64>,
    /// Entropy spent per event
    #[arg(long)]
    pub entropy_decay: Option<f64>,
    /// Hard cap on events per stage
    #[arg(long)]
    pub max_events: Option<u64>,
    /// Output queue capacity
    #[arg(long)]
    pub buffer_size: Option<usize>,
    /// block, drop_oldest or drop_newest
    #[arg(long)]
    pub drop_policy: Option<DropPolicy>,
    /// Share of results fed back as input
    #[arg(long)]
    pub feedback_fraction: Option<f64>,
    /// Seed for feedback sampling
    #[arg(long)]
    pub feedback_seed: Option<u64>,
}

impl ConfigOverrides {
    /// Layer the flags over `base`
    #[must_use]
    pub fn apply(&self, mut base: FluxConfig) -> FluxConfig {
        if let Some(budget) = self.entropy_budget {
            base.entropy_budget = budget;
        }
        if let Some(decay) = self.entropy_decay {
            base.entropy_decay = decay;
        }
        if let Some(max) = self.max_events {
            base.max_events = Some(max);
        }
        if let Some(size) = self.buffer_size {
            base.buffer_size = size;
        }
        if let Some(policy) = self.drop_policy {
            base.drop_policy = policy;
        }
        if let Some(fraction) = self.feedback_fraction {
            base.feedback_fraction = fraction;
        }
        if let Some(seed) = self.feedback_seed {
            base.feedback_seed = Some(seed);
        }
        base
    }
}

/// Read a JSON config file, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<FluxConfig> {
    let Some(path) = path else {
        return Ok(FluxConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).wrap_err_with(|| format!("parsing config {}", path.display()))
}

/// Config file plus flag overrides, validated
pub fn resolve_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<FluxConfig> {
    let config = overrides.apply(load_config(path)?);
    Ok(config.validated()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_stage_specs() {
        assert_eq!("add:3".parse(), Ok(StageSpec::Add(3)));
        assert_eq!("MUL:-2".parse(), Ok(StageSpec::Mul(-2)));
        assert_eq!("fail: 4".parse(), Ok(StageSpec::Fail(4)));
        assert!("fail:0".parse::<StageSpec>().is_err());
        assert!("add".parse::<StageSpec>().is_err());
        assert!("pow:2".parse::<StageSpec>().is_err());
        assert!("add:x".parse::<StageSpec>().is_err());
    }

    #[test]
    fn test_stage_display_round_trips() {
        for spec in [StageSpec::Add(1), StageSpec::Mul(10), StageSpec::Fail(3)] {
            assert_eq!(spec.to_string().parse(), Ok(spec));
        }
    }

    #[test]
    fn test_stage_apply() {
        assert_eq!(StageSpec::Add(1).apply(2), Ok(3));
        assert_eq!(StageSpec::Mul(2).apply(4), Ok(8));
        assert_eq!(StageSpec::Fail(3).apply(4), Ok(4));
        assert!(StageSpec::Fail(3).apply(6).is_err());
        assert!(StageSpec::Mul(2).apply(i64::MAX).is_err());
    }

    #[test]
    fn test_fail_stage_handles_min_by_minus_one() {
        assert!(StageSpec::Fail(-1).apply(i64::MIN).is_err());
        assert_eq!(StageSpec::Fail(-2).apply(i64::MIN + 1), Ok(i64::MIN + 1));
    }

    #[test]
    fn test_overrides_layer_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"buffer_size": 8, "drop_policy": "drop_oldest"}}"#).unwrap();

        let overrides = ConfigOverrides {
            buffer_size: Some(16),
            max_events: Some(50),
            ..ConfigOverrides::default()
        };
        let config = resolve_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.buffer_size, 16);
        assert_eq!(config.drop_policy, DropPolicy::DropOldest);
        assert_eq!(config.max_events, Some(50));
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let overrides = ConfigOverrides {
            entropy_budget: Some(-1.0),
            ..ConfigOverrides::default()
        };
        let err = resolve_config(None, &overrides).unwrap_err();
        assert!(err.to_string().contains("entropy_budget"), "{err}");
    }

    #[test]
    fn test_unknown_config_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"buffer": 8}}"#).unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
