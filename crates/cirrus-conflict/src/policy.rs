//! Policy engine for automatic conflict resolution
//!
//! Evaluates conflict rules from configuration to determine automatic resolution
//! strategies. Rules are matched using glob patterns in first-match-wins order.

use std::fmt;
use std::str::FromStr;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use cirrus_core::{
    config::{ConflictRule, ConflictsConfig},
    domain::{ConflictRecord, RemotePath, ResolutionOption},
};

use crate::error::ConflictError;

/// How a conflict is settled without asking the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoStrategy {
    /// Leave the item in conflict until the user decides
    #[default]
    Manual,
    KeepLocal,
    KeepRemote,
    KeepBoth,
    /// Keep whichever side was modified last; ties keep the remote side
    KeepNewer,
    /// Keep whichever side is bigger; ties keep the remote side
    KeepLarger,
}

impl AutoStrategy {
    /// The option this strategy picks for `record`
    ///
    /// Returns `None` for [`AutoStrategy::Manual`] and when the picked option
    /// is not offered by the record (e.g. keep-both on a type conflict).
    #[must_use]
    pub fn choose(&self, record: &ConflictRecord) -> Option<ResolutionOption> {
        let option = match self {
            AutoStrategy::Manual => return None,
            AutoStrategy::KeepLocal => ResolutionOption::KeepLocal,
            AutoStrategy::KeepRemote => ResolutionOption::KeepRemote,
            AutoStrategy::KeepBoth => ResolutionOption::KeepBoth,
            AutoStrategy::KeepNewer => {
                if record.local().modified_at > record.remote().modified_at {
                    ResolutionOption::KeepLocal
                } else {
                    ResolutionOption::KeepRemote
                }
            }
            AutoStrategy::KeepLarger => {
                if record.local().size > record.remote().size {
                    ResolutionOption::KeepLocal
                } else {
                    ResolutionOption::KeepRemote
                }
            }
        };
        record.offers(option).then_some(option)
    }
}

impl fmt::Display for AutoStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AutoStrategy::Manual => "manual",
            AutoStrategy::KeepLocal => "keep_local",
            AutoStrategy::KeepRemote => "keep_remote",
            AutoStrategy::KeepBoth => "keep_both",
            AutoStrategy::KeepNewer => "keep_newer",
            AutoStrategy::KeepLarger => "keep_larger",
        };
        f.write_str(name)
    }
}

impl FromStr for AutoStrategy {
    type Err = ConflictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_strategy(s).ok_or_else(|| ConflictError::InvalidStrategy(s.to_string()))
    }
}

/// Compile a rule into its matcher and strategy
fn compile_rule(rule: &ConflictRule) -> Result<(Pattern, AutoStrategy), ConflictError> {
    let pattern = Pattern::new(&rule.pattern).map_err(|e| ConflictError::InvalidPattern {
        pattern: rule.pattern.clone(),
        reason: e.to_string(),
    })?;
    Ok((pattern, rule.strategy.parse::<AutoStrategy>()?))
}

/// Engine that evaluates conflict resolution rules
pub struct PolicyEngine {
    rules: Vec<(Pattern, AutoStrategy)>,
    default_strategy: AutoStrategy,
}

impl PolicyEngine {
    /// Creates a PolicyEngine from the default strategy string and a list of rules
    ///
    /// Invalid rules are logged and skipped.
    pub fn new(default_strategy: &str, rules: &[ConflictRule]) -> Self {
        let default = default_strategy.parse::<AutoStrategy>().unwrap_or_else(|e| {
            warn!(error = %e, "Unknown default conflict strategy, using manual");
            AutoStrategy::Manual
        });

        let compiled_rules: Vec<(Pattern, AutoStrategy)> = rules
            .iter()
            .filter_map(|rule| match compile_rule(rule) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid conflict rule");
                    None
                }
            })
            .collect();

        debug!(
            rules_count = compiled_rules.len(),
            default = %default,
            "PolicyEngine initialized"
        );

        Self {
            rules: compiled_rules,
            default_strategy: default,
        }
    }

    pub fn from_config(config: &ConflictsConfig) -> Self {
        Self::new(&config.default_strategy, &config.rules)
    }

    /// Evaluates the policy for a logical path
    ///
    /// Patterns are matched against the path both with and without its
    /// leading `/`, so `Documents/**` and `/Documents/**` are equivalent.
    /// The first matching rule wins; without a match the default applies.
    pub fn evaluate(&self, path: &RemotePath) -> AutoStrategy {
        let absolute = path.as_str();
        let relative = absolute.trim_start_matches('/');

        for (pattern, strategy) in &self.rules {
            if pattern.matches(relative) || pattern.matches(absolute) {
                trace!(
                    path = %path,
                    pattern = %pattern,
                    strategy = %strategy,
                    "Conflict rule matched"
                );
                return *strategy;
            }
        }

        trace!(
            path = %path,
            default = %self.default_strategy,
            "No conflict rule matched, using default"
        );
        self.default_strategy
    }

    /// The option to apply automatically to `record`, if any
    pub fn auto_resolution(&self, record: &ConflictRecord) -> Option<ResolutionOption> {
        let strategy = self.evaluate(record.path());
        let option = strategy.choose(record);
        if option.is_none() && strategy != AutoStrategy::Manual {
            debug!(
                path = %record.path(),
                strategy = %strategy,
                conflict_type = %record.conflict_type(),
                "Strategy not applicable to this conflict, leaving it for the user"
            );
        }
        option
    }

    /// Returns the default resolution strategy
    pub fn default_strategy(&self) -> AutoStrategy {
        self.default_strategy
    }

    /// Returns the number of compiled rules
    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}

/// Parses a strategy string into an [`AutoStrategy`]
fn parse_strategy(s: &str) -> Option<AutoStrategy> {
    match s {
        "manual" => Some(AutoStrategy::Manual),
        "keep_local" => Some(AutoStrategy::KeepLocal),
        "keep_remote" => Some(AutoStrategy::KeepRemote),
        "keep_both" => Some(AutoStrategy::KeepBoth),
        "keep_newer" => Some(AutoStrategy::KeepNewer),
        "keep_larger" => Some(AutoStrategy::KeepLarger),
        _ => None,
    }
}
