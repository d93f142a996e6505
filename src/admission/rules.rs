//! Rate-limit rules and tiered resolution.
//!
//! Rules form a two-level table: path pattern, then caller class, then rule.
//! A required `"default"` entry covers every caller class, which is what
//! makes [`RuleTable::resolve`] total. Resolution order is exact match,
//! longest path prefix, then default, so operators can set blanket ceilings
//! and carve out stricter or looser exceptions per endpoint.
//!
//! Tables are built once at startup (from code via [`RuleTableBuilder`] or
//! from configuration via [`RuleTable::from_json`]) and never mutated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Table key of the blanket fallback entry.
pub const DEFAULT_PATTERN: &str = "default";

/// Authentication tier a request presents. Supplied per-request by the auth
/// layer; this module only keys rules off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerClass {
    Authenticated,
    ApiKey,
    Anonymous,
}

impl CallerClass {
    pub const ALL: [CallerClass; 3] =
        [CallerClass::Authenticated, CallerClass::ApiKey, CallerClass::Anonymous];

    pub fn as_str(self) -> &'static str {
        match self {
            CallerClass::Authenticated => "authenticated",
            CallerClass::ApiKey => "api_key",
            CallerClass::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for CallerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-window request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub max: u32,
    /// Window length.
    #[serde(with = "window_secs")]
    pub window: Duration,
    /// Requests allowed within the 60-second burst sub-window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
}

impl RateLimitRule {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window, burst: None }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }
}

/// `window` travels as whole seconds in configuration.
mod window_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(window.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Errors detected while building or parsing a rule table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleTableError {
    #[error("failed to parse rule table: {0}")]
    Parse(String),
    #[error("rule table has no \"default\" entry")]
    MissingDefault,
    #[error("default entry is missing a rule for caller class {0}")]
    IncompleteDefault(CallerClass),
    #[error("rule for {pattern:?}/{class} has max = 0")]
    ZeroMax { pattern: String, class: CallerClass },
    #[error("rule for {pattern:?}/{class} has an empty window")]
    ZeroWindow { pattern: String, class: CallerClass },
    #[error("rule for {pattern:?}/{class} has burst = 0")]
    ZeroBurst { pattern: String, class: CallerClass },
}

/// The static rule table. Read-only after construction, so it needs no
/// synchronization when shared across tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Entries", into = "Entries")]
pub struct RuleTable {
    entries: Entries,
}

type Entries = HashMap<String, HashMap<CallerClass, RateLimitRule>>;

impl TryFrom<Entries> for RuleTable {
    type Error = RuleTableError;

    fn try_from(entries: Entries) -> Result<Self, Self::Error> {
        validate(&entries)?;
        Ok(Self { entries })
    }
}

impl From<RuleTable> for Entries {
    fn from(table: RuleTable) -> Entries {
        table.entries
    }
}

impl RuleTable {
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder::default()
    }

    /// Parse and validate a JSON rule document:
    /// `{ "<pattern>": { "<caller class>": { "max": .., "window": .., "burst": .. } } }`.
    pub fn from_json(json: &str) -> Result<Self, RuleTableError> {
        let entries: Entries =
            serde_json::from_str(json).map_err(|e| RuleTableError::Parse(e.to_string()))?;
        Self::try_from(entries)
    }

    /// Resolve the applicable rule for a path and caller class.
    ///
    /// Exact path entry first, then the longest path prefix (the `"default"`
    /// key never participates in prefix matching), then the default entry.
    /// Construction guarantees the default entry covers every class, so
    /// resolution never fails.
    pub fn resolve(&self, path: &str, class: CallerClass) -> &RateLimitRule {
        if let Some(rule) = self.entries.get(path).and_then(|by_class| by_class.get(&class)) {
            return rule;
        }

        let mut best: Option<(&str, &RateLimitRule)> = None;
        for (pattern, by_class) in &self.entries {
            if pattern == DEFAULT_PATTERN || !path.starts_with(pattern.as_str()) {
                continue;
            }
            let Some(rule) = by_class.get(&class) else {
                continue;
            };
            if best.map_or(true, |(longest, _)| pattern.len() > longest.len()) {
                best = Some((pattern, rule));
            }
        }
        if let Some((_, rule)) = best {
            return rule;
        }

        // Present for every class; checked at construction.
        &self.entries[DEFAULT_PATTERN][&class]
    }
}

fn validate(entries: &Entries) -> Result<(), RuleTableError> {
    let defaults = entries.get(DEFAULT_PATTERN).ok_or(RuleTableError::MissingDefault)?;
    for class in CallerClass::ALL {
        if !defaults.contains_key(&class) {
            return Err(RuleTableError::IncompleteDefault(class));
        }
    }

    for (pattern, by_class) in entries {
        for (class, rule) in by_class {
            if rule.max == 0 {
                return Err(RuleTableError::ZeroMax { pattern: pattern.clone(), class: *class });
            }
            if rule.window.is_zero() {
                return Err(RuleTableError::ZeroWindow {
                    pattern: pattern.clone(),
                    class: *class,
                });
            }
            if rule.burst == Some(0) {
                return Err(RuleTableError::ZeroBurst {
                    pattern: pattern.clone(),
                    class: *class,
                });
            }
        }
    }
    Ok(())
}

/// Builder for [`RuleTable`].
#[derive(Debug, Default)]
pub struct RuleTableBuilder {
    entries: Entries,
}

impl RuleTableBuilder {
    /// Add a rule for a path pattern and caller class.
    pub fn rule(
        mut self,
        pattern: impl Into<String>,
        class: CallerClass,
        rule: RateLimitRule,
    ) -> Self {
        self.entries.entry(pattern.into()).or_default().insert(class, rule);
        self
    }

    /// Add a fallback rule for one caller class.
    pub fn default_rule(self, class: CallerClass, rule: RateLimitRule) -> Self {
        self.rule(DEFAULT_PATTERN, class, rule)
    }

    /// Add the same fallback rule for every caller class.
    pub fn default_for_all(mut self, rule: RateLimitRule) -> Self {
        for class in CallerClass::ALL {
            self = self.default_rule(class, rule);
        }
        self
    }

    /// Validate and freeze the table.
    pub fn build(self) -> Result<RuleTable, RuleTableError> {
        RuleTable::try_from(self.entries)
    }
}
