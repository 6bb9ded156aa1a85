//! Ordered pattern table used to classify model log lines.

use crate::config::LogActionConfig;

/// What a matching line means. Declaration order is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    /// The model process failed.
    Error,
    /// The model finished loading.
    Load,
    /// Worth forwarding, no state change.
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRule {
    pub kind: RuleKind,
    /// Substring searched for in each line.
    pub pattern: String,
}

/// Result of classifying one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMatch<'a> {
    pub kind: RuleKind,
    pub pattern: &'a str,
}

/// Rule table with error > load > info precedence.
#[derive(Debug, Clone, Default)]
pub struct LogRules {
    rules: Vec<LogRule>,
}

impl LogRules {
    pub fn new<S: AsRef<str>>(on_load: &[S], on_error: &[S], on_info: &[S]) -> Self {
        let mut rules = Vec::new();
        for (kind, patterns) in [
            (RuleKind::Error, on_error),
            (RuleKind::Load, on_load),
            (RuleKind::Info, on_info),
        ] {
            rules.extend(
                patterns
                    .iter()
                    .map(|p| p.as_ref())
                    // An empty pattern would match every line.
                    .filter(|p| !p.is_empty())
                    .map(|p| LogRule {
                        kind,
                        pattern: p.to_string(),
                    }),
            );
        }
        // Stable: patterns keep their configured order within a kind.
        rules.sort_by_key(|r| r.kind);
        Self { rules }
    }

    pub fn from_config(config: &LogActionConfig) -> Self {
        Self::new(
            config.on_load.as_slice(),
            config.on_error.as_slice(),
            config.on_info.as_slice(),
        )
    }

    /// First rule matching `line`, in precedence order.
    pub fn classify(&self, line: &str) -> Option<LogMatch<'_>> {
        self.rules
            .iter()
            .find(|rule| line.contains(rule.pattern.as_str()))
            .map(|rule| LogMatch {
                kind: rule.kind,
                pattern: &rule.pattern,
            })
    }

    pub fn rules(&self) -> &[LogRule] {
        &self.rules
    }
}
