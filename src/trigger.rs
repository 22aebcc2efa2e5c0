//! Rule-based trigger evaluation: regex + classification + cooldown.
//!
//! Rules are an owned collection with explicit mutation rather than a
//! module-level global. `evaluate` never blocks; the firing history ring
//! is purely for `statistics()`.

use std::collections::VecDeque;

use regex::Regex;

use crate::classifier::CommandType;
use crate::context::CommandRecord;
use crate::error::BadPatternError;

const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Error,
    Dangerous,
    Pattern,
    Manual,
    Periodic,
    Context,
}

/// A single named rule. If `kind` is `Pattern` or `Dangerous`, `regex` is
/// always present (enforced by the constructors below).
pub struct Trigger {
    pub name: String,
    pub kind: TriggerKind,
    pub priority: u8,
    regex: Option<Regex>,
    cooldown_secs: u64,
    last_fired_unix_ms: u64,
    pub enabled: bool,
}

impl Trigger {
    pub fn error(name: impl Into<String>, priority: u8, cooldown_secs: u64) -> Self {
        Self {
            name: name.into(),
            kind: TriggerKind::Error,
            priority,
            regex: None,
            cooldown_secs,
            // A default `last_fired` of 0 makes the first fire always
            // eligible regardless of wall time.
            last_fired_unix_ms: 0,
            enabled: true,
        }
    }

    pub fn dangerous(
        name: impl Into<String>,
        priority: u8,
        cooldown_secs: u64,
        regex_source: &str,
    ) -> Result<Self, BadPatternError> {
        Self::with_pattern(
            name,
            TriggerKind::Dangerous,
            priority,
            cooldown_secs,
            Some(regex_source),
        )
    }

    pub fn pattern(
        name: impl Into<String>,
        priority: u8,
        cooldown_secs: u64,
        regex_source: &str,
    ) -> Result<Self, BadPatternError> {
        Self::with_pattern(
            name,
            TriggerKind::Pattern,
            priority,
            cooldown_secs,
            Some(regex_source),
        )
    }

    fn with_pattern(
        name: impl Into<String>,
        kind: TriggerKind,
        priority: u8,
        cooldown_secs: u64,
        regex_source: Option<&str>,
    ) -> Result<Self, BadPatternError> {
        let regex = match regex_source {
            Some(source) => Some(Regex::new(&format!("(?is){source}")).map_err(|e| {
                BadPatternError {
                    pattern: source.to_string(),
                    source: e,
                }
            })?),
            None => None,
        };
        Ok(Self {
            name: name.into(),
            kind,
            priority,
            regex,
            cooldown_secs,
            last_fired_unix_ms: 0,
            enabled: true,
        })
    }

    /// Eligible iff `(now - last_fired) >= cooldown_secs`. `cooldown == 0`
    /// means always-eligible.
    fn is_cooldown_eligible(&self, now_unix_ms: u64) -> bool {
        if self.cooldown_secs == 0 {
            return true;
        }
        let elapsed_secs = now_unix_ms.saturating_sub(self.last_fired_unix_ms) / 1000;
        elapsed_secs >= self.cooldown_secs
    }

    fn matches_text(&self, haystack: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(haystack),
            None => false,
        }
    }
}

/// A trigger that fired, with the timestamp it fired at (for history).
pub struct FiredTrigger {
    pub name: String,
    pub kind: TriggerKind,
    pub priority: u8,
    pub fired_at_unix_ms: u64,
}

pub struct TriggerStatistics {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub fires_recorded: usize,
}

/// Holds the ordered rule set and dispatches `evaluate`/`evaluate_manual`.
pub struct TriggerEngine {
    rules: Vec<Trigger>,
    history: VecDeque<FiredTrigger>,
}

impl Default for TriggerEngine {
    fn default() -> Self {
        let mut engine = Self {
            rules: Vec::new(),
            history: VecDeque::new(),
        };
        engine.install_default_rules();
        engine
    }
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn install_default_rules(&mut self) {
        self.rules.push(Trigger::error("command_error", 10, 0));
        self.rules.push(
            Trigger::dangerous(
                "dangerous_command",
                9,
                0,
                r"rm -rf|sudo rm|mkfs|dd if=|> */dev/|format",
            )
            .expect("valid default rule"),
        );
        self.rules.push(
            Trigger::pattern(
                "error_pattern_permission_denied",
                8,
                30,
                r"permission denied|access denied",
            )
            .expect("valid default rule"),
        );
        self.rules.push(
            Trigger::pattern(
                "error_pattern_file_not_found_errors",
                8,
                30,
                r"no such file or directory|command not found",
            )
            .expect("valid default rule"),
        );
        self.rules.push(
            Trigger::pattern(
                "error_pattern_network_errors",
                7,
                30,
                r"connection refused|network unreachable|timeout",
            )
            .expect("valid default rule"),
        );
        self.rules.push(
            Trigger::pattern(
                "error_pattern_syntax_errors",
                6,
                30,
                r"syntax error|parse error|invalid syntax",
            )
            .expect("valid default rule"),
        );
        self.rules.push(
            Trigger::pattern(
                "long_running_command",
                3,
                60,
                r"^(npm install|pip install|cargo build|make)\b",
            )
            .expect("valid default rule"),
        );
        self.sort_by_priority_desc();
    }

    fn sort_by_priority_desc(&mut self) {
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn add_rule(&mut self, rule: Trigger) {
        self.rules.push(rule);
        self.sort_by_priority_desc();
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.name == name) {
            rule.enabled = enabled;
        }
    }

    /// Evaluate `record` against all enabled, cooldown-eligible rules.
    /// Updates each fired rule's `last_fired` timestamp and records it
    /// into the bounded history ring. Result is sorted by priority
    /// descending.
    pub fn evaluate(&mut self, record: &CommandRecord, now_unix_ms: u64) -> Vec<FiredTrigger> {
        let combined = format!("{}\n{}\n{}", record.command, record.output, record.error);
        let mut fired_names: Vec<(String, TriggerKind, u8)> = Vec::new();

        for rule in self.rules.iter() {
            if !rule.enabled || !rule.is_cooldown_eligible(now_unix_ms) {
                continue;
            }
            let should_fire = match rule.kind {
                TriggerKind::Error => record.exit_code != 0,
                TriggerKind::Dangerous => {
                    record.command_type == CommandType::Dangerous
                        && rule.matches_text(&record.command)
                }
                TriggerKind::Pattern => rule.matches_text(&combined),
                _ => false,
            };
            if should_fire {
                fired_names.push((rule.name.clone(), rule.kind, rule.priority));
            }
        }

        for (name, _, _) in &fired_names {
            if let Some(rule) = self.rules.iter_mut().find(|r| &r.name == name) {
                rule.last_fired_unix_ms = now_unix_ms;
            }
        }

        let mut fired: Vec<FiredTrigger> = fired_names
            .into_iter()
            .map(|(name, kind, priority)| FiredTrigger {
                name,
                kind,
                priority,
                fired_at_unix_ms: now_unix_ms,
            })
            .collect();
        fired.sort_by(|a, b| b.priority.cmp(&a.priority));

        for f in &fired {
            self.record_fire(f.name.clone(), f.kind, f.priority, now_unix_ms);
        }
        fired
    }

    /// A single synthetic `manual` rule at priority 10, used for user-
    /// initiated requests outside the command pipeline.
    pub fn evaluate_manual(&mut self, _text: &str, now_unix_ms: u64) -> Vec<FiredTrigger> {
        let fired = FiredTrigger {
            name: "manual_request".to_string(),
            kind: TriggerKind::Manual,
            priority: 10,
            fired_at_unix_ms: now_unix_ms,
        };
        self.record_fire(fired.name.clone(), fired.kind, fired.priority, now_unix_ms);
        vec![fired]
    }

    fn record_fire(&mut self, name: String, kind: TriggerKind, priority: u8, now_unix_ms: u64) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(FiredTrigger {
            name,
            kind,
            priority,
            fired_at_unix_ms: now_unix_ms,
        });
    }

    pub fn statistics(&self) -> TriggerStatistics {
        TriggerStatistics {
            total_rules: self.rules.len(),
            enabled_rules: self.rules.iter().filter(|r| r.enabled).count(),
            fires_recorded: self.history.len(),
        }
    }
}
