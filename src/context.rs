//! Data model and bounded context window for completed commands.
//!
//! `CommandRecord` replaces a dataclass-with-`__post_init__` pattern:
//! construction computes the derived relevance score once, and the value is
//! immutable afterward — no hidden mutation, no live rescoring.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::classifier::{classify_command, relevance_score, CommandType, RelevanceInputs};

const OUTPUT_EXPORT_TRUNCATE: usize = 500;
const ERROR_EXPORT_TRUNCATE: usize = 200;

/// One completed command execution. Immutable after construction; the pair
/// (command, start timestamp) is its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    pub directory: String,
    pub timestamp_unix_ms: u64,
    pub duration_secs: f64,
    pub exit_code: i32,
    pub output: String,
    pub error: String,
    pub command_type: CommandType,
    pub relevance: f64,
}

impl CommandRecord {
    /// Construct a record, computing its classification and relevance score
    /// from the raw fields. `now_unix_ms` is the record's own timestamp; age
    /// for the relevance formula is computed relative to `reference_unix_ms`
    /// (normally "now" at construction time; the age boost is computed once
    /// and never decays further).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        command: impl Into<String>,
        directory: impl Into<String>,
        timestamp_unix_ms: u64,
        reference_unix_ms: u64,
        duration_secs: f64,
        exit_code: i32,
        output: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let command = command.into();
        let output = output.into();
        let error = error.into();
        let command_type = classify_command(&command);
        let age_minutes = reference_unix_ms
            .saturating_sub(timestamp_unix_ms) as f64
            / 60_000.0;
        let relevance = relevance_score(&RelevanceInputs {
            command_type,
            exit_code,
            age_minutes,
            output_len: output.len(),
        });
        Self {
            command,
            directory: directory.into(),
            timestamp_unix_ms,
            duration_secs,
            exit_code,
            output,
            error,
            command_type,
            relevance,
        }
    }

    pub fn is_error(&self) -> bool {
        self.exit_code != 0
    }

    /// Approximate token cost used by [`ContextWindow::relevant`]'s greedy
    /// budgeting: `(|command| + |output| + |error|) / 4`.
    fn token_cost(&self) -> usize {
        (self.command.len() + self.output.len() + self.error.len()) / 4
    }

    fn identity(&self) -> (&str, u64) {
        (&self.command, self.timestamp_unix_ms)
    }

    /// Serializable export form, truncating output/error per the on-disk
    /// history export format.
    pub fn to_export(&self) -> ExportedCommandRecord {
        ExportedCommandRecord {
            command: self.command.clone(),
            timestamp_unix_ms: self.timestamp_unix_ms,
            directory: self.directory.clone(),
            exit_code: self.exit_code,
            output: truncate_chars(&self.output, OUTPUT_EXPORT_TRUNCATE),
            error: truncate_chars(&self.error, ERROR_EXPORT_TRUNCATE),
            duration_secs: self.duration_secs,
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// JSON export shape for optional on-disk history persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedCommandRecord {
    pub command: String,
    pub timestamp_unix_ms: u64,
    pub directory: String,
    pub exit_code: i32,
    pub output: String,
    pub error: String,
    pub duration_secs: f64,
}

/// Mutable, process-wide-for-the-session state.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub current_directory: String,
    pub shell: String,
    pub git_branch: Option<String>,
    pub git_dirty: Option<bool>,
}

impl SessionContext {
    pub fn new(current_directory: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            current_directory: current_directory.into(),
            shell: shell.into(),
            git_branch: None,
            git_dirty: None,
        }
    }
}

/// Aggregate counts and distributions over a window of records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextStatistics {
    pub total_commands: usize,
    pub error_count: usize,
    pub error_rate: f64,
    pub type_distribution: HashMap<CommandType, usize>,
    pub average_score: f64,
}

/// Bounded deque of [`CommandRecord`] plus an "important" side-list of
/// high-relevance records.
pub struct ContextWindow {
    capacity: usize,
    important_capacity: usize,
    records: VecDeque<CommandRecord>,
    important: VecDeque<CommandRecord>,
    session: SessionContext,
}

const IMPORTANCE_THRESHOLD: f64 = 0.8;

impl ContextWindow {
    pub fn new(capacity: usize, important_capacity: usize, session: SessionContext) -> Self {
        Self {
            capacity: capacity.max(1),
            important_capacity: important_capacity.max(1),
            records: VecDeque::new(),
            important: VecDeque::new(),
            session,
        }
    }

    /// Append `record`. Drops the oldest record when over capacity; mirrors
    /// into the important side-list when relevance crosses the threshold,
    /// dropping the side-list's oldest entry when it overflows.
    pub fn add(&mut self, record: CommandRecord) {
        if record.relevance >= IMPORTANCE_THRESHOLD {
            if self.important.len() >= self.important_capacity {
                self.important.pop_front();
            }
            self.important.push_back(record.clone());
        }
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Union of the main deque and the important side-list, deduplicated by
    /// (command, timestamp) identity, sorted descending by score, greedily
    /// budgeted to `max_tokens`, then resorted ascending by timestamp. Pure.
    pub fn relevant(&self, max_tokens: usize) -> Vec<CommandRecord> {
        let mut seen = std::collections::HashSet::new();
        let mut pool: Vec<&CommandRecord> = Vec::new();
        for record in self.records.iter().chain(self.important.iter()) {
            if seen.insert(record.identity()) {
                pool.push(record);
            }
        }
        pool.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap());

        let mut budget = max_tokens;
        let mut selected: Vec<CommandRecord> = Vec::new();
        for record in pool {
            let cost = record.token_cost();
            if cost > budget {
                continue;
            }
            selected.push(record.clone());
            budget = budget.saturating_sub(cost);
        }
        selected.sort_by_key(|r| r.timestamp_unix_ms);
        selected
    }

    /// Most recent `limit` records with a non-zero exit code.
    pub fn errors(&self, limit: usize) -> Vec<CommandRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.is_error())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent `limit` records of a given type.
    pub fn by_type(&self, command_type: CommandType, limit: usize) -> Vec<CommandRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.command_type == command_type)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> ContextStatistics {
        let total = self.records.len();
        let errors = self.records.iter().filter(|r| r.is_error()).count();
        let mut distribution: HashMap<CommandType, usize> = HashMap::new();
        let mut score_sum = 0.0;
        for record in &self.records {
            *distribution.entry(record.command_type).or_insert(0) += 1;
            score_sum += record.relevance;
        }
        ContextStatistics {
            total_commands: total,
            error_count: errors,
            error_rate: if total == 0 {
                0.0
            } else {
                errors as f64 / total as f64
            },
            type_distribution: distribution,
            average_score: if total == 0 {
                0.0
            } else {
                score_sum / total as f64
            },
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Field-wise patch of the session context.
    pub fn update_session(
        &mut self,
        current_directory: Option<String>,
        git_branch: Option<String>,
        git_dirty: Option<bool>,
    ) {
        if let Some(dir) = current_directory {
            self.session.current_directory = dir;
        }
        if git_branch.is_some() {
            self.session.git_branch = git_branch;
        }
        if git_dirty.is_some() {
            self.session.git_dirty = git_dirty;
        }
    }
}

/// Parse a successful `git status` invocation's output into a (branch,
/// dirty) pair. Branch comes from the first `On branch X` line; dirty is
/// true if any `modified:`/`new file:`/`deleted:` marker is present.
/// Returns `None` for anything else (non-`git status` commands, or output
/// that doesn't contain a recognizable branch line).
pub fn parse_git_status(command: &str, output: &str) -> Option<(String, bool)> {
    if command.trim().to_lowercase() != "git status" {
        return None;
    }
    let branch = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("On branch "))
        .map(str::trim)?;
    let dirty = ["modified:", "new file:", "deleted:"]
        .iter()
        .any(|marker| output.contains(marker));
    Some((branch.to_string(), dirty))
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(command: &str, ts: u64, exit_code: i32, output: &str) -> CommandRecord {
        CommandRecord::new(command, "/tmp", ts, ts, 0.1, exit_code, output, "")
    }

    #[test]
    fn command_record_round_trips_through_export_modulo_truncation() {
        let original = record("echo hi", 1_000, 0, "hi");
        let exported = original.to_export();
        assert_eq!(exported.command, original.command);
        assert_eq!(exported.exit_code, original.exit_code);
        assert_eq!(exported.output, original.output);
    }

    #[test]
    fn export_truncates_long_output_and_error() {
        let long_output = "a".repeat(600);
        let record = CommandRecord::new("cmd", "/tmp", 0, 0, 0.0, 1, long_output, "b".repeat(300));
        let exported = record.to_export();
        assert_eq!(exported.output.chars().count(), 500);
        assert_eq!(exported.error.chars().count(), 200);
    }

    #[test]
    fn important_side_list_holds_high_relevance_records_past_main_window() {
        let mut window = ContextWindow::new(2, 2, SessionContext::default());
        window.add(record("rm -rf /", 1, 1, ""));
        window.add(record("cd x", 2, 0, ""));
        window.add(record("cd y", 3, 0, ""));
        // main window capacity 2 dropped the oldest, but the dangerous
        // command should still be present via the important side-list.
        let relevant = window.relevant(10_000);
        assert!(relevant.iter().any(|r| r.command == "rm -rf /"));
    }

    #[test]
    fn relevant_respects_token_budget_and_is_ascending_by_timestamp() {
        let mut window = ContextWindow::new(10, 10, SessionContext::default());
        window.add(record("a", 3, 0, &"x".repeat(400)));
        window.add(record("b", 1, 0, &"x".repeat(400)));
        window.add(record("c", 2, 0, &"x".repeat(400)));
        let relevant = window.relevant(50);
        let timestamps: Vec<u64> = relevant.iter().map(|r| r.timestamp_unix_ms).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
        let total_cost: usize = relevant
            .iter()
            .map(|r| (r.command.len() + r.output.len() + r.error.len()) / 4)
            .sum();
        assert!(total_cost <= 50);
    }

    #[test]
    fn relevant_excludes_even_the_first_record_when_it_exceeds_budget() {
        let mut window = ContextWindow::new(10, 10, SessionContext::default());
        window.add(record("a", 3, 0, &"x".repeat(400)));
        window.add(record("b", 1, 0, &"x".repeat(400)));
        window.add(record("c", 2, 0, &"x".repeat(400)));
        let relevant = window.relevant(50);
        assert!(relevant.is_empty());
    }

    #[test]
    fn errors_returns_most_recent_nonzero_exit_first() {
        let mut window = ContextWindow::new(10, 10, SessionContext::default());
        window.add(record("a", 1, 0, ""));
        window.add(record("b", 2, 1, ""));
        window.add(record("c", 3, 2, ""));
        let errors = window.errors(1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].command, "c");
    }

    #[test]
    fn statistics_reports_error_rate_and_average_score() {
        let mut window = ContextWindow::new(10, 10, SessionContext::default());
        window.add(record("a", 1, 0, ""));
        window.add(record("b", 2, 1, ""));
        let stats = window.statistics();
        assert_eq!(stats.total_commands, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_git_status_extracts_branch_and_dirty_flag() {
        let output = "On branch main\nChanges not staged for commit:\n  (use \"git add <file>...\" to update what will be committed)\n\tmodified:   src/lib.rs\n";
        let (branch, dirty) = parse_git_status("git status", output).expect("should parse");
        assert_eq!(branch, "main");
        assert!(dirty);
    }

    #[test]
    fn parse_git_status_clean_tree_is_not_dirty() {
        let output = "On branch main\nnothing to commit, working tree clean\n";
        let (branch, dirty) = parse_git_status("git status", output).expect("should parse");
        assert_eq!(branch, "main");
        assert!(!dirty);
    }

    #[test]
    fn parse_git_status_ignores_other_commands() {
        assert_eq!(parse_git_status("ls", "On branch main"), None);
    }

    #[test]
    fn update_session_is_field_wise() {
        let mut window = ContextWindow::new(4, 4, SessionContext::new("/start", "bash"));
        window.update_session(Some("/next".to_string()), None, None);
        assert_eq!(window.session().current_directory, "/next");
        assert_eq!(window.session().shell, "bash");
        window.update_session(None, Some("main".to_string()), Some(true));
        assert_eq!(window.session().git_branch.as_deref(), Some("main"));
        assert_eq!(window.session().git_dirty, Some(true));
    }
}
