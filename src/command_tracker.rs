//! Command boundary detection: turns a stream of PTY output chunks into
//! completed [`CommandRecord`]s.
//!
//! Tracks prompt-line boundaries the way a `TerminalManager`'s
//! `_handle_output`/`_is_prompt_line`/`_end_command` cycle does, reworked as an
//! explicit two-state machine instead of a bag of mutable fields on one
//! object.

use regex::Regex;

use crate::context::CommandRecord;

/// A shell's family of prompt-line patterns, overridable per shell so a
/// profile with an unusual prompt format (a custom `PS1`, a non-POSIX
/// shell) isn't stuck matching the generic `$`/`#`/`>`/`%` set.
pub trait PromptProfile: Send {
    fn prompt_patterns(&self) -> &[Regex];
}

/// Matches the trailing `$`, `#`, `>`, or `%` prompt terminators common to
/// `sh`, `bash`, `zsh`, and most POSIX-ish shells.
pub struct GenericPromptProfile {
    patterns: Vec<Regex>,
}

impl Default for GenericPromptProfile {
    fn default() -> Self {
        Self {
            patterns: [r".*[$#]\s*$", r".*[>]\s*$", r".*[%]\s*$"]
                .iter()
                .map(|p| Regex::new(p).expect("valid prompt pattern"))
                .collect(),
        }
    }
}

impl PromptProfile for GenericPromptProfile {
    fn prompt_patterns(&self) -> &[Regex] {
        &self.patterns
    }
}

/// A command in flight: its text, start time, and accumulated raw output.
struct RunningCommand {
    command: String,
    started_unix_ms: u64,
    output: String,
}

enum State {
    Idle,
    Running(RunningCommand),
}

/// Tracks exactly one in-flight command at a time against a stream of
/// decoded PTY output chunks, emitting a [`CommandRecord`] once the shell's
/// prompt reappears or the underlying process reports an exit code.
pub struct CommandTracker {
    state: State,
    directory: String,
    prompt_profile: Box<dyn PromptProfile>,
}

impl CommandTracker {
    pub fn new(directory: impl Into<String>) -> Self {
        Self::with_prompt_profile(directory, GenericPromptProfile::default())
    }

    /// Build a tracker against a specific shell's prompt-line profile,
    /// overriding the generic `$`/`#`/`>`/`%` pattern set.
    pub fn with_prompt_profile(
        directory: impl Into<String>,
        prompt_profile: impl PromptProfile + 'static,
    ) -> Self {
        Self {
            state: State::Idle,
            directory: directory.into(),
            prompt_profile: Box::new(prompt_profile),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    pub fn current_command(&self) -> Option<&str> {
        match &self.state {
            State::Running(running) => Some(&running.command),
            State::Idle => None,
        }
    }

    /// A command was submitted (user pressed Enter on a non-blank line).
    /// No-op if a command is already running.
    pub fn on_submit(&mut self, command: &str, now_unix_ms: u64) {
        let trimmed = command.trim();
        if trimmed.is_empty() || self.is_running() {
            return;
        }
        self.state = State::Running(RunningCommand {
            command: trimmed.to_string(),
            started_unix_ms: now_unix_ms,
            output: String::new(),
        });
    }

    /// Feed a decoded chunk of PTY output. Returns a completed record if
    /// this chunk's trailing line looks like a shell prompt, which this
    /// tracker treats as a (success-assumed) command boundary.
    pub fn on_output(&mut self, text: &str, now_unix_ms: u64) -> Option<CommandRecord> {
        let running = match &mut self.state {
            State::Running(running) => running,
            State::Idle => return None,
        };
        running.output.push_str(text);

        if self.is_prompt_line(text) {
            return self.finish(0, now_unix_ms);
        }
        None
    }

    /// The underlying process reported an exit code directly (no prompt
    /// line was ever seen, e.g. the shell itself exited).
    pub fn on_exit(&mut self, exit_code: i32, now_unix_ms: u64) -> Option<CommandRecord> {
        self.finish(exit_code, now_unix_ms)
    }

    /// Abandon the in-flight command without emitting a record.
    pub fn cancel(&mut self) {
        self.state = State::Idle;
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn set_directory(&mut self, directory: impl Into<String>) {
        self.directory = directory.into();
    }

    fn finish(&mut self, exit_code: i32, now_unix_ms: u64) -> Option<CommandRecord> {
        let running = match std::mem::replace(&mut self.state, State::Idle) {
            State::Running(running) => running,
            State::Idle => return None,
        };

        let output = running.output.trim().to_string();
        let duration_secs =
            now_unix_ms.saturating_sub(running.started_unix_ms) as f64 / 1000.0;
        let error = if exit_code != 0 {
            tail_lines(&output, 3)
        } else {
            String::new()
        };

        Some(CommandRecord::new(
            &running.command,
            &self.directory,
            running.started_unix_ms,
            now_unix_ms,
            duration_secs,
            exit_code,
            &output,
            &error,
        ))
    }

    fn is_prompt_line(&self, text: &str) -> bool {
        let trimmed = text.trim();
        let Some(last_line) = trimmed.lines().last() else {
            return false;
        };
        let last_line = last_line.trim();
        if last_line.is_empty() {
            return false;
        }
        self.prompt_profile
            .prompt_patterns()
            .iter()
            .any(|pattern| pattern.is_match(last_line))
    }
}

/// Join up to `count` trailing non-empty lines of `text` with `\n`, used
/// to capture a short error tail when a command exits non-zero.
fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= 1 {
        return String::new();
    }
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_tracker_ignores_output() {
        let mut tracker = CommandTracker::new("/tmp");
        assert!(tracker.on_output("whatever\n$ ", 0).is_none());
    }

    #[test]
    fn submit_then_prompt_reappearance_emits_success_record() {
        let mut tracker = CommandTracker::new("/tmp");
        tracker.on_submit("ls", 1_000);
        assert!(tracker.is_running());

        let record = tracker
            .on_output("file1.txt\nfile2.txt\nuser@host:/tmp$ ", 1_500)
            .expect("prompt line should close out the command");
        assert_eq!(record.command, "ls");
        assert_eq!(record.exit_code, 0);
        assert!(record.output.contains("file1.txt"));
        assert!(!tracker.is_running());
    }

    #[test]
    fn on_exit_closes_running_command_with_error_tail() {
        let mut tracker = CommandTracker::new("/tmp");
        tracker.on_submit("cat missing", 0);
        tracker.on_output("cat: missing: No such file or directory\n", 10);
        let record = tracker.on_exit(1, 20).expect("exit should close the command");
        assert_eq!(record.exit_code, 1);
        assert!(record.error.contains("No such file or directory"));
    }

    #[test]
    fn blank_or_whitespace_submit_is_ignored() {
        let mut tracker = CommandTracker::new("/tmp");
        tracker.on_submit("   ", 0);
        assert!(!tracker.is_running());
    }

    #[test]
    fn second_submit_while_running_is_a_no_op() {
        let mut tracker = CommandTracker::new("/tmp");
        tracker.on_submit("first", 0);
        tracker.on_submit("second", 5);
        assert_eq!(tracker.current_command(), Some("first"));
    }

    #[test]
    fn cancel_drops_in_flight_command_without_emitting() {
        let mut tracker = CommandTracker::new("/tmp");
        tracker.on_submit("sleep 100", 0);
        tracker.cancel();
        assert!(!tracker.is_running());
    }

    #[test]
    fn directory_can_be_updated_after_cd() {
        let mut tracker = CommandTracker::new("/tmp");
        tracker.set_directory("/tmp/sub");
        assert_eq!(tracker.directory(), "/tmp/sub");
    }

    #[test]
    fn single_line_output_on_error_yields_no_tail() {
        assert_eq!(tail_lines("only one line", 3), "");
    }

    #[test]
    fn tail_lines_caps_at_requested_count() {
        let text = "a\nb\nc\nd\ne";
        assert_eq!(tail_lines(text, 3), "c\nd\ne");
    }

    struct FishPromptProfile {
        patterns: Vec<Regex>,
    }

    impl FishPromptProfile {
        fn new() -> Self {
            Self {
                patterns: vec![Regex::new(r".*>\s*$").expect("valid pattern")],
            }
        }
    }

    impl PromptProfile for FishPromptProfile {
        fn prompt_patterns(&self) -> &[Regex] {
            &self.patterns
        }
    }

    #[test]
    fn custom_prompt_profile_overrides_the_generic_pattern_set() {
        let mut tracker = CommandTracker::with_prompt_profile("/tmp", FishPromptProfile::new());
        tracker.on_submit("ls", 0);
        assert!(tracker.on_output("file1.txt\nuser@host /tmp> ", 100).is_some());
    }

    #[test]
    fn custom_prompt_profile_does_not_match_patterns_it_does_not_declare() {
        let mut tracker = CommandTracker::with_prompt_profile("/tmp", FishPromptProfile::new());
        tracker.on_submit("ls", 0);
        assert!(tracker.on_output("file1.txt\nuser@host:/tmp$ ", 100).is_none());
    }
}
