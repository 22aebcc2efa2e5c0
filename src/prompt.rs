//! LLM prompt construction and response parsing.
//!
//! Grounded on `ai/prompts.py`'s `PromptTemplate` static methods, ported to
//! free functions over this crate's [`CommandRecord`]/[`SessionContext`]
//! types instead of a class namespace.

use crate::context::{CommandRecord, SessionContext};

/// A terminal command failed; ask for root cause, fixes, and prevention.
pub fn error_analysis_prompt(
    command: &str,
    error_output: &str,
    context: Option<&str>,
    recent: &[CommandRecord],
) -> String {
    let mut prompt = format!(
        "You are an expert terminal AI assistant. A user executed a command that failed with an error.\n\n\
         COMMAND: {command}\n\
         ERROR OUTPUT:\n{error_output}\n"
    );

    if let Some(context) = context {
        prompt.push_str(&format!("\nCONTEXT:\n{context}\n"));
    }

    push_recent_commands(&mut prompt, "RECENT COMMAND HISTORY", recent, 3);

    prompt.push_str(
        "\nPlease provide a helpful analysis with:\n\n\
         1. **Root Cause**: What exactly went wrong and why?\n\n\
         2. **Solutions**: Specific commands or steps to fix this issue\n\
         \u{20}  - Format each solution as: SUGGESTION: [specific command or action]\n\
         \u{20}  - Prioritize the most likely solutions first\n\n\
         3. **Prevention**: How to avoid this error in the future\n\
         \u{20}  - Format as: WARNING: [preventive advice]\n\n\
         4. **Context**: Any additional information that might be relevant\n\n\
         Keep your response concise, practical, and focused on actionable solutions. \
         Use clear, simple language.\n",
    );
    prompt
}

/// The user wants to accomplish something; suggest commands.
pub fn command_suggestion_prompt(
    intent: &str,
    session: &SessionContext,
    recent: &[CommandRecord],
) -> String {
    let mut prompt = format!(
        "You are an expert terminal AI assistant. A user wants to accomplish something in their terminal.\n\n\
         USER INTENT: {intent}\n\n\
         CURRENT CONTEXT:\n\
         - Directory: {}\n\
         - Shell: {}\n",
        session.current_directory, session.shell
    );

    push_git_status(&mut prompt, session);
    push_recent_commands(&mut prompt, "RECENT COMMANDS", recent, 5);

    prompt.push_str(
        "\nPlease suggest appropriate terminal commands to accomplish this goal:\n\n\
         1. **Primary Solutions**: Most direct ways to achieve the intent\n\
         \u{20}  - Format as: SUGGESTION: [command] - [brief explanation]\n\n\
         2. **Alternative Approaches**: Other ways to accomplish the same goal\n\
         \u{20}  - Format as: SUGGESTION: [command] - [brief explanation]\n\n\
         3. **Prerequisites**: Any setup or dependencies needed\n\
         \u{20}  - Format as: WARNING: [requirement or consideration]\n\n\
         4. **Safety Notes**: Important warnings or considerations\n\
         \u{20}  - Format as: WARNING: [safety advice]\n\n\
         Focus on commonly-used, safe commands. Provide specific examples rather than generic advice.\n",
    );
    prompt
}

/// A command succeeded; surface insights about its output.
pub fn output_analysis_prompt(command: &str, output: &str, session: &SessionContext) -> String {
    let mut prompt = format!(
        "You are an expert terminal AI assistant. A user executed a command successfully and you \
         should provide insights about the results.\n\n\
         COMMAND: {command}\n\
         OUTPUT:\n{output}\n\n\
         CONTEXT:\n\
         - Directory: {}\n\
         - Shell: {}\n",
        session.current_directory, session.shell
    );

    push_git_status(&mut prompt, session);

    prompt.push_str(
        "\nPlease provide helpful insights about this command and its output:\n\n\
         1. **Summary**: Brief explanation of what the command accomplished\n\n\
         2. **Key Insights**: Important information from the output\n\
         \u{20}  - Highlight any notable results, patterns, or findings\n\n\
         3. **Next Steps**: Useful follow-up commands or actions\n\
         \u{20}  - Format as: SUGGESTION: [command] - [why it's useful]\n\n\
         4. **Observations**: Any potential issues or things to note\n\
         \u{20}  - Format as: WARNING: [observation or concern]\n\n\
         Keep your response concise and focus on actionable insights. Don't repeat obvious information.\n",
    );
    prompt
}

/// A dangerous command is about to run; warn before it does.
pub fn dangerous_command_warning_prompt(command: &str, session: &SessionContext) -> String {
    format!(
        "You are a terminal safety AI assistant. A user is about to execute a potentially \
         dangerous command.\n\n\
         DANGEROUS COMMAND: {command}\n\n\
         CONTEXT:\n\
         - Directory: {}\n\
         - Shell: {}\n\n\
         Please provide a safety analysis:\n\n\
         1. **Risk Assessment**: What could go wrong with this command?\n\
         \u{20}  - Format as: WARNING: [specific risk]\n\n\
         2. **Impact**: What would happen if something goes wrong?\n\
         \u{20}  - Be specific about potential consequences\n\n\
         3. **Safer Alternatives**: Less risky ways to accomplish the same goal\n\
         \u{20}  - Format as: SUGGESTION: [safer command] - [explanation]\n\n\
         4. **Safety Measures**: If the user must run this command, how to do it safely\n\
         \u{20}  - Format as: SUGGESTION: [safety precaution]\n\n\
         Be clear and direct about the risks, but also provide constructive alternatives.\n",
        session.current_directory, session.shell
    )
}

/// Free-form question about the terminal or shell.
pub fn general_help_prompt(
    query: &str,
    session: &SessionContext,
    recent: &[CommandRecord],
) -> String {
    let mut prompt = format!(
        "You are a helpful terminal AI assistant. A user has a question or needs help.\n\n\
         USER QUERY: {query}\n\n\
         CONTEXT:\n\
         - Directory: {}\n\
         - Shell: {}\n",
        session.current_directory, session.shell
    );

    push_git_status(&mut prompt, session);
    push_recent_commands(&mut prompt, "RECENT ACTIVITY", recent, 3);

    prompt.push_str(
        "\nPlease provide helpful assistance:\n\n\
         1. **Direct Answer**: Address the user's question clearly\n\n\
         2. **Practical Examples**: Show specific commands or examples when relevant\n\
         \u{20}  - Format as: SUGGESTION: [command] - [explanation]\n\n\
         3. **Additional Tips**: Related advice or best practices\n\
         \u{20}  - Format as: SUGGESTION: [tip or command]\n\n\
         4. **Cautions**: Any warnings or things to be careful about\n\
         \u{20}  - Format as: WARNING: [caution]\n\n\
         Be conversational, helpful, and practical. Focus on what the user can actually do.\n",
    );
    prompt
}

/// Summarize the whole session: what was done, what's broken, what's next.
pub fn session_summary_prompt(
    session: &SessionContext,
    recent: &[CommandRecord],
    errors: &[CommandRecord],
) -> String {
    let mut prompt = format!(
        "You are a terminal AI assistant. Please provide a brief summary of the current terminal session.\n\n\
         CURRENT STATE:\n\
         - Directory: {}\n\
         - Shell: {}\n",
        session.current_directory, session.shell
    );

    push_git_status(&mut prompt, session);
    push_recent_commands(&mut prompt, "RECENT COMMANDS", recent, 5);

    if !errors.is_empty() {
        prompt.push_str("\nRECENT ERRORS:\n");
        for cmd in errors.iter().take(3) {
            prompt.push_str(&format!("\u{2717} {} (exit {})\n", cmd.command, cmd.exit_code));
        }
    }

    prompt.push_str(
        "\nPlease provide:\n\n\
         1. **Session Summary**: What has the user been working on?\n\n\
         2. **Current Status**: What's the current state of their work?\n\n\
         3. **Potential Issues**: Any problems or concerns to address\n\
         \u{20}  - Format as: WARNING: [issue or concern]\n\n\
         4. **Suggested Actions**: What might be useful to do next\n\
         \u{20}  - Format as: SUGGESTION: [action or command]\n\n\
         Keep it concise and focus on the most relevant information.\n",
    );
    prompt
}

/// The base system prompt shared by every interaction.
pub fn format_system_prompt() -> &'static str {
    "You are a helpful terminal AI assistant. Your role is to:\n\n\
     - Analyze terminal commands and their output\n\
     - Provide practical solutions to problems\n\
     - Suggest useful commands and workflows\n\
     - Warn about potential risks or issues\n\
     - Help users learn and improve their terminal skills\n\n\
     Guidelines:\n\
     - Be concise and actionable\n\
     - Use specific commands and examples\n\
     - Format suggestions as \"SUGGESTION: [command/action] - [explanation]\"\n\
     - Format warnings as \"WARNING: [concern or caution]\"\n\
     - Focus on commonly-used, safe approaches\n\
     - Explain technical concepts in simple terms\n\
     - Prioritize user safety and data protection\n\n\
     Always aim to be helpful, accurate, and educational."
}

fn push_git_status(prompt: &mut String, session: &SessionContext) {
    if let Some(branch) = &session.git_branch {
        let status = match session.git_dirty {
            Some(true) => "has changes",
            _ => "clean",
        };
        prompt.push_str(&format!("- Git: {branch} branch ({status})\n"));
    }
}

fn push_recent_commands(prompt: &mut String, heading: &str, recent: &[CommandRecord], take: usize) {
    if recent.is_empty() {
        return;
    }
    prompt.push_str(&format!("\n{heading}:\n"));
    let start = recent.len().saturating_sub(take);
    for cmd in &recent[start..] {
        let status = if cmd.exit_code == 0 { '\u{2713}' } else { '\u{2717}' };
        prompt.push_str(&format!("{status} {}\n", cmd.command));
    }
}

/// A parsed model response: raw text plus extracted suggestions/warnings/
/// errors and a heuristic confidence score.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub raw: String,
    pub suggestions: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub confidence: f64,
}

/// Scan `raw` line by line for `SUGGESTION:`/`WARNING:`/`ERROR:` prefixes
/// (or their emoji equivalents) and derive a confidence score: starts at
/// 0.8, drops 0.1 per error (floor 0.6), drops 0.05 per warning (floor
/// 0.7 applied jointly with the error floor), and rises 0.05 per
/// suggestion, capped at 0.95.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let mut suggestions = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_prefix_any(trimmed, &["SUGGESTION:", "\u{1f4a1}"]) {
            suggestions.push(rest.trim().to_string());
        } else if let Some(rest) = strip_prefix_any(trimmed, &["WARNING:", "\u{26a0}\u{fe0f}", "\u{26a0}"]) {
            warnings.push(rest.trim().to_string());
        } else if let Some(rest) = strip_prefix_any(trimmed, &["ERROR:", "\u{274c}"]) {
            errors.push(rest.trim().to_string());
        }
    }

    let mut confidence: f64 = 0.8;
    confidence = (confidence - 0.1 * errors.len() as f64).max(0.6);
    confidence = (confidence - 0.05 * warnings.len() as f64).max(0.7);
    confidence = (confidence + 0.05 * suggestions.len() as f64).min(0.95);

    ParsedResponse {
        raw: raw.to_string(),
        suggestions,
        warnings,
        errors,
        confidence,
    }
}

fn strip_prefix_any<'a>(line: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes.iter().find_map(|prefix| line.strip_prefix(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionContext {
        let mut s = SessionContext::new("/home/user/project", "bash");
        s.git_branch = Some("main".to_string());
        s.git_dirty = Some(false);
        s
    }

    #[test]
    fn error_analysis_prompt_includes_command_and_error() {
        let prompt = error_analysis_prompt("ls /nope", "No such file or directory", None, &[]);
        assert!(prompt.contains("COMMAND: ls /nope"));
        assert!(prompt.contains("No such file or directory"));
        assert!(prompt.contains("SUGGESTION:"));
    }

    #[test]
    fn command_suggestion_prompt_includes_git_status() {
        let prompt = command_suggestion_prompt("undo my last commit", &session(), &[]);
        assert!(prompt.contains("Git: main branch (clean)"));
    }

    #[test]
    fn dangerous_command_prompt_names_the_command() {
        let prompt = dangerous_command_warning_prompt("rm -rf /", &session());
        assert!(prompt.contains("DANGEROUS COMMAND: rm -rf /"));
    }

    #[test]
    fn session_summary_prompt_lists_recent_errors() {
        let record = CommandRecord::new("cat x", "/tmp", 0, 0, 0.0, 1, "", "not found");
        let prompt = session_summary_prompt(&session(), &[], std::slice::from_ref(&record));
        assert!(prompt.contains("RECENT ERRORS"));
        assert!(prompt.contains("cat x (exit 1)"));
    }

    #[test]
    fn format_system_prompt_mentions_suggestion_and_warning_format() {
        let prompt = format_system_prompt();
        assert!(prompt.contains("SUGGESTION:"));
        assert!(prompt.contains("WARNING:"));
    }

    #[test]
    fn parse_response_extracts_all_three_line_kinds() {
        let raw = "Root cause: typo.\nSUGGESTION: fix the typo\nWARNING: double check paths\nERROR: could not verify";
        let parsed = parse_response(raw);
        assert_eq!(parsed.suggestions, vec!["fix the typo".to_string()]);
        assert_eq!(parsed.warnings, vec!["double check paths".to_string()]);
        assert_eq!(parsed.errors, vec!["could not verify".to_string()]);
    }

    #[test]
    fn parse_response_confidence_rewards_suggestions_and_penalizes_errors() {
        let clean = parse_response("SUGGESTION: do x\nSUGGESTION: do y");
        let noisy = parse_response("ERROR: bad\nERROR: worse\nWARNING: careful");
        assert!(clean.confidence > noisy.confidence);
        assert!(noisy.confidence >= 0.6);
        assert!(clean.confidence <= 0.95);
    }

    #[test]
    fn parse_response_with_no_markers_yields_base_confidence() {
        let parsed = parse_response("just a plain sentence with no markers");
        assert!(parsed.suggestions.is_empty());
        assert!((parsed.confidence - 0.8).abs() < f64::EPSILON);
    }
}
