//! Pure command-string classification and relevance scoring.

use serde::{Deserialize, Serialize};

/// Closed enumeration of command categories, determined by a prefix/substring
/// rule set. These are this crate's canonical serialized names (see
/// DESIGN.md for the naming rationale).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Navigation,
    FileOp,
    TextProcessing,
    SystemInfo,
    Network,
    VersionControl,
    PackageManagement,
    Development,
    Dangerous,
    Other,
}

impl CommandType {
    /// Base relevance weight for this type, used as a floor in the
    /// relevance-score formula.
    pub fn weight(self) -> f64 {
        match self {
            CommandType::Dangerous => 0.95,
            CommandType::VersionControl => 0.8,
            CommandType::Development => 0.8,
            CommandType::PackageManagement => 0.7,
            CommandType::FileOp => 0.6,
            CommandType::Network => 0.6,
            CommandType::TextProcessing => 0.5,
            CommandType::SystemInfo => 0.4,
            CommandType::Navigation => 0.3,
            CommandType::Other => 0.4,
        }
    }
}

const DANGEROUS_SUBSTRINGS: &[&str] = &["rm -rf", "sudo rm", "mkfs", "dd if=", "> /dev/", "format"];
const PACKAGE_PREFIXES: &[&str] = &[
    "npm ", "pip ", "pip3 ", "cargo ", "apt ", "apt-get ", "yum ", "brew ", "gem ", "composer ",
];
const DEVELOPMENT_PREFIXES: &[&str] = &[
    "make", "cmake", "gcc", "g++", "clang", "rustc", "go build", "go run", "python", "python3",
    "node", "java", "javac", "mvn", "gradle",
];
const NETWORK_PREFIXES: &[&str] = &[
    "curl", "wget", "ssh", "scp", "rsync", "ping", "netstat", "nc ", "telnet", "ftp",
];
const FILE_OP_PREFIXES: &[&str] = &[
    "ls", "cp", "mv", "rm", "mkdir", "rmdir", "touch", "chmod", "chown", "find", "cat", "less",
    "more", "head", "tail",
];
const TEXT_PROCESSING_PREFIXES: &[&str] =
    &["grep", "sed", "awk", "sort", "uniq", "wc", "cut", "tr", "diff"];
const SYSTEM_INFO_PREFIXES: &[&str] = &[
    "ps", "top", "htop", "df", "du", "free", "uname", "uptime", "whoami", "id", "env", "printenv",
    "history",
];
const NAVIGATION_PREFIXES: &[&str] = &["cd", "pwd", "pushd", "popd"];

/// Classify `command` into a [`CommandType`]. Pure, deterministic, and total:
/// evaluation order is dangerous → version control → package management →
/// development → network → file-op → text-processing → system-info →
/// navigation → other. Matching is case-insensitive on a whitespace-trimmed
/// command.
pub fn classify_command(command: &str) -> CommandType {
    let trimmed = command.trim();
    let lower = trimmed.to_lowercase();

    if DANGEROUS_SUBSTRINGS.iter().any(|pat| lower.contains(pat)) {
        return CommandType::Dangerous;
    }
    if lower.starts_with("git ") {
        return CommandType::VersionControl;
    }
    if starts_with_any(&lower, PACKAGE_PREFIXES) {
        return CommandType::PackageManagement;
    }
    if starts_with_any(&lower, DEVELOPMENT_PREFIXES) {
        return CommandType::Development;
    }
    if starts_with_any(&lower, NETWORK_PREFIXES) {
        return CommandType::Network;
    }
    if starts_with_any(&lower, FILE_OP_PREFIXES) {
        return CommandType::FileOp;
    }
    if starts_with_any(&lower, TEXT_PROCESSING_PREFIXES) {
        return CommandType::TextProcessing;
    }
    if starts_with_any(&lower, SYSTEM_INFO_PREFIXES) {
        return CommandType::SystemInfo;
    }
    if starts_with_any(&lower, NAVIGATION_PREFIXES) {
        return CommandType::Navigation;
    }
    CommandType::Other
}

fn starts_with_any(lower: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| {
        let prefix = prefix.trim_end();
        lower == prefix || lower.starts_with(&format!("{prefix} "))
    })
}

/// Inputs to the relevance-score formula. `age_minutes` is computed once at
/// construction time and never decays.
pub struct RelevanceInputs {
    pub command_type: CommandType,
    pub exit_code: i32,
    pub age_minutes: f64,
    pub output_len: usize,
}

/// Compute the construction-time relevance score for a record. Always in
/// `[0, 0.99]`.
pub fn relevance_score(inputs: &RelevanceInputs) -> f64 {
    let mut base: f64 = if inputs.exit_code != 0 { 0.9 } else { 0.5 };
    base = base.max(inputs.command_type.weight());
    if inputs.age_minutes < 5.0 {
        base += 0.1 * (5.0 - inputs.age_minutes) / 5.0;
    }
    if inputs.output_len > 1000 {
        base += 0.05;
    } else if inputs.output_len > 100 {
        base += 0.02;
    }
    base.min(0.99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dangerous_before_anything_else() {
        assert_eq!(classify_command("sudo rm -rf /"), CommandType::Dangerous);
        assert_eq!(classify_command("mkfs.ext4 /dev/sda1"), CommandType::Dangerous);
        assert_eq!(classify_command("format c:"), CommandType::Dangerous);
    }

    #[test]
    fn classifies_version_control_by_prefix() {
        assert_eq!(classify_command("git status"), CommandType::VersionControl);
        assert_eq!(classify_command("  GIT log -1  "), CommandType::VersionControl);
    }

    #[test]
    fn classifies_file_op_ls_nonexistent() {
        assert_eq!(classify_command("ls /nonexistent"), CommandType::FileOp);
    }

    #[test]
    fn classifies_package_management_and_development() {
        assert_eq!(classify_command("npm install"), CommandType::PackageManagement);
        assert_eq!(classify_command("cargo build"), CommandType::PackageManagement);
        assert_eq!(classify_command("make"), CommandType::Development);
    }

    #[test]
    fn falls_back_to_other() {
        assert_eq!(classify_command("frobnicate --now"), CommandType::Other);
    }

    #[test]
    fn is_total_and_deterministic() {
        for cmd in ["", "   ", "ls", "git commit -m x", "rm -rf /", "cd .."] {
            assert_eq!(classify_command(cmd), classify_command(cmd));
        }
    }

    #[test]
    fn relevance_score_is_bounded() {
        let inputs = RelevanceInputs {
            command_type: CommandType::Dangerous,
            exit_code: 1,
            age_minutes: 0.0,
            output_len: 5000,
        };
        let score = relevance_score(&inputs);
        assert!(score <= 0.99);
        assert!(score > 0.9);
    }

    #[test]
    fn relevance_score_file_op_error_exceeds_point_nine() {
        let inputs = RelevanceInputs {
            command_type: CommandType::FileOp,
            exit_code: 2,
            age_minutes: 0.0,
            output_len: 80,
        };
        assert!(relevance_score(&inputs) >= 0.9);
    }

    #[test]
    fn relevance_score_never_negative_with_large_age() {
        let inputs = RelevanceInputs {
            command_type: CommandType::Navigation,
            exit_code: 0,
            age_minutes: 999.0,
            output_len: 0,
        };
        assert!(relevance_score(&inputs) >= 0.0);
    }
}
