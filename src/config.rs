//! CLI and environment configuration.
//!
//! Mirrors this codebase's `clap` derive + `env` feature convention: each
//! field binds an environment variable from the external interface contract,
//! a `.env` file in the working directory is loaded before `Cli::parse()` so
//! process environment still wins on conflict, and bounded numeric flags are
//! rejected at parse time through a `value_parser` rather than panicking
//! later.

use clap::Parser;

fn parse_unit_interval(raw: &str) -> Result<f32, String> {
    let value: f32 = raw
        .parse()
        .map_err(|_| format!("{raw:?} is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside the allowed range 0.0..=1.0"));
    }
    Ok(value)
}

fn parse_positive_rate(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("{raw:?} is not a number"))?;
    if value <= 0.0 {
        return Err(format!("{value} must be greater than zero"));
    }
    Ok(value)
}

fn parse_nonzero_usize(raw: &str) -> Result<usize, String> {
    let value: usize = raw
        .parse()
        .map_err(|_| format!("{raw:?} is not a non-negative integer"))?;
    if value == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(value)
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Top-level configuration parsed from CLI flags and environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "termai-pty", about = "Terminal multiplexer with an embedded LLM assistance pipeline")]
pub struct AppConfig {
    /// Ollama-compatible model server host.
    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_host: String,

    /// Model name requested from the gateway.
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3")]
    pub ollama_model: String,

    /// Per-call gateway timeout in seconds.
    #[arg(long, env = "OLLAMA_TIMEOUT", default_value_t = 30)]
    pub ollama_timeout_secs: u64,

    /// Log level for the tracing subscriber's env filter.
    #[arg(long, env = "APP_LOG_LEVEL", default_value = "info")]
    pub app_log_level: String,

    /// Maximum number of CommandRecords retained by the context window.
    #[arg(long, env = "AI_MAX_CONTEXT_LENGTH", default_value_t = 20)]
    pub ai_max_context_length: usize,

    /// Maximum tokens requested from the model per call.
    #[arg(long, env = "AI_RESPONSE_MAX_TOKENS", default_value_t = 500)]
    pub ai_response_max_tokens: u32,

    /// Sampling temperature passed to the gateway, clamped to [0, 1].
    #[arg(long, env = "AI_TEMPERATURE", default_value_t = 0.7, value_parser = parse_unit_interval)]
    pub ai_temperature: f32,

    /// Whether the response cache is enabled.
    #[arg(long, env = "AI_CACHE_ENABLED", default_value_t = true)]
    pub ai_cache_enabled: bool,

    /// Cache entry time-to-live in seconds.
    #[arg(long, env = "AI_CACHE_TTL", default_value_t = 300)]
    pub ai_cache_ttl_secs: u64,

    /// Shell executable spawned under the PTY.
    #[arg(long, env = "TERMINAL_SHELL", default_value_t = default_shell())]
    pub terminal_shell: String,

    /// Initial PTY column count.
    #[arg(long, env = "TERMINAL_COLS", default_value_t = 80)]
    pub terminal_cols: u16,

    /// Initial PTY row count.
    #[arg(long, env = "TERMINAL_ROWS", default_value_t = 24)]
    pub terminal_rows: u16,

    /// OutputBuffer ring capacity, in lines.
    #[arg(long, env = "TERMINAL_BUFFER_SIZE", default_value_t = 1000)]
    pub terminal_buffer_size: usize,

    /// Bounded analysis-request queue capacity.
    #[arg(long, default_value_t = 50, value_parser = parse_nonzero_usize)]
    pub queue_capacity: usize,

    /// Maximum outstanding ModelGateway calls.
    #[arg(long, default_value_t = 3, value_parser = parse_nonzero_usize)]
    pub concurrency: usize,

    /// Maximum analysis requests dispatched per second.
    #[arg(long, default_value_t = 5.0, value_parser = parse_positive_rate)]
    pub rate_per_sec: f64,

    /// Enable structured JSON tracing to a log file.
    #[arg(long)]
    pub logs: bool,

    /// Enable tracing of component timings without full event logging.
    #[arg(long)]
    pub log_timings: bool,

    /// Disable all tracing regardless of other log flags.
    #[arg(long)]
    pub no_logs: bool,
}

impl AppConfig {
    /// Parse CLI arguments, first loading a `.env` file from the working
    /// directory if present so process environment still wins on conflict.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }
}
