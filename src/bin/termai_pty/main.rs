//! `termai-pty` entrypoint: hosts an interactive shell under a PTY, mirrors
//! its output to the real terminal, and drives the observation-and-analysis
//! pipeline off to the side so model suggestions never corrupt the
//! passthrough stream.

mod signals;
mod terminal_guard;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::terminal::size as terminal_size;

use termai_pty::command_tracker::CommandTracker;
use termai_pty::config::AppConfig;
use termai_pty::context::{now_unix_ms, parse_git_status, ContextWindow, SessionContext};
use termai_pty::gateway::{ModelGateway, OllamaGateway};
use termai_pty::history_export::{default_history_path, HistoryWriter};
use termai_pty::init_tracing;
use termai_pty::orchestrator::{AnalysisOutcome, Orchestrator, OrchestratorConfig};
use termai_pty::output_buffer::OutputBuffer;
use termai_pty::pty_host::PtyHost;
use termai_pty::sanitizer::Sanitizer;
use termai_pty::trigger::TriggerEngine;

use terminal_guard::TerminalGuard;

const IMPORTANT_CAPACITY_DIVISOR: usize = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(15);
const STDIN_CHANNEL_CAPACITY: usize = 256;

fn main() -> Result<()> {
    let config = AppConfig::load();
    init_tracing(&config);
    signals::install_handlers().context("failed to install signal handlers")?;

    let working_dir = std::env::current_dir().context("failed to read working directory")?;
    let working_dir_str = working_dir.to_string_lossy().into_owned();

    let gateway: Arc<dyn ModelGateway> = Arc::new(OllamaGateway::new(
        config.ollama_host.clone(),
        config.ollama_model.clone(),
        Duration::from_secs(config.ollama_timeout_secs),
    ));
    if !gateway.health() {
        tracing::warn!(
            host = %config.ollama_host,
            "model gateway unreachable at startup; analysis pipeline runs degraded"
        );
    }

    let session = SessionContext::new(working_dir_str.clone(), config.terminal_shell.clone());
    let context = Arc::new(Mutex::new(ContextWindow::new(
        config.ai_max_context_length,
        (config.ai_max_context_length / IMPORTANT_CAPACITY_DIVISOR).max(1),
        session,
    )));

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            queue_capacity: config.queue_capacity,
            concurrency: config.concurrency,
            rate_per_sec: config.rate_per_sec,
            cache_ttl_secs: config.ai_cache_ttl_secs,
            cache_enabled: config.ai_cache_enabled,
            max_tokens: config.ai_response_max_tokens,
            temperature: f64::from(config.ai_temperature),
        },
        Arc::clone(&gateway),
        Arc::clone(&context),
    );
    orchestrator.register_callback(
        termai_pty::orchestrator::EventKind::Completed,
        report_outcome,
    );
    orchestrator.register_callback(
        termai_pty::orchestrator::EventKind::CacheHit,
        report_outcome,
    );
    orchestrator.register_callback(termai_pty::orchestrator::EventKind::Failed, report_outcome);

    let sanitizer = Sanitizer::new();
    let mut trigger_engine = TriggerEngine::new();
    let mut tracker = CommandTracker::new(working_dir_str.clone());
    let mut buffer = OutputBuffer::new(config.terminal_buffer_size);

    let mut history = match HistoryWriter::open(&default_history_path(&working_dir)) {
        Ok(writer) => Some(writer),
        Err(err) => {
            tracing::warn!(error = %err, "history export disabled: could not open history file");
            None
        }
    };

    let (initial_cols, initial_rows) = terminal_size().unwrap_or((config.terminal_cols, config.terminal_rows));
    let pty = PtyHost::spawn(
        &config.terminal_shell,
        &working_dir_str,
        initial_rows,
        initial_cols,
    )
    .context("failed to spawn pty-hosted shell")?;

    let _terminal_guard = TerminalGuard::enable().context("failed to enable raw terminal mode")?;
    let stdin_rx = spawn_stdin_reader();

    let mut pending_command = String::new();

    'outer: loop {
        if signals::take_sigint() {
            tracing::info!("sigint received, shutting down");
            break;
        }
        if signals::take_sigwinch() {
            if let Ok((cols, rows)) = terminal_size() {
                let _ = pty.resize(rows, cols);
            }
        }
        if !pty.is_alive() {
            break;
        }

        let mut made_progress = false;

        while let Ok(chunk) = pty.output_rx.try_recv() {
            made_progress = true;
            let _ = io::stdout().write_all(&chunk);
            let _ = io::stdout().flush();
            buffer.append(&chunk);
            let text = String::from_utf8_lossy(&chunk).into_owned();
            if let Some(record) = tracker.on_output(&text, now_unix_ms()) {
                handle_completed_record(
                    record,
                    &sanitizer,
                    &mut trigger_engine,
                    &context,
                    &orchestrator,
                    &mut history,
                    &mut tracker,
                );
            }
        }

        while let Ok(byte) = stdin_rx.try_recv() {
            made_progress = true;
            if pty.write(&[byte]).is_err() {
                break 'outer;
            }
            match byte {
                b'\r' | b'\n' => {
                    let submitted = std::mem::take(&mut pending_command);
                    tracker.on_submit(submitted.trim(), now_unix_ms());
                }
                0x7f | 0x08 => {
                    pending_command.pop();
                }
                byte if (0x20..0x7f).contains(&byte) => pending_command.push(byte as char),
                _ => {}
            }
        }

        if !made_progress {
            thread::sleep(POLL_INTERVAL);
        }
    }

    buffer.flush();
    orchestrator.shutdown();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_completed_record(
    mut record: termai_pty::context::CommandRecord,
    sanitizer: &Sanitizer,
    trigger_engine: &mut TriggerEngine,
    context: &Arc<Mutex<ContextWindow>>,
    orchestrator: &Orchestrator,
    history: &mut Option<HistoryWriter>,
    tracker: &mut CommandTracker,
) {
    let (command, output, error) = sanitizer.sanitize(&record.command, &record.output, &record.error);
    record.command = command;
    record.output = output;
    record.error = error;

    if let Some(new_dir) = cd_target(&record.command, tracker.directory()) {
        tracker.set_directory(new_dir.clone());
        lock_context(context).update_session(Some(new_dir), None, None);
    }

    if record.exit_code == 0 {
        if let Some((branch, dirty)) = parse_git_status(&record.command, &record.output) {
            lock_context(context).update_session(None, Some(branch), Some(dirty));
        }
    }

    let fired = trigger_engine.evaluate(&record, now_unix_ms());
    lock_context(context).add(record.clone());

    if !fired.is_empty() {
        if let Err(err) = orchestrator.submit(&record, &fired) {
            tracing::warn!(command = %record.command, error = %err, "analysis queue full, dropping request");
        }
    }

    if let Some(writer) = history.as_mut() {
        if let Err(err) = writer.append(&record.to_export()) {
            tracing::warn!(error = %err, "failed to append command history");
        }
    }
}

/// Parses a leading `cd` command into the session's next working directory,
/// resolved against `current_dir`. Returns `None` for anything else.
fn cd_target(command: &str, current_dir: &str) -> Option<String> {
    let rest = command.trim().strip_prefix("cd")?;
    let rest = rest.trim();
    if rest.is_empty() || rest == "~" {
        return std::env::var("HOME").ok();
    }
    if rest == ".." {
        let mut path = std::path::PathBuf::from(current_dir);
        path.pop();
        return Some(path.to_string_lossy().into_owned());
    }
    if rest.starts_with('/') {
        return Some(rest.to_string());
    }
    Some(
        std::path::PathBuf::from(current_dir)
            .join(rest)
            .to_string_lossy()
            .into_owned(),
    )
}

fn lock_context(context: &Arc<Mutex<ContextWindow>>) -> std::sync::MutexGuard<'_, ContextWindow> {
    context.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn report_outcome(outcome: &AnalysisOutcome) {
    let mut stderr = io::stderr();
    match outcome {
        AnalysisOutcome::Completed(result) | AnalysisOutcome::CacheHit(result) => {
            for suggestion in &result.parsed.suggestions {
                let _ = writeln!(stderr, "\r\n[termai] suggestion: {suggestion}");
            }
            for warning in &result.parsed.warnings {
                let _ = writeln!(stderr, "\r\n[termai] warning: {warning}");
            }
        }
        AnalysisOutcome::Failed { request, message } => {
            tracing::warn!(command = %request.command, error = %message, "analysis request failed");
        }
    }
}

/// Forwards raw stdin bytes to a bounded channel from a dedicated reading
/// thread, mirroring `pty_host`'s own non-blocking-read-with-retry shape but
/// over a blocking stdin handle, since stdin has no O_NONBLOCK equivalent
/// that is portable to set from safe code.
fn spawn_stdin_reader() -> crossbeam_channel::Receiver<u8> {
    let (tx, rx) = crossbeam_channel::bounded(STDIN_CHANNEL_CAPACITY);
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut byte = [0u8; 1];
        loop {
            match stdin.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(byte[0]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}
