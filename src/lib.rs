//! Core observation-and-analysis pipeline shared by the `termai-pty` binary.
//!
//! A PTY-hosted shell's byte stream flows through [`output_buffer`] and
//! [`command_tracker`] to become [`context::CommandRecord`]s, which
//! [`classifier`] and [`sanitizer`] annotate and scrub before
//! [`context::ContextWindow`] retains them. [`trigger`] decides which records
//! warrant a call to the language model, and [`orchestrator`] queues,
//! caches, rate-limits, and dispatches those calls through [`gateway`] using
//! prompts assembled by [`prompt`].

pub mod classifier;
pub mod command_tracker;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod history_export;
mod lock;
pub mod orchestrator;
mod process_signal;
pub mod prompt;
pub mod pty_host;
pub mod output_buffer;
pub mod sanitizer;
mod telemetry;
pub mod trigger;

pub(crate) use lock::lock_or_recover;
pub use telemetry::init_tracing;
