//! Dispatches fired triggers to the model gateway: a bounded work queue, a
//! fixed worker pool, an MD5-keyed TTL cache, a single-permit rate limiter,
//! and a typed callback bus for the results.
//!
//! Grounded on `ai/realtime_analyzer.py`'s `RealtimeAnalyzer` (cache-key
//! hashing, rate limiting via a single-permit gate plus a minimum interval,
//! TTL cache with lazy-plus-periodic eviction, event callbacks) and
//! `ai/context_manager.py`'s `ContextManager` (bounded analysis queue,
//! priority taken from the highest-priority fired trigger), ported from
//! `asyncio.Queue`/`asyncio.Semaphore` to `crossbeam_channel` plus a fixed
//! worker-thread pool, matching this crate's threads-and-channels model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::context::{CommandRecord, ContextWindow};
use crate::error::QueueFullError;
use crate::gateway::{GenerationOptions, ModelGateway};
use crate::lock_or_recover;
use crate::prompt::{self, ParsedResponse};
use crate::trigger::{FiredTrigger, TriggerKind};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Which template/dispatch path an [`AnalysisRequest`] takes, derived from
/// the fired trigger's kind. `Periodic` and `Context` triggers have no
/// dispatch path here and are dropped before reaching the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    Error,
    Dangerous,
    Pattern,
    Manual,
}

impl AnalysisKind {
    fn from_trigger_kind(kind: TriggerKind) -> Option<Self> {
        match kind {
            TriggerKind::Error => Some(AnalysisKind::Error),
            TriggerKind::Dangerous => Some(AnalysisKind::Dangerous),
            TriggerKind::Pattern => Some(AnalysisKind::Pattern),
            TriggerKind::Manual => Some(AnalysisKind::Manual),
            TriggerKind::Periodic | TriggerKind::Context => None,
        }
    }
}

/// One unit of queued work: enough of the triggering command to build a
/// prompt without holding the context window lock while the request waits.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub kind: AnalysisKind,
    pub trigger_name: String,
    pub priority: u8,
    pub command: String,
    pub directory: String,
    pub output: String,
    pub error: String,
}

/// What a worker thread reports back through the callback bus.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    CacheHit(AnalysisResult),
    Completed(AnalysisResult),
    Failed { request: AnalysisRequest, message: String },
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub request: AnalysisRequest,
    pub parsed: ParsedResponse,
    pub response_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Queued,
    CacheHit,
    Completed,
    Failed,
}

type Callback = Box<dyn Fn(&AnalysisOutcome) + Send + Sync>;

#[derive(Default)]
struct CallbackBus {
    callbacks: HashMap<EventKind, Vec<Callback>>,
}

impl CallbackBus {
    fn register(&mut self, event: EventKind, callback: Callback) {
        self.callbacks.entry(event).or_default().push(callback);
    }

    fn fire(&self, event: EventKind, outcome: &AnalysisOutcome) {
        if let Some(callbacks) = self.callbacks.get(&event) {
            for callback in callbacks {
                callback(outcome);
            }
        }
    }
}

struct CacheEntry {
    parsed: ParsedResponse,
    response_time: Duration,
    cached_at_unix_ms: u64,
    ttl_secs: u64,
}

impl CacheEntry {
    fn is_expired(&self, now_unix_ms: u64) -> bool {
        now_unix_ms.saturating_sub(self.cached_at_unix_ms) / 1000 >= self.ttl_secs
    }
}

#[derive(Debug, Default, Clone)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default, Clone)]
pub struct OrchestratorMetrics {
    pub requests_queued: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub queue_full_rejections: u64,
    pub cache: CacheStatistics,
}

struct SharedState {
    gateway: Arc<dyn ModelGateway>,
    context: Arc<Mutex<ContextWindow>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_stats: Mutex<CacheStatistics>,
    callbacks: Mutex<CallbackBus>,
    last_request_unix_ms: Mutex<u64>,
    min_interval_ms: u64,
    cache_ttl_secs: u64,
    cache_enabled: bool,
    metrics_queued: AtomicU64,
    metrics_processed: AtomicU64,
    metrics_failed: AtomicU64,
    metrics_queue_full: AtomicU64,
}

/// Options controlling queue capacity, worker count, rate limit, and cache
/// TTL.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub queue_capacity: usize,
    pub concurrency: usize,
    pub rate_per_sec: f64,
    pub cache_ttl_secs: u64,
    pub cache_enabled: bool,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            concurrency: 3,
            rate_per_sec: 5.0,
            cache_ttl_secs: 300,
            cache_enabled: true,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// Owns the bounded work queue and the worker-thread pool that drains it.
pub struct Orchestrator {
    sender: Sender<AnalysisRequest>,
    state: Arc<SharedState>,
    workers: Vec<thread::JoinHandle<()>>,
    cleanup_stop: Arc<std::sync::atomic::AtomicBool>,
    cleanup_thread: Option<thread::JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        gateway: Arc<dyn ModelGateway>,
        context: Arc<Mutex<ContextWindow>>,
    ) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));
        let min_interval_ms = if config.rate_per_sec > 0.0 {
            (1000.0 / config.rate_per_sec) as u64
        } else {
            0
        };

        let state = Arc::new(SharedState {
            gateway,
            context,
            cache: Mutex::new(HashMap::new()),
            cache_stats: Mutex::new(CacheStatistics::default()),
            callbacks: Mutex::new(CallbackBus::default()),
            last_request_unix_ms: Mutex::new(0),
            min_interval_ms,
            cache_ttl_secs: config.cache_ttl_secs,
            cache_enabled: config.cache_enabled,
            metrics_queued: AtomicU64::new(0),
            metrics_processed: AtomicU64::new(0),
            metrics_failed: AtomicU64::new(0),
            metrics_queue_full: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.concurrency);
        for _ in 0..config.concurrency {
            let receiver: Receiver<AnalysisRequest> = receiver.clone();
            let state = Arc::clone(&state);
            let options = GenerationOptions {
                model: None,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            };
            workers.push(thread::spawn(move || worker_loop(receiver, state, options)));
        }

        let cleanup_stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cleanup_thread = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&cleanup_stop);
            Some(thread::spawn(move || cache_sweep_loop(state, stop)))
        };

        Self {
            sender,
            state,
            workers,
            cleanup_stop,
            cleanup_thread,
        }
    }

    /// Build an [`AnalysisRequest`] from the highest-priority fired trigger
    /// and enqueue it. Drops silently (returning `Ok(None)`) if no fired
    /// trigger maps to a dispatchable [`AnalysisKind`].
    pub fn submit(
        &self,
        record: &CommandRecord,
        fired: &[FiredTrigger],
    ) -> Result<Option<()>, QueueFullError> {
        let Some(top) = fired.iter().max_by_key(|f| f.priority) else {
            return Ok(None);
        };
        let Some(kind) = AnalysisKind::from_trigger_kind(top.kind) else {
            return Ok(None);
        };

        let request = AnalysisRequest {
            kind,
            trigger_name: top.name.clone(),
            priority: top.priority,
            command: record.command.clone(),
            directory: record.directory.clone(),
            output: record.output.clone(),
            error: record.error.clone(),
        };

        self.enqueue(request).map(Some)
    }

    pub fn submit_manual(&self, text: &str, directory: &str) -> Result<(), QueueFullError> {
        let request = AnalysisRequest {
            kind: AnalysisKind::Manual,
            trigger_name: "manual_request".to_string(),
            priority: 10,
            command: text.to_string(),
            directory: directory.to_string(),
            output: String::new(),
            error: String::new(),
        };
        self.enqueue(request)
    }

    fn enqueue(&self, request: AnalysisRequest) -> Result<(), QueueFullError> {
        match self.sender.try_send(request) {
            Ok(()) => {
                self.state.metrics_queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.state.metrics_queue_full.fetch_add(1, Ordering::Relaxed);
                Err(QueueFullError)
            }
        }
    }

    pub fn register_callback(
        &self,
        event: EventKind,
        callback: impl Fn(&AnalysisOutcome) + Send + Sync + 'static,
    ) {
        lock_or_recover(&self.state.callbacks, "orchestrator callbacks")
            .register(event, Box::new(callback));
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let cache = lock_or_recover(&self.state.cache_stats, "orchestrator cache stats").clone();
        OrchestratorMetrics {
            requests_queued: self.state.metrics_queued.load(Ordering::Relaxed),
            requests_processed: self.state.metrics_processed.load(Ordering::Relaxed),
            requests_failed: self.state.metrics_failed.load(Ordering::Relaxed),
            queue_full_rejections: self.state.metrics_queue_full.load(Ordering::Relaxed),
            cache,
        }
    }

    pub fn clear_cache(&self) {
        lock_or_recover(&self.state.cache, "orchestrator cache").clear();
        *lock_or_recover(&self.state.cache_stats, "orchestrator cache stats") =
            CacheStatistics::default();
    }

    pub fn cache_enabled(&self) -> bool {
        self.state.cache_enabled
    }

    /// Stop accepting new work, signal the cache-sweep thread, and join
    /// every worker once the queue has drained.
    pub fn shutdown(mut self) {
        drop(self.sender);
        self.cleanup_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.cleanup_thread.take() {
            let _ = handle.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn cache_key(kind: AnalysisKind, command: &str, payload: &str) -> String {
    let content = format!("{kind:?}:{command}:{payload}");
    format!("{:x}", md5::compute(content.as_bytes()))
}

fn build_prompt(request: &AnalysisRequest, context: &Arc<Mutex<ContextWindow>>) -> String {
    let window = lock_or_recover(context, "orchestrator context window");
    let session = window.session().clone();
    let recent = window.relevant(1000);
    drop(window);

    match request.kind {
        AnalysisKind::Error => {
            prompt::error_analysis_prompt(&request.command, &request.error, None, &recent)
        }
        AnalysisKind::Dangerous => prompt::dangerous_command_warning_prompt(&request.command, &session),
        AnalysisKind::Pattern => prompt::output_analysis_prompt(&request.command, &request.output, &session),
        AnalysisKind::Manual => prompt::command_suggestion_prompt(&request.command, &session, &recent),
    }
}

fn worker_loop(receiver: Receiver<AnalysisRequest>, state: Arc<SharedState>, options: GenerationOptions) {
    while let Ok(request) = receiver.recv() {
        process_request(&state, request, &options);
    }
}

fn process_request(state: &Arc<SharedState>, request: AnalysisRequest, options: &GenerationOptions) {
    // A dangerous-command warning must never be served stale from cache or
    // delayed behind the rate limiter while the user is about to hit Enter
    // on something destructive: it goes straight to the gateway.
    if request.kind == AnalysisKind::Dangerous {
        dispatch(state, request, options, None);
        return;
    }

    let payload = format!("{}\n{}", request.output, request.error);
    let key = cache_key(request.kind, &request.command, &payload);

    if state.cache_enabled {
        if let Some(hit) = cache_lookup(state, &key) {
            let outcome = AnalysisOutcome::CacheHit(AnalysisResult {
                request,
                parsed: hit.0,
                response_time: hit.1,
            });
            lock_or_recover(&state.callbacks, "orchestrator callbacks")
                .fire(EventKind::CacheHit, &outcome);
            return;
        }
    }

    rate_limit(state);
    dispatch(state, request, options, Some(key));
}

fn dispatch(
    state: &Arc<SharedState>,
    request: AnalysisRequest,
    options: &GenerationOptions,
    cache_key: Option<String>,
) {
    let prompt_text = build_prompt(&request, &state.context);
    match state.gateway.generate(&prompt_text, options) {
        Ok(response) => {
            let parsed = prompt::parse_response(&response.content);
            if let Some(key) = cache_key {
                if state.cache_enabled {
                    cache_store(state, key, &parsed, response.response_time);
                }
            }
            state.metrics_processed.fetch_add(1, Ordering::Relaxed);
            let outcome = AnalysisOutcome::Completed(AnalysisResult {
                request,
                parsed,
                response_time: response.response_time,
            });
            lock_or_recover(&state.callbacks, "orchestrator callbacks").fire(EventKind::Completed, &outcome);
        }
        Err(err) => {
            state.metrics_failed.fetch_add(1, Ordering::Relaxed);
            let outcome = AnalysisOutcome::Failed {
                request,
                message: err.to_string(),
            };
            lock_or_recover(&state.callbacks, "orchestrator callbacks").fire(EventKind::Failed, &outcome);
        }
    }
}

fn cache_lookup(state: &Arc<SharedState>, key: &str) -> Option<(ParsedResponse, Duration)> {
    let now = now_unix_ms();
    let mut cache = lock_or_recover(&state.cache, "orchestrator cache");
    let mut stats = lock_or_recover(&state.cache_stats, "orchestrator cache stats");

    match cache.get(key) {
        Some(entry) if !entry.is_expired(now) => {
            stats.hits += 1;
            Some((entry.parsed.clone(), entry.response_time))
        }
        Some(_) => {
            cache.remove(key);
            stats.evictions += 1;
            stats.misses += 1;
            None
        }
        None => {
            stats.misses += 1;
            None
        }
    }
}

fn cache_store(state: &Arc<SharedState>, key: String, parsed: &ParsedResponse, response_time: Duration) {
    let mut cache = lock_or_recover(&state.cache, "orchestrator cache");
    cache.insert(
        key,
        CacheEntry {
            parsed: parsed.clone(),
            response_time,
            cached_at_unix_ms: now_unix_ms(),
            ttl_secs: state.cache_ttl_secs,
        },
    );
}

fn rate_limit(state: &Arc<SharedState>) {
    if state.min_interval_ms == 0 {
        return;
    }
    let mut last = lock_or_recover(&state.last_request_unix_ms, "orchestrator rate limiter");
    let now = now_unix_ms();
    let elapsed = now.saturating_sub(*last);
    if elapsed < state.min_interval_ms {
        thread::sleep(Duration::from_millis(state.min_interval_ms - elapsed));
    }
    *last = now_unix_ms();
}

fn cache_sweep_loop(state: Arc<SharedState>, stop: Arc<std::sync::atomic::AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
        if stop.load(Ordering::SeqCst) {
            break;
        }
        static_sleep_until_interval(&stop, CACHE_SWEEP_INTERVAL);
        if stop.load(Ordering::SeqCst) {
            break;
        }
        sweep_expired(&state);
    }
}

fn static_sleep_until_interval(stop: &Arc<std::sync::atomic::AtomicBool>, interval: Duration) {
    let slept = Duration::from_millis(200);
    let mut remaining = interval.saturating_sub(slept);
    while remaining > Duration::ZERO {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(Duration::from_millis(200));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

fn sweep_expired(state: &Arc<SharedState>) {
    let now = now_unix_ms();
    let mut cache = lock_or_recover(&state.cache, "orchestrator cache");
    let mut stats = lock_or_recover(&state.cache_stats, "orchestrator cache stats");
    let before = cache.len();
    cache.retain(|_, entry| !entry.is_expired(now));
    stats.evictions += (before - cache.len()) as u64;
}

fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
