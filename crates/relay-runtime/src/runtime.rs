//! The channel runtime: event loop, pipeline, and lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use relay_channel::ChannelPort;
use relay_core::{current_unix_timestamp_ms, ChannelError, ErrorCode};
use relay_envelope::{
    validate_channel_event, ChannelEvent, ChannelResponse, ResponsePayload,
};
use relay_idempotency::{IdempotencyGuard, MemoryIdempotencyStore, ProcessingOutcome};
use relay_policy::{PolicyExecutor, RateScope};
use relay_session::{
    MemorySessionStore, Session, SessionManager, SessionMessage,
};

use crate::config::{ProcessingMode, RuntimeConfig};
use crate::processor::{
    MessageProcessor, ProcessResult, ResponseGenerator, ToolExecutionResult, ToolProvider,
};

#[derive(Debug, Clone)]
/// Error surfaced on the runtime's `errors` stream.
pub struct ChannelRuntimeError {
    pub event: ChannelEvent,
    pub error: ChannelError,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Monotonic counters snapshot for operational introspection.
pub struct RuntimeSummary {
    pub events_received: u64,
    pub events_processed: u64,
    pub duplicates_skipped: u64,
    pub responses_sent: u64,
    pub send_failures: u64,
    pub pipeline_errors: u64,
}

#[derive(Default)]
struct RuntimeCounters {
    events_received: AtomicU64,
    events_processed: AtomicU64,
    duplicates_skipped: AtomicU64,
    responses_sent: AtomicU64,
    send_failures: AtomicU64,
    pipeline_errors: AtomicU64,
}

impl RuntimeCounters {
    fn snapshot(&self) -> RuntimeSummary {
        RuntimeSummary {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
        }
    }
}

/// One attempt's processing result: the response to dispatch plus the
/// session messages staged for commit once the attempt has delivered.
struct ProcessedTurn {
    session_id: String,
    staged: Vec<SessionMessage>,
    response: Option<ChannelResponse>,
}

/// Orchestrator wiring adapters, policy, idempotency, and sessions.
///
/// One reader task per started adapter feeds events into per-event
/// pipeline tasks. `stop` cancels the readers and cleanup timers, stops
/// the adapters, and drains in-flight pipelines within the configured
/// grace period.
pub struct ChannelRuntime {
    config: RuntimeConfig,
    adapters: StdRwLock<HashMap<String, Arc<dyn ChannelPort>>>,
    policy: PolicyExecutor,
    guard: Option<Arc<IdempotencyGuard>>,
    sessions: Arc<SessionManager>,
    processor: StdRwLock<Option<Arc<dyn MessageProcessor>>>,
    generator: StdRwLock<Option<Arc<dyn ResponseGenerator>>>,
    tools: StdRwLock<Option<Arc<dyn ToolProvider>>>,
    events_tx: broadcast::Sender<ChannelEvent>,
    responses_tx: broadcast::Sender<ChannelResponse>,
    errors_tx: broadcast::Sender<ChannelRuntimeError>,
    counters: RuntimeCounters,
    running: AtomicBool,
    cancel: StdMutex<CancellationToken>,
    pipelines: StdMutex<TaskTracker>,
    background: StdMutex<Vec<JoinHandle<()>>>,
}

impl ChannelRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let policy = PolicyExecutor::new(config.policy.clone());
        let guard = config.idempotency.clone().map(|idempotency| {
            Arc::new(IdempotencyGuard::new(
                Arc::new(MemoryIdempotencyStore::new()),
                idempotency,
            ))
        });
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new(&config.session)),
            config.session.clone(),
        ));
        let capacity = config.stream_capacity.max(1);
        let (events_tx, _) = broadcast::channel(capacity);
        let (responses_tx, _) = broadcast::channel(capacity);
        let (errors_tx, _) = broadcast::channel(capacity);
        Self {
            config,
            adapters: StdRwLock::new(HashMap::new()),
            policy,
            guard,
            sessions,
            processor: StdRwLock::new(None),
            generator: StdRwLock::new(None),
            tools: StdRwLock::new(None),
            events_tx,
            responses_tx,
            errors_tx,
            counters: RuntimeCounters::default(),
            running: AtomicBool::new(false),
            cancel: StdMutex::new(CancellationToken::new()),
            pipelines: StdMutex::new(TaskTracker::new()),
            background: StdMutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn summary(&self) -> RuntimeSummary {
        self.counters.snapshot()
    }

    pub fn set_message_processor(&self, processor: Arc<dyn MessageProcessor>) {
        *write_lock(&self.processor) = Some(processor);
    }

    pub fn set_response_generator(&self, generator: Arc<dyn ResponseGenerator>) {
        *write_lock(&self.generator) = Some(generator);
    }

    pub fn set_tool_provider(&self, tools: Arc<dyn ToolProvider>) {
        *write_lock(&self.tools) = Some(tools);
    }

    /// Register an adapter, keyed by its platform. Only allowed while the
    /// runtime is stopped.
    pub fn register_channel(&self, adapter: Arc<dyn ChannelPort>) -> Result<(), ChannelError> {
        if self.is_running() {
            return Err(ChannelError::invalid_request(
                "channels can only be registered while the runtime is stopped",
            ));
        }
        let platform = adapter.platform().to_string();
        let mut adapters = self
            .adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if adapters.contains_key(&platform) {
            return Err(ChannelError::invalid_request(format!(
                "platform '{platform}' is already registered"
            )));
        }
        adapters.insert(platform, adapter);
        Ok(())
    }

    /// Observability stream of every event entering the pipeline. Late
    /// subscribers see no history; events flow with no subscribers.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    pub fn subscribe_responses(&self) -> broadcast::Receiver<ChannelResponse> {
        self.responses_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ChannelRuntimeError> {
        self.errors_tx.subscribe()
    }

    /// Start every registered adapter and begin consuming events.
    /// Idempotent. If an adapter fails to start, the ones already started
    /// are stopped again and the error propagates.
    pub async fn start(self: &Arc<Self>) -> Result<(), ChannelError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        *lock(&self.cancel) = cancel.clone();
        let tracker = TaskTracker::new();
        *lock(&self.pipelines) = tracker.clone();

        let mut handles = Vec::new();
        if let Some(guard) = &self.guard {
            handles.push(guard.spawn_cleanup(cancel.child_token()));
        }
        handles.push(self.sessions.spawn_cleanup(cancel.child_token()));

        let adapters = self.adapter_snapshot();
        let mut started: Vec<Arc<dyn ChannelPort>> = Vec::new();
        for (platform, adapter) in adapters {
            // Subscribe before starting so no event published during
            // startup is lost.
            let receiver = adapter.subscribe_events();
            if let Err(error) = adapter.start().await {
                for previous in &started {
                    if let Err(stop_error) = previous.stop().await {
                        tracing::warn!(
                            platform = previous.platform(),
                            error = %stop_error,
                            "failed to stop adapter during start rollback"
                        );
                    }
                }
                cancel.cancel();
                self.running.store(false, Ordering::SeqCst);
                return Err(error);
            }
            started.push(Arc::clone(&adapter));
            tracing::info!(platform = %platform, "channel started");
            handles.push(tokio::spawn(read_adapter_events(
                Arc::clone(self),
                platform,
                receiver,
                cancel.child_token(),
                tracker.clone(),
            )));
        }
        *lock(&self.background) = handles;
        tracing::info!("channel runtime started");
        Ok(())
    }

    /// Stop adapters and cleanup timers, then drain in-flight pipelines.
    /// Exceeding the shutdown grace leaves the runtime stopped but
    /// reports a `timeout` error.
    pub async fn stop(&self) -> Result<(), ChannelError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.cancel).cancel();

        for (platform, adapter) in self.adapter_snapshot() {
            if let Err(error) = adapter.stop().await {
                tracing::warn!(platform = %platform, error = %error, "adapter stop failed");
            }
        }

        let handles = std::mem::take(&mut *lock(&self.background));
        for handle in handles {
            let _ = handle.await;
        }

        let tracker = lock(&self.pipelines).clone();
        tracker.close();
        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            tracing::error!(grace_ms = grace.as_millis() as u64, "in-flight pipelines exceeded shutdown grace");
            return Err(ChannelError::timeout("shutdown_grace", grace));
        }
        tracing::info!("channel runtime stopped");
        Ok(())
    }

    /// `stop` plus stream closure: dropping the final runtime handle
    /// closes the `events`/`responses`/`errors` streams, so subscribers
    /// observe `Closed` once every clone is gone.
    pub async fn dispose(self: Arc<Self>) -> Result<(), ChannelError> {
        self.stop().await
    }

    pub fn is_circuit_allowed(&self) -> bool {
        self.policy.is_circuit_allowed()
    }

    /// Clear rate limiter buckets and the circuit breaker.
    pub fn reset_policy(&self) {
        self.policy.reset();
    }

    fn adapter_snapshot(&self) -> Vec<(String, Arc<dyn ChannelPort>)> {
        self.adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(platform, adapter)| (platform.clone(), Arc::clone(adapter)))
            .collect()
    }

    fn adapter_for(&self, platform: &str) -> Option<Arc<dyn ChannelPort>> {
        self.adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(platform)
            .cloned()
    }

    fn message_processor(&self) -> Option<Arc<dyn MessageProcessor>> {
        read_lock(&self.processor).clone()
    }

    fn response_generator(&self) -> Option<Arc<dyn ResponseGenerator>> {
        read_lock(&self.generator).clone()
    }

    fn tool_provider(&self) -> Option<Arc<dyn ToolProvider>> {
        read_lock(&self.tools).clone()
    }

    fn emit_error(&self, event: &ChannelEvent, error: ChannelError) {
        self.counters.pipeline_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            event_id = %event.event_id,
            platform = %event.conversation.platform,
            code = error.code.as_str(),
            error = %error,
            "pipeline error"
        );
        let _ = self.errors_tx.send(ChannelRuntimeError {
            event: event.clone(),
            error,
            timestamp_ms: current_unix_timestamp_ms(),
        });
    }

    /// Full per-event pipeline: observability emit, idempotency wrap,
    /// policy-executed processing, response dispatch.
    pub(crate) async fn process_event(self: Arc<Self>, event: ChannelEvent) {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        let _ = self.events_tx.send(event.clone());
        if let Err(error) = validate_channel_event(&event) {
            self.emit_error(&event, error);
            return;
        }

        let ran = Arc::new(AtomicBool::new(false));
        let outcome = match &self.guard {
            Some(guard) => {
                let runtime = Arc::clone(&self);
                let pipeline_event = event.clone();
                let ran_flag = Arc::clone(&ran);
                guard
                    .process(&event.event_id, move || async move {
                        ran_flag.store(true, Ordering::SeqCst);
                        runtime.execute_pipeline(&pipeline_event).await
                    })
                    .await
            }
            None => {
                ran.store(true, Ordering::SeqCst);
                match self.execute_pipeline(&event).await {
                    Ok(response) => Ok(ProcessingOutcome::success(response)),
                    Err(error) => Ok(ProcessingOutcome::failure(error.to_string())),
                }
            }
        };

        match outcome {
            Ok(outcome) => {
                if !ran.load(Ordering::SeqCst) {
                    self.counters.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(event_id = %event.event_id, "duplicate or contended event skipped");
                } else if outcome.success {
                    self.counters.events_processed.fetch_add(1, Ordering::Relaxed);
                }
            }
            // Store I/O failure inside the guard itself.
            Err(error) => self.emit_error(&event, error),
        }
    }

    async fn execute_pipeline(
        &self,
        event: &ChannelEvent,
    ) -> Result<Option<ChannelResponse>, ChannelError> {
        let scope = RateScope {
            conversation: Some(event.conversation.label()),
            user: Some(event.sender.scope_key()),
        };
        let runtime = self;
        let result = self
            .policy
            .execute(&scope, move || async move {
                let turn = runtime.run_processor(event).await?;
                if let Some(response) = &turn.response {
                    runtime.dispatch_send(response).await?;
                }
                Ok(turn)
            })
            .await;
        match result {
            Ok(turn) => {
                // Commit the turn's messages exactly once, after the
                // attempt that actually delivered. Retried attempts only
                // ever staged locally, so a send failure cannot
                // double-append history.
                for message in turn.staged {
                    if let Err(error) = self.sessions.add_message(&turn.session_id, message).await
                    {
                        // The response is already delivered; losing the
                        // history write must not fail the event.
                        tracing::warn!(
                            event_id = %event.event_id,
                            session_id = %turn.session_id,
                            error = %error,
                            "failed to commit session message after delivery"
                        );
                        break;
                    }
                }
                Ok(turn.response)
            }
            Err(error) => {
                self.emit_error(event, error.clone());
                Err(error)
            }
        }
    }

    /// Steps 4a–4e: session, user message, mode dispatch, assistant
    /// message, response construction.
    ///
    /// History writes are staged, not persisted: the session value is
    /// updated locally so processors and generators see the in-flight
    /// turn, while the store commit happens once in `execute_pipeline`
    /// after the send succeeds. A retried attempt therefore rebuilds its
    /// staging from the last committed state instead of stacking
    /// duplicate messages.
    async fn run_processor(&self, event: &ChannelEvent) -> Result<ProcessedTurn, ChannelError> {
        let mut session = self.sessions.get_or_create_session(event).await?;
        let mut staged: Vec<SessionMessage> = Vec::new();

        // Guard against redelivery of an event whose turn was already
        // committed.
        let already_recorded = session
            .history
            .iter()
            .rev()
            .any(|message| message.event_id.as_deref() == Some(event.event_id.as_str()));
        if !already_recorded {
            let content = event
                .text()
                .map(str::to_string)
                .unwrap_or_else(|| format!("[{}]", event.kind.as_str()));
            let message =
                SessionMessage::user(content, event.timestamp_ms, event.event_id.clone());
            session.history.push(message.clone());
            staged.push(message);
        }

        let reply_text = if let Some(processor) = self.message_processor() {
            match processor.process(event, &session).await? {
                ProcessResult::Respond(response) => {
                    if let ResponsePayload::Text { text } = &response.payload {
                        staged.push(SessionMessage::assistant(
                            text.clone(),
                            current_unix_timestamp_ms(),
                        ));
                    }
                    return Ok(ProcessedTurn {
                        session_id: session.id,
                        staged,
                        response: Some(response),
                    });
                }
                ProcessResult::NeedsTool { name, arguments } => {
                    Some(self.run_tool(&name, &arguments).await?.render_text())
                }
                ProcessResult::Defer | ProcessResult::Ignore => None,
            }
        } else {
            match self.config.default_mode {
                ProcessingMode::Llm => {
                    Some(self.run_generation(event, &mut session, &mut staged).await?)
                }
                ProcessingMode::DirectTool => {
                    let (name, args) = event.command_line().ok_or_else(|| {
                        ChannelError::invalid_request(
                            "direct_tool mode requires an event with command text",
                        )
                    })?;
                    let arguments = serde_json::Value::from(args);
                    Some(self.run_tool(&name, &arguments).await?.render_text())
                }
                ProcessingMode::Custom => None,
            }
        };

        let response = match reply_text {
            Some(text) if !text.is_empty() => {
                staged.push(SessionMessage::assistant(
                    text.clone(),
                    current_unix_timestamp_ms(),
                ));
                Some(ChannelResponse::text(event.conversation.clone(), text))
            }
            _ => None,
        };
        Ok(ProcessedTurn {
            session_id: session.id,
            staged,
            response,
        })
    }

    /// Generation loop for `llm` mode: accumulate chunk text, execute any
    /// requested tools, stage their results as tool messages, continue
    /// until a round requests nothing further (or the round cap hits).
    async fn run_generation(
        &self,
        event: &ChannelEvent,
        session: &mut Session,
        staged: &mut Vec<SessionMessage>,
    ) -> Result<String, ChannelError> {
        let generator = self.response_generator().ok_or_else(|| {
            ChannelError::invalid_request("llm mode requires a response generator")
        })?;
        let mut accumulated = String::new();
        let mut tool_results: Vec<ToolExecutionResult> = Vec::new();
        for _round in 0..self.config.max_tool_rounds.max(1) {
            let chunk = generator.generate(event, session, &tool_results).await?;
            accumulated.push_str(&chunk.text);
            if chunk.tool_calls.is_empty() {
                return Ok(accumulated);
            }
            tool_results.clear();
            for call in &chunk.tool_calls {
                let result = self.run_tool(&call.name, &call.arguments).await?;
                let result_value = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
                let message = SessionMessage::tool(
                    result.render_text(),
                    current_unix_timestamp_ms(),
                    result_value,
                );
                session.history.push(message.clone());
                staged.push(message);
                tool_results.push(result);
            }
        }
        tracing::warn!(
            event_id = %event.event_id,
            rounds = self.config.max_tool_rounds,
            "generation stopped at tool round cap"
        );
        Ok(accumulated)
    }

    async fn run_tool(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolExecutionResult, ChannelError> {
        let tools = self
            .tool_provider()
            .ok_or_else(|| ChannelError::invalid_request("no tool provider configured"))?;
        tools.execute_tool(name, arguments).await
    }

    /// Step 5: route the response to the adapter owning its platform.
    async fn dispatch_send(&self, response: &ChannelResponse) -> Result<(), ChannelError> {
        let platform = response.conversation.platform.as_str();
        let adapter = self.adapter_for(platform).ok_or_else(|| {
            ChannelError::new(
                ErrorCode::NotFound,
                format!("no adapter registered for platform '{platform}'"),
            )
        })?;
        match adapter.send(response).await.into_result() {
            Ok(message_id) => {
                self.counters.responses_sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    platform,
                    message_id = message_id.as_deref().unwrap_or(""),
                    "response dispatched"
                );
                let _ = self.responses_tx.send(response.clone());
                Ok(())
            }
            Err(error) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }
}

async fn read_adapter_events(
    runtime: Arc<ChannelRuntime>,
    platform: String,
    mut receiver: broadcast::Receiver<ChannelEvent>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(event) => {
                    let runtime = Arc::clone(&runtime);
                    tracker.spawn(runtime.process_event(event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(platform = %platform, skipped, "adapter event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    tracing::debug!(platform = %platform, "adapter reader stopped");
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &StdRwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &StdRwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
