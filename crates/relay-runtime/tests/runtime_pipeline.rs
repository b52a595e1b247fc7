//! End-to-end pipeline tests against the scripted in-memory adapter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use relay_channel::{ChannelPort, ScriptedChannel};
use relay_core::{ChannelError, ErrorCode};
use relay_envelope::{
    ChannelEvent, ChannelIdentity, ChannelResponse, ConversationKey, ResponsePayload,
};
use relay_idempotency::IdempotencyConfig;
use relay_policy::{ChannelPolicy, RetryConfig};
use relay_runtime::{
    ChannelRuntime, GenerationChunk, MessageProcessor, ProcessResult, ProcessingMode,
    ResponseGenerator, RuntimeConfig, ToolDescriptor, ToolExecutionResult, ToolProvider,
};
use relay_session::{MessageRole, Session, ToolCall};

fn test_event(event_id: &str, text: &str) -> ChannelEvent {
    ChannelEvent::text_message(
        event_id,
        ConversationKey::new("scripted", "T1", "room-1"),
        ChannelIdentity::new("scripted", "U1"),
        relay_core::current_unix_timestamp_ms(),
        text,
    )
}

fn runtime_config(mode: ProcessingMode, guarded: bool) -> RuntimeConfig {
    RuntimeConfig {
        default_mode: mode,
        policy: ChannelPolicy::default(),
        idempotency: guarded.then(IdempotencyConfig::default),
        shutdown_grace: Duration::from_secs(5),
        ..RuntimeConfig::with_defaults()
    }
}

struct EchoProcessor {
    invocations: AtomicU32,
    fail_with: Option<ChannelError>,
}

impl EchoProcessor {
    fn new() -> Self {
        Self {
            invocations: AtomicU32::new(0),
            fail_with: None,
        }
    }

    fn failing(error: ChannelError) -> Self {
        Self {
            invocations: AtomicU32::new(0),
            fail_with: Some(error),
        }
    }

    fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageProcessor for EchoProcessor {
    async fn process(
        &self,
        event: &ChannelEvent,
        _session: &Session,
    ) -> Result<ProcessResult, ChannelError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let text = event.text().unwrap_or_default();
        Ok(ProcessResult::Respond(ChannelResponse::text(
            event.conversation.clone(),
            format!("echo: {text}"),
        )))
    }
}

struct EchoTools;

#[async_trait]
impl ToolProvider for EchoTools {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ChannelError> {
        Ok(vec![ToolDescriptor {
            name: "echo".to_string(),
            description: "echo the arguments back".to_string(),
            parameters: None,
        }])
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<ToolExecutionResult, ChannelError> {
        match name {
            "echo" => {
                let rendered = match arguments {
                    Value::Array(parts) => parts
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(" "),
                    other => other.to_string(),
                };
                Ok(ToolExecutionResult::ok("echo", json!(rendered)))
            }
            _ => Ok(ToolExecutionResult::failed(name, "unknown tool")),
        }
    }
}

/// Requests one tool roundtrip, then answers with the tool's output
/// folded in.
struct ToolLoopGenerator;

#[async_trait]
impl ResponseGenerator for ToolLoopGenerator {
    async fn generate(
        &self,
        _event: &ChannelEvent,
        _session: &Session,
        tool_results: &[ToolExecutionResult],
    ) -> Result<GenerationChunk, ChannelError> {
        if tool_results.is_empty() {
            Ok(GenerationChunk {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    name: "echo".to_string(),
                    arguments: json!(["tool", "data"]),
                }],
            })
        } else {
            let folded = tool_results[0].render_text();
            Ok(GenerationChunk {
                text: format!("based on {folded}: done"),
                tool_calls: Vec::new(),
            })
        }
    }
}

async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn integration_event_flows_from_adapter_to_send() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Custom,
        true,
    )));
    let processor = Arc::new(EchoProcessor::new());
    runtime.set_message_processor(processor.clone());
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime
        .register_channel(adapter.clone())
        .expect("register");

    let mut responses = runtime.subscribe_responses();
    runtime.start().await.expect("start");
    adapter.emit(test_event("evt-1", "hello"));

    let response = tokio::time::timeout(Duration::from_secs(3), responses.recv())
        .await
        .expect("response within deadline")
        .expect("response stream open");
    assert_eq!(
        response.payload,
        ResponsePayload::Text {
            text: "echo: hello".to_string()
        }
    );
    assert_eq!(adapter.sent_count(), 1);
    assert_eq!(processor.invocations(), 1);

    wait_until(|| runtime.summary().events_processed == 1, "summary update").await;
    let summary = runtime.summary();
    assert_eq!(summary.events_received, 1);
    assert_eq!(summary.responses_sent, 1);
    assert_eq!(summary.pipeline_errors, 0);

    runtime.stop().await.expect("stop");
    assert!(!adapter.is_running());
}

#[tokio::test]
async fn integration_duplicate_delivery_processes_once_and_sends_once() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Custom,
        true,
    )));
    let processor = Arc::new(EchoProcessor::new());
    runtime.set_message_processor(processor.clone());
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime.register_channel(adapter.clone()).expect("register");
    runtime.start().await.expect("start");

    // The platform redelivers the same event back-to-back.
    adapter.emit(test_event("evt-dup", "only once"));
    adapter.emit(test_event("evt-dup", "only once"));

    wait_until(
        || {
            let summary = runtime.summary();
            summary.events_received == 2
                && summary.events_processed + summary.duplicates_skipped == 2
        },
        "both deliveries settled",
    )
    .await;

    assert_eq!(processor.invocations(), 1, "processor ran exactly once");
    assert_eq!(adapter.sent_count(), 1, "send happened exactly once");
    let summary = runtime.summary();
    assert_eq!(summary.events_processed, 1);
    assert_eq!(summary.duplicates_skipped, 1);

    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn integration_unguarded_runtime_processes_every_delivery() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Custom,
        false,
    )));
    let processor = Arc::new(EchoProcessor::new());
    runtime.set_message_processor(processor.clone());
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime.register_channel(adapter.clone()).expect("register");
    runtime.start().await.expect("start");

    adapter.emit(test_event("evt-dup", "twice"));
    adapter.emit(test_event("evt-dup", "twice"));

    wait_until(|| runtime.summary().events_processed == 2, "both processed").await;
    assert_eq!(processor.invocations(), 2);
    assert_eq!(adapter.sent_count(), 2);

    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn integration_direct_tool_mode_runs_the_named_tool() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::DirectTool,
        true,
    )));
    runtime.set_tool_provider(Arc::new(EchoTools));
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime.register_channel(adapter.clone()).expect("register");

    let mut responses = runtime.subscribe_responses();
    runtime.start().await.expect("start");
    adapter.emit(test_event("evt-tool", "echo hello world"));

    let response = tokio::time::timeout(Duration::from_secs(3), responses.recv())
        .await
        .expect("response within deadline")
        .expect("stream open");
    assert_eq!(
        response.payload,
        ResponsePayload::Text {
            text: "hello world".to_string()
        }
    );

    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn integration_llm_mode_executes_tool_roundtrip_before_answering() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Llm,
        true,
    )));
    runtime.set_response_generator(Arc::new(ToolLoopGenerator));
    runtime.set_tool_provider(Arc::new(EchoTools));
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime.register_channel(adapter.clone()).expect("register");

    let mut responses = runtime.subscribe_responses();
    runtime.start().await.expect("start");
    let event = test_event("evt-llm", "what is the data?");
    adapter.emit(event.clone());

    let response = tokio::time::timeout(Duration::from_secs(3), responses.recv())
        .await
        .expect("response within deadline")
        .expect("stream open");
    assert_eq!(
        response.payload,
        ResponsePayload::Text {
            text: "based on tool data: done".to_string()
        }
    );

    // History: user → tool result → assistant, oldest first.
    let session = runtime
        .sessions()
        .get_session_by_conversation(&event.conversation)
        .await
        .expect("lookup")
        .expect("session exists");
    let roles: Vec<MessageRole> = session.history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Tool, MessageRole::Assistant]
    );
    assert_eq!(session.history[1].content, "tool data");

    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn integration_processor_failure_is_retried_then_surfaced_and_recorded() {
    let mut config = runtime_config(ProcessingMode::Custom, true);
    config.policy.retry = RetryConfig {
        max_attempts: 3,
        ..RetryConfig::default()
    };
    let runtime = Arc::new(ChannelRuntime::new(config));
    let processor = Arc::new(EchoProcessor::failing(ChannelError::server(
        "backend down",
    )));
    runtime.set_message_processor(processor.clone());
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime.register_channel(adapter.clone()).expect("register");

    let mut errors = runtime.subscribe_errors();
    runtime.start().await.expect("start");
    adapter.emit(test_event("evt-fail", "boom"));

    let surfaced = tokio::time::timeout(Duration::from_secs(3), errors.recv())
        .await
        .expect("error within deadline")
        .expect("stream open");
    assert_eq!(surfaced.event.event_id, "evt-fail");
    assert_eq!(surfaced.error.code, ErrorCode::ServerError);
    assert!(surfaced.timestamp_ms > 0);

    // server_error is retryable: the policy ran all three attempts.
    wait_until(|| processor.invocations() == 3, "retries exhausted").await;
    assert_eq!(adapter.sent_count(), 0);

    // The guard recorded the failure: a redelivery does not re-run the
    // processor.
    adapter.emit(test_event("evt-fail", "boom"));
    wait_until(
        || runtime.summary().duplicates_skipped == 1,
        "redelivery skipped",
    )
    .await;
    assert_eq!(processor.invocations(), 3);

    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn integration_transient_send_failure_is_retried_to_success() {
    let mut config = runtime_config(ProcessingMode::Custom, true);
    config.policy.retry = RetryConfig {
        max_attempts: 2,
        ..RetryConfig::default()
    };
    let runtime = Arc::new(ChannelRuntime::new(config));
    let processor = Arc::new(EchoProcessor::new());
    runtime.set_message_processor(processor.clone());
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    adapter.fail_next_send(ChannelError::network("socket reset"));
    runtime.register_channel(adapter.clone()).expect("register");

    let mut responses = runtime.subscribe_responses();
    runtime.start().await.expect("start");
    adapter.emit(test_event("evt-retry", "persist"));

    let response = tokio::time::timeout(Duration::from_secs(3), responses.recv())
        .await
        .expect("response within deadline")
        .expect("stream open");
    assert!(matches!(response.payload, ResponsePayload::Text { .. }));

    wait_until(|| runtime.summary().responses_sent == 1, "send settled").await;
    let summary = runtime.summary();
    assert_eq!(summary.send_failures, 1);
    assert_eq!(summary.responses_sent, 1);
    assert_eq!(adapter.sent_count(), 1);

    // The retried attempt must not stack duplicate turns: exactly one
    // user message and one assistant message after the successful send.
    wait_until(|| runtime.summary().events_processed == 1, "turn committed").await;
    let session = runtime
        .sessions()
        .get_session_by_conversation(&ConversationKey::new("scripted", "T1", "room-1"))
        .await
        .expect("lookup")
        .expect("session exists");
    let roles: Vec<MessageRole> = session.history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);

    runtime.stop().await.expect("stop");
}

#[tokio::test]
async fn integration_registration_is_rejected_while_running() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Custom,
        true,
    )));
    runtime
        .register_channel(Arc::new(ScriptedChannel::new("scripted")))
        .expect("register before start");
    runtime.start().await.expect("start");
    assert!(runtime.is_running());

    let error = runtime
        .register_channel(Arc::new(ScriptedChannel::new("late")))
        .expect_err("register while running");
    assert_eq!(error.code, ErrorCode::InvalidRequest);

    // Idempotent lifecycle.
    runtime.start().await.expect("second start is a no-op");
    runtime.stop().await.expect("stop");
    runtime.stop().await.expect("second stop is a no-op");
    assert!(!runtime.is_running());
}

#[tokio::test]
async fn integration_duplicate_platform_registration_is_rejected() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Custom,
        true,
    )));
    runtime
        .register_channel(Arc::new(ScriptedChannel::new("scripted")))
        .expect("first");
    let error = runtime
        .register_channel(Arc::new(ScriptedChannel::new("scripted")))
        .expect_err("duplicate platform");
    assert_eq!(error.code, ErrorCode::InvalidRequest);
}

#[tokio::test]
async fn integration_custom_mode_without_processor_produces_no_response() {
    let runtime = Arc::new(ChannelRuntime::new(runtime_config(
        ProcessingMode::Custom,
        true,
    )));
    let adapter = Arc::new(ScriptedChannel::new("scripted"));
    runtime.register_channel(adapter.clone()).expect("register");
    runtime.start().await.expect("start");

    adapter.emit(test_event("evt-quiet", "nothing to say"));
    wait_until(|| runtime.summary().events_processed == 1, "processed").await;
    assert_eq!(adapter.sent_count(), 0);
    assert_eq!(runtime.summary().responses_sent, 0);

    // The session still recorded the user message.
    let session = runtime
        .sessions()
        .get_session_by_conversation(&ConversationKey::new("scripted", "T1", "room-1"))
        .await
        .expect("lookup")
        .expect("session");
    assert_eq!(session.history.len(), 1);
    assert_eq!(session.history[0].role, MessageRole::User);

    runtime.stop().await.expect("stop");
}
