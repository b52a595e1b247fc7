//! Runtime orchestrator for the relay gateway.
//!
//! Owns the registered adapters, subscribes to their event streams, and
//! drives every received event through idempotency → policy → processor →
//! response emission. Exposes observable `events` / `responses` / `errors`
//! streams for instrumentation; the streams never participate in flow
//! control.

pub mod config;
pub mod processor;
pub mod runtime;

pub use config::{ProcessingMode, RuntimeConfig};
pub use processor::{
    GenerationChunk, MessageProcessor, ProcessResult, ResponseGenerator, ToolDescriptor,
    ToolExecutionResult, ToolProvider,
};
pub use runtime::{ChannelRuntime, ChannelRuntimeError, RuntimeSummary};
