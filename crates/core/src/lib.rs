//! Core logic of the assistant: the tool registry, local and deferred tool
//! execution, and the agent loop that drives a conversation.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentStage, TranscriptSource};
pub use model_client::RetryPolicy;
