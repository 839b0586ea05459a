mod builder;
mod state;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use novus_actor::{Actor, ActorDeadError};

use crate::conversation::Conversation;
use crate::tool::{DeferredRequest, FrontendResult, PendingCalls, ResolveError};
pub use builder::AgentBuilder;
pub use state::{AgentStage, TranscriptSource};
use state::{AgentState, EnqueueUserInput};

/// An agent instance, which maintains a conversation, a model client, the
/// tools and internal state of one session.
///
/// Messages dispatched to the agent are handled immediately, no matter what
/// stage the agent is in. For example, if the agent is waiting for a
/// frontend result, it still accepts user input. Instead of calling the
/// model, the agent queues the input and handles it when it becomes idle.
#[derive(Clone)]
pub struct Agent {
    actor: Actor<AgentState>,
    pending: Arc<PendingCalls>,
}

impl Agent {
    /// Enqueues a user input for processing.
    pub fn enqueue_user_input<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<(), ActorDeadError> {
        self.actor.send(EnqueueUserInput(input.into()))
    }

    /// Delivers the client's result of a deferred tool call.
    ///
    /// The waiting call resumes with exactly `result.result` as its output.
    #[inline]
    pub fn resolve_tool_call(
        &self,
        result: FrontendResult,
    ) -> Result<(), ResolveError> {
        self.pending.resolve(result)
    }

    /// Returns the deferred calls still waiting for the client.
    #[inline]
    pub fn pending_tool_calls(&self) -> Vec<DeferredRequest> {
        self.pending.requests()
    }

    /// Returns the current stage.
    pub async fn stage(&self) -> Result<AgentStage, ActorDeadError> {
        self.actor.ask(|state| state.stage()).await
    }

    /// Returns a snapshot of the conversation.
    pub async fn conversation(&self) -> Result<Conversation, ActorDeadError> {
        self.actor.ask(|state| state.conversation().clone()).await
    }

    /// Cancels the session.
    ///
    /// In-flight model requests and tool executions are aborted, and every
    /// pending deferred call is dropped without producing a result.
    #[inline]
    pub fn cancel(&self) {
        self.actor.kill();
    }

    /// Returns `true` until the agent has been cancelled.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.actor.is_alive()
    }

    /// Waits until the agent has stopped.
    #[inline]
    pub async fn stopped(&self) {
        self.actor.stopped().await
    }
}

impl Agent {
    fn spawn_from_builder(builder: AgentBuilder) -> Self {
        let state = AgentState::from_builder(builder);
        let pending = Arc::clone(state.pending());
        let actor = Actor::spawn(state, Some("agent"));
        Self { actor, pending }
    }
}
