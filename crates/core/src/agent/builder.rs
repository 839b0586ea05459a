use std::sync::Arc;
use std::time::Duration;

use novus_model::ModelProvider;

use super::{Agent, AgentStage, TranscriptSource};
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{DeferredRequest, Registry};

pub(crate) type OnTranscript = Arc<dyn Fn(&str, TranscriptSource) + Send + Sync>;
pub(crate) type OnDeferredCall = Arc<dyn Fn(&DeferredRequest) + Send + Sync>;

/// Model rounds allowed in a single user turn by default.
const DEFAULT_MAX_ROUNDS: usize = 16;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) system_prompt: Option<String>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) deferred_timeout: Option<Duration>,
    pub(crate) max_rounds: usize,
    pub(crate) on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_transcript: Option<OnTranscript>,
    pub(crate) on_stage_change: Option<Box<dyn Fn(AgentStage) + Send + Sync>>,
    pub(crate) on_deferred_call: Option<OnDeferredCall>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            registry: Default::default(),
            deferred_timeout: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            on_idle: None,
            on_transcript: None,
            on_stage_change: None,
            on_deferred_call: None,
        }
    }

    /// Sets the instructions sent ahead of the conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the tools available to the model.
    ///
    /// The registry is immutable from now on and can be shared by any
    /// number of agents.
    #[inline]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets how failed model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.model_client = self.model_client.with_retry_policy(policy);
        self
    }

    /// Bounds how long a deferred call waits for the client, `None` (the
    /// default) waits until it is resolved or the agent is cancelled.
    #[inline]
    pub fn with_deferred_timeout(mut self, limit: Option<Duration>) -> Self {
        self.deferred_timeout = limit;
        self
    }

    /// Sets how many model rounds a single user turn may take.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Attaches a callback to be invoked when the agent is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback receiving the text shown to the user.
    ///
    /// Assistant text arrives in deltas as it streams from the model.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked on every stage transition.
    #[inline]
    pub fn on_stage_change(
        mut self,
        on_stage_change: impl Fn(AgentStage) + Send + Sync + 'static,
    ) -> Self {
        self.on_stage_change = Some(Box::new(on_stage_change));
        self
    }

    /// Attaches a callback receiving every deferred call the client has to
    /// perform.
    #[inline]
    pub fn on_deferred_call(
        mut self,
        on_deferred_call: impl Fn(&DeferredRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_deferred_call = Some(Arc::new(on_deferred_call));
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::spawn_from_builder(self)
    }
}
