use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::Arc;

use novus_actor::{Actor, ActorState, Message};
use novus_model::{
    AssistantToolCalls, ModelMessage, ModelProviderError, ModelRequest,
    ToolCallRequest, ToolCallResult,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::builder::{AgentBuilder, OnTranscript};
use crate::conversation::Conversation;
use crate::model_client::{ModelClient, ModelClientResponse, OnDelta};
use crate::tool::{
    DispatchContext, ExecutionLocus, PendingCalls, Registry, ToolResult,
};

/// The stage an agent is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStage {
    /// Nothing to do until the user says something.
    #[default]
    AwaitingUserInput,
    /// A model request is in flight.
    ModelThinking,
    /// At least one backend tool call is still running.
    RunningTools,
    /// Only calls waiting for the client are outstanding.
    AwaitingFrontendResult,
}

/// Who a piece of transcript comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// The user input that started a turn.
    User,
    /// Text streamed from the model.
    Assistant,
    /// A turn that could not be completed.
    Failure,
}

struct ToolSlot {
    call_id: String,
    locus: Option<ExecutionLocus>,
    result: Option<ToolResult>,
}

pub(crate) struct AgentState {
    model_client: ModelClient,
    registry: Arc<Registry>,
    dispatch_ctx: DispatchContext,
    conversation: Conversation,
    current_stage: AgentStage,
    pending_inputs: VecDeque<String>,
    tool_slots: Vec<ToolSlot>,
    rounds: usize,
    max_rounds: usize,
    running_tasks: HashMap<u64, JoinHandle<()>>,
    next_task_id: u64,

    on_idle: Option<Box<dyn Fn() + Send + Sync>>,
    on_transcript: Option<OnTranscript>,
    on_stage_change: Option<Box<dyn Fn(AgentStage) + Send + Sync>>,
}

impl AgentState {
    pub(crate) fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            system_prompt,
            registry,
            deferred_timeout,
            max_rounds,
            on_idle,
            on_transcript,
            on_stage_change,
            on_deferred_call,
        } = builder;

        let mut dispatch_ctx =
            DispatchContext::new(Arc::new(PendingCalls::default()))
                .with_deferred_timeout(deferred_timeout);
        if let Some(on_deferred_call) = on_deferred_call {
            dispatch_ctx =
                dispatch_ctx.on_deferred(move |req| on_deferred_call(req));
        }

        let mut conversation = Conversation::default();
        if let Some(system_prompt) = system_prompt {
            conversation.push(ModelMessage::System(system_prompt));
        }

        Self {
            model_client,
            registry,
            dispatch_ctx,
            conversation,
            current_stage: Default::default(),
            pending_inputs: Default::default(),
            tool_slots: Default::default(),
            rounds: 0,
            max_rounds,
            running_tasks: Default::default(),
            next_task_id: 1,
            on_idle,
            on_transcript,
            on_stage_change,
        }
    }

    #[inline]
    pub(crate) fn pending(&self) -> &Arc<PendingCalls> {
        self.dispatch_ctx.pending()
    }

    #[inline]
    pub(crate) fn stage(&self) -> AgentStage {
        self.current_stage
    }

    #[inline]
    pub(crate) fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn set_stage(&mut self, stage: AgentStage) {
        if self.current_stage == stage {
            return;
        }
        debug!("stage: {:?} -> {:?}", self.current_stage, stage);
        self.current_stage = stage;
        if let Some(on_stage_change) = &self.on_stage_change {
            on_stage_change(stage);
        }
    }

    fn emit_transcript(&self, text: &str, source: TranscriptSource) {
        if let Some(on_transcript) = &self.on_transcript {
            on_transcript(text, source);
        }
    }

    fn enqueue_user_input(&mut self, input: String, handle: &Actor<Self>) {
        if self.current_stage != AgentStage::AwaitingUserInput {
            // The input is picked up when the current turn ends.
            self.pending_inputs.push_back(input);
            return;
        }
        self.start_turn(input, handle);
    }

    fn process_next_input(&mut self, handle: &Actor<Self>) {
        self.set_stage(AgentStage::AwaitingUserInput);
        if let Some(input) = self.pending_inputs.pop_front() {
            self.start_turn(input, handle);
        } else if let Some(on_idle) = &self.on_idle {
            on_idle();
        }
    }

    fn start_turn(&mut self, input: String, handle: &Actor<Self>) {
        self.emit_transcript(&input, TranscriptSource::User);
        self.conversation.push(ModelMessage::User(input));
        self.rounds = 0;
        self.request_model(handle);
    }

    fn request_model(&mut self, handle: &Actor<Self>) {
        if self.rounds >= self.max_rounds {
            warn!("giving up after {} model rounds", self.rounds);
            self.fail_turn(
                &format!(
                    "I stopped after {} rounds of tool calls without reaching \
                     an answer. Please narrow down the request and try again.",
                    self.rounds
                ),
                handle,
            );
            return;
        }
        self.rounds += 1;
        self.set_stage(AgentStage::ModelThinking);

        let request = ModelRequest {
            messages: self.conversation.messages(),
            tools: self.registry.definitions(),
        };
        let model_client = self.model_client.clone();
        let on_delta: OnDelta = match &self.on_transcript {
            Some(on_transcript) => {
                let on_transcript = Arc::clone(on_transcript);
                Arc::new(move |delta: String| {
                    on_transcript(&delta, TranscriptSource::Assistant)
                })
            }
            None => Arc::new(|_: String| {}),
        };
        let handle_clone = handle.clone();
        let round = self.rounds;
        self.spawn_task(
            async move {
                let response =
                    model_client.send_request(request, on_delta).await;
                handle_clone.send(ModelRequestFinished { response }).ok();
            }
            .instrument(debug_span!("model round", round)),
            handle,
        );
    }

    fn fail_turn(&mut self, reason: &str, handle: &Actor<Self>) {
        self.emit_transcript(reason, TranscriptSource::Failure);
        self.process_next_input(handle);
    }

    fn handle_model_response(
        &mut self,
        resp: ModelClientResponse,
        handle: &Actor<Self>,
    ) {
        let ModelClientResponse {
            content,
            tool_calls,
            finish_reason,
        } = resp;
        trace!("model finished with {finish_reason:?}");

        if tool_calls.is_empty() {
            self.conversation.push(ModelMessage::Assistant(content));
            self.process_next_input(handle);
            return;
        }

        self.conversation
            .push(ModelMessage::ToolCalls(AssistantToolCalls {
                content,
                calls: tool_calls.clone(),
            }));
        self.dispatch_tools(tool_calls, handle);
    }

    fn dispatch_tools(
        &mut self,
        tool_calls: Vec<ToolCallRequest>,
        handle: &Actor<Self>,
    ) {
        let registry = Arc::clone(&self.registry);
        let ctx = self.dispatch_ctx.clone();
        let mut started = vec![];
        registry.handle_requests(tool_calls, &ctx, |call_id, locus, fut| {
            started.push((call_id, locus, fut));
        });

        for (slot, (call_id, locus, fut)) in started.into_iter().enumerate() {
            self.tool_slots.push(ToolSlot {
                call_id,
                locus,
                result: None,
            });
            let handle_clone = handle.clone();
            self.spawn_task(
                async move {
                    let result = fut.await;
                    handle_clone.send(ToolFinished { slot, result }).ok();
                },
                handle,
            );
        }
        self.update_tool_stage();
    }

    fn update_tool_stage(&mut self) {
        let outstanding = self.tool_slots.iter().filter(|s| s.result.is_none());
        let mut any_outstanding = false;
        let mut any_local = false;
        for slot in outstanding {
            any_outstanding = true;
            if slot.locus != Some(ExecutionLocus::Deferred) {
                any_local = true;
            }
        }
        if !any_outstanding {
            return;
        }
        self.set_stage(if any_local {
            AgentStage::RunningTools
        } else {
            AgentStage::AwaitingFrontendResult
        });
    }

    fn tool_finished(
        &mut self,
        slot: usize,
        result: ToolResult,
        handle: &Actor<Self>,
    ) {
        let Some(entry) = self.tool_slots.get_mut(slot) else {
            warn!("result for unknown tool slot {slot}");
            return;
        };
        if entry.result.is_some() {
            warn!("tool call {} finished twice", entry.call_id);
            return;
        }
        if let Err(err) = &result {
            debug!("tool call {} failed: {err}", entry.call_id);
        }
        entry.result = Some(result);

        if self.tool_slots.iter().any(|s| s.result.is_none()) {
            self.update_tool_stage();
            return;
        }

        // Every call has finished, results go back in request order.
        for slot in std::mem::take(&mut self.tool_slots) {
            let content = match slot.result {
                Some(Ok(output)) => output,
                Some(Err(err)) => format!("Error: {err}"),
                None => continue,
            };
            self.conversation.push(ModelMessage::Tool(ToolCallResult {
                id: slot.call_id,
                content,
            }));
        }
        self.request_model(handle);
    }

    fn spawn_task<Fut>(&mut self, fut: Fut, handle: &Actor<Self>)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let handle = handle.clone();
        let task = tokio::spawn(async move {
            fut.await;
            handle.send(TaskEnded(task_id)).ok();
        });
        self.running_tasks.insert(task_id, task);
    }
}

impl ActorState for AgentState {
    fn on_stop(&mut self) {
        let tasks = self.running_tasks.len();
        for (_, task) in self.running_tasks.drain() {
            task.abort();
        }
        self.pending().clear();
        self.tool_slots.clear();
        self.pending_inputs.clear();
        debug!("agent stopped, aborted {tasks} task(s)");
    }
}

#[derive(Debug)]
pub(crate) struct EnqueueUserInput(pub String);

impl Message<AgentState> for EnqueueUserInput {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        state.enqueue_user_input(self.0, handle);
    }
}

struct ModelRequestFinished {
    response: Result<ModelClientResponse, Box<dyn ModelProviderError>>,
}

impl Debug for ModelRequestFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRequestFinished")
            .field("response", &self.response)
            .finish()
    }
}

impl Message<AgentState> for ModelRequestFinished {
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        match self.response {
            Ok(resp) => state.handle_model_response(resp, handle),
            Err(err) => {
                error!("model request failed: {err}");
                let reason = if err.kind().is_transient() {
                    format!(
                        "Sorry, I could not reach the model ({err}). Please \
                         try again in a moment."
                    )
                } else {
                    format!("Sorry, the model refused the request ({err}).")
                };
                state.fail_turn(&reason, handle);
            }
        }
    }
}

#[derive(Debug)]
struct ToolFinished {
    slot: usize,
    result: ToolResult,
}

impl Message<AgentState> for ToolFinished {
    #[inline]
    fn handle(self, state: &mut AgentState, handle: &Actor<AgentState>) {
        state.tool_finished(self.slot, self.result, handle);
    }
}

#[derive(Debug)]
struct TaskEnded(u64);

impl Message<AgentState> for TaskEnded {
    #[inline]
    fn handle(self, state: &mut AgentState, _handle: &Actor<AgentState>) {
        if state.running_tasks.remove(&self.0).is_none() {
            trace!("task {} ended after being released", self.0);
        }
    }
}
